//! The feed service scenario: repost a feed, read feeds and notifications.
use crate::{Method, TaskDefinition};
use serde_json::json;

pub const FEED_ID_VAR: &str = "feed_id";
pub const DEFAULT_FEED_ID: &str = "6665820807295401984";

pub fn tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::builder()
            .name("create_feed_repost")
            .method(Method::POST)
            .path("/api/v1/feeds/{feed_id}/reposts")
            .body(json!({"content": "123", "isSuccessful": true}))
            .build(),
        TaskDefinition::builder()
            .name("get_feeds")
            .path("/api/v1/feeds")
            .build(),
        TaskDefinition::builder()
            .name("get_notifications")
            .path("/api/v1/notifications")
            .build(),
        // Disabled unless reweighted from the settings file.
        TaskDefinition::builder()
            .name("get_configs")
            .weight(0)
            .path("/api/v1/configs?configType=IOS")
            .requires_auth(false)
            .build(),
    ]
}
