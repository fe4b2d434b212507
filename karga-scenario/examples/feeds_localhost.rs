use karga_scenario::{
    feeds, Credentials, Scenario, ScenarioReport, ScenarioRunner, TaskTable, ThinkTime,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let username = std::env::var("KARGA_CREDENTIALS__USERNAME")?;
    let password = std::env::var("KARGA_CREDENTIALS__PASSWORD")?;

    let scenario = Scenario::new("http://localhost:3000")?
        .think_time(ThinkTime::between(Duration::from_secs(1), Duration::from_secs(5))?)
        .var(feeds::FEED_ID_VAR, feeds::DEFAULT_FEED_ID);

    let results = ScenarioRunner::builder()
        .scenario(scenario)
        .tasks(TaskTable::new(feeds::tasks())?)
        .users(300)
        .spawn_rate(50.0)
        .duration(Duration::from_secs(60))
        .credentials(Credentials::new(username, password))
        .build()
        .run()
        .await?;

    let report = ScenarioReport::from(results);
    println!("{report:#?}");
    Ok(())
}
