use crate::ConfigError;
use rand::Rng;
use std::time::Duration;

/// Pause a virtual user takes between two consecutive tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThinkTime {
    #[default]
    None,
    Constant(Duration),
    /// Uniformly sampled, both bounds inclusive.
    Between { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn between(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidThinkTime { min, max });
        }
        if min == max {
            return Ok(Self::Constant(min));
        }
        Ok(Self::Between { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => d,
            Self::Between { min, max } => {
                let nanos = rng.gen_range(min.as_nanos()..=max.as_nanos());
                Duration::from_nanos(nanos as u64)
            }
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        match *self {
            Self::None => (Duration::ZERO, Duration::ZERO),
            Self::Constant(d) => (d, d),
            Self::Between { min, max } => (min, max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn samples_stay_in_range() {
        let think = ThinkTime::between(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let d = think.sample(&mut rng);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(5), "{d:?}");
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = ThinkTime::between(Duration::from_secs(5), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThinkTime { .. }));
    }

    #[test]
    fn equal_bounds_collapse_to_constant() {
        let d = Duration::from_millis(250);
        assert_eq!(ThinkTime::between(d, d).unwrap(), ThinkTime::Constant(d));
        assert_eq!(ThinkTime::None.sample(&mut rand::thread_rng()), Duration::ZERO);
    }
}
