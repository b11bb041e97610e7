use time::{OffsetDateTime, UtcOffset};

/// Source of "now" in the reference timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[cfg(test)]
pub use fixed::FixedClock;

#[cfg(test)]
mod fixed {
    use std::sync::Mutex;

    use time::{Duration, OffsetDateTime};

    use super::Clock;

    /// Manually driven clock for tests.
    pub struct FixedClock(Mutex<OffsetDateTime>);

    impl FixedClock {
        pub fn at(now: OffsetDateTime) -> Self {
            Self(Mutex::new(now))
        }

        pub fn set(&self, now: OffsetDateTime) {
            *self.0.lock().unwrap() = now;
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn system_clock_reports_in_reference_offset() {
        let clock = SystemClock::new(offset!(+02:00));
        assert_eq!(clock.now().offset(), offset!(+02:00));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::at(datetime!(2024-01-05 08:00 UTC));
        clock.advance(time::Duration::minutes(90));
        assert_eq!(clock.now(), datetime!(2024-01-05 09:30 UTC));
    }
}
