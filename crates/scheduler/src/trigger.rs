use crate::error::SchedulerError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(Box<Schedule>),
    Interval(Duration),
}

impl Trigger {
    /// Parses a cron expression.
    ///
    /// Accepts the classic 5-field form (minute precision), which is run at
    /// second zero, as well as the 6 and 7 field forms with seconds and years.
    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidCron { expression: expression.to_string(), reason };

        let normalized = match expression.split_whitespace().count() {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            n => return Err(invalid(format!("expected 5, 6 or 7 fields, found {n}"))),
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    pub fn interval(period: Duration) -> Result<Self, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidInterval(format!("{period:?}")));
        }
        Ok(Trigger::Interval(period))
    }

    /// The next cron fire time after now. Intervals are tracked by the job loop.
    pub(crate) fn upcoming(&self) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.upcoming(Utc).next(),
            Trigger::Interval(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rstest::rstest;

    #[rstest]
    #[case("0 */6 * * *")]
    #[case("30 3 * * *")]
    #[case("0 0 */6 * * *")]
    #[case("0 30 3 * * * 2099")]
    fn accepts_minute_and_second_precision(#[case] expression: &str) {
        let trigger = Trigger::cron(expression).unwrap();
        let next = trigger.upcoming().unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.second(), 0);
    }

    #[rstest]
    #[case("")]
    #[case("* * *")]
    #[case("61 * * * *")]
    #[case("every six hours")]
    fn rejects_malformed_expressions(#[case] expression: &str) {
        assert!(matches!(Trigger::cron(expression), Err(SchedulerError::InvalidCron { .. })));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(Trigger::interval(Duration::ZERO).is_err());
        assert!(Trigger::interval(Duration::from_secs(300)).is_ok());
    }
}
