//! Training gate
//!
//! Training runs when the last successful `train_model` of a successful DAG
//! run lies at least `interval_days` whole days before the current execution
//! date, or when there has never been one.

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingDecision {
    Train,
    Skip,
}

pub fn should_train(last_success: Option<NaiveDate>, execution_date: NaiveDate, interval_days: i64) -> TrainingDecision {
    match last_success {
        None => TrainingDecision::Train,
        Some(last) if (execution_date - last).num_days() < interval_days => TrainingDecision::Skip,
        Some(_) => TrainingDecision::Train,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_run_trains() {
        assert_eq!(should_train(None, day(2024, 5, 1), 15), TrainingDecision::Train);
    }

    #[test]
    fn test_interval_boundary() {
        let last = day(2024, 5, 1);
        assert_eq!(should_train(Some(last), day(2024, 5, 15), 15), TrainingDecision::Skip);
        assert_eq!(should_train(Some(last), day(2024, 5, 16), 15), TrainingDecision::Train);
        assert_eq!(should_train(Some(last), day(2024, 7, 1), 15), TrainingDecision::Train);
    }
}
