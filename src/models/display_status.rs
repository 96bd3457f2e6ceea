//! Derived status for tasks and projects.
//!
//! Display status is never persisted. It is recomputed on every read from the
//! task's progress and schedule, so the same inputs always give the same
//! answer and nothing can drift out of date.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use qcflow::models::DisplayStatus;
//! use qcflow::models::display_status::display_status;
//!
//! let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
//! let start = NaiveDate::from_ymd_opt(2026, 3, 1);
//! let end = NaiveDate::from_ymd_opt(2026, 3, 5);
//!
//! assert_eq!(display_status(40, start, end, today), DisplayStatus::Delayed);
//! assert_eq!(display_status(100, start, end, today), DisplayStatus::Completed);
//! ```

use chrono::NaiveDate;

use super::DisplayStatus;

/// Compute a task's display status.
///
/// Rules, first match wins:
/// 1. progress ≥ 100 → completed
/// 2. no start date, or today before the start date → not_started
/// 3. end date present and today after it → delayed
/// 4. otherwise → in_progress
pub fn display_status(
    progress: u8,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    today: NaiveDate,
) -> DisplayStatus {
    if progress >= 100 {
        return DisplayStatus::Completed;
    }

    match start_date {
        None => return DisplayStatus::NotStarted,
        Some(start) if today < start => return DisplayStatus::NotStarted,
        Some(_) => {}
    }

    if end_date.is_some_and(|end| today > end) {
        return DisplayStatus::Delayed;
    }

    DisplayStatus::InProgress
}

/// Roll task display statuses up into a project status.
///
/// A project with no tasks, or whose tasks have all yet to start, has not
/// started. It is completed when every task is, delayed as soon as any task
/// is, and in progress otherwise.
pub fn project_status(task_statuses: &[DisplayStatus]) -> DisplayStatus {
    if task_statuses
        .iter()
        .all(|s| *s == DisplayStatus::NotStarted)
    {
        return DisplayStatus::NotStarted;
    }
    if task_statuses.iter().all(|s| *s == DisplayStatus::Completed) {
        return DisplayStatus::Completed;
    }
    if task_statuses.contains(&DisplayStatus::Delayed) {
        return DisplayStatus::Delayed;
    }
    DisplayStatus::InProgress
}

/// Mean task progress, rounded down. Zero for a project without tasks.
pub fn project_progress(task_progress: &[u8]) -> u8 {
    if task_progress.is_empty() {
        return 0;
    }
    let sum: u32 = task_progress.iter().map(|p| u32::from(*p)).sum();
    (sum / task_progress.len() as u32).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_completed_wins_over_dates() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(100, None, None, today),
            DisplayStatus::Completed
        );
        assert_eq!(
            display_status(100, Some(date(2026, 1, 1)), Some(date(2026, 2, 1)), today),
            DisplayStatus::Completed
        );
    }

    #[test]
    fn test_missing_start_is_not_started() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(50, None, Some(date(2026, 4, 1)), today),
            DisplayStatus::NotStarted
        );
    }

    #[test]
    fn test_future_start_is_not_started() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(0, Some(date(2026, 5, 2)), None, today),
            DisplayStatus::NotStarted
        );
    }

    #[test]
    fn test_start_day_counts_as_started() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(0, Some(today), Some(today), today),
            DisplayStatus::InProgress
        );
    }

    #[test]
    fn test_past_end_is_delayed() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(99, Some(date(2026, 4, 1)), Some(date(2026, 4, 30)), today),
            DisplayStatus::Delayed
        );
    }

    #[test]
    fn test_open_ended_task_is_in_progress() {
        let today = date(2026, 5, 1);
        assert_eq!(
            display_status(10, Some(date(2026, 4, 1)), None, today),
            DisplayStatus::InProgress
        );
    }

    #[test]
    fn test_display_status_is_repeatable() {
        let today = date(2026, 5, 1);
        let start = Some(date(2026, 4, 1));
        let end = Some(date(2026, 4, 15));
        let first = display_status(30, start, end, today);
        let second = display_status(30, start, end, today);
        assert_eq!(first, second);
    }

    #[test]
    fn test_project_status_rollup() {
        use DisplayStatus::*;
        assert_eq!(project_status(&[]), NotStarted);
        assert_eq!(project_status(&[NotStarted, NotStarted]), NotStarted);
        assert_eq!(project_status(&[Completed, Completed]), Completed);
        assert_eq!(project_status(&[Completed, Delayed, InProgress]), Delayed);
        assert_eq!(project_status(&[Completed, NotStarted]), InProgress);
        assert_eq!(project_status(&[InProgress, NotStarted]), InProgress);
    }

    #[test]
    fn test_project_progress_mean() {
        assert_eq!(project_progress(&[]), 0);
        assert_eq!(project_progress(&[100, 50, 0]), 50);
        assert_eq!(project_progress(&[33, 34]), 33);
    }
}
