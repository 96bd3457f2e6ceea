//! Checklist completion and task progress arithmetic.

use serde::{Deserialize, Serialize};

use super::ItemResult;

/// Counts of item results for one checklist instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTally {
    /// Number of items on the template
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub na: usize,
}

impl ResultTally {
    /// Tally a set of recorded results against a template of `total` items.
    pub fn from_results<I>(total: usize, results: I) -> Self
    where
        I: IntoIterator<Item = ItemResult>,
    {
        let mut tally = Self {
            total,
            ..Self::default()
        };
        for result in results {
            match result {
                ItemResult::Pass => tally.pass += 1,
                ItemResult::Fail => tally.fail += 1,
                ItemResult::Na => tally.na += 1,
            }
        }
        tally
    }

    /// Items with any result (pass, fail or na).
    pub fn scored(&self) -> usize {
        self.pass + self.fail + self.na
    }

    /// Returns true when every template item has a result.
    pub fn is_fully_scored(&self) -> bool {
        self.total > 0 && self.scored() >= self.total
    }

    pub fn has_failure(&self) -> bool {
        self.fail > 0
    }

    /// Completion percentage: scored / total × 100. Zero for an empty template.
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.scored().min(self.total) as f64 / self.total as f64) * 100.0
    }

    /// Pass rate among scored items, excluding `na`. None when nothing was judged.
    pub fn pass_rate(&self) -> Option<f64> {
        let judged = self.pass + self.fail;
        if judged == 0 {
            None
        } else {
            Some(self.pass as f64 / judged as f64 * 100.0)
        }
    }

    fn merge(&mut self, other: &ResultTally) {
        self.total += other.total;
        self.pass += other.pass;
        self.fail += other.fail;
        self.na += other.na;
    }
}

/// Task progress implied by its live checklists.
///
/// Items that passed or do not apply count as done; failed and unscored items
/// do not. Returns `None` when the task has no checklist items, in which case
/// the manually entered progress stands.
pub fn task_progress(checklists: &[ResultTally]) -> Option<u8> {
    let mut combined = ResultTally::default();
    for tally in checklists {
        combined.merge(tally);
    }
    if combined.total == 0 {
        return None;
    }
    let done = (combined.pass + combined.na).min(combined.total);
    Some((done * 100 / combined.total) as u8)
}
