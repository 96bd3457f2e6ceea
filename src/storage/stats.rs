//! Dashboard aggregation.
//!
//! Counts are computed with batched `GROUP BY` queries over a set of
//! projects. Task display statuses depend on today's date and are derived in
//! Rust from the raw schedule columns.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;

use super::{Storage, placeholders};
use crate::Result;
use crate::models::display_status::{display_status, project_progress};
use crate::models::{
    ChecklistStatus, DefectSeverity, DefectStatus, DefectType, DisplayStatus, ItemResult,
};

/// Item-level result counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub pass: usize,
    pub fail: usize,
    pub na: usize,
}

/// Counters shared by per-project stats and the cross-project summary.
#[derive(Debug, Clone, Serialize)]
pub struct StatCounts {
    pub task_count: usize,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub average_progress: u8,
    pub checklists_by_status: BTreeMap<String, usize>,
    /// completed / (completed + failed), as a percentage
    pub checklist_pass_rate: Option<f64>,
    pub item_results: ItemCounts,
    pub defects_by_status: BTreeMap<String, usize>,
    pub defects_by_severity: BTreeMap<String, usize>,
    pub defects_by_type: BTreeMap<String, usize>,
    pub open_defects: usize,
    pub overdue_defects: usize,
    #[serde(skip)]
    progress: Vec<u8>,
}

impl Default for StatCounts {
    fn default() -> Self {
        fn zeroed<T: std::fmt::Display>(keys: &[T]) -> BTreeMap<String, usize> {
            keys.iter().map(|k| (k.to_string(), 0)).collect()
        }
        Self {
            task_count: 0,
            tasks_by_status: zeroed(DisplayStatus::all()),
            average_progress: 0,
            checklists_by_status: zeroed(ChecklistStatus::all()),
            checklist_pass_rate: None,
            item_results: ItemCounts::default(),
            defects_by_status: zeroed(DefectStatus::all()),
            defects_by_severity: zeroed(DefectSeverity::all()),
            defects_by_type: zeroed(DefectType::all()),
            open_defects: 0,
            overdue_defects: 0,
            progress: Vec::new(),
        }
    }
}

impl StatCounts {
    fn merge(&mut self, other: &StatCounts) {
        fn add(into: &mut BTreeMap<String, usize>, from: &BTreeMap<String, usize>) {
            for (k, v) in from {
                *into.entry(k.clone()).or_insert(0) += v;
            }
        }
        self.task_count += other.task_count;
        add(&mut self.tasks_by_status, &other.tasks_by_status);
        add(&mut self.checklists_by_status, &other.checklists_by_status);
        self.item_results.pass += other.item_results.pass;
        self.item_results.fail += other.item_results.fail;
        self.item_results.na += other.item_results.na;
        add(&mut self.defects_by_status, &other.defects_by_status);
        add(&mut self.defects_by_severity, &other.defects_by_severity);
        add(&mut self.defects_by_type, &other.defects_by_type);
        self.open_defects += other.open_defects;
        self.overdue_defects += other.overdue_defects;
        self.progress.extend_from_slice(&other.progress);
    }

    /// Recompute the derived averages and rates.
    fn finish(&mut self) {
        self.average_progress = project_progress(&self.progress);
        let count = |status: ChecklistStatus| {
            self.checklists_by_status
                .get(status.as_str())
                .copied()
                .unwrap_or(0)
        };
        let completed = count(ChecklistStatus::Completed);
        let failed = count(ChecklistStatus::Failed);
        self.checklist_pass_rate = if completed + failed == 0 {
            None
        } else {
            Some(completed as f64 / (completed + failed) as f64 * 100.0)
        };
    }
}

/// Dashboard numbers for one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project_id: i64,
    #[serde(flatten)]
    pub counts: StatCounts,
}

/// Dashboard numbers across several projects.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub project_count: usize,
    #[serde(flatten)]
    pub counts: StatCounts,
}

impl DashboardSummary {
    pub fn from_projects(stats: &[ProjectStats]) -> Self {
        let mut counts = StatCounts::default();
        for s in stats {
            counts.merge(&s.counts);
        }
        counts.finish();
        Self {
            project_count: stats.len(),
            counts,
        }
    }
}

impl Storage {
    /// Aggregate dashboard statistics for each of `project_ids`.
    ///
    /// Results come back in the order given; unknown IDs yield zeroed stats.
    pub fn project_stats(&self, project_ids: &[i64], today: NaiveDate) -> Result<Vec<ProjectStats>> {
        let mut by_project: HashMap<i64, StatCounts> = project_ids
            .iter()
            .map(|id| (*id, StatCounts::default()))
            .collect();
        if project_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = placeholders(project_ids.len());
        let id_params: Vec<Value> = project_ids.iter().map(|id| Value::Integer(*id)).collect();

        // Tasks
        let mut stmt = self.conn.prepare(&format!(
            "SELECT project_id, progress, start_date, end_date FROM tasks WHERE project_id IN ({})",
            ids
        ))?;
        let rows = stmt.query_map(params_from_iter(id_params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u8>(1)?,
                row.get::<_, Option<NaiveDate>>(2)?,
                row.get::<_, Option<NaiveDate>>(3)?,
            ))
        })?;
        for row in rows {
            let (project_id, progress, start, end) = row?;
            if let Some(counts) = by_project.get_mut(&project_id) {
                let status = display_status(progress, start, end, today);
                counts.task_count += 1;
                *counts.tasks_by_status.entry(status.to_string()).or_insert(0) += 1;
                counts.progress.push(progress);
            }
        }

        // Checklist instances
        for (project_id, status, count) in self.grouped_counts(
            &format!(
                "SELECT t.project_id, c.status, COUNT(*)
                 FROM task_checklists c JOIN tasks t ON t.id = c.task_id
                 WHERE t.project_id IN ({})
                 GROUP BY t.project_id, c.status",
                ids
            ),
            &id_params,
        )? {
            if let Some(counts) = by_project.get_mut(&project_id) {
                *counts.checklists_by_status.entry(status).or_insert(0) += count;
            }
        }

        // Item results
        for (project_id, result, count) in self.grouped_counts(
            &format!(
                "SELECT t.project_id, r.result, COUNT(*)
                 FROM checklist_item_results r
                 JOIN task_checklists c ON c.id = r.task_checklist_id
                 JOIN tasks t ON t.id = c.task_id
                 WHERE t.project_id IN ({})
                 GROUP BY t.project_id, r.result",
                ids
            ),
            &id_params,
        )? {
            if let Some(counts) = by_project.get_mut(&project_id) {
                match result.parse::<ItemResult>() {
                    Ok(ItemResult::Pass) => counts.item_results.pass += count,
                    Ok(ItemResult::Fail) => counts.item_results.fail += count,
                    Ok(ItemResult::Na) => counts.item_results.na += count,
                    Err(_) => {}
                }
            }
        }

        // Defects
        let mut defect_params = id_params.clone();
        defect_params.push(Value::Text(today.to_string()));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT project_id, status, severity, type, COUNT(*),
                    SUM(CASE WHEN status != 'closed' AND due_date IS NOT NULL AND due_date < ?{} THEN 1 ELSE 0 END)
             FROM defects
             WHERE project_id IN ({})
             GROUP BY project_id, status, severity, type",
            project_ids.len() + 1,
            ids
        ))?;
        let rows = stmt.query_map(params_from_iter(defect_params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, DefectStatus>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? as usize,
                row.get::<_, i64>(5)? as usize,
            ))
        })?;
        for row in rows {
            let (project_id, status, severity, defect_type, count, overdue) = row?;
            if let Some(counts) = by_project.get_mut(&project_id) {
                *counts.defects_by_status.entry(status.to_string()).or_insert(0) += count;
                *counts.defects_by_severity.entry(severity).or_insert(0) += count;
                *counts.defects_by_type.entry(defect_type).or_insert(0) += count;
                if status != DefectStatus::Closed {
                    counts.open_defects += count;
                }
                counts.overdue_defects += overdue;
            }
        }

        Ok(project_ids
            .iter()
            .map(|id| {
                let mut counts = by_project.remove(id).unwrap_or_default();
                counts.finish();
                ProjectStats {
                    project_id: *id,
                    counts,
                }
            })
            .collect())
    }

    fn grouped_counts(&self, sql: &str, params: &[Value]) -> Result<Vec<(i64, String, usize)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as usize,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_counts_list_every_status() {
        let counts = StatCounts::default();
        assert_eq!(counts.defects_by_status.len(), DefectStatus::all().len());
        assert_eq!(counts.defects_by_type["NCR"], 0);
        assert_eq!(counts.tasks_by_status["delayed"], 0);
    }

    #[test]
    fn test_pass_rate_and_average() {
        let mut counts = StatCounts::default();
        counts.checklists_by_status.insert("completed".to_string(), 3);
        counts.checklists_by_status.insert("failed".to_string(), 1);
        counts.progress = vec![100, 50];
        counts.finish();
        assert_eq!(counts.checklist_pass_rate, Some(75.0));
        assert_eq!(counts.average_progress, 75);
    }

    #[test]
    fn test_summary_merges_projects() {
        let mut a = StatCounts::default();
        a.task_count = 2;
        a.open_defects = 1;
        a.progress = vec![0, 100];
        let mut b = StatCounts::default();
        b.task_count = 1;
        b.overdue_defects = 1;
        b.progress = vec![20];

        let summary = DashboardSummary::from_projects(&[
            ProjectStats { project_id: 1, counts: a },
            ProjectStats { project_id: 2, counts: b },
        ]);
        assert_eq!(summary.project_count, 2);
        assert_eq!(summary.counts.task_count, 3);
        assert_eq!(summary.counts.open_defects, 1);
        assert_eq!(summary.counts.overdue_defects, 1);
        assert_eq!(summary.counts.average_progress, 40);
        assert_eq!(summary.counts.checklist_pass_rate, None);
    }
}
