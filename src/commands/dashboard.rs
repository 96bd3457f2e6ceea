//! Dashboard statistics.

use serde::{Deserialize, Serialize};

use super::{Output, Workspace};
use crate::Result;
use crate::permissions::{Caller, Capability};
use crate::storage::stats::{DashboardSummary, ProjectStats, StatCounts};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectStatsInput {
    /// Empty means every project visible to the caller
    #[serde(default)]
    pub project_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatsList {
    pub projects: Vec<ProjectStats>,
    pub count: usize,
}

fn visible_project_ids(ws: &Workspace, caller: &Caller) -> Result<Vec<i64>> {
    let member_of = (!caller.is_admin()).then_some(caller.user_id);
    Ok(ws
        .storage
        .list_projects(member_of)?
        .into_iter()
        .map(|p| p.id)
        .collect())
}

pub fn dashboard_project_stats(
    ws: &mut Workspace,
    caller: &Caller,
    input: ProjectStatsInput,
) -> Result<ProjectStatsList> {
    caller.require(Capability::ViewAnalytics)?;
    let ids = if input.project_ids.is_empty() {
        visible_project_ids(ws, caller)?
    } else {
        let mut ids = input.project_ids;
        ids.dedup();
        for id in &ids {
            ws.visible_project(caller, *id)?;
        }
        ids
    };

    let projects = ws.storage.project_stats(&ids, ws.today())?;
    Ok(ProjectStatsList {
        count: projects.len(),
        projects,
    })
}

/// Totals across every project the caller can see.
pub fn dashboard_summary(ws: &mut Workspace, caller: &Caller) -> Result<DashboardSummary> {
    caller.require(Capability::ViewAnalytics)?;
    let ids = visible_project_ids(ws, caller)?;
    let stats = ws.storage.project_stats(&ids, ws.today())?;
    Ok(DashboardSummary::from_projects(&stats))
}

fn human_counts(counts: &StatCounts) -> Vec<String> {
    let mut lines = vec![format!(
        "  Tasks: {} (avg progress {}%)",
        counts.task_count, counts.average_progress
    )];
    let tasks: Vec<String> = counts
        .tasks_by_status
        .iter()
        .map(|(k, v)| format!("{} {}", k, v))
        .collect();
    lines.push(format!("    {}", tasks.join(", ")));
    let rate = counts
        .checklist_pass_rate
        .map(|r| format!("{:.1}%", r))
        .unwrap_or_else(|| "n/a".to_string());
    lines.push(format!("  Checklist pass rate: {}", rate));
    lines.push(format!(
        "  Items: {} pass, {} fail, {} n/a",
        counts.item_results.pass, counts.item_results.fail, counts.item_results.na
    ));
    lines.push(format!(
        "  Defects: {} open, {} overdue",
        counts.open_defects, counts.overdue_defects
    ));
    lines
}

impl Output for ProjectStatsList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.projects.is_empty() {
            return "No projects.".to_string();
        }
        let mut lines = Vec::new();
        for stats in &self.projects {
            lines.push(format!("Project {}:", stats.project_id));
            lines.extend(human_counts(&stats.counts));
        }
        lines.join("\n")
    }
}

impl Output for DashboardSummary {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} project(s)", self.project_count)];
        lines.extend(human_counts(&self.counts));
        lines.join("\n")
    }
}
