//! Audit trail queries.

use serde::{Deserialize, Serialize};

use super::{Output, Workspace};
use crate::Result;
use crate::models::ActivityEntry;
use crate::permissions::{Caller, ensure};
use crate::storage::notifications::ActivityFilter;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListActivity {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityList {
    pub entries: Vec<ActivityEntry>,
    pub count: usize,
}

/// Activity entries, newest first. Only admins see other users' entries.
pub fn activity_list(ws: &mut Workspace, caller: &Caller, input: ListActivity) -> Result<ActivityList> {
    let user_id = if caller.is_admin() {
        input.user_id
    } else {
        ensure(
            input.user_id.is_none_or(|id| id == caller.user_id),
            "read another user's activity",
        )?;
        Some(caller.user_id)
    };

    let entries = ws.storage.list_activity(&ActivityFilter {
        entity_type: input
            .entity_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        entity_id: input.entity_id,
        user_id,
        limit: input.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    })?;
    Ok(ActivityList {
        count: entries.len(),
        entries,
    })
}

impl Output for ActivityList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No activity.".to_string();
        }
        let mut lines = vec![format!("{} entr{}:", self.count, if self.count == 1 { "y" } else { "ies" })];
        for e in &self.entries {
            let target = e
                .entity_id
                .map(|id| format!("{} {}", e.entity_type, id))
                .unwrap_or_else(|| e.entity_type.clone());
            lines.push(format!(
                "  {} user {} {} ({})",
                e.created_at.format("%Y-%m-%d %H:%M:%S"),
                e.user_id,
                e.action,
                target
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::test_utils::Site;

    #[test]
    fn test_admin_sees_full_trail() {
        let mut site = Site::new();
        let admin = site.admin;
        let list = activity_list(
            &mut site.ws,
            &admin,
            ListActivity {
                entity_type: Some("task".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.entries[0].action, "task.create");
        assert_eq!(list.entries[0].user_id, site.manager.user_id);
    }

    #[test]
    fn test_others_see_only_their_own() {
        let mut site = Site::new();
        let manager = site.manager;
        let list = activity_list(&mut site.ws, &manager, ListActivity::default()).unwrap();
        assert!(list.count > 0);
        assert!(list.entries.iter().all(|e| e.user_id == manager.user_id));

        let err = activity_list(
            &mut site.ws,
            &manager,
            ListActivity {
                user_id: Some(site.admin.user_id),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(Error::Forbidden(_))));
    }
}
