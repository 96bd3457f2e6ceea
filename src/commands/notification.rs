//! The caller's notification inbox.

use serde::{Deserialize, Serialize};

use super::{IdInput, Output, Workspace};
use crate::Result;
use crate::models::Notification;
use crate::permissions::Caller;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListNotifications {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub count: usize,
    pub unread: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarkedRead {
    pub marked: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UnreadCount {
    pub unread: usize,
}

pub fn notification_list(
    ws: &mut Workspace,
    caller: &Caller,
    input: ListNotifications,
) -> Result<NotificationList> {
    let limit = input.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let notifications = ws
        .storage
        .list_notifications(caller.user_id, input.unread_only, limit)?;
    Ok(NotificationList {
        count: notifications.len(),
        unread: ws.storage.count_unread_notifications(caller.user_id)?,
        notifications,
    })
}

/// Mark one notification read. Someone else's notification reads as missing.
pub fn notification_mark_read(
    ws: &mut Workspace,
    caller: &Caller,
    input: IdInput,
) -> Result<Notification> {
    ws.storage.mark_notification_read(caller.user_id, input.id)
}

pub fn notification_mark_all_read(ws: &mut Workspace, caller: &Caller) -> Result<MarkedRead> {
    let marked = ws.storage.mark_all_notifications_read(caller.user_id)?;
    Ok(MarkedRead { marked })
}

pub fn notification_unread_count(ws: &mut Workspace, caller: &Caller) -> Result<UnreadCount> {
    Ok(UnreadCount {
        unread: ws.storage.count_unread_notifications(caller.user_id)?,
    })
}

impl Output for Notification {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let marker = if self.is_read { " " } else { "*" };
        format!(
            "{} #{} [{}] {}: {}",
            marker, self.id, self.priority, self.title, self.message
        )
    }
}

impl Output for NotificationList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.notifications.is_empty() {
            return "No notifications.".to_string();
        }
        let mut lines = vec![format!(
            "{} notification(s), {} unread:",
            self.count, self.unread
        )];
        for n in &self.notifications {
            lines.push(format!("  {}", n.to_human()));
        }
        lines.join("\n")
    }
}

impl Output for MarkedRead {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("Marked {} notification(s) read", self.marked)
    }
}

impl Output for UnreadCount {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("{} unread", self.unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::test_utils::Site;

    #[test]
    fn test_inbox_lifecycle() {
        let mut site = Site::new();
        let engineer = site.engineer;

        let count = notification_unread_count(&mut site.ws, &engineer).unwrap();
        assert_eq!(count.unread, 1);

        let list = notification_list(&mut site.ws, &engineer, ListNotifications::default()).unwrap();
        assert_eq!(list.count, 1);
        let id = list.notifications[0].id;

        let read = notification_mark_read(&mut site.ws, &engineer, IdInput { id }).unwrap();
        assert!(read.is_read);
        let unread = notification_list(
            &mut site.ws,
            &engineer,
            ListNotifications {
                unread_only: true,
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(unread.count, 0);
        assert_eq!(unread.unread, 0);
    }

    #[test]
    fn test_cannot_read_someone_elses_notification() {
        let mut site = Site::new();
        let engineer = site.engineer;
        let id = notification_list(&mut site.ws, &engineer, ListNotifications::default())
            .unwrap()
            .notifications[0]
            .id;

        let viewer = site.viewer;
        let err = notification_mark_read(&mut site.ws, &viewer, IdInput { id });
        assert!(matches!(err, Err(Error::NotFound(_))));

        let marked = notification_mark_all_read(&mut site.ws, &engineer).unwrap();
        assert_eq!(marked.marked, 1);
        let marked = notification_mark_all_read(&mut site.ws, &engineer).unwrap();
        assert_eq!(marked.marked, 0);
    }
}
