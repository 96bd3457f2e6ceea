//! Notification dispatch.
//!
//! Workflow operations never send anything themselves. They return
//! [`NotificationDraft`]s, and the [`Dispatcher`] turns each draft into a
//! persisted in-app notification and then hands it to every registered
//! [`Transport`] (email, socket). Transport failures are logged and counted;
//! they never undo the state change that produced the draft.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::Result;
use crate::models::{Notification, NotificationKind, NotificationPriority, User};
use crate::storage::Storage;

/// A notification waiting to be delivered to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub project_id: Option<i64>,
    pub entity_type: String,
    pub entity_id: i64,
    pub send_email: bool,
}

impl NotificationDraft {
    /// Create a normal-priority, in-app-only draft.
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        entity_type: &str,
        entity_id: i64,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            project_id: None,
            entity_type: entity_type.to_string(),
            entity_id,
            send_email: false,
        }
    }

    pub fn priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn email(mut self, send_email: bool) -> Self {
        self.send_email = send_email;
        self
    }

    pub fn project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

/// Delivery channel beyond the in-app inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Socket,
}

/// An outbound delivery mechanism.
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver one stored notification to its recipient.
    fn send(&self, notification: &Notification, recipient: &User) -> Result<()>;
}

/// Email transport that records the envelope in the log.
///
/// Actual mail delivery belongs to the outer deployment (SMTP relay, queue
/// worker); this transport is the hand-off point.
#[derive(Debug, Clone)]
pub struct LogMailer {
    pub from: String,
}

impl Default for LogMailer {
    fn default() -> Self {
        Self {
            from: "qc-noreply@localhost".to_string(),
        }
    }
}

impl Transport for LogMailer {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn send(&self, notification: &Notification, recipient: &User) -> Result<()> {
        info!(
            from = %self.from,
            to = %recipient.email,
            kind = %notification.kind,
            subject = %notification.title,
            "email queued"
        );
        Ok(())
    }
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    /// Notifications stored in recipients' inboxes
    pub delivered: usize,
    /// Individual channel sends that failed
    pub failed: usize,
}

/// Fans notification drafts out to the inbox and registered transports.
pub struct Dispatcher {
    transports: Vec<Box<dyn Transport>>,
    email_enabled: bool,
}

impl Dispatcher {
    /// Dispatcher with the logging mailer registered.
    pub fn new(email_enabled: bool) -> Self {
        Self {
            transports: vec![Box::new(LogMailer::default())],
            email_enabled,
        }
    }

    /// Dispatcher that only writes the in-app inbox.
    pub fn in_app_only() -> Self {
        Self {
            transports: Vec::new(),
            email_enabled: false,
        }
    }

    /// Register an additional transport.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    /// Register a transport on an existing dispatcher.
    pub fn register(&mut self, transport: Box<dyn Transport>) {
        debug!(channel = ?transport.channel(), "transport registered");
        self.transports.push(transport);
    }

    /// Deliver drafts produced by an action of `actor_id`.
    ///
    /// The actor is never notified about their own action, and each
    /// (recipient, kind, entity) triple is delivered at most once.
    pub fn dispatch(
        &self,
        storage: &mut Storage,
        actor_id: i64,
        drafts: Vec<NotificationDraft>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for draft in dedupe(actor_id, drafts) {
            let notification = match storage.insert_notification(&draft) {
                Ok(n) => n,
                Err(e) => {
                    warn!(user_id = draft.user_id, kind = %draft.kind, "failed to store notification: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            report.delivered += 1;

            if self.transports.is_empty() {
                continue;
            }

            let recipient = match storage.get_user(notification.user_id) {
                Ok(user) => user,
                Err(e) => {
                    warn!(user_id = notification.user_id, "notification recipient lookup failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            for transport in &self.transports {
                if transport.channel() == Channel::Email
                    && !(self.email_enabled && notification.send_email)
                {
                    continue;
                }
                if let Err(e) = transport.send(&notification, &recipient) {
                    warn!(
                        notification_id = notification.id,
                        channel = ?transport.channel(),
                        "notification delivery failed: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(delivered = report.delivered, failed = report.failed, "dispatch finished");
        report
    }
}

/// Drop drafts addressed to the actor and repeated (recipient, kind, entity) triples.
fn dedupe(actor_id: i64, drafts: Vec<NotificationDraft>) -> Vec<NotificationDraft> {
    let mut seen = HashSet::new();
    drafts
        .into_iter()
        .filter(|d| d.user_id != actor_id)
        .filter(|d| seen.insert((d.user_id, d.kind, d.entity_type.clone(), d.entity_id)))
        .collect()
}
