//! Notification records and the delivery sink contract.
//!
//! The sink is fire-and-forget: a transition that already committed
//! must never be reported as failed because a notification write or a
//! mail handoff went wrong, so every failure in here is logged and
//! swallowed.

use std::sync::Arc;

use crate::store::MarketStore;
use crate::utils::{TimeStamp, new_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum NotificationKind {
    #[n(0)]
    NewRequest,
    #[n(1)]
    RequestAccepted,
    #[n(2)]
    RequestRejected,
    #[n(3)]
    RequestCancelled,
    #[n(4)]
    RequestAutoCancelled,
    #[n(5)]
    RequestCompleted,
    #[n(6)]
    RequestClosed,
    #[n(7)]
    RequestUpdated,
    #[n(8)]
    Reminder,
    #[n(9)]
    Overdue,
    #[n(10)]
    MonthlyReport,
    #[n(11)]
    Verification,
    #[n(12)]
    AccountStatus,
    #[n(13)]
    NewReview,
    #[n(14)]
    ReviewUpdated,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::NewRequest => "new_request",
            NotificationKind::RequestAccepted => "request_accepted",
            NotificationKind::RequestRejected => "request_rejected",
            NotificationKind::RequestCancelled => "request_cancelled",
            NotificationKind::RequestAutoCancelled => "request_auto_cancelled",
            NotificationKind::RequestCompleted => "request_completed",
            NotificationKind::RequestClosed => "request_closed",
            NotificationKind::RequestUpdated => "request_updated",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Overdue => "overdue",
            NotificationKind::MonthlyReport => "monthly_report",
            NotificationKind::Verification => "verification",
            NotificationKind::AccountStatus => "account_status",
            NotificationKind::NewReview => "new_review",
            NotificationKind::ReviewUpdated => "review_updated",
        }
    }
}

/// In-app message; created only by the engine and sweep jobs, read and
/// deleted only by its owning user.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub kind: NotificationKind,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub is_read: bool,
    #[n(5)]
    pub created_at: TimeStamp,
}

/// Fire-and-forget delivery to one user. Implementations must not
/// surface failures to the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, user_id: &str, kind: NotificationKind, message: &str);
}

/// Outbound mail handoff. Delivery transport is a collaborator concern;
/// the engine only needs somewhere to hand the message.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Mailer that records the handoff in the log instead of dispatching.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!(%to, %subject, "mail handed off");
        Ok(())
    }
}

/// Store-backed sink: persists an in-app notification row and, when a
/// mailer is attached, forwards the message to the user's email.
pub struct StoreSink {
    store: MarketStore,
    mailer: Option<Arc<dyn Mailer>>,
}

impl StoreSink {
    pub fn new(store: MarketStore) -> Self {
        Self {
            store,
            mailer: None,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }
}

impl NotificationSink for StoreSink {
    fn notify(&self, user_id: &str, kind: NotificationKind, message: &str) {
        let id = match new_id("ntf_") {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%user_id, kind = kind.as_str(), %err, "notification id mint failed");
                return;
            }
        };

        let notification = Notification {
            id,
            user_id: user_id.to_string(),
            kind,
            message: message.to_string(),
            is_read: false,
            created_at: TimeStamp::now(),
        };

        if let Err(err) = self.store.save_notification(&notification) {
            tracing::warn!(%user_id, kind = kind.as_str(), %err, "notification write failed");
        }

        if let Some(mailer) = &self.mailer {
            match self.store.user(user_id) {
                Ok(user) => {
                    if let Err(err) =
                        mailer.send(&user.email, "Service Marketplace Notification", message)
                    {
                        tracing::warn!(%user_id, %err, "mail handoff failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(%user_id, %err, "mail skipped, no user record");
                }
            }
        }
    }
}
