use time::OffsetDateTime;

use crate::types::notification::{Cadence, Notification, NotificationStatus};

pub trait ReminderEvaluator: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<Vec<Notification>, Self::Error>> + Send + 'a
    where
        Self: 'a;

    fn evaluate<'a>(&'a self, user_id: &'a str, cadence: Cadence) -> Self::Fut<'a>;
}

pub trait NotificationStatusSink: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type Fut<'a>: Future<Output = Result<bool, Self::Error>> + Send + 'a
    where
        Self: 'a;

    /// Compare-and-set from `pending` to `status`. Resolves to `false` when
    /// the notification had already left `pending`.
    fn transition<'a>(
        &'a self,
        notification_id: &'a str,
        status: NotificationStatus,
        sent_at: Option<OffsetDateTime>,
    ) -> Self::Fut<'a>;
}
