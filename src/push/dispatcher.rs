use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::DeliverySettings;
use crate::error::{DeliveryError, DispatchError};
use crate::ports;
use crate::ports::push::Urgency;
use crate::push::encrypt::MAX_PLAINTEXT_LEN;
use crate::push::payload;
use crate::push::worker::DeliveryWorker;
use crate::types::notification::{DeliveryOutcome, Notification, NotificationStatus};
use crate::types::push::{PushSubscription, SubscriptionId};

/// How one subscription fared, after retries.
#[derive(Debug)]
pub struct DeliveryReport {
    pub subscription_id: SubscriptionId,
    pub attempts: u32,
    pub result: Result<DeliveryOutcome, DeliveryError>,
}

impl DeliveryReport {
    fn is(&self, outcome: DeliveryOutcome) -> bool {
        matches!(&self.result, Ok(found) if *found == outcome)
    }
}

#[derive(Debug)]
pub struct NotificationReport {
    pub notification_id: String,
    pub user_id: String,
    /// The terminal status this dispatch decided on.
    pub status: NotificationStatus,
    /// Whether this dispatch was the one that moved the notification out of
    /// `pending`.
    pub status_applied: bool,
    pub deliveries: Vec<DeliveryReport>,
    pub removed: Vec<SubscriptionId>,
}

/// Fans due notifications out to every subscription of their user.
///
/// Each subscription is handled by its own task; one subscription failing
/// never stops the others. Outcomes are only aggregated once every task has
/// been joined.
#[derive(Debug, Clone)]
pub struct Dispatcher<S, N, P, T> {
    store: S,
    status: N,
    worker: DeliveryWorker<P>,
    time: T,
    settings: Arc<DeliverySettings>,
}

impl<S, N, P, T> Dispatcher<S, N, P, T>
where
    S: ports::SubscriptionStore,
    N: ports::NotificationStatusSink,
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    pub fn new(
        store: S,
        status: N,
        worker: DeliveryWorker<P>,
        time: T,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            store,
            status,
            worker,
            time,
            settings: Arc::new(settings),
        }
    }

    pub async fn dispatch_batch(
        &self,
        notifications: &[Notification],
        urgency: Urgency,
    ) -> Vec<Result<NotificationReport, DispatchError>> {
        join_all(
            notifications
                .iter()
                .map(|notification| self.dispatch(notification, urgency)),
        )
        .await
    }

    pub async fn dispatch(
        &self,
        notification: &Notification,
        urgency: Urgency,
    ) -> Result<NotificationReport, DispatchError> {
        let subscriptions = self.list_subscriptions(&notification.user_id).await?;

        if subscriptions.is_empty() {
            debug!(
                notification = %notification.id,
                user = %notification.user_id,
                "no push subscriptions; marking notification failed"
            );
            let status_applied = self
                .finalize(notification, NotificationStatus::Failed)
                .await;
            return Ok(NotificationReport {
                notification_id: notification.id.clone(),
                user_id: notification.user_id.clone(),
                status: NotificationStatus::Failed,
                status_applied,
                deliveries: Vec::new(),
                removed: Vec::new(),
            });
        }

        let deliveries = match payload::encode(notification, MAX_PLAINTEXT_LEN) {
            Ok(payload) => self.fan_out(subscriptions, payload, urgency).await,
            Err(err) => {
                error!(
                    notification = %notification.id,
                    error = %err,
                    "notification payload cannot be encoded"
                );
                let reason = err.to_string();
                subscriptions
                    .into_iter()
                    .map(|subscription| DeliveryReport {
                        subscription_id: subscription.id,
                        attempts: 0,
                        result: Err(DeliveryError::Payload(reason.clone())),
                    })
                    .collect()
            }
        };

        let removed = self.remove_gone(&deliveries).await;

        let status = if deliveries
            .iter()
            .any(|report| report.is(DeliveryOutcome::Delivered))
        {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        let status_applied = self.finalize(notification, status).await;

        for report in &deliveries {
            match &report.result {
                Ok(outcome) => info!(
                    notification = %notification.id,
                    user = %notification.user_id,
                    subscription = %report.subscription_id,
                    attempts = report.attempts,
                    outcome = %outcome,
                    "delivery finished"
                ),
                Err(err) => warn!(
                    notification = %notification.id,
                    user = %notification.user_id,
                    subscription = %report.subscription_id,
                    error = %err,
                    "delivery rejected"
                ),
            }
        }

        Ok(NotificationReport {
            notification_id: notification.id.clone(),
            user_id: notification.user_id.clone(),
            status,
            status_applied,
            deliveries,
            removed,
        })
    }

    async fn list_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, DispatchError> {
        match timeout(self.settings.request_timeout(), self.store.list_by_user(user_id)).await {
            Ok(Ok(subscriptions)) => Ok(subscriptions),
            Ok(Err(err)) => {
                error!(user = %user_id, error = %err, "failed to list push subscriptions");
                Err(DispatchError::Store(err.to_string()))
            }
            Err(_) => {
                error!(user = %user_id, "timed out listing push subscriptions");
                Err(DispatchError::StoreTimeout)
            }
        }
    }

    async fn fan_out(
        &self,
        subscriptions: Vec<PushSubscription>,
        payload: Vec<u8>,
        urgency: Urgency,
    ) -> Vec<DeliveryReport> {
        let payload: Arc<[u8]> = payload.into();
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight));
        let mut tasks = JoinSet::new();

        for subscription in subscriptions {
            let worker = self.worker.clone();
            let time = self.time.clone();
            let settings = Arc::clone(&self.settings);
            let payload = Arc::clone(&payload);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                deliver_with_retry(&worker, &time, &settings, &subscription, &payload, urgency)
                    .await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => error!(error = %err, "delivery task panicked"),
            }
        }
        reports
    }

    async fn remove_gone(&self, deliveries: &[DeliveryReport]) -> Vec<SubscriptionId> {
        let mut removed = Vec::new();
        for report in deliveries
            .iter()
            .filter(|report| report.is(DeliveryOutcome::PermanentFailure))
        {
            let id = &report.subscription_id;
            match timeout(self.settings.request_timeout(), self.store.remove(id)).await {
                Ok(Ok(true)) => {
                    info!(subscription = %id, "removed expired push subscription");
                    removed.push(*id);
                }
                Ok(Ok(false)) => debug!(subscription = %id, "push subscription already removed"),
                Ok(Err(err)) => {
                    warn!(subscription = %id, error = %err, "failed to remove push subscription")
                }
                Err(_) => warn!(subscription = %id, "timed out removing push subscription"),
            }
        }
        removed
    }

    /// Moves the notification out of `pending` at most once, however many
    /// dispatches race for it.
    async fn finalize(&self, notification: &Notification, status: NotificationStatus) -> bool {
        let sent_at = match status {
            NotificationStatus::Sent => Some(self.time.now()),
            _ => None,
        };
        let transition = self.status.transition(&notification.id, status, sent_at);
        match timeout(self.settings.request_timeout(), transition).await {
            Ok(Ok(true)) => {
                info!(notification = %notification.id, status = %status, "notification status updated");
                true
            }
            Ok(Ok(false)) => {
                debug!(
                    notification = %notification.id,
                    status = %status,
                    "notification already finalized"
                );
                false
            }
            Ok(Err(err)) => {
                error!(
                    notification = %notification.id,
                    error = %err,
                    "failed to update notification status"
                );
                false
            }
            Err(_) => {
                error!(notification = %notification.id, "timed out updating notification status");
                false
            }
        }
    }
}

async fn deliver_with_retry<P, T>(
    worker: &DeliveryWorker<P>,
    time: &T,
    settings: &DeliverySettings,
    subscription: &PushSubscription,
    payload: &[u8],
    urgency: Urgency,
) -> DeliveryReport
where
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = worker.deliver(subscription, payload, urgency).await;
        match result {
            Ok(DeliveryOutcome::TransientFailure) if attempts < settings.max_attempts => {
                let delay: Duration = settings.backoff(attempts);
                debug!(
                    subscription = %subscription.id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying push delivery"
                );
                time.sleep(delay).await;
            }
            result => {
                return DeliveryReport {
                    subscription_id: subscription.id,
                    attempts,
                    result,
                };
            }
        }
    }
}
