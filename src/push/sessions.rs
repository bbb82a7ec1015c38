use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::info;

use crate::ports;
use crate::push::scheduler::{Drain, ReminderScheduler, ScheduledSession};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub running: bool,
}

/// At most one running scheduler per user.
pub struct SessionRegistry<E, S, N, P, T> {
    scheduler: ReminderScheduler<E, S, N, P, T>,
    sessions: Arc<Mutex<HashMap<String, ScheduledSession>>>,
}

impl<E, S, N, P, T> Clone for SessionRegistry<E, S, N, P, T>
where
    E: Clone,
    S: Clone,
    N: Clone,
    P: Clone,
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<E, S, N, P, T> SessionRegistry<E, S, N, P, T>
where
    E: ports::ReminderEvaluator,
    S: ports::SubscriptionStore,
    N: ports::NotificationStatusSink,
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    pub fn new(scheduler: ReminderScheduler<E, S, N, P, T>) -> Self {
        Self {
            scheduler,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the user's scheduler, restarting it if one is already running.
    pub fn start(&self, user_id: &str) -> SessionInfo {
        let session = self.scheduler.start(user_id);
        let info = SessionInfo {
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            running: true,
        };
        let previous = self
            .sessions
            .lock()
            .expect("sessions lock")
            .insert(user_id.to_string(), session);
        if let Some(previous) = previous {
            previous.stop();
            info!(user = %user_id, "reminder session restarted");
        }
        info
    }

    /// Returns whether a session existed.
    pub fn stop(&self, user_id: &str) -> bool {
        let removed = self.sessions.lock().expect("sessions lock").remove(user_id);
        match removed {
            Some(session) => {
                session.stop();
                info!(user = %user_id, "reminder session stopped");
                true
            }
            None => false,
        }
    }

    /// Stops every session. The returned drain resolves once dispatches
    /// already under way have finished.
    pub fn stop_all(&self) -> Drain {
        let drained: Vec<_> = self
            .sessions
            .lock()
            .expect("sessions lock")
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            session.stop();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "stopped all reminder sessions");
        }
        self.scheduler.drain()
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().expect("sessions lock");
        let mut infos: Vec<_> = sessions
            .values()
            .map(|session| SessionInfo {
                user_id: session.user_id.clone(),
                started_at: session.started_at,
                running: !session.is_stopped() && !session.is_finished(),
            })
            .collect();
        infos.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        infos
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::config::{DeliverySettings, SchedulerSettings};
    use crate::push::dispatcher::Dispatcher;
    use crate::push::worker::DeliveryWorker;
    use crate::test_support::{
        TestEvaluator, TestStatusSink, TestStore, TestTime, TestTransport, settle_until,
        test_signer,
    };
    use crate::types::notification::Cadence;
    use std::time::Duration;

    type TestRegistry =
        SessionRegistry<TestEvaluator, TestStore, TestStatusSink, TestTransport, TestTime>;

    fn registry() -> (TestRegistry, TestEvaluator, TestTime) {
        let time = TestTime::manual();
        let evaluator = TestEvaluator::default();
        let dispatcher = Dispatcher::new(
            TestStore::default(),
            TestStatusSink::default(),
            DeliveryWorker::new(test_signer(), TestTransport::default(), 60),
            time.clone(),
            DeliverySettings::default(),
        );
        let scheduler = ReminderScheduler::new(
            evaluator.clone(),
            dispatcher,
            time.clone(),
            SchedulerSettings::default(),
        );
        (SessionRegistry::new(scheduler), evaluator, time)
    }

    #[tokio::test]
    async fn start__should_list_running_session() {
        // Given
        let (registry, _, _) = registry();

        // When
        let info = registry.start("u-1");

        // Then
        assert_eq!(info.user_id, "u-1");
        assert!(info.running);
        assert_eq!(registry.snapshot(), vec![info]);
        registry.stop_all().wait().await;
    }

    #[tokio::test]
    async fn start__should_replace_existing_session_for_same_user() {
        // Given
        let (registry, evaluator, time) = registry();
        registry.start("u-1");
        settle_until(|| time.pending_sleeps(Duration::from_secs(60)) == 1).await;

        // When
        registry.start("u-1");
        settle_until(|| {
            let minute = Duration::from_secs(60);
            let started = time
                .sleep_durations()
                .iter()
                .filter(|duration| **duration == minute)
                .count();
            started == 2 && time.pending_sleeps(minute) == 1
        })
        .await;
        time.trigger(Duration::from_secs(60));

        // Then
        settle_until(|| evaluator.calls(Cadence::Immediate) == 1).await;
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        assert_eq!(evaluator.calls(Cadence::Immediate), 1);
        assert_eq!(registry.snapshot().len(), 1);
        registry.stop_all().wait().await;
    }

    #[tokio::test]
    async fn stop__should_report_whether_session_existed() {
        let (registry, _, _) = registry();
        registry.start("u-1");

        assert!(registry.stop("u-1"));
        assert!(!registry.stop("u-1"));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn stop_all__should_clear_every_session() {
        let (registry, _, _) = registry();
        registry.start("u-1");
        registry.start("u-2");

        registry.stop_all().wait().await;

        assert!(registry.snapshot().is_empty());
    }
}
