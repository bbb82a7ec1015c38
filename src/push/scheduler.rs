use crate::config::SchedulerSettings;
use crate::ports;
use crate::push::dispatcher::Dispatcher;
use crate::types::notification::Cadence;

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// The three cadence loops of one user's session, plus every tick they
/// spawned.
pub struct ScheduledSession {
    pub user_id: String,
    pub started_at: OffsetDateTime,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ScheduledSession {
    /// Stops all cadence timers. Evaluations in flight are abandoned;
    /// dispatches already under way run to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the loops have exited and no tick is still dispatching.
    pub fn is_finished(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn wait(&self) {
        self.tasks.wait().await;
    }
}

/// Waits for every loop and tick a scheduler has spawned, across all
/// sessions.
#[must_use = "a drain only waits when `wait` is awaited"]
pub struct Drain {
    tasks: TaskTracker,
}

impl Drain {
    pub async fn wait(self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

/// Spawns onto the session's tracker and the scheduler-wide one.
#[derive(Clone)]
struct Spawner {
    session: TaskTracker,
    all: TaskTracker,
}

impl Spawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.session.spawn(self.all.track_future(future));
    }
}

impl Drop for ScheduledSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct ReminderScheduler<E, S, N, P, T> {
    evaluator: E,
    dispatcher: Dispatcher<S, N, P, T>,
    time: T,
    settings: SchedulerSettings,
    tasks: TaskTracker,
}

impl<E, S, N, P, T> ReminderScheduler<E, S, N, P, T>
where
    E: ports::ReminderEvaluator,
    S: ports::SubscriptionStore,
    N: ports::NotificationStatusSink,
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    pub fn new(
        evaluator: E,
        dispatcher: Dispatcher<S, N, P, T>,
        time: T,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            evaluator,
            dispatcher,
            time,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    pub fn drain(&self) -> Drain {
        Drain {
            tasks: self.tasks.clone(),
        }
    }

    pub fn interval(&self, cadence: Cadence) -> Duration {
        let secs = match cadence {
            Cadence::Immediate => self.settings.immediate_secs,
            Cadence::Missed => self.settings.missed_secs,
            Cadence::Upcoming => self.settings.upcoming_secs,
        };
        Duration::from_secs(secs)
    }

    /// Starts one task per cadence for `user_id`, sharing one stop signal.
    pub fn start(&self, user_id: &str) -> ScheduledSession {
        let cancel = CancellationToken::new();
        let spawner = Spawner {
            session: TaskTracker::new(),
            all: self.tasks.clone(),
        };
        for &cadence in Cadence::ALL.iter() {
            let tick = Tick {
                evaluator: self.evaluator.clone(),
                dispatcher: self.dispatcher.clone(),
                user_id: Arc::from(user_id),
                cadence,
            };
            let time = self.time.clone();
            let interval = self.interval(cadence);
            spawner.spawn(run_cadence(
                tick,
                time,
                interval,
                cancel.clone(),
                spawner.clone(),
            ));
        }
        spawner.session.close();

        info!(user = %user_id, "reminder scheduler started");
        ScheduledSession {
            user_id: user_id.to_string(),
            started_at: self.time.now(),
            cancel,
            tasks: spawner.session,
        }
    }
}

struct Tick<E, S, N, P, T> {
    evaluator: E,
    dispatcher: Dispatcher<S, N, P, T>,
    user_id: Arc<str>,
    cadence: Cadence,
}

impl<E: Clone, S: Clone, N: Clone, P: Clone, T: Clone> Clone for Tick<E, S, N, P, T> {
    fn clone(&self) -> Self {
        Self {
            evaluator: self.evaluator.clone(),
            dispatcher: self.dispatcher.clone(),
            user_id: Arc::clone(&self.user_id),
            cadence: self.cadence,
        }
    }
}

async fn run_cadence<E, S, N, P, T>(
    tick: Tick<E, S, N, P, T>,
    time: T,
    interval: Duration,
    cancel: CancellationToken,
    spawner: Spawner,
) where
    E: ports::ReminderEvaluator,
    S: ports::SubscriptionStore,
    N: ports::NotificationStatusSink,
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    let running = Arc::new(Mutex::new(()));
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = time.sleep(interval) => {}
        }

        let Ok(guard) = Arc::clone(&running).try_lock_owned() else {
            warn!(
                user = %tick.user_id,
                cadence = %tick.cadence,
                "previous tick still running; skipping"
            );
            continue;
        };
        let tick = tick.clone();
        let cancel = cancel.clone();
        spawner.spawn(async move {
            let _guard = guard;
            run_tick(tick, cancel).await;
        });
    }
    debug!(user = %tick.user_id, cadence = %tick.cadence, "cadence stopped");
}

async fn run_tick<E, S, N, P, T>(tick: Tick<E, S, N, P, T>, cancel: CancellationToken)
where
    E: ports::ReminderEvaluator,
    S: ports::SubscriptionStore,
    N: ports::NotificationStatusSink,
    P: ports::PushTransport,
    T: ports::TimeProvider,
{
    let evaluation = tick.evaluator.evaluate(&tick.user_id, tick.cadence);
    let notifications = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(user = %tick.user_id, cadence = %tick.cadence, "evaluation abandoned");
            return;
        }
        result = evaluation => match result {
            Ok(notifications) => notifications,
            Err(err) => {
                warn!(
                    user = %tick.user_id,
                    cadence = %tick.cadence,
                    error = %err,
                    "reminder evaluation failed; skipping tick"
                );
                return;
            }
        },
    };

    if notifications.is_empty() {
        debug!(user = %tick.user_id, cadence = %tick.cadence, "nothing due");
        return;
    }

    let reports = tick
        .dispatcher
        .dispatch_batch(&notifications, tick.cadence.urgency())
        .await;
    let dispatched = reports.iter().filter(|report| report.is_ok()).count();
    info!(
        user = %tick.user_id,
        cadence = %tick.cadence,
        due = notifications.len(),
        dispatched,
        "cadence tick finished"
    );
}
