//! Hand-rolled port fakes shared by unit tests.

use base64::{URL_SAFE_NO_PAD, encode_config};
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Notify, oneshot};

use crate::ports;
use crate::ports::push::PushRequest;
use crate::push::vapid::{VapidSigner, generate_vapid_credentials};
use crate::types::notification::{Cadence, Notification, NotificationStatus};
use crate::types::push::{PushSubscription, SubscriptionId, VapidConfig};

pub(crate) fn fixed_now() -> OffsetDateTime {
    OffsetDateTime::parse("2025-01-12T09:30:00Z", &Rfc3339).expect("parse now")
}

pub(crate) fn test_signer() -> VapidSigner {
    let credentials = generate_vapid_credentials().expect("credentials should generate");
    VapidSigner::new(&VapidConfig {
        private_key: credentials.private_key,
        public_key: credentials.public_key,
        subject: "mailto:ops@example.com".to_string(),
    })
    .expect("signer")
}

/// A subscription with real key material, plus the browser-side secret.
pub(crate) fn test_subscription(user_id: &str, endpoint: &str) -> (PushSubscription, SecretKey) {
    let secret = SecretKey::random(&mut OsRng);
    let mut auth = [0u8; 16];
    OsRng.fill_bytes(&mut auth);
    let subscription = PushSubscription {
        id: SubscriptionId::new(),
        user_id: user_id.to_string(),
        endpoint: endpoint.to_string(),
        p256dh: encode_config(
            secret.public_key().to_encoded_point(false).as_bytes(),
            URL_SAFE_NO_PAD,
        ),
        auth: encode_config(auth, URL_SAFE_NO_PAD),
        created_at: fixed_now(),
    };
    (subscription, secret)
}

pub(crate) fn test_notification(id: &str, user_id: &str) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: user_id.to_string(),
        kind: "medication".to_string(),
        title: "Aspirin".to_string(),
        message: "Take 1 tablet".to_string(),
        data: None,
        status: NotificationStatus::Pending,
        created_at: fixed_now(),
        sent_at: None,
    }
}

pub(crate) async fn settle_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Clock whose sleeps either finish at once (`instant`) or wait for
/// [`TestTime::trigger`].
#[derive(Clone)]
pub(crate) struct TestTime {
    now: OffsetDateTime,
    manual: bool,
    sleeps: Arc<Mutex<Vec<(Duration, oneshot::Sender<()>)>>>,
    durations: Arc<Mutex<Vec<Duration>>>,
}

impl TestTime {
    pub(crate) fn instant() -> Self {
        Self::with_mode(false)
    }

    pub(crate) fn manual() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(manual: bool) -> Self {
        Self {
            now: fixed_now(),
            manual,
            sleeps: Arc::new(Mutex::new(Vec::new())),
            durations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn sleep_durations(&self) -> Vec<Duration> {
        self.durations.lock().expect("durations lock").clone()
    }

    pub(crate) fn pending_sleeps(&self, duration: Duration) -> usize {
        self.sleeps
            .lock()
            .expect("sleeps lock")
            .iter()
            .filter(|(pending, sender)| *pending == duration && !sender.is_closed())
            .count()
    }

    pub(crate) fn trigger(&self, duration: Duration) {
        let mut sleeps = self.sleeps.lock().expect("sleeps lock");
        let (due, waiting): (Vec<_>, Vec<_>) = sleeps
            .drain(..)
            .partition(|(pending, _)| *pending == duration);
        *sleeps = waiting;
        for (_, sender) in due {
            let _ = sender.send(());
        }
    }
}

pub(crate) struct ManualSleep {
    receiver: oneshot::Receiver<()>,
}

impl Future for ManualSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ports::TimeProvider for TestTime {
    type Sleep<'a>
        = ManualSleep
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        self.now
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        let (sender, receiver) = oneshot::channel();
        self.durations
            .lock()
            .expect("durations lock")
            .push(duration);
        if self.manual {
            self.sleeps
                .lock()
                .expect("sleeps lock")
                .push((duration, sender));
        } else {
            let _ = sender.send(());
        }
        ManualSleep { receiver }
    }
}

#[derive(Debug)]
pub(crate) struct TestError(pub(crate) &'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

enum Scripted {
    Statuses(VecDeque<u16>),
    Fail,
}

/// Push transport answering 201 unless told otherwise per endpoint. The
/// last scripted status repeats.
#[derive(Clone, Default)]
pub(crate) struct TestTransport {
    scripts: Arc<Mutex<HashMap<String, Scripted>>>,
    requests: Arc<Mutex<Vec<PushRequest>>>,
}

impl TestTransport {
    pub(crate) fn respond(&self, endpoint: &str, statuses: &[u16]) {
        self.scripts.lock().expect("scripts lock").insert(
            endpoint.to_string(),
            Scripted::Statuses(statuses.iter().copied().collect()),
        );
    }

    pub(crate) fn fail(&self, endpoint: &str) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(endpoint.to_string(), Scripted::Fail);
    }

    pub(crate) fn requests(&self) -> Vec<PushRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn attempts(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|request| request.endpoint == endpoint)
            .count()
    }

    fn next(&self, endpoint: &str) -> Result<u16, TestError> {
        let mut scripts = self.scripts.lock().expect("scripts lock");
        match scripts.get_mut(endpoint) {
            None => Ok(201),
            Some(Scripted::Fail) => Err(TestError("connection refused")),
            Some(Scripted::Statuses(statuses)) => {
                if statuses.len() > 1 {
                    Ok(statuses.pop_front().unwrap_or(201))
                } else {
                    Ok(statuses.front().copied().unwrap_or(201))
                }
            }
        }
    }
}

impl ports::PushTransport for TestTransport {
    type Error = TestError;
    type Fut<'a>
        = std::future::Ready<Result<u16, Self::Error>>
    where
        Self: 'a;

    fn post<'a>(&'a self, request: &'a PushRequest) -> Self::Fut<'a> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        std::future::ready(self.next(&request.endpoint))
    }
}

#[derive(Clone, Default)]
pub(crate) struct TestStore {
    rows: Arc<Mutex<HashMap<SubscriptionId, PushSubscription>>>,
    list_calls: Arc<AtomicUsize>,
    removed: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl TestStore {
    pub(crate) fn with(subscriptions: &[PushSubscription]) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().expect("rows lock");
            for subscription in subscriptions {
                rows.insert(subscription.id, subscription.clone());
            }
        }
        store
    }

    pub(crate) fn contains(&self, id: &SubscriptionId) -> bool {
        self.rows.lock().expect("rows lock").contains_key(id)
    }

    pub(crate) fn removed(&self) -> Vec<SubscriptionId> {
        self.removed.lock().expect("removed lock").clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl ports::SubscriptionStore for TestStore {
    type Error = TestError;
    type ListFut<'a>
        = std::future::Ready<Result<Vec<PushSubscription>, Self::Error>>
    where
        Self: 'a;
    type RemoveFut<'a>
        = std::future::Ready<Result<bool, Self::Error>>
    where
        Self: 'a;

    fn list_by_user<'a>(&'a self, user_id: &'a str) -> Self::ListFut<'a> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().expect("rows lock");
        let mut subscriptions: Vec<_> = rows
            .values()
            .filter(|subscription| subscription.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        std::future::ready(Ok(subscriptions))
    }

    fn remove<'a>(&'a self, id: &'a SubscriptionId) -> Self::RemoveFut<'a> {
        let removed = self.rows.lock().expect("rows lock").remove(id).is_some();
        if removed {
            self.removed.lock().expect("removed lock").push(*id);
        }
        std::future::ready(Ok(removed))
    }
}

/// Status sink with compare-and-set semantics; unknown ids start pending.
#[derive(Clone, Default)]
pub(crate) struct TestStatusSink {
    statuses: Arc<Mutex<HashMap<String, (NotificationStatus, Option<OffsetDateTime>)>>>,
    applied: Arc<Mutex<Vec<(String, NotificationStatus)>>>,
}

impl TestStatusSink {
    pub(crate) fn status(&self, id: &str) -> NotificationStatus {
        self.statuses
            .lock()
            .expect("statuses lock")
            .get(id)
            .map(|(status, _)| *status)
            .unwrap_or(NotificationStatus::Pending)
    }

    pub(crate) fn sent_at(&self, id: &str) -> Option<OffsetDateTime> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .get(id)
            .and_then(|(_, sent_at)| *sent_at)
    }

    pub(crate) fn applied(&self) -> Vec<(String, NotificationStatus)> {
        self.applied.lock().expect("applied lock").clone()
    }
}

impl ports::NotificationStatusSink for TestStatusSink {
    type Error = TestError;
    type Fut<'a>
        = std::future::Ready<Result<bool, Self::Error>>
    where
        Self: 'a;

    fn transition<'a>(
        &'a self,
        notification_id: &'a str,
        status: NotificationStatus,
        sent_at: Option<OffsetDateTime>,
    ) -> Self::Fut<'a> {
        let mut statuses = self.statuses.lock().expect("statuses lock");
        let current = statuses
            .get(notification_id)
            .map(|(status, _)| *status)
            .unwrap_or(NotificationStatus::Pending);
        if current != NotificationStatus::Pending {
            return std::future::ready(Ok(false));
        }
        statuses.insert(notification_id.to_string(), (status, sent_at));
        self.applied
            .lock()
            .expect("applied lock")
            .push((notification_id.to_string(), status));
        std::future::ready(Ok(true))
    }
}

/// Evaluator returning canned notifications; cadences can be held open to
/// simulate a slow backend.
#[derive(Clone, Default)]
pub(crate) struct TestEvaluator {
    calls: Arc<Mutex<Vec<(String, Cadence)>>>,
    results: Arc<Mutex<HashMap<Cadence, Vec<Notification>>>>,
    failing: Arc<Mutex<Vec<Cadence>>>,
    held: Arc<Mutex<HashMap<Cadence, Arc<Notify>>>>,
}

impl TestEvaluator {
    pub(crate) fn returns(&self, cadence: Cadence, notifications: Vec<Notification>) {
        self.results
            .lock()
            .expect("results lock")
            .insert(cadence, notifications);
    }

    pub(crate) fn fail(&self, cadence: Cadence) {
        self.failing.lock().expect("failing lock").push(cadence);
    }

    /// Calls for `cadence` block until the returned gate is notified.
    pub(crate) fn hold(&self, cadence: Cadence) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held
            .lock()
            .expect("held lock")
            .insert(cadence, Arc::clone(&gate));
        gate
    }

    pub(crate) fn calls(&self, cadence: Cadence) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(_, called)| *called == cadence)
            .count()
    }
}

impl ports::ReminderEvaluator for TestEvaluator {
    type Error = TestError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<Vec<Notification>, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn evaluate<'a>(&'a self, user_id: &'a str, cadence: Cadence) -> Self::Fut<'a> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((user_id.to_string(), cadence));
        let gate = self.held.lock().expect("held lock").get(&cadence).cloned();
        let failing = self.failing.lock().expect("failing lock").contains(&cadence);
        let result = self
            .results
            .lock()
            .expect("results lock")
            .get(&cadence)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if failing {
                return Err(TestError("evaluation backend down"));
            }
            Ok(result)
        })
    }
}
