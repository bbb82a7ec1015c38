//! Subscription storage: an in-memory map with an optional JSON snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use time::OffsetDateTime;
use tracing::{debug, info};
use url::Url;

use crate::error::StoreError;
use crate::ports;
use crate::push::encrypt;
use crate::types::push::{PushSubscription, SubscriptionDescriptor, SubscriptionId};

#[derive(Debug, Clone, Default)]
pub struct JsonSubscriptionStore {
    path: Option<Arc<PathBuf>>,
    rows: Arc<RwLock<HashMap<SubscriptionId, PushSubscription>>>,
}

impl JsonSubscriptionStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path`; a missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rows = match std::fs::read(&path) {
            Ok(bytes) => {
                let subscriptions: Vec<PushSubscription> = serde_json::from_slice(&bytes)?;
                subscriptions
                    .into_iter()
                    .map(|subscription| (subscription.id, subscription))
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), subscriptions = rows.len(), "subscription store loaded");
        Ok(Self {
            path: Some(Arc::new(path)),
            rows: Arc::new(RwLock::new(rows)),
        })
    }

    /// Registers a browser subscription.
    ///
    /// Re-registering the same endpoint with the same keys returns the
    /// existing row. New keys for a known endpoint replace that row under a
    /// fresh id.
    pub fn create(
        &self,
        user_id: &str,
        descriptor: SubscriptionDescriptor,
    ) -> Result<PushSubscription, StoreError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(StoreError::InvalidSubscription(
                "userId must not be empty".to_string(),
            ));
        }
        validate_endpoint(&descriptor.endpoint)?;
        encrypt::validate_keys(&descriptor.keys.p256dh, &descriptor.keys.auth)
            .map_err(|err| StoreError::InvalidSubscription(err.to_string()))?;

        let mut rows = self.rows.write().expect("subscriptions lock");
        let existing = rows
            .values()
            .find(|row| row.endpoint == descriptor.endpoint)
            .cloned();
        if let Some(existing) = &existing
            && existing.user_id == user_id
            && existing.same_keys(&descriptor)
        {
            debug!(subscription = %existing.id, "push subscription already registered");
            return Ok(existing.clone());
        }

        let subscription = PushSubscription {
            id: SubscriptionId::new(),
            user_id: user_id.to_string(),
            endpoint: descriptor.endpoint,
            p256dh: descriptor.keys.p256dh,
            auth: descriptor.keys.auth,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut next = rows.clone();
        if let Some(existing) = &existing {
            next.remove(&existing.id);
        }
        next.insert(subscription.id, subscription.clone());
        self.persist(&next)?;
        *rows = next;

        match existing {
            Some(existing) => info!(
                user = %user_id,
                subscription = %subscription.id,
                replaced = %existing.id,
                "push subscription replaced"
            ),
            None => info!(user = %user_id, subscription = %subscription.id, "push subscription registered"),
        }
        Ok(subscription)
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<PushSubscription> {
        self.rows.read().expect("subscriptions lock").get(id).cloned()
    }

    pub fn list(&self, user_id: &str) -> Vec<PushSubscription> {
        let rows = self.rows.read().expect("subscriptions lock");
        let mut subscriptions: Vec<_> = rows
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        subscriptions
    }

    pub fn delete(&self, id: &SubscriptionId) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().expect("subscriptions lock");
        if !rows.contains_key(id) {
            return Ok(false);
        }
        let mut next = rows.clone();
        next.remove(id);
        self.persist(&next)?;
        *rows = next;
        Ok(true)
    }

    fn persist(&self, rows: &HashMap<SubscriptionId, PushSubscription>) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut snapshot: Vec<_> = rows.values().collect();
        snapshot.sort_by_key(|row| row.id.0);
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomically(path, &bytes)?;
        Ok(())
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), StoreError> {
    let valid = Url::parse(endpoint)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSubscription(format!(
            "endpoint '{endpoint}' is not an http(s) URL"
        )))
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

impl ports::SubscriptionStore for JsonSubscriptionStore {
    type Error = StoreError;
    type ListFut<'a>
        = std::future::Ready<Result<Vec<PushSubscription>, Self::Error>>
    where
        Self: 'a;
    type RemoveFut<'a>
        = Pin<Box<dyn Future<Output = Result<bool, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn list_by_user<'a>(&'a self, user_id: &'a str) -> Self::ListFut<'a> {
        std::future::ready(Ok(self.list(user_id)))
    }

    /// Writes the snapshot on the blocking pool.
    fn remove<'a>(&'a self, id: &'a SubscriptionId) -> Self::RemoveFut<'a> {
        let store = self.clone();
        let id = *id;
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || store.delete(&id)).await {
                Ok(result) => result,
                Err(err) => Err(StoreError::Task(err)),
            }
        })
    }
}
