use crate::adapters::{HttpBackend, ReqwestPushTransport, TokioTimeProvider};
use crate::config;
use crate::error::ConfigError;
use crate::store::JsonSubscriptionStore;

pub mod dispatcher;
pub mod encrypt;
mod payload;
pub mod scheduler;
pub mod sessions;
pub mod vapid;
pub mod worker;

pub use dispatcher::{DeliveryReport, Dispatcher, NotificationReport};
pub use scheduler::{Drain, ReminderScheduler, ScheduledSession};
pub use sessions::{SessionInfo, SessionRegistry};
pub(crate) use vapid::{VapidConfigStatus, load_vapid_config};
pub use vapid::{VapidCredentials, VapidSigner, generate_vapid_credentials};
pub use worker::DeliveryWorker;

pub type LiveScheduler = ReminderScheduler<
    HttpBackend,
    JsonSubscriptionStore,
    HttpBackend,
    ReqwestPushTransport,
    TokioTimeProvider,
>;

pub type LiveSessions = SessionRegistry<
    HttpBackend,
    JsonSubscriptionStore,
    HttpBackend,
    ReqwestPushTransport,
    TokioTimeProvider,
>;

/// Builds the delivery pipeline. Any configuration problem is returned
/// before a single task is spawned.
pub fn build_sessions(
    config: &config::AppConfig,
    store: JsonSubscriptionStore,
) -> Result<LiveSessions, ConfigError> {
    let vapid = match load_vapid_config(config) {
        VapidConfigStatus::Ready(vapid) => vapid,
        VapidConfigStatus::Incomplete => return Err(ConfigError::IncompleteVapid),
        VapidConfigStatus::Missing => return Err(ConfigError::MissingVapid),
    };
    let signer = VapidSigner::new(&vapid)?;

    let backend_url = config
        .backend_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(ConfigError::MissingBackendUrl)?;
    let delivery = config.tuning.delivery.clone();
    let backend = HttpBackend::new(backend_url, delivery.request_timeout())?;
    let transport = ReqwestPushTransport::new(delivery.request_timeout())?;

    let worker = DeliveryWorker::new(signer, transport, delivery.ttl_secs);
    let dispatcher = Dispatcher::new(
        store,
        backend.clone(),
        worker,
        TokioTimeProvider,
        delivery,
    );
    let scheduler = ReminderScheduler::new(
        backend,
        dispatcher,
        TokioTimeProvider,
        config.tuning.scheduler.clone(),
    );
    Ok(SessionRegistry::new(scheduler))
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    fn ready_config() -> config::AppConfig {
        let credentials = generate_vapid_credentials().expect("credentials");
        config::AppConfig {
            vapid_private_key: Some(credentials.private_key),
            vapid_public_key: Some(credentials.public_key),
            vapid_subject: Some("mailto:ops@example.com".to_string()),
            backend_url: Some("http://127.0.0.1:8080".to_string()),
            ..config::AppConfig::default()
        }
    }

    #[test]
    fn build_sessions__should_accept_complete_configuration() {
        let result = build_sessions(&ready_config(), JsonSubscriptionStore::in_memory());

        assert!(result.is_ok());
    }

    #[test]
    fn build_sessions__should_fail_without_vapid_configuration() {
        // Given
        let mut config = ready_config();
        config.vapid_private_key = None;
        config.vapid_public_key = None;
        config.vapid_subject = None;

        // When
        let result = build_sessions(&config, JsonSubscriptionStore::in_memory());

        // Then
        assert!(matches!(result, Err(ConfigError::MissingVapid)));
    }

    #[test]
    fn build_sessions__should_fail_with_partial_vapid_configuration() {
        let mut config = ready_config();
        config.vapid_subject = Some("  ".to_string());

        let result = build_sessions(&config, JsonSubscriptionStore::in_memory());

        assert!(matches!(result, Err(ConfigError::IncompleteVapid)));
    }

    #[test]
    fn build_sessions__should_fail_on_malformed_private_key() {
        let mut config = ready_config();
        config.vapid_private_key = Some("not-a-key".to_string());

        let result = build_sessions(&config, JsonSubscriptionStore::in_memory());

        assert!(matches!(result, Err(ConfigError::Vapid(_))));
    }

    #[test]
    fn build_sessions__should_require_backend_url() {
        let mut config = ready_config();
        config.backend_url = None;

        let result = build_sessions(&config, JsonSubscriptionStore::in_memory());

        assert!(matches!(result, Err(ConfigError::MissingBackendUrl)));
    }
}
