use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use crate::error::{BackendError, ConfigError, TransportError};
use crate::ports;
use crate::ports::push::PushRequest;
use crate::types::notification::{Cadence, Notification, NotificationStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl ports::TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

/// Sends encrypted messages to browser push services.
#[derive(Debug, Clone)]
pub struct ReqwestPushTransport {
    client: reqwest::Client,
}

impl ReqwestPushTransport {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl ports::PushTransport for ReqwestPushTransport {
    type Error = TransportError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<u16, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn post<'a>(&'a self, request: &'a PushRequest) -> Self::Fut<'a> {
        Box::pin(async move {
            let mut builder = self
                .client
                .post(&request.endpoint)
                .header("TTL", request.ttl)
                .header(CONTENT_ENCODING, "aes128gcm")
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(AUTHORIZATION, &request.authorization);
            if let Some(urgency) = request.urgency {
                builder = builder.header("Urgency", urgency.as_str());
            }
            let response = builder.body(request.body.clone()).send().await?;
            Ok(response.status().as_u16())
        })
    }
}

/// Client for the application backend that owns reminders and notification
/// rows.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusTransition {
    expected: NotificationStatus,
    status: NotificationStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    sent_at: Option<OffsetDateTime>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBackendUrl {
            url: base_url.to_string(),
            reason,
        };
        let base = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("expected an http or https URL".to_string()));
        }
        if base.cannot_be_a_base() {
            return Err(invalid("URL cannot carry a path".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { base, client })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn due_reminders(
        &self,
        user_id: &str,
        cadence: Cadence,
    ) -> Result<Vec<Notification>, BackendError> {
        let url = self.url(&["api", "users", user_id, "reminders", "due"])?;
        let response = self
            .client
            .get(url)
            .query(&[("cadence", cadence.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn transition_status(
        &self,
        notification_id: &str,
        status: NotificationStatus,
        sent_at: Option<OffsetDateTime>,
    ) -> Result<bool, BackendError> {
        let url = self.url(&["api", "notifications", notification_id, "status"])?;
        let body = StatusTransition {
            expected: NotificationStatus::Pending,
            status,
            sent_at,
        };
        let response = self.client.post(url).json(&body).send().await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            409 => Ok(false),
            other => Err(BackendError::Status(other)),
        }
    }
}

impl ports::ReminderEvaluator for HttpBackend {
    type Error = BackendError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<Vec<Notification>, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn evaluate<'a>(&'a self, user_id: &'a str, cadence: Cadence) -> Self::Fut<'a> {
        Box::pin(self.due_reminders(user_id, cadence))
    }
}

impl ports::NotificationStatusSink for HttpBackend {
    type Error = BackendError;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<bool, Self::Error>> + Send + 'a>>
    where
        Self: 'a;

    fn transition<'a>(
        &'a self,
        notification_id: &'a str,
        status: NotificationStatus,
        sent_at: Option<OffsetDateTime>,
    ) -> Self::Fut<'a> {
        Box::pin(self.transition_status(notification_id, status, sent_at))
    }
}
