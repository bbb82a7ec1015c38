use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::ports;
use crate::ports::push::{PushRequest, Urgency};
use crate::push::encrypt;
use crate::push::vapid::{VapidSigner, audience};
use crate::types::notification::DeliveryOutcome;
use crate::types::push::PushSubscription;

/// Maps a push service response status onto a delivery outcome.
pub fn classify(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Delivered,
        404 | 410 => DeliveryOutcome::PermanentFailure,
        429 | 500..=599 => DeliveryOutcome::TransientFailure,
        _ => DeliveryOutcome::TransientFailure,
    }
}

/// Encrypts, signs and sends one payload to one subscription.
#[derive(Debug, Clone)]
pub struct DeliveryWorker<P> {
    signer: VapidSigner,
    transport: P,
    ttl: u32,
}

impl<P> DeliveryWorker<P>
where
    P: ports::PushTransport,
{
    pub fn new(signer: VapidSigner, transport: P, ttl: u32) -> Self {
        Self {
            signer,
            transport,
            ttl,
        }
    }

    /// A single attempt. Retrying is the dispatcher's call; this only
    /// reports what happened.
    pub async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        urgency: Urgency,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let body = encrypt::encrypt(payload, &subscription.p256dh, &subscription.auth)?;
        let authorization = self.signer.authorization(&subscription.endpoint)?;
        let request = PushRequest {
            endpoint: subscription.endpoint.clone(),
            body,
            authorization,
            ttl: self.ttl,
            urgency: Some(urgency),
        };
        let origin = audience(&subscription.endpoint).unwrap_or_default();

        let status = match self.transport.post(&request).await {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    subscription = %subscription.id,
                    push_service = %origin,
                    error = %err,
                    "push request failed"
                );
                return Ok(DeliveryOutcome::TransientFailure);
            }
        };

        let outcome = classify(status);
        match (outcome, status) {
            (DeliveryOutcome::Delivered, _) => debug!(
                subscription = %subscription.id,
                push_service = %origin,
                status,
                "push accepted"
            ),
            (DeliveryOutcome::PermanentFailure, _) => info!(
                subscription = %subscription.id,
                push_service = %origin,
                status,
                "push subscription gone"
            ),
            (_, 429 | 500..=599) => warn!(
                subscription = %subscription.id,
                push_service = %origin,
                status,
                "push service unavailable"
            ),
            _ => warn!(
                subscription = %subscription.id,
                push_service = %origin,
                status,
                "unexpected push service response"
            ),
        }
        Ok(outcome)
    }
}
