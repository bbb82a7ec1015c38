use serde::Serialize;

use crate::error::EncryptError;
use crate::types::notification::Notification;

/// What the service worker receives in its `push` event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload<'a> {
    notification_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    title: &'a str,
    body: &'a str,
    tag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a serde_json::Value>,
}

/// Serializes the notification for the service worker, shortening the body
/// until the JSON fits in `limit` bytes. Encryption happens afterwards, so
/// the authentication tag always covers the final bytes.
pub(crate) fn encode(notification: &Notification, limit: usize) -> Result<Vec<u8>, EncryptError> {
    let mut payload = PushPayload {
        notification_id: &notification.id,
        kind: &notification.kind,
        title: &notification.title,
        body: &notification.message,
        tag: &notification.kind,
        data: notification.data.as_ref(),
    };

    loop {
        let bytes = serde_json::to_vec(&payload)?;
        if bytes.len() <= limit {
            return Ok(bytes);
        }
        if payload.body.is_empty() {
            return Err(EncryptError::PayloadTooLarge {
                len: bytes.len(),
                max: limit,
            });
        }
        let excess = bytes.len() - limit;
        let mut cut = payload.body.len().saturating_sub(excess);
        while !payload.body.is_char_boundary(cut) {
            cut -= 1;
        }
        payload.body = &payload.body[..cut];
    }
}
