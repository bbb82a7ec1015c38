use crate::push;
use crate::store::JsonSubscriptionStore;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub public_key: Arc<str>,
    pub store: JsonSubscriptionStore,
    pub sessions: push::LiveSessions,
}
