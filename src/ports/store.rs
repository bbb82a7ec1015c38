use crate::types::push::{PushSubscription, SubscriptionId};

pub trait SubscriptionStore: Clone + Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;
    type ListFut<'a>: Future<Output = Result<Vec<PushSubscription>, Self::Error>> + Send + 'a
    where
        Self: 'a;
    type RemoveFut<'a>: Future<Output = Result<bool, Self::Error>> + Send + 'a
    where
        Self: 'a;

    fn list_by_user<'a>(&'a self, user_id: &'a str) -> Self::ListFut<'a>;

    /// Idempotent; resolves to `true` only for the call that actually
    /// deleted the row.
    fn remove<'a>(&'a self, id: &'a SubscriptionId) -> Self::RemoveFut<'a>;
}
