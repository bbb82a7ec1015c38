pub mod push;
pub mod reminders;
pub mod store;
pub mod time;

pub use push::PushTransport;
pub use reminders::{NotificationStatusSink, ReminderEvaluator};
pub use store::SubscriptionStore;
pub use time::TimeProvider;
