pub mod lifecycle;
pub mod notifier;

pub use lifecycle::AccountLifecycle;
pub use notifier::{LogNotifier, MockNotifier, Notification, Notifier, SmtpNotifier};
