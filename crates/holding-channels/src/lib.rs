//! Outbound alert channels.
//!
//! Alerts (spend breaker trips, task escalations) are fire-and-forget: a
//! failed delivery is logged by the caller and never fails the pipeline.
//!
//! # Main types
//!
//! - [`Notifier`]: Trait for delivering an [`Alert`].
//! - [`TelegramNotifier`]: Telegram Bot API delivery.
//! - [`LogNotifier`]: Writes alerts to the log only.
//! - [`FanoutNotifier`]: Delivers to several notifiers.

/// Notifier trait and alert types.
pub mod notifier;
/// Telegram channel integration.
pub mod telegram;

pub use notifier::{Alert, AlertKind, FanoutNotifier, LogNotifier, Notifier};
pub use telegram::TelegramNotifier;
