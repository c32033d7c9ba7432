//! Status notification channel.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, owned by the composing application.
//! - [`StatusEvent`]: clip/video status changes and deletions.
//! - [`StatusLogger`]: background subscriber that logs every event and
//!   optionally appends it to a JSON-lines journal.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, StatusEvent};
pub use logger::StatusLogger;
