//! fleet-notify — telling humans what a reconciliation run did.
//!
//! Renders a markdown report (or an error message) per run and posts it to
//! a chat incoming webhook. Delivery is best-effort: callers log a failed
//! send and carry on.
//!
//! # Components
//!
//! - **`report`** — run report and error message rendering
//! - **`webhook`** — `Notifier` trait, webhook payload and HTTP delivery

pub mod error;
pub mod report;
pub mod webhook;

pub use error::{NotifyError, NotifyResult};
pub use report::{RunReport, render_error, wrap_code_block, wrap_inline_code};
pub use webhook::{MemoryNotifier, Notifier, Payload, WebhookNotifier};
