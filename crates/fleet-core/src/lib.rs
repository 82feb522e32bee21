//! fleet-core — shared building blocks for the fleet controller.
//!
//! Holds the read-only view of an installation as reported by the
//! provisioning platform, the action/skip vocabulary every reconciliation
//! command speaks, and the run summary handed to the notifier.
//!
//! # Components
//!
//! - **`types`** — `Installation`, `LifecycleState`, actions, skip reasons, `RunSummary`
//! - **`duration`** — compact duration strings (`500ms`, `15s`, `3h`)
//! - **`transport`** — minimal HTTP/1 client used by the platform, metrics and webhook clients

pub mod duration;
pub mod error;
pub mod transport;
pub mod types;

pub use duration::parse_duration;
pub use error::TransportError;
pub use transport::{HttpResponse, HttpTransport, encode_component, encode_query};
pub use types::*;
