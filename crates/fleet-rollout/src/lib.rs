//! fleet-rollout — safe, throttled execution of reconciliation actions.
//!
//! Every reconciliation command (scale, hibernate, wake-up, delete) runs
//! the same pass: plan each candidate from a start-of-pass snapshot, then
//! execute the approved actions in small batches gated on the platform's
//! "currently updating" gauge, with every mutation bracketed by the lock
//! guard.
//!
//! # Components
//!
//! - **`reconciler`** — the `Reconciler` trait each command's planner implements
//! - **`guard`** — unlock-before / relock-after wrapper around one mutation
//! - **`batch`** — the batched admission loop (gauge, batch, delay, deadline)
//! - **`pass`** — candidate gathering and the plan-then-execute driver
//!
//! # Pass
//!
//! ```text
//! candidates ──► [shuffle] ──► Reconciler::plan ──► RunSummary + actions
//!                                                        │
//!                                   dry run? ◄───────────┘
//!                                      │ no
//!                                      ▼
//!                 BatchLoop ──► re-fetch ──► lock guard ──► mutation
//! ```

pub mod batch;
pub mod error;
pub mod guard;
pub mod pass;
pub mod reconciler;

pub use batch::{AdmissionGauge, BatchConfig, BatchLoop, BatchStep, StepOutcome};
pub use error::{GuardError, ReconcileError, ReconcileResult};
pub use guard::{Guarded, with_mutation};
pub use pass::{Candidate, ReconcilePass, fetch_candidates, list_candidates};
pub use reconciler::{Plan, Reconciler, lock_gate};
