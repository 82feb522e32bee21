//! fleet-hibernate — putting idle installations to sleep, and back.
//!
//! # Components
//!
//! - **`classifier`** — decides whether an installation is inactive enough
//!   to hibernate, and whether its population exempts it anyway
//! - **`planner`** — the hibernate, wake-up and delete planners
//!
//! # Eligibility rules
//!
//! Evaluated in order; the first decisive rule wins:
//!
//! ```text
//! locked, no unlock permission      → Error(locked)
//! state != stable                   → Error(unexpected state)
//! created within min_age            → NotEligible(too recent)
//! new-content query fails / no data → Error(metrics unavailable)
//! new content > 0                   → NotEligible(active)
//! no user count                     → Error(no user metrics)
//! user count == 0                   → Error(zero user count)
//! users >= max_exempt_users         → ExemptEligible(population)
//! otherwise                         → Eligible
//! ```

pub mod classifier;
pub mod planner;

pub use classifier::{HibernationPolicy, HibernationVerdict, classify};
pub use planner::{DeletePlanner, HibernatePlanner, WakeUpPlanner};
