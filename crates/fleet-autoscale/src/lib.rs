//! fleet-autoscale — user-count driven installation sizing.
//!
//! Maps an installation's current size tier and active-user count to the
//! tier it should be running at, then proposes a resize through the
//! reconciliation pass.
//!
//! # Scaling Algorithm
//!
//! ```text
//! size = current
//! loop:
//!     band = ladder[size]
//!     if users < band.scale_down_below:   size = band.scale_down_to
//!     elif users > band.scale_up_above:   size = band.scale_up_to
//!     else:                               return size
//! ```
//!
//! Adjacent bands overlap (down below 10 on `cloud100users`, up above 11
//! on `cloud10users`), leaving a dead zone where the count can hover
//! without the size flapping. One pass may walk several tiers after a
//! large swing in user count.

pub mod planner;
pub mod sizes;

pub use planner::ScalePlanner;
pub use sizes::{ScaleBand, SizeError, SizeLadder};
