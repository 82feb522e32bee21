//! Size ladder and hysteresis bands.

use std::collections::HashSet;

use thiserror::Error;

pub const CLOUD_10_USERS: &str = "cloud10users";
pub const CLOUD_100_USERS: &str = "cloud100users";
pub const SIZE_1000_USERS: &str = "1000users";
pub const SIZE_5000_USERS: &str = "5000users";
pub const SIZE_10000_USERS: &str = "10000users";
pub const SIZE_25000_USERS: &str = "25000users";
/// Fixed-capacity sizes that are never scaled.
pub const MINI_SINGLETON: &str = "miniSingleton";
pub const MINI_HA: &str = "miniHA";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("no scale values found for size {0}")]
    UnknownSize(String),

    #[error("size {0} appears more than once in the ladder")]
    DuplicateSize(String),

    #[error("size {size} scales to unknown size {neighbor}")]
    UnknownNeighbor { size: String, neighbor: String },

    #[error("bands of {lower} and {upper} overlap: a user count can trigger both moves")]
    OverlappingBands { lower: String, upper: String },

    #[error("no stable size found from {size} with {users} users")]
    NoFixedPoint { size: String, users: i64 },
}

/// Thresholds for one size tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleBand {
    pub name: String,
    /// Strictly fewer users than this moves to `scale_down_to`.
    pub scale_down_below: i64,
    /// Strictly more users than this moves to `scale_up_to`. `None` never
    /// scales up.
    pub scale_up_above: Option<i64>,
    pub scale_down_to: String,
    pub scale_up_to: String,
}

impl ScaleBand {
    pub fn new(
        name: &str,
        scale_down_below: i64,
        scale_up_above: Option<i64>,
        scale_down_to: &str,
        scale_up_to: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            scale_down_below,
            scale_up_above,
            scale_down_to: scale_down_to.to_string(),
            scale_up_to: scale_up_to.to_string(),
        }
    }

    /// A tier that maps to itself for every user count.
    pub fn fixed(name: &str) -> Self {
        Self::new(name, 0, None, name, name)
    }

    fn next(&self, users: i64) -> Option<&str> {
        if users < self.scale_down_below {
            Some(&self.scale_down_to)
        } else if self.scale_up_above.is_some_and(|up| users > up) {
            Some(&self.scale_up_to)
        } else {
            None
        }
    }
}

/// A validated, ordered set of size tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLadder {
    bands: Vec<ScaleBand>,
}

impl SizeLadder {
    /// Build a ladder, rejecting unknown neighbours and overlapping bands.
    pub fn new(bands: Vec<ScaleBand>) -> Result<Self, SizeError> {
        let ladder = Self { bands };
        ladder.validate()?;
        Ok(ladder)
    }

    /// The production ladder.
    pub fn standard() -> Self {
        Self {
            bands: vec![
                ScaleBand::new(CLOUD_10_USERS, 0, Some(11), CLOUD_10_USERS, CLOUD_100_USERS),
                ScaleBand::new(
                    CLOUD_100_USERS,
                    10,
                    Some(110),
                    CLOUD_10_USERS,
                    SIZE_1000_USERS,
                ),
                ScaleBand::new(
                    SIZE_1000_USERS,
                    90,
                    Some(1100),
                    CLOUD_100_USERS,
                    SIZE_5000_USERS,
                ),
                ScaleBand::new(
                    SIZE_5000_USERS,
                    900,
                    Some(5100),
                    SIZE_1000_USERS,
                    SIZE_10000_USERS,
                ),
                ScaleBand::new(
                    SIZE_10000_USERS,
                    4900,
                    Some(10100),
                    SIZE_5000_USERS,
                    SIZE_25000_USERS,
                ),
                ScaleBand::new(
                    SIZE_25000_USERS,
                    9900,
                    None,
                    SIZE_10000_USERS,
                    SIZE_25000_USERS,
                ),
                ScaleBand::fixed(MINI_SINGLETON),
                ScaleBand::fixed(MINI_HA),
            ],
        }
    }

    pub fn band(&self, size: &str) -> Result<&ScaleBand, SizeError> {
        self.bands
            .iter()
            .find(|b| b.name == size)
            .ok_or_else(|| SizeError::UnknownSize(size.to_string()))
    }

    pub fn bands(&self) -> &[ScaleBand] {
        &self.bands
    }

    /// Check neighbour names and the fixed-point rule: no user count may
    /// move an installation up into a tier that would immediately move it
    /// back down, or the reverse.
    pub fn validate(&self) -> Result<(), SizeError> {
        let mut seen = HashSet::new();
        for band in &self.bands {
            if !seen.insert(band.name.as_str()) {
                return Err(SizeError::DuplicateSize(band.name.clone()));
            }
        }

        for band in &self.bands {
            for neighbor in [&band.scale_down_to, &band.scale_up_to] {
                if !seen.contains(neighbor.as_str()) {
                    return Err(SizeError::UnknownNeighbor {
                        size: band.name.clone(),
                        neighbor: neighbor.clone(),
                    });
                }
            }

            // Smallest count that leaves upwards must not fall below the
            // upper tier's own floor.
            if band.scale_up_to != band.name
                && let Some(up) = band.scale_up_above
            {
                let upper = self.band(&band.scale_up_to)?;
                if upper.scale_down_below > up.saturating_add(1) {
                    return Err(SizeError::OverlappingBands {
                        lower: band.name.clone(),
                        upper: upper.name.clone(),
                    });
                }
            }

            // Largest count that leaves downwards must not exceed the lower
            // tier's own ceiling.
            if band.scale_down_to != band.name && band.scale_down_below > 0 {
                let lower = self.band(&band.scale_down_to)?;
                if lower
                    .scale_up_above
                    .is_some_and(|up| band.scale_down_below - 1 > up)
                {
                    return Err(SizeError::OverlappingBands {
                        lower: lower.name.clone(),
                        upper: band.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The size an installation at `current` with `users` active users
    /// should run at.
    pub fn suggest_size(&self, current: &str, users: i64) -> Result<String, SizeError> {
        let mut band = self.band(current)?;

        // A valid ladder settles within one move per tier.
        for _ in 0..=self.bands.len() {
            match band.next(users) {
                Some(next) if next != band.name => band = self.band(next)?,
                _ => return Ok(band.name.clone()),
            }
        }

        Err(SizeError::NoFixedPoint {
            size: current.to_string(),
            users,
        })
    }
}

impl Default for SizeLadder {
    fn default() -> Self {
        Self::standard()
    }
}
