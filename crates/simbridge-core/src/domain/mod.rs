//! Pure domain logic: catalog model, output resolution and formatting,
//! input-mapping math.

pub mod catalog;
pub mod format;
pub mod input;
pub mod output;

use serde::{Deserialize, Serialize};

/// Rounding policy shared by the output formatter and the input linear map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundMode {
    /// Round half away from zero (0.5 → 1, -0.5 → -1).
    #[default]
    Nearest,
    Floor,
    Ceil,
    /// Drop the fractional part, toward zero.
    Truncate,
}

impl RoundMode {
    /// Applies the policy to `value`, returning a whole number.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            RoundMode::Nearest => value.round(),
            RoundMode::Floor => value.floor(),
            RoundMode::Ceil => value.ceil(),
            RoundMode::Truncate => value.trunc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rounds_half_away_from_zero() {
        assert_eq!(RoundMode::Nearest.apply(0.5), 1.0);
        assert_eq!(RoundMode::Nearest.apply(-0.5), -1.0);
        assert_eq!(RoundMode::Nearest.apply(2.4), 2.0);
    }

    #[test]
    fn test_floor_ceil_truncate() {
        assert_eq!(RoundMode::Floor.apply(1.9), 1.0);
        assert_eq!(RoundMode::Floor.apply(-1.1), -2.0);
        assert_eq!(RoundMode::Ceil.apply(1.1), 2.0);
        assert_eq!(RoundMode::Truncate.apply(-1.9), -1.0);
    }
}
