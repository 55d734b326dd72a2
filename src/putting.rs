//! Putt read model and break calculation.
//!
//! Slope sign convention used everywhere in this crate:
//! positive `slope_side` means the ball breaks right to left, so the golfer aims right
//! of the hole; negative means it breaks left to right and the golfer aims left.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// Current putt read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuttingStats {
    /// Feet to the hole.
    pub distance: f64,
    /// Side slope in percent.
    pub slope_side: f64,
    /// Vertical slope in percent, positive is uphill.
    pub slope_vertical: f64,
    /// Green speed.
    pub stimp: f64,
}

impl Default for PuttingStats {
    fn default() -> Self {
        Self {
            distance: defaults::INITIAL_DISTANCE_FT,
            slope_side: defaults::INITIAL_SLOPE_SIDE,
            slope_vertical: defaults::INITIAL_SLOPE_VERTICAL,
            stimp: defaults::INITIAL_STIMP,
        }
    }
}

/// Partial update carried by a tool invocation. Omitted fields keep their prior value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdate {
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub slope_side: Option<f64>,
    #[serde(default)]
    pub slope_vertical: Option<f64>,
    #[serde(default)]
    pub stimp: Option<f64>,
}

impl StatsUpdate {
    /// Parse tool arguments. Non-numeric fields are treated as omitted.
    pub fn from_args(args: &serde_json::Value) -> Self {
        let field = |name: &str| args.get(name).and_then(serde_json::Value::as_f64);
        Self {
            distance: field("distance"),
            slope_side: field("slopeSide"),
            slope_vertical: field("slopeVertical"),
            stimp: field("stimp"),
        }
    }
}

impl PuttingStats {
    pub fn merge(&self, update: &StatsUpdate) -> Self {
        Self {
            distance: update.distance.unwrap_or(self.distance),
            slope_side: update.slope_side.unwrap_or(self.slope_side),
            slope_vertical: update.slope_vertical.unwrap_or(self.slope_vertical),
            stimp: update.stimp.unwrap_or(self.stimp),
        }
    }
}

/// Golfer calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Feet per pace.
    pub step_length: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_length: defaults::STEP_LENGTH_FT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimDirection {
    Left,
    Right,
    Straight,
}

impl AimDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            AimDirection::Left => "left",
            AimDirection::Right => "right",
            AimDirection::Straight => "straight",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakResult {
    /// Total break in inches, rounded to 0.1.
    pub break_inches: f64,
    /// Distance the putt plays like, rounded to 0.1 ft.
    pub effective_distance: f64,
    pub direction: AimDirection,
    /// Human aim cue relative to the cup, e.g. `1.4" Out Right Edge`.
    pub aim_description: String,
}

impl BreakResult {
    /// One-line cue returned to the agent after a stats update.
    pub fn aim_point(&self) -> String {
        format!(
            "Aim {:.1} inches {}",
            self.break_inches.abs(),
            self.direction.as_str()
        )
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Steps formula: `2 * steps - 1` inches per percent of side slope at stimp 10.
pub fn calculate_break(stats: &PuttingStats, settings: &Settings) -> BreakResult {
    let effective_distance = stats.distance + stats.slope_vertical * (stats.distance / 10.0);

    let step_length = if settings.step_length > 0.0 {
        settings.step_length
    } else {
        defaults::STEP_LENGTH_FT
    };
    let steps = effective_distance / step_length;

    let mut base_break = steps * 2.0 - 1.0;
    if base_break < 0.5 {
        base_break = steps * 0.8;
    }

    let break_inches = round1(base_break * stats.slope_side.abs() * (stats.stimp / 10.0));

    // Half an inch or less is read as straight whatever the slope sign.
    let direction = if break_inches <= 0.5 || stats.slope_side == 0.0 {
        AimDirection::Straight
    } else if stats.slope_side > 0.0 {
        AimDirection::Right
    } else {
        AimDirection::Left
    };

    BreakResult {
        break_inches,
        effective_distance: round1(effective_distance),
        direction,
        aim_description: describe_aim(break_inches, direction),
    }
}

fn describe_aim(break_inches: f64, direction: AimDirection) -> String {
    let edge = match direction {
        AimDirection::Straight => return "Center Cut".to_string(),
        AimDirection::Right => "Right Edge",
        AimDirection::Left => "Left Edge",
    };

    if break_inches < defaults::HOLE_RADIUS_IN {
        return format!("In {edge}");
    }

    let outside = format!("{:.1}", break_inches - defaults::HOLE_RADIUS_IN);
    if outside == "0.0" {
        format!("On {edge}")
    } else {
        format!("{outside}\" Out {edge}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_omitted_fields() {
        let prior = PuttingStats {
            distance: 12.0,
            slope_side: 1.0,
            slope_vertical: 0.0,
            stimp: 10.0,
        };
        let update = StatsUpdate::from_args(&json!({ "distance": 20 }));
        let merged = prior.merge(&update);

        assert_eq!(
            merged,
            PuttingStats {
                distance: 20.0,
                slope_side: 1.0,
                slope_vertical: 0.0,
                stimp: 10.0,
            }
        );
    }

    #[test]
    fn test_from_args_ignores_non_numeric_fields() {
        let update = StatsUpdate::from_args(&json!({
            "slopeSide": -2.5,
            "stimp": "fast",
            "unknown": 3
        }));
        assert_eq!(update.slope_side, Some(-2.5));
        assert_eq!(update.stimp, None);
        assert_eq!(update.distance, None);
    }

    #[test]
    fn test_default_read_breaks_right() {
        // 12 ft at 3 ft per pace is 4 paces: (4 * 2 - 1) * 1% * 1.0 = 7.0
        let result = calculate_break(&PuttingStats::default(), &Settings::default());
        assert_eq!(result.break_inches, 7.0);
        assert_eq!(result.effective_distance, 12.0);
        assert_eq!(result.direction, AimDirection::Right);
        assert_eq!(result.aim_description, "4.9\" Out Right Edge");
        assert_eq!(result.aim_point(), "Aim 7.0 inches right");
    }

    #[test]
    fn test_negative_slope_aims_left() {
        let stats = PuttingStats {
            slope_side: -3.0,
            ..PuttingStats::default()
        };
        let result = calculate_break(&stats, &Settings::default());
        assert_eq!(result.break_inches, 21.0);
        assert_eq!(result.direction, AimDirection::Left);
        assert_eq!(result.aim_point(), "Aim 21.0 inches left");
        assert!(result.aim_description.ends_with("Left Edge"));
    }

    #[test]
    fn test_flat_green_is_center_cut() {
        let stats = PuttingStats {
            slope_side: 0.0,
            ..PuttingStats::default()
        };
        let result = calculate_break(&stats, &Settings::default());
        assert_eq!(result.break_inches, 0.0);
        assert_eq!(result.direction, AimDirection::Straight);
        assert_eq!(result.aim_description, "Center Cut");
        assert_eq!(result.aim_point(), "Aim 0.0 inches straight");
    }

    #[test]
    fn test_tiny_break_is_straight() {
        // Half a pace on 1%: 0.5 * 0.8 = 0.4 in, inside the straight band.
        let stats = PuttingStats {
            distance: 1.5,
            slope_side: -1.0,
            slope_vertical: 0.0,
            stimp: 10.0,
        };
        let result = calculate_break(&stats, &Settings::default());
        assert_eq!(result.break_inches, 0.4);
        assert_eq!(result.direction, AimDirection::Straight);
        assert_eq!(result.aim_description, "Center Cut");
        assert_eq!(result.aim_point(), "Aim 0.4 inches straight");
    }

    #[test]
    fn test_short_putt_uses_reduced_formula() {
        // 1.5 ft is half a pace: 2 * 0.5 - 1 = 0 < 0.5, so 0.5 * 0.8 = 0.4
        let stats = PuttingStats {
            distance: 1.5,
            slope_side: 2.0,
            slope_vertical: 0.0,
            stimp: 10.0,
        };
        let result = calculate_break(&stats, &Settings::default());
        assert_eq!(result.break_inches, 0.8);
        assert_eq!(result.aim_description, "In Right Edge");
    }

    #[test]
    fn test_uphill_plays_longer() {
        let stats = PuttingStats {
            slope_vertical: 2.0,
            ..PuttingStats::default()
        };
        let result = calculate_break(&stats, &Settings::default());
        assert_eq!(result.effective_distance, 14.4);
    }

    #[test]
    fn test_zero_step_length_falls_back_to_default() {
        let zero = calculate_break(&PuttingStats::default(), &Settings { step_length: 0.0 });
        let default = calculate_break(&PuttingStats::default(), &Settings::default());
        assert_eq!(zero, default);
    }

    #[test]
    fn test_step_length_changes_break() {
        let long_stride = calculate_break(&PuttingStats::default(), &Settings { step_length: 4.0 });
        // 12 / 4 = 3 paces: 3 * 2 - 1 = 5
        assert_eq!(long_stride.break_inches, 5.0);
    }
}
