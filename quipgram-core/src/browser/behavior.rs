use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::HumanSimulationSection;

#[derive(Debug, Error, PartialEq)]
pub enum BehaviorError {
    #[error("{field} range is inverted: min {min} > max {max}")]
    InvertedRange {
        field: &'static str,
        min: u64,
        max: u64,
    },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitInterval { field: &'static str, value: f64 },
    #[error("cursor jitter must be finite and non-negative, got {0}")]
    InvalidJitter(f64),
}

/// Randomisation policy for simulated human input. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorProfile {
    typing_delay_ms: [u64; 2],
    action_delay_ms: [u64; 2],
    typo_probability: f64,
    scroll_variance: f64,
    curved_cursor: bool,
    cursor_jitter_px: f64,
    cursor_steps: usize,
}

impl BehaviorProfile {
    pub fn new(
        typing_delay_ms: [u64; 2],
        action_delay_ms: [u64; 2],
        typo_probability: f64,
        scroll_variance: f64,
        curved_cursor: bool,
    ) -> Result<Self, BehaviorError> {
        let defaults = HumanSimulationSection::default();
        Self::try_from(&HumanSimulationSection {
            typing_delay_ms,
            action_delay_ms,
            typo_probability,
            scroll_variance,
            curved_cursor,
            ..defaults
        })
    }

    pub fn typing_delay_range(&self) -> RangeInclusive<u64> {
        self.typing_delay_ms[0]..=self.typing_delay_ms[1]
    }

    pub fn action_delay_range(&self) -> RangeInclusive<u64> {
        self.action_delay_ms[0]..=self.action_delay_ms[1]
    }

    pub fn min_typing_delay(&self) -> Duration {
        Duration::from_millis(self.typing_delay_ms[0])
    }

    pub fn max_typing_delay(&self) -> Duration {
        Duration::from_millis(self.typing_delay_ms[1])
    }

    pub fn min_action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms[0])
    }

    pub fn max_action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms[1])
    }

    pub fn typo_probability(&self) -> f64 {
        self.typo_probability
    }

    pub fn scroll_variance(&self) -> f64 {
        self.scroll_variance
    }

    pub fn curved_cursor(&self) -> bool {
        self.curved_cursor
    }

    pub fn cursor_jitter_px(&self) -> f64 {
        self.cursor_jitter_px
    }

    pub fn cursor_steps(&self) -> usize {
        self.cursor_steps
    }

    /// Returns a copy with the cursor toggle flipped; the source stays untouched.
    pub fn with_curved_cursor(&self, enabled: bool) -> Self {
        Self {
            curved_cursor: enabled,
            ..self.clone()
        }
    }
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        let section = HumanSimulationSection::default();
        Self {
            typing_delay_ms: section.typing_delay_ms,
            action_delay_ms: section.action_delay_ms,
            typo_probability: section.typo_probability,
            scroll_variance: section.scroll_variance,
            curved_cursor: section.curved_cursor,
            cursor_jitter_px: section.cursor_jitter_px,
            cursor_steps: section.cursor_steps,
        }
    }
}

impl TryFrom<&HumanSimulationSection> for BehaviorProfile {
    type Error = BehaviorError;

    fn try_from(section: &HumanSimulationSection) -> Result<Self, Self::Error> {
        check_range("typing_delay_ms", section.typing_delay_ms)?;
        check_range("action_delay_ms", section.action_delay_ms)?;
        check_unit("typo_probability", section.typo_probability)?;
        check_unit("scroll_variance", section.scroll_variance)?;
        if !section.cursor_jitter_px.is_finite() || section.cursor_jitter_px < 0.0 {
            return Err(BehaviorError::InvalidJitter(section.cursor_jitter_px));
        }
        Ok(Self {
            typing_delay_ms: section.typing_delay_ms,
            action_delay_ms: section.action_delay_ms,
            typo_probability: section.typo_probability,
            scroll_variance: section.scroll_variance,
            curved_cursor: section.curved_cursor,
            cursor_jitter_px: section.cursor_jitter_px,
            cursor_steps: section.cursor_steps.max(1),
        })
    }
}

fn check_range(field: &'static str, bounds: [u64; 2]) -> Result<(), BehaviorError> {
    if bounds[0] > bounds[1] {
        return Err(BehaviorError::InvertedRange {
            field,
            min: bounds[0],
            max: bounds[1],
        });
    }
    Ok(())
}

fn check_unit(field: &'static str, value: f64) -> Result<(), BehaviorError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(BehaviorError::OutOfUnitInterval { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_matches_documented_defaults() {
        let profile = BehaviorProfile::default();
        assert_eq!(profile.typing_delay_range(), 50..=150);
        assert_eq!(profile.action_delay_range(), 2000..=8000);
        assert!((profile.typo_probability() - 0.02).abs() < f64::EPSILON);
        assert!((profile.scroll_variance() - 0.3).abs() < f64::EPSILON);
        assert!(profile.curved_cursor());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = BehaviorProfile::new([200, 100], [10, 20], 0.0, 0.0, false).unwrap_err();
        assert_eq!(
            err,
            BehaviorError::InvertedRange {
                field: "typing_delay_ms",
                min: 200,
                max: 100
            }
        );
    }

    #[test]
    fn probabilities_outside_unit_interval_are_rejected() {
        assert!(BehaviorProfile::new([1, 2], [1, 2], 1.5, 0.0, true).is_err());
        assert!(BehaviorProfile::new([1, 2], [1, 2], 0.0, -0.1, true).is_err());
        assert!(BehaviorProfile::new([1, 2], [1, 2], f64::NAN, 0.0, true).is_err());
    }

    #[test]
    fn degenerate_range_is_allowed() {
        let profile = BehaviorProfile::new([80, 80], [0, 0], 1.0, 1.0, false).unwrap();
        assert_eq!(profile.min_typing_delay(), profile.max_typing_delay());
    }

    #[test]
    fn zero_cursor_steps_are_raised_to_one() {
        let section = HumanSimulationSection {
            cursor_steps: 0,
            ..HumanSimulationSection::default()
        };
        let profile = BehaviorProfile::try_from(&section).unwrap();
        assert_eq!(profile.cursor_steps(), 1);
    }
}
