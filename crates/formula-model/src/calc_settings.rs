use serde::{Deserialize, Serialize};

/// When the engine recalculates, and how it treats circular references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalcSettings {
    pub calculation_mode: CalculationMode,
    pub iterative: IterativeCalculationSettings,
}

impl CalcSettings {
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        matches!(self.calculation_mode, CalculationMode::Automatic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    /// Every edit is followed by a recalculation of the dirty cells.
    #[default]
    Automatic,
    /// Edits only mark cells dirty; the host decides when to recalculate.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IterativeCalculationSettings {
    /// Resolve circular references by fixed-point iteration instead of flagging them.
    pub enabled: bool,
    /// Maximum number of iterations, counting the pass that discovered the cycle.
    pub max_iterations: u32,
    /// Iteration stops once no cycle member changes by more than this amount.
    pub max_change: f64,
}

impl Default for IterativeCalculationSettings {
    fn default() -> Self {
        // Excel's defaults.
        Self {
            enabled: false,
            max_iterations: 100,
            max_change: 0.001,
        }
    }
}

impl IterativeCalculationSettings {
    /// `max_iterations`, but never below the discovering pass itself.
    #[must_use]
    pub fn iteration_cap(&self) -> u32 {
        self.max_iterations.max(1)
    }

    /// Whether a sweep whose largest member change was `delta` ends the iteration.
    ///
    /// An infinite or NaN delta (a member changed type) never converges.
    #[must_use]
    pub fn has_converged(&self, delta: f64) -> bool {
        delta <= self.max_change.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: CalcSettings =
            serde_json::from_str(r#"{"calculationMode":"manual","iterative":{"enabled":true}}"#)
                .unwrap();
        assert_eq!(
            settings,
            CalcSettings {
                calculation_mode: CalculationMode::Manual,
                iterative: IterativeCalculationSettings {
                    enabled: true,
                    max_iterations: 100,
                    max_change: 0.001,
                },
            }
        );
        assert!(!settings.is_automatic());
    }

    #[test]
    fn iteration_limits_are_sanitized() {
        let settings = IterativeCalculationSettings {
            enabled: true,
            max_iterations: 0,
            max_change: -1.0,
        };
        assert_eq!(settings.iteration_cap(), 1);
        assert!(settings.has_converged(0.0));
        assert!(!settings.has_converged(1e-9));
        assert!(!settings.has_converged(f64::INFINITY));
        assert!(!settings.has_converged(f64::NAN));
    }
}
