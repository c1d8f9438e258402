//! Multi-margin loss configuration (YAML / JSON).

use crate::error::{Error, Result};
use crate::ops::traits::{MarginNorm, Reduction};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyper-parameters for [`MultiMarginLoss`](super::MultiMarginLoss).
///
/// ```yaml
/// p: 2
/// margin: 0.5
/// weight: [1.0, 2.0, 1.0]
/// reduction: sum
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiMarginLossConfig {
    /// Norm degree, 1 or 2
    #[serde(default = "default_p")]
    pub p: i64,

    /// Required gap between the target score and every other score
    #[serde(default = "default_margin")]
    pub margin: f64,

    /// Per-class weight, one entry per class
    #[serde(default)]
    pub weight: Option<Vec<f64>>,

    #[serde(default)]
    pub reduction: Reduction,
}

fn default_p() -> i64 {
    1
}

fn default_margin() -> f64 {
    1.0
}

impl Default for MultiMarginLossConfig {
    fn default() -> Self {
        Self {
            p: default_p(),
            margin: default_margin(),
            weight: None,
            reduction: Reduction::default(),
        }
    }
}

impl MultiMarginLossConfig {
    /// Validate configuration constraints
    pub fn validate(&self) -> Result<()> {
        MarginNorm::try_from(self.p)?;
        if !self.margin.is_finite() {
            return Err(Error::InvalidParameter {
                arg: "margin",
                reason: format!("must be finite, got {}", self.margin),
            });
        }
        if let Some(weight) = &self.weight {
            if weight.is_empty() {
                return Err(Error::InvalidParameter {
                    arg: "weight",
                    reason: "must have one entry per class, got none".into(),
                });
            }
            if let Some(i) = weight.iter().position(|w| !w.is_finite()) {
                return Err(Error::InvalidParameter {
                    arg: "weight",
                    reason: format!("weight[{i}] = {} is not finite", weight[i]),
                });
            }
        }
        Ok(())
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ConfigError {
            reason: format!("IO error: {e}"),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| Error::ConfigError {
            reason: format!("YAML parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ConfigError {
            reason: format!("IO error: {e}"),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| Error::ConfigError {
            reason: format!("JSON parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }
}
