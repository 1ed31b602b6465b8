//! Error taxonomy for the optimization engine.
//!
//! Expected infeasibility (model too big for a device type, a candidate
//! failing its memory check, no plan reaching the target) is represented as
//! data — `Option` returns or recoverable variants — so callers can degrade
//! to skip or best-effort. Only [`SearchError::NoCompatibleEngine`] is fatal
//! for a whole run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    /// The model cannot fit on this device type at any probeable TP.
    /// Recoverable: the device type is skipped, the run continues.
    #[error("model does not fit on device type '{device_type}' at any TP up to {max_tp_probed}")]
    InfeasibleModel {
        device_type: String,
        max_tp_probed: u32,
    },

    /// No engine/device pair can serve the model. Fatal for the run:
    /// the caller should try a smaller model or add devices.
    #[error("no compatible engine/device combination with available devices")]
    NoCompatibleEngine,

    /// A regression artifact is missing for this (engine, device) pair.
    #[error("no prediction model for engine '{engine}' on device type '{device_type}'")]
    PredictionUnavailable {
        engine: String,
        device_type: String,
    },

    /// The regression feature vector could not be assembled. A missing
    /// feature means the caller and the trained pipeline disagree on the
    /// feature set; failing fast beats silently predicting garbage.
    #[error("regression feature '{feature}' missing from assembled feature vector")]
    MissingFeature { feature: String },

    /// Another worker held the artifact lock for too long.
    #[error("timed out waiting for prediction artifacts for engine '{engine}' on '{device_type}'")]
    ArtifactLockTimeout {
        engine: String,
        device_type: String,
    },

    /// No combination of available devices reaches the target concurrency.
    #[error("no feasible plan: target concurrency {target} cannot be reached")]
    PlanAssemblyFailed { target: u64 },

    /// Unknown strategy or planner name.
    #[error("unknown {kind} '{name}'")]
    UnknownAlgorithm { kind: &'static str, name: String },

    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse artifact: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl SearchError {
    /// Whether the run as a whole can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SearchError::NoCompatibleEngine | SearchError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_compatible_engine_is_fatal() {
        assert!(!SearchError::NoCompatibleEngine.is_recoverable());
        assert!(SearchError::InfeasibleModel {
            device_type: "cpu".to_string(),
            max_tp_probed: 32,
        }
        .is_recoverable());
        assert!(SearchError::PlanAssemblyFailed { target: 100 }.is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = SearchError::MissingFeature {
            feature: "decode_flops".to_string(),
        };
        assert!(err.to_string().contains("decode_flops"));
    }
}
