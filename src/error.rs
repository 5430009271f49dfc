/// Error taxonomy for mask, threshold and convergence computations.

use thiserror::Error;

/// Errors raised by the masking core.
///
/// Every variant is fatal for the invocation that produced it: no mask is
/// stored or written when one of these is returned.
#[derive(Error, Debug)]
pub enum MaskError {
    /// A tuning parameter is outside its valid range.
    #[error("invalid parameter `{parameter}`: {reason}")]
    Configuration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Human-readable description of the constraint that was violated.
        reason: String,
    },

    /// Grid rank or extent is unsupported, or two grids disagree in shape.
    #[error("unsupported grid shape: {0}")]
    DataShape(String),

    /// The single-plane variant found islands on several planes.
    #[error("calibrator masking expects one valid plane, found islands on planes {planes:?}")]
    UnsupportedTopology {
        /// Planes that produced at least one island.
        planes: Vec<usize>,
    },

    /// Failure reported by an external pixel source.
    #[error("pixel source failure: {0}")]
    Source(#[from] anyhow::Error),
}

impl MaskError {
    pub(crate) fn config(parameter: &'static str, reason: impl Into<String>) -> Self {
        MaskError::Configuration {
            parameter,
            reason: reason.into(),
        }
    }
}
