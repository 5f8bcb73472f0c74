use thiserror::Error;

pub type PendulumResult<T> = Result<T, PendulumError>;

/// Stage of the symbolic derivation that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationStage {
    Lagrangian,
    EulerLagrange,
    LinearSolve,
}

impl std::fmt::Display for DerivationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DerivationStage::Lagrangian => "lagrangian",
            DerivationStage::EulerLagrange => "euler-lagrange",
            DerivationStage::LinearSolve => "linear solve",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PendulumError {
    /// The equations of motion could not be put in closed form. Fatal.
    #[error("Derivation failed during {stage}: {reason}")]
    Derivation {
        stage: DerivationStage,
        reason: String,
    },

    #[error("Invalid parameter {name}: {value} (must be finite and positive)")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Invalid initial state: {name} is {value}")]
    InvalidState { name: &'static str, value: f64 },

    #[error("Cannot compile expression: symbol {symbol} is not an evaluator argument")]
    Compile { symbol: &'static str },

    #[error("Linearization failed: {reason}")]
    Linearization { reason: String },
}

impl PendulumError {
    pub(crate) fn derivation(stage: DerivationStage, reason: impl Into<String>) -> Self {
        PendulumError::Derivation {
            stage,
            reason: reason.into(),
        }
    }
}

/// Rejects anything that is not a finite, strictly positive number.
pub(crate) fn require_positive(name: &'static str, value: f64) -> PendulumResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PendulumError::InvalidParameter { name, value })
    }
}
