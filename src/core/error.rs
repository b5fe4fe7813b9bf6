use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Skipped by the sweep; every other variant aborts the run.
    #[error("invalid candidate at index {index}: {reason}")]
    InvalidCandidate { index: usize, reason: String },

    #[error("covariance matrix is not positive definite even after regularization: {matrix:?}")]
    NonPositiveDefinite { matrix: Vec<Vec<f64>> },

    #[error(
        "insufficient data for {}: need at least {required} returns, got {available}",
        .asset.as_deref().unwrap_or("return series")
    )]
    InsufficientData {
        asset: Option<String>,
        required: usize,
        available: usize,
    },
}

impl SimError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_candidate(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            index,
            reason: reason.into(),
        }
    }

    pub fn non_positive_definite(matrix: Vec<Vec<f64>>) -> Self {
        Self::NonPositiveDefinite { matrix }
    }

    pub fn insufficient_data(required: usize, available: usize) -> Self {
        Self::InsufficientData {
            asset: None,
            required,
            available,
        }
    }

    pub fn for_asset(self, name: &str) -> Self {
        match self {
            Self::InsufficientData {
                required,
                available,
                ..
            } => Self::InsufficientData {
                asset: Some(name.to_string()),
                required,
                available,
            },
            other => other,
        }
    }
}
