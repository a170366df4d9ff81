use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::meta::MetaError;
use crate::regrid::RegridError;
use crate::resolver::ResolutionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Regrid(#[from] RegridError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error("polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("raw profile is missing required column {column}")]
    MissingColumn { column: String },

    #[error("cannot parse timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("flight metadata has no platform_id")]
    MissingPlatformId,

    #[error("raw profile has no samples")]
    EmptyProfile,

    #[error("failed to access {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProfileError>;
