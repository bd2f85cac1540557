use crate::boundary::BoundaryError;
use crate::covering::CoverError;
use crate::export::ExportError;
use crate::region::RegionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid region: {0}")]
    InvalidRegion(#[from] RegionError),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error("could not cover region: {0}")]
    Covering(#[from] CoverError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("{0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}
