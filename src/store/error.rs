use thiserror::Error;

use crate::db::BackendError;
use crate::sql::CompileError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The request document was rejected before any SQL ran.
    #[error(transparent)]
    Validation(#[from] CompileError),

    #[error("Unable to convert data to the required type")]
    TypeConversion(#[source] BackendError),

    #[error(transparent)]
    Backend(BackendError),

    #[error("No rows were updated")]
    NoRowsUpdated,
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        if err.is_type_conversion() {
            StoreError::TypeConversion(err)
        } else {
            StoreError::Backend(err)
        }
    }
}

impl StoreError {
    /// The backend failure behind this error, if any.
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            StoreError::TypeConversion(e) | StoreError::Backend(e) => Some(e),
            _ => None,
        }
    }
}
