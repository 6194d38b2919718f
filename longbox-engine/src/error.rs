//! Engine-level errors
//!
//! Only precondition failures surface here; per-item failures are counted in
//! phase results instead.

use thiserror::Error;
use uuid::Uuid;

use crate::services::file_scanner::ScanError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Library not found: {0}")]
    LibraryNotFound(Uuid),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Missing library, whichever phase noticed it
    pub fn is_library_not_found(&self) -> bool {
        matches!(
            self,
            ReconcileError::LibraryNotFound(_) | ReconcileError::Scan(ScanError::LibraryNotFound(_))
        )
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
