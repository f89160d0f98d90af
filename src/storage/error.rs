//! Error types for storage analysis.

use thiserror::Error;

/// Error type for storage layout extraction and slot verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Type name refers to a declaration missing from the analysed sources.
    #[error("{source_unit}: type of {variable} references unknown declaration {reference}")]
    UnknownTypeReference {
        source_unit: String,
        variable: String,
        reference: String,
    },

    /// Mapping keyed by something other than a value type.
    #[error("{source_unit}: mapping {variable} has invalid key type {key}")]
    InvalidMappingKey {
        source_unit: String,
        variable: String,
        key: String,
    },

    /// Slot assigned from an expression that cannot be evaluated statically.
    #[error("{source_unit}: cannot verify slot assignment in {contract}.{function}: {reason}")]
    UnverifiableSlotAssignment {
        source_unit: String,
        contract: String,
        function: String,
        reason: String,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
