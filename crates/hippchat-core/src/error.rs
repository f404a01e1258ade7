//! Error types for HippChat

use std::sync::Arc;

use thiserror::Error;

/// Main error type for HippChat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Mnemonic failed wordlist or checksum validation
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Key material could not be parsed or used
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A fixed-size input had the wrong length
    #[error("Invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Base64, hex or base58 decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The recipient has not published a profile, so there is no key to encrypt to
    #[error("Recipient profile not found: {0}")]
    RecipientProfileNotFound(String),

    /// A log line could not be parsed as a message record
    #[error("Malformed line: {0}")]
    MalformedLine(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Object store operation failed
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Local cache database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A failure observed by every caller waiting on the same in-flight load
    #[error(transparent)]
    Shared(Arc<ChatError>),
}

impl ChatError {
    /// Whether the underlying cause is a transient object store failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Store(e) => e.is_transient(),
            ChatError::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

impl From<Arc<ChatError>> for ChatError {
    fn from(err: Arc<ChatError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(ChatError::Shared)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors reported by an [`ObjectStore`](crate::store::ObjectStore) binding.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object does not exist
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Container (bucket) does not exist
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Container creation raced with an existing container
    #[error("Container already exists: {0}")]
    ContainerExists(String),

    /// Credentials rejected
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Any other status code returned by the backend
    #[error("Store returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Connectivity failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Local I/O error in a filesystem-backed store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar metadata could not be read or written
    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl StoreError {
    /// Transient failures (5xx, connectivity) are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Network(_) => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Missing object or container.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::ContainerNotFound(_) => true,
            StoreError::Status { status, .. } => *status == 404,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::RecipientProfileNotFound("5Grw".to_string());
        assert_eq!(format!("{}", err), "Recipient profile not found: 5Grw");

        let err = ChatError::InvalidLength {
            what: "nonce",
            expected: 24,
            actual: 3,
        };
        assert_eq!(
            format!("{}", err),
            "Invalid nonce length: expected 24 bytes, got 3"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let chat_err: ChatError = io_err.into();
        assert!(matches!(chat_err, ChatError::Io(_)));
    }

    #[test]
    fn test_store_error_classification() {
        let server = StoreError::Status {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(server.is_transient());
        assert!(!server.is_not_found());

        let forbidden = StoreError::Status {
            status: 403,
            message: "Forbidden".to_string(),
        };
        assert!(!forbidden.is_transient());

        let missing = StoreError::NotFound {
            bucket: "chat-a".to_string(),
            key: "inbox-2024030514.log".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());

        assert!(StoreError::Network("connection reset".to_string()).is_transient());
        assert!(!StoreError::AccessDenied("bad key".to_string()).is_transient());
    }

    #[test]
    fn test_shared_error_unwraps_when_unique() {
        let shared = Arc::new(ChatError::InvalidOperation("boom".to_string()));
        let err: ChatError = shared.into();
        assert!(matches!(err, ChatError::InvalidOperation(_)));

        let shared = Arc::new(ChatError::Store(StoreError::Network("down".to_string())));
        let other = Arc::clone(&shared);
        let err: ChatError = shared.into();
        assert!(matches!(err, ChatError::Shared(_)));
        assert!(err.is_transient());
        drop(other);
    }
}
