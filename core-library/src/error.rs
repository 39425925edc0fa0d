use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    /// No response reached us: DNS, connect, timeout, or retries exhausted.
    #[error("Connectivity failure: {0}")]
    Connectivity(#[from] BridgeError),

    /// The server answered with a non-2xx status.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

impl LibraryError {
    /// Whether the operation may succeed unchanged once the network is back.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LibraryError::Connectivity(_))
    }

    /// Message suitable for showing to the performer.
    pub fn user_message(&self) -> String {
        match self {
            LibraryError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        LibraryError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        LibraryError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
