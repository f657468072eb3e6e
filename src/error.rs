#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sign-in required")]
    AuthRequired,

    #[error("Join rejected: {message}")]
    JoinRejected {
        reason: JoinRejection,
        message: String,
    },

    #[error("Room creation failed: {0}")]
    RoomCreation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Why the backend declined a join request. Classified once at the gateway
/// seam so callers switch on this instead of matching message substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    WrongPassword,
    RoomFull,
    RoomLocked,
    NotFound,
    Expired,
    Other,
}

impl ClientError {
    /// True when the failed room is gone for good and the caller should
    /// navigate back to the join screen instead of retrying.
    pub fn redirects_to_join_screen(&self) -> bool {
        match self {
            ClientError::NotFound(_) => true,
            ClientError::JoinRejected { reason, .. } => {
                matches!(reason, JoinRejection::NotFound | JoinRejection::Expired)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Backend(format!("Malformed payload: {}", err))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_discriminants() {
        let gone = ClientError::JoinRejected {
            reason: JoinRejection::Expired,
            message: "Room has expired".to_string(),
        };
        assert!(gone.redirects_to_join_screen());

        let full = ClientError::JoinRejected {
            reason: JoinRejection::RoomFull,
            message: "Room is full".to_string(),
        };
        assert!(!full.redirects_to_join_screen());

        assert!(ClientError::NotFound("room xyz".to_string()).redirects_to_join_screen());
        assert!(!ClientError::Network("timeout".to_string()).redirects_to_join_screen());
    }
}
