//! Error types for the conversation engine and session store.

use vigil_core::VigilError;

/// Boundary rejections for an incoming chat message.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
}

/// Session store failures.
///
/// `NotFound` and `Expired` are ordinary outcomes: the engine starts a fresh
/// session. `Unavailable` means the store itself cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session expired: {0}")]
    Expired(String),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl From<SessionError> for VigilError {
    fn from(err: SessionError) -> Self {
        VigilError::Session(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(2000).to_string(),
            "message exceeds maximum length of 2000 characters"
        );
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::NotFound("abc".into()).to_string(),
            "session not found: abc"
        );
        assert_eq!(
            SessionError::Expired("abc".into()).to_string(),
            "session expired: abc"
        );
        assert_eq!(
            SessionError::Unavailable("session lock poisoned".into()).to_string(),
            "session store unavailable: session lock poisoned"
        );
    }

    #[test]
    fn test_session_error_into_vigil_error() {
        let err: VigilError = SessionError::Unavailable("down".into()).into();
        assert!(matches!(err, VigilError::Session(_)));
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_errors_implement_debug() {
        let dbg = format!("{:?}", ChatError::MessageTooLong(10));
        assert!(dbg.contains("MessageTooLong"));
    }
}
