use thiserror::Error;

/// Failure taxonomy for the capture pipeline.
///
/// Acquisition and negotiation errors abort the start sequence and surface
/// to the caller; `MalformedMessage` is logged and dropped by the transports
/// and never aborts an active session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device or system-audio access was refused by the platform
    #[error("audio capture permission denied: {0}")]
    PermissionDenied(String),

    /// The requested input device does not exist or cannot be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Credential fetch, handshake or SDP exchange failed
    #[error("session negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The transport was not open when a send was attempted
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An inbound payload could not be decoded
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No signed-in user identity was available at start
    #[error("no authenticated user")]
    NotAuthenticated,

    /// Start was invoked while a session is already starting or recording
    #[error("capture already active")]
    AlreadyActive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::PermissionDenied("microphone".to_string());
        assert!(err.to_string().contains("permission denied"));

        let err = CaptureError::NegotiationFailed("HTTP 403".to_string());
        assert!(err.to_string().contains("HTTP 403"));

        let err = CaptureError::NotAuthenticated;
        assert!(err.to_string().contains("authenticated"));
    }
}
