//! Error types for Cohort
//!
//! Error taxonomy covering coordination, membership, transport,
//! and configuration failures.

use thiserror::Error;

/// Primary error type for all Cohort operations
#[derive(Debug, Error)]
pub enum CohortError {
    // ========== Coordination Errors ==========

    /// Leader reassignment requested while no leader entry exists
    #[error("no leader assigned")]
    NoLeaderAssigned,

    /// A call on a remote worker handle failed
    #[error("transport failure for peer {peer}: {message}")]
    TransportFailure { peer: String, message: String },

    /// Closing a peer handle failed; the entry is still considered released
    #[error("close failed for peer {peer}: {message}")]
    CloseFailure { peer: String, message: String },

    // ========== Membership Errors ==========

    /// Membership provider closed before a model was delivered
    #[error("membership provider closed")]
    MembershipClosed,

    /// Coordination store operation failed
    #[error("coordination store error: {message}")]
    StoreError { message: String },

    /// Node name carries no parsable ordinal suffix
    #[error("cannot derive member number from node name {name}")]
    InvalidNodeName { name: String },

    // ========== Protocol Errors ==========

    /// Peer sent a frame larger than the protocol allows
    #[error("frame of {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { len: usize, limit: usize },

    /// Encoding or decoding a wire message failed
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Connection to a peer endpoint failed
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ========== Configuration Errors ==========

    /// Configuration value rejected
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl CohortError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CohortError::TransportFailure { .. }
                | CohortError::ConnectionFailed { .. }
                | CohortError::StoreError { .. }
        )
    }

    /// Returns true if this error indicates a peer violated the wire protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CohortError::FrameTooLarge { .. } | CohortError::InvalidMessage { .. }
        )
    }
}

/// Result type alias for Cohort operations
pub type Result<T> = std::result::Result<T, CohortError>;
