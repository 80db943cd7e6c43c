//! Governance error types
//!
//! Every variant belongs to exactly one [`ErrorKind`]. Callers branch on the
//! kind (retry, report, audit) rather than on individual variants.

use thiserror::Error;

/// Coarse classification used by transports and retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; fix the request and resend
    Validation,
    /// Referenced proposal, operation or request does not exist
    NotFound,
    /// The request conflicts with stored state; retrying cannot help
    StateConflict,
    /// The caller is not allowed to do this
    Authorization,
    /// Voting power source did not answer in time
    OracleUnavailable,
    /// Caller exceeded its request budget
    RateLimited,
    /// Unexpected fault inside the engine or its store
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    // Validation
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Invalid actions: {0}")]
    InvalidActions(String),

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Not found
    #[error("Proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error("Timelock operation not found: {0}")]
    OperationNotFound(String),

    #[error("Multisig proposal not found: {0}")]
    MultisigNotFound(u64),

    #[error("Relay request not found: {0}")]
    RelayRequestNotFound(String),

    // State conflicts
    #[error("Voter {voter} already voted on proposal {proposal_id}")]
    AlreadyVoted { proposal_id: u64, voter: String },

    #[error("Signer {signer} already signed multisig proposal {proposal_id}")]
    AlreadySigned { proposal_id: u64, signer: String },

    #[error("Operation {0} already queued")]
    AlreadyQueued(String),

    #[error("Operation not ready: executable at {eta}, now {now}")]
    TimelockNotReady { eta: u64, now: u64 },

    #[error("Operation {0} expired")]
    OperationExpired(String),

    #[error("Operation {hash} is {status}, expected Queued")]
    OperationNotQueued { hash: String, status: String },

    #[error("Predecessor operation {0} not executed")]
    PredecessorNotExecuted(String),

    #[error("Voting not active: proposal is {0}")]
    VotingNotActive(String),

    #[error("Invalid proposal state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Proposer {proposer} already has {open} open proposals (max {max})")]
    TooManyActiveProposals { proposer: String, open: usize, max: usize },

    #[error("Multisig proposal {proposal_id} is {status}, expected Pending")]
    MultisigNotPending { proposal_id: u64, status: String },

    #[error("Multisig proposal {0} expired")]
    MultisigExpired(u64),

    #[error("Signature for {signer} not found on multisig proposal {proposal_id}")]
    SignatureNotFound { proposal_id: u64, signer: String },

    #[error("Signed payload expired at {deadline}, now {now}")]
    SignatureExpired { deadline: u64, now: u64 },

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    // Authorization
    #[error("Not an authorized signer: {0}")]
    NotAuthorizedSigner(String),

    #[error("Insufficient voting power: required {required}, available {available}")]
    InsufficientVotingPower { required: String, available: String },

    #[error("No voting power for {0}")]
    NoVotingPower(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Transient
    #[error("Voting power oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // Internal
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GovernanceError {
    pub fn kind(&self) -> ErrorKind {
        use GovernanceError::*;
        match self {
            InvalidAddress(_) | InvalidCategory(_) | InvalidActions(_) | InvalidProposal(_)
            | InvalidInput(_) | InvalidConfig(_) => ErrorKind::Validation,

            ProposalNotFound(_) | OperationNotFound(_) | MultisigNotFound(_)
            | RelayRequestNotFound(_) => ErrorKind::NotFound,

            AlreadyVoted { .. }
            | AlreadySigned { .. }
            | AlreadyQueued(_)
            | TimelockNotReady { .. }
            | OperationExpired(_)
            | OperationNotQueued { .. }
            | PredecessorNotExecuted(_)
            | VotingNotActive(_)
            | InvalidState { .. }
            | TooManyActiveProposals { .. }
            | MultisigNotPending { .. }
            | MultisigExpired(_)
            | SignatureNotFound { .. }
            | SignatureExpired { .. }
            | InvalidNonce { .. } => ErrorKind::StateConflict,

            NotAuthorizedSigner(_)
            | InsufficientVotingPower { .. }
            | NoVotingPower(_)
            | InvalidSignature
            | Unauthorized(_) => ErrorKind::Authorization,

            OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            RateLimited { .. } => ErrorKind::RateLimited,
            Storage(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient conditions are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OracleUnavailable | ErrorKind::RateLimited
        )
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::TimelockNotReady { eta: 200, now: 100 };
        assert_eq!(
            err.to_string(),
            "Operation not ready: executable at 200, now 100"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            GovernanceError::AlreadyVoted {
                proposal_id: 1,
                voter: "0xabc".to_string()
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            GovernanceError::NoVotingPower("0xabc".to_string()).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            GovernanceError::Storage("disk".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_oracle_unavailable_is_distinct_from_zero_power() {
        let unavailable = GovernanceError::OracleUnavailable("timeout".to_string());
        let zero = GovernanceError::NoVotingPower("0xabc".to_string());

        assert!(unavailable.is_retryable());
        assert!(!zero.is_retryable());
        assert_ne!(unavailable.kind(), zero.kind());
    }
}
