//! Civic Governance Engine
//!
//! Token-weighted proposals with a timelocked execution queue, plus an
//! independent N-of-M signer approval flow for privileged operations and a
//! nonce-checked relay for signed votes and delegations.

pub mod clock;
pub mod config;
pub mod context;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod memory;
pub mod multisig;
pub mod oracle;
pub mod proposal;
pub mod quorum;
pub mod rate_limit;
pub mod relay;
pub mod scheduler;
pub mod signature;
pub mod store;
pub mod timelock;
pub mod types;
pub mod voting;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::GovernanceConfig;
pub use context::RequestContext;
pub use delegation::{Delegation, DelegationSnapshot};
pub use engine::{GovernanceEngine, GovernanceStats, SweepReport, VotingPowerSnapshot};
pub use error::{ErrorKind, GovernanceError, Result};
pub use ledger::TokenLedger;
pub use memory::MemoryStore;
pub use multisig::{
    MultisigId, MultisigProposal, MultisigSignature, MultisigStatus, MultisigType, MultisigView,
    NewMultisigProposal,
};
pub use oracle::{OracleError, VotingPowerOracle};
pub use proposal::{
    NewProposal, Proposal, ProposalId, ProposalPage, ProposalQuery, ProposalState, ProposalView,
};
pub use relay::{RelayKind, RelayRequest, RelayStatus, SignedDelegation, SignedVote};
pub use signature::{signing_message, Ed25519Verifier, SignatureDomain, SignatureVerifier};
pub use store::GovernanceStore;
pub use timelock::{OperationStatus, OperationView, Settlement, TimelockOperation};
pub use types::{Action, Address, Power, ProposalCategory};
pub use voting::{Tally, Vote, VoteChoice};
