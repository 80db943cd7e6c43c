//! N-of-M signer approval for privileged operations
//!
//! Independent of token voting. Each roster member contributes at most one
//! active signature per proposal; the flip to `Approved` happens inside the
//! same atomic store step that counts the signature.

use crate::clock::{Clock, Timestamp};
use crate::config::{GovernanceConfig, SECS_PER_DAY};
use crate::error::{GovernanceError, Result};
use crate::hash::FieldHasher;
use crate::rate_limit::{RateLimitedAction, RateLimiter};
use crate::signature::{SignatureDomain, SignatureVerifier};
use crate::store::GovernanceStore;
use crate::types::{decimal, hex_bytes, Address, Power};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type MultisigId = u64;

const APPROVAL_TAG: &str = "CIVIC_MULTISIG_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultisigType {
    TreasuryWithdrawal,
    ParameterChange,
    EmergencyAction,
}

impl MultisigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultisigType::TreasuryWithdrawal => "treasury_withdrawal",
            MultisigType::ParameterChange => "parameter_change",
            MultisigType::EmergencyAction => "emergency_action",
        }
    }
}

impl fmt::Display for MultisigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MultisigType {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "treasury_withdrawal" => Ok(MultisigType::TreasuryWithdrawal),
            "parameter_change" => Ok(MultisigType::ParameterChange),
            "emergency_action" => Ok(MultisigType::EmergencyAction),
            other => Err(GovernanceError::InvalidInput(format!(
                "unknown multisig type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultisigStatus {
    Pending,
    Approved,
    Executed,
    Expired,
    Rejected,
}

impl MultisigStatus {
    pub const ALL: [MultisigStatus; 5] = [
        MultisigStatus::Pending,
        MultisigStatus::Approved,
        MultisigStatus::Executed,
        MultisigStatus::Expired,
        MultisigStatus::Rejected,
    ];
}

impl fmt::Display for MultisigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigProposal {
    pub id: MultisigId,
    pub kind: MultisigType,
    pub proposer: Address,
    pub target: Address,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "decimal")]
    pub value: Power,
    pub required_signatures: u32,
    pub signature_count: u32,
    pub status: MultisigStatus,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
    pub executed_by: Option<Address>,
    pub rejected_at: Option<Timestamp>,
    pub rejected_by: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigSignature {
    pub proposal_id: MultisigId,
    pub signer: Address,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub signed_at: Timestamp,
    pub revoked: bool,
    pub revoked_at: Option<Timestamp>,
}

impl MultisigProposal {
    pub fn status_at(&self, now: Timestamp) -> MultisigStatus {
        match self.status {
            MultisigStatus::Pending | MultisigStatus::Approved if now >= self.expires_at => {
                MultisigStatus::Expired
            }
            status => status,
        }
    }

    /// Digest each signer signs
    pub fn approval_digest(&self) -> [u8; 32] {
        let mut h = FieldHasher::new(APPROVAL_TAG);
        h.u64(self.id)
            .str(self.kind.as_str())
            .str(self.proposer.as_str())
            .str(self.target.as_str())
            .uint(&self.value)
            .bytes(&self.payload)
            .u64(u64::from(self.required_signatures))
            .u64(self.expires_at);
        h.finish()
    }

    fn ensure_pending(&self, now: Timestamp) -> Result<()> {
        match self.status_at(now) {
            MultisigStatus::Pending => Ok(()),
            MultisigStatus::Expired => Err(GovernanceError::MultisigExpired(self.id)),
            other => Err(GovernanceError::MultisigNotPending {
                proposal_id: self.id,
                status: other.to_string(),
            }),
        }
    }

    /// Count a new or re-activated signature. Returns true when this
    /// signature is the one that crossed the threshold.
    pub fn apply_signature(
        &mut self,
        existing: Option<&MultisigSignature>,
        signer: &Address,
        now: Timestamp,
    ) -> Result<bool> {
        self.ensure_pending(now)?;
        if existing.is_some_and(|s| !s.revoked) {
            return Err(GovernanceError::AlreadySigned {
                proposal_id: self.id,
                signer: signer.to_string(),
            });
        }
        self.signature_count += 1;
        if self.signature_count >= self.required_signatures {
            self.status = MultisigStatus::Approved;
            self.approved_at = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn apply_revocation(
        &mut self,
        existing: Option<&MultisigSignature>,
        signer: &Address,
        now: Timestamp,
    ) -> Result<()> {
        self.ensure_pending(now)?;
        if !existing.is_some_and(|s| !s.revoked) {
            return Err(GovernanceError::SignatureNotFound {
                proposal_id: self.id,
                signer: signer.to_string(),
            });
        }
        self.signature_count = self.signature_count.saturating_sub(1);
        Ok(())
    }

    pub fn execute(&mut self, executor: &Address, now: Timestamp) -> Result<()> {
        match self.status_at(now) {
            MultisigStatus::Approved => {
                self.status = MultisigStatus::Executed;
                self.executed_at = Some(now);
                self.executed_by = Some(executor.clone());
                Ok(())
            }
            MultisigStatus::Expired => Err(GovernanceError::MultisigExpired(self.id)),
            other => Err(GovernanceError::InvalidState {
                expected: MultisigStatus::Approved.to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn reject(&mut self, actor: &Address, now: Timestamp) -> Result<()> {
        match self.status_at(now) {
            MultisigStatus::Pending | MultisigStatus::Approved => {
                self.status = MultisigStatus::Rejected;
                self.rejected_at = Some(now);
                self.rejected_by = Some(actor.clone());
                Ok(())
            }
            MultisigStatus::Expired => Err(GovernanceError::MultisigExpired(self.id)),
            other => Err(GovernanceError::InvalidState {
                expected: "Pending or Approved".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn expire(&mut self, now: Timestamp) -> Result<()> {
        if matches!(self.status, MultisigStatus::Pending | MultisigStatus::Approved)
            && now >= self.expires_at
        {
            self.status = MultisigStatus::Expired;
            return Ok(());
        }
        Err(GovernanceError::InvalidState {
            expected: MultisigStatus::Expired.to_string(),
            actual: self.status_at(now).to_string(),
        })
    }
}

/// Caller input for a new multisig proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMultisigProposal {
    pub kind: MultisigType,
    pub target: Address,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "decimal")]
    pub value: Power,
    pub duration_days: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultisigView {
    #[serde(flatten)]
    pub proposal: MultisigProposal,
    pub state: MultisigStatus,
    pub signers: Vec<Address>,
}

pub struct MultisigApprovalEngine {
    store: Arc<dyn GovernanceStore>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    config: Arc<GovernanceConfig>,
    domain: SignatureDomain,
}

impl MultisigApprovalEngine {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        let domain = SignatureDomain::from(&config.relay);
        Self {
            store,
            verifier,
            clock,
            limiter,
            config,
            domain,
        }
    }

    pub fn is_signer(&self, address: &Address) -> bool {
        self.config.multisig.signers.contains(address)
    }

    fn ensure_signer(&self, address: &Address) -> Result<()> {
        if self.is_signer(address) {
            return Ok(());
        }
        warn!(address = %address, "not_authorized_signer");
        Err(GovernanceError::NotAuthorizedSigner(address.to_string()))
    }

    pub async fn create(&self, proposer: &Address, new: NewMultisigProposal) -> Result<MultisigProposal> {
        self.ensure_signer(proposer)?;
        let max_days = self.config.multisig.max_duration_days;
        if new.duration_days == 0 || new.duration_days > max_days {
            return Err(GovernanceError::InvalidInput(format!(
                "duration must be between 1 and {} days",
                max_days
            )));
        }

        let now = self.clock.now();
        let proposal = MultisigProposal {
            id: self.store.next_multisig_id().await?,
            kind: new.kind,
            proposer: proposer.clone(),
            target: new.target,
            payload: new.payload,
            value: new.value,
            required_signatures: self.config.multisig.required_signatures,
            signature_count: 0,
            status: MultisigStatus::Pending,
            created_at: now,
            expires_at: now + new.duration_days * SECS_PER_DAY,
            approved_at: None,
            executed_at: None,
            executed_by: None,
            rejected_at: None,
            rejected_by: None,
        };
        self.store.insert_multisig(proposal.clone()).await?;

        info!(
            multisig_id = proposal.id,
            kind = %proposal.kind,
            proposer = %proposer,
            required = proposal.required_signatures,
            expires_at = proposal.expires_at,
            "multisig_created"
        );
        Ok(proposal)
    }

    pub async fn sign(
        &self,
        proposal_id: MultisigId,
        signer: &Address,
        signature: Vec<u8>,
    ) -> Result<MultisigProposal> {
        self.limiter
            .check(RateLimitedAction::Signature, signer.as_str())?;
        self.ensure_signer(signer)?;

        let proposal = self.load(proposal_id).await?;
        let now = self.clock.now();
        proposal.ensure_pending(now)?;

        let digest = proposal.approval_digest();
        if !self
            .verifier
            .verify(&self.domain, &digest, &signature, signer)
            .await?
        {
            warn!(multisig_id = proposal_id, signer = %signer, "invalid_multisig_signature");
            return Err(GovernanceError::InvalidSignature);
        }

        let record = MultisigSignature {
            proposal_id,
            signer: signer.clone(),
            signature,
            signed_at: now,
            revoked: false,
            revoked_at: None,
        };
        let (updated, approved) = self
            .store
            .add_signature(record, now)
            .await
            .inspect_err(|e| debug!(multisig_id = proposal_id, signer = %signer, error = %e, "multisig_signature_rejected"))?;

        info!(
            multisig_id = proposal_id,
            signer = %signer,
            count = updated.signature_count,
            required = updated.required_signatures,
            "multisig_signed"
        );
        if approved {
            info!(multisig_id = proposal_id, "multisig_approved");
        }
        Ok(updated)
    }

    pub async fn revoke(&self, proposal_id: MultisigId, signer: &Address) -> Result<MultisigProposal> {
        self.ensure_signer(signer)?;
        let updated = self
            .store
            .revoke_signature(proposal_id, signer, self.clock.now())
            .await?;
        info!(
            multisig_id = proposal_id,
            signer = %signer,
            count = updated.signature_count,
            "multisig_signature_revoked"
        );
        Ok(updated)
    }

    /// Any caller may execute an approved, unexpired proposal
    pub async fn execute(&self, proposal_id: MultisigId, executor: &Address) -> Result<MultisigProposal> {
        let now = self.clock.now();
        let executor_ref = executor.clone();
        let updated = self
            .store
            .update_multisig(proposal_id, &move |p| p.execute(&executor_ref, now))
            .await?;
        info!(multisig_id = proposal_id, executor = %executor, "multisig_executed");
        Ok(updated)
    }

    pub async fn cancel(&self, proposal_id: MultisigId, actor: &Address) -> Result<MultisigProposal> {
        let proposal = self.load(proposal_id).await?;
        if proposal.proposer != *actor && !self.config.cancellers.contains(actor) {
            warn!(multisig_id = proposal_id, actor = %actor, "unauthorized_multisig_cancel");
            return Err(GovernanceError::Unauthorized(format!(
                "{} may not cancel multisig proposal {}",
                actor, proposal_id
            )));
        }
        let now = self.clock.now();
        let actor_ref = actor.clone();
        let updated = self
            .store
            .update_multisig(proposal_id, &move |p| p.reject(&actor_ref, now))
            .await?;
        info!(multisig_id = proposal_id, actor = %actor, "multisig_rejected");
        Ok(updated)
    }

    pub async fn expire_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = 0;
        for p in self.store.list_multisig().await? {
            if matches!(p.status, MultisigStatus::Pending | MultisigStatus::Approved)
                && now >= p.expires_at
            {
                match self.store.update_multisig(p.id, &|m| m.expire(now)).await {
                    Ok(_) => {
                        expired += 1;
                        info!(multisig_id = p.id, "multisig_expired");
                    }
                    Err(GovernanceError::InvalidState { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(expired)
    }

    pub async fn get(&self, proposal_id: MultisigId) -> Result<MultisigView> {
        let proposal = self.load(proposal_id).await?;
        let signers = self
            .store
            .list_signatures(proposal_id)
            .await?
            .into_iter()
            .filter(|s| !s.revoked)
            .map(|s| s.signer)
            .collect();
        Ok(MultisigView {
            state: proposal.status_at(self.clock.now()),
            proposal,
            signers,
        })
    }

    pub async fn list(&self, status: Option<MultisigStatus>) -> Result<Vec<MultisigProposal>> {
        let now = self.clock.now();
        let mut items: Vec<MultisigProposal> = self
            .store
            .list_multisig()
            .await?
            .into_iter()
            .filter(|p| status.map_or(true, |s| p.status_at(now) == s))
            .collect();
        items.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(items)
    }

    async fn load(&self, proposal_id: MultisigId) -> Result<MultisigProposal> {
        self.store
            .get_multisig(proposal_id)
            .await?
            .ok_or(GovernanceError::MultisigNotFound(proposal_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn proposal(required: u32) -> MultisigProposal {
        MultisigProposal {
            id: 1,
            kind: MultisigType::TreasuryWithdrawal,
            proposer: addr(1),
            target: addr(2),
            payload: vec![],
            value: Power::from(100u32),
            required_signatures: required,
            signature_count: 0,
            status: MultisigStatus::Pending,
            created_at: 0,
            expires_at: 1_000,
            approved_at: None,
            executed_at: None,
            executed_by: None,
            rejected_at: None,
            rejected_by: None,
        }
    }

    fn signed(signer: u8, revoked: bool) -> MultisigSignature {
        MultisigSignature {
            proposal_id: 1,
            signer: addr(signer),
            signature: vec![],
            signed_at: 0,
            revoked,
            revoked_at: None,
        }
    }

    #[test]
    fn test_threshold_flip() {
        let mut p = proposal(2);
        assert!(!p.apply_signature(None, &addr(1), 10).unwrap());
        assert_eq!(p.status, MultisigStatus::Pending);

        assert!(matches!(
            p.apply_signature(Some(&signed(1, false)), &addr(1), 11),
            Err(GovernanceError::AlreadySigned { .. })
        ));
        assert_eq!(p.signature_count, 1);

        assert!(p.apply_signature(None, &addr(2), 12).unwrap());
        assert_eq!(p.status, MultisigStatus::Approved);
        assert_eq!(p.signature_count, 2);

        assert!(matches!(
            p.apply_signature(None, &addr(3), 13),
            Err(GovernanceError::MultisigNotPending { .. })
        ));
        assert_eq!(p.signature_count, 2);
    }

    #[test]
    fn test_revoke_then_resign() {
        let mut p = proposal(3);
        p.apply_signature(None, &addr(1), 10).unwrap();
        p.apply_revocation(Some(&signed(1, false)), &addr(1), 11).unwrap();
        assert_eq!(p.signature_count, 0);
        assert!(matches!(
            p.apply_revocation(Some(&signed(1, true)), &addr(1), 12),
            Err(GovernanceError::SignatureNotFound { .. })
        ));
        p.apply_signature(Some(&signed(1, true)), &addr(1), 13).unwrap();
        assert_eq!(p.signature_count, 1);
    }

    #[test]
    fn test_expiry_blocks_signing_and_execution() {
        let mut p = proposal(1);
        assert!(matches!(
            p.apply_signature(None, &addr(1), 1_000),
            Err(GovernanceError::MultisigExpired(1))
        ));

        let mut approved = proposal(1);
        approved.apply_signature(None, &addr(1), 10).unwrap();
        assert_eq!(approved.status_at(1_000), MultisigStatus::Expired);
        assert!(approved.execute(&addr(9), 1_000).is_err());
        approved.expire(1_000).unwrap();
        assert_eq!(approved.status, MultisigStatus::Expired);
    }

    #[test]
    fn test_execute_requires_approval() {
        let mut p = proposal(2);
        assert!(matches!(
            p.execute(&addr(9), 10),
            Err(GovernanceError::InvalidState { .. })
        ));
        p.apply_signature(None, &addr(1), 10).unwrap();
        p.apply_signature(None, &addr(2), 11).unwrap();
        p.execute(&addr(9), 12).unwrap();
        assert_eq!(p.status, MultisigStatus::Executed);
        assert!(p.reject(&addr(1), 13).is_err());
    }

    #[test]
    fn test_digest_binds_fields() {
        let a = proposal(2);
        let mut b = proposal(2);
        b.value = Power::from(101u32);
        assert_ne!(a.approval_digest(), b.approval_digest());
    }

    #[test]
    fn test_type_parse() {
        assert_eq!(
            "emergency_action".parse::<MultisigType>().unwrap(),
            MultisigType::EmergencyAction
        );
        assert!("withdraw".parse::<MultisigType>().is_err());
    }
}
