#![allow(dead_code)]

use ed25519_dalek::{Signer, SigningKey};
use governance::config::{RateLimitsConfig, WindowConfig};
use governance::*;
use std::sync::Arc;

pub const T0: Timestamp = 1_700_000_000;

pub fn addr(n: u8) -> Address {
    format!("0x{:040x}", n).parse().unwrap()
}

pub fn key(n: u8) -> SigningKey {
    SigningKey::from_bytes(&[n; 32])
}

pub fn power(n: u64) -> Power {
    Power::from(n)
}

/// Multisig roster used by every harness: addresses 101..=105
pub fn signer_roster() -> Vec<Address> {
    (101..=105).map(addr).collect()
}

pub fn test_config(required_signatures: u32) -> GovernanceConfig {
    let wide = WindowConfig {
        max_requests: 1_000,
        window_secs: 60,
    };
    let mut config = GovernanceConfig {
        rate_limits: RateLimitsConfig {
            proposal: wide,
            vote: wide,
            delegate: wide,
            signature: wide,
        },
        ..GovernanceConfig::default()
    };
    config.multisig.signers = signer_roster();
    config.multisig.required_signatures = required_signatures;
    config.cancellers = vec![addr(200)];
    config
}

pub struct Harness {
    pub engine: Arc<GovernanceEngine>,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<TokenLedger>,
    pub store: Arc<dyn GovernanceStore>,
    pub domain: SignatureDomain,
    pub ctx: RequestContext,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config(2)).await
    }

    pub async fn with_config(config: GovernanceConfig) -> Self {
        let store: Arc<dyn GovernanceStore> = Arc::new(MemoryStore::new());
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: GovernanceConfig, store: Arc<dyn GovernanceStore>) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let ledger = Arc::new(TokenLedger::new(store.clone(), clock.clone()));

        // every low address and every roster member gets a registered key
        let verifier = Arc::new(Ed25519Verifier::new());
        for n in (1..=20).chain(101..=105) {
            verifier.register(addr(n), key(n).verifying_key()).await;
        }

        let domain = SignatureDomain::from(&config.relay);
        let engine = GovernanceEngine::new(
            config,
            store.clone(),
            ledger.clone(),
            verifier,
            clock.clone(),
        )
        .unwrap();

        Self {
            engine: Arc::new(engine),
            clock,
            ledger,
            store,
            domain,
            ctx: RequestContext::system(),
        }
    }

    /// Mint and self-delegate so the holder can vote on later proposals
    pub async fn fund(&self, who: u8, amount: u64) {
        self.ledger.mint(&addr(who), power(amount)).await;
        self.engine
            .delegate(&self.ctx, &addr(who), &addr(who))
            .await
            .unwrap();
    }

    pub fn new_proposal(&self, title: &str) -> NewProposal {
        NewProposal {
            title: title.to_string(),
            description: format!("{} description", title),
            category: ProposalCategory::Treasury,
            actions: vec![Action {
                target: addr(50),
                value: power(0),
                payload: title.as_bytes().to_vec(),
            }],
        }
    }

    pub async fn propose(&self, proposer: u8, title: &str) -> Proposal {
        self.engine
            .create_proposal(&self.ctx, &addr(proposer), self.new_proposal(title))
            .await
            .unwrap()
    }

    pub fn open_voting(&self, proposal: &Proposal) {
        self.clock.set(proposal.voting_starts_at);
    }

    pub fn close_voting(&self, proposal: &Proposal) {
        self.clock.set(proposal.voting_ends_at);
    }

    pub async fn vote(&self, proposal: &Proposal, voter: u8, choice: VoteChoice) -> Result<Vote> {
        self.engine
            .cast_vote(&self.ctx, proposal.id, &addr(voter), choice, None)
            .await
    }

    /// Create, vote For with `voter` and close the window
    pub async fn succeeded_proposal(&self, proposer: u8, voter: u8, title: &str) -> Proposal {
        let proposal = self.propose(proposer, title).await;
        self.open_voting(&proposal);
        self.vote(&proposal, voter, VoteChoice::For).await.unwrap();
        self.close_voting(&proposal);
        proposal
    }

    pub fn sign_digest(&self, signer: u8, digest: &[u8; 32]) -> Vec<u8> {
        key(signer)
            .sign(&signing_message(&self.domain, digest))
            .to_bytes()
            .to_vec()
    }

    pub async fn create_multisig(&self, proposer: u8) -> MultisigProposal {
        self.engine
            .create_multisig_proposal(
                &self.ctx,
                &addr(proposer),
                NewMultisigProposal {
                    kind: MultisigType::TreasuryWithdrawal,
                    target: addr(60),
                    payload: vec![0xca, 0xfe],
                    value: power(1_000),
                    duration_days: 7,
                },
            )
            .await
            .unwrap()
    }

    pub async fn sign_multisig(&self, proposal: &MultisigProposal, signer: u8) -> Result<MultisigProposal> {
        let signature = self.sign_digest(signer, &proposal.approval_digest());
        self.engine
            .sign_multisig_proposal(&self.ctx, proposal.id, &addr(signer), signature)
            .await
    }
}
