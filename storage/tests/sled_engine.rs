use governance::config::{RateLimitsConfig, WindowConfig};
use governance::*;
use std::sync::Arc;
use storage::SledStore;
use tempfile::tempdir;

const T0: Timestamp = 1_700_000_000;

fn addr(n: u8) -> Address {
    format!("0x{:040x}", n).parse().unwrap()
}

fn config() -> GovernanceConfig {
    let wide = WindowConfig {
        max_requests: 1_000,
        window_secs: 60,
    };
    GovernanceConfig {
        rate_limits: RateLimitsConfig {
            proposal: wide,
            vote: wide,
            delegate: wide,
            signature: wide,
        },
        ..GovernanceConfig::default()
    }
}

struct Node {
    engine: GovernanceEngine,
    clock: Arc<ManualClock>,
    ledger: Arc<TokenLedger>,
}

fn node(store: SledStore, now: Timestamp) -> Node {
    let store: Arc<dyn GovernanceStore> = Arc::new(store);
    let clock = Arc::new(ManualClock::new(now));
    let ledger = Arc::new(TokenLedger::new(store.clone(), clock.clone()));
    let engine = GovernanceEngine::new(
        config(),
        store,
        ledger.clone(),
        Arc::new(Ed25519Verifier::new()),
        clock.clone(),
    )
    .unwrap();
    Node {
        engine,
        clock,
        ledger,
    }
}

fn new_proposal(title: &str) -> NewProposal {
    NewProposal {
        title: title.to_string(),
        description: format!("{} description", title),
        category: ProposalCategory::ProtocolUpgrade,
        actions: vec![Action {
            target: addr(50),
            value: Power::from(0u32),
            payload: vec![1, 2, 3],
        }],
    }
}

#[tokio::test]
async fn test_full_lifecycle_on_sled() {
    let n = node(SledStore::temporary().unwrap(), T0);
    let ctx = RequestContext::system();
    n.ledger.mint(&addr(1), Power::from(5_000u32)).await;
    n.engine.delegate(&ctx, &addr(1), &addr(1)).await.unwrap();

    let proposal = n
        .engine
        .create_proposal(&ctx, &addr(1), new_proposal("Sled"))
        .await
        .unwrap();
    assert_eq!(proposal.id, 1);

    n.clock.set(proposal.voting_starts_at);
    n.engine
        .cast_vote(&ctx, proposal.id, &addr(1), VoteChoice::For, None)
        .await
        .unwrap();
    assert!(matches!(
        n.engine
            .cast_vote(&ctx, proposal.id, &addr(1), VoteChoice::For, None)
            .await,
        Err(GovernanceError::AlreadyVoted { .. })
    ));

    n.clock.set(proposal.voting_ends_at);
    let op = n.engine.queue(&ctx, proposal.id, None, None).await.unwrap();
    assert!(matches!(
        n.engine.queue(&ctx, proposal.id, None, None).await,
        Err(GovernanceError::AlreadyQueued(_))
    ));

    n.clock.set(op.eta);
    let executed = n
        .engine
        .execute(&ctx, &op.operation_hash, &addr(9))
        .await
        .unwrap();
    assert_eq!(executed.status, OperationStatus::Executed);

    let view = n.engine.proposal(proposal.id).await.unwrap();
    assert_eq!(view.state, ProposalState::Executed);
    assert_eq!(view.proposal.tally.for_power, Power::from(5_000u32));
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let ctx = RequestContext::system();

    let (proposal_id, hash, queued_at) = {
        let store = SledStore::open(dir.path()).unwrap();
        let n = node(store.clone(), T0);
        n.ledger.mint(&addr(2), Power::from(800u32)).await;
        n.engine.delegate(&ctx, &addr(2), &addr(2)).await.unwrap();
        let proposal = n
            .engine
            .create_proposal(&ctx, &addr(2), new_proposal("Durable"))
            .await
            .unwrap();
        n.clock.set(proposal.voting_starts_at);
        n.engine
            .cast_vote(&ctx, proposal.id, &addr(2), VoteChoice::For, None)
            .await
            .unwrap();
        n.clock.set(proposal.voting_ends_at);
        let op = n.engine.queue(&ctx, proposal.id, None, None).await.unwrap();
        store.flush().unwrap();
        (proposal.id, op.operation_hash, op.queued_at)
    };

    let n = node(SledStore::open(dir.path()).unwrap(), queued_at + 60);
    let view = n.engine.proposal(proposal_id).await.unwrap();
    assert_eq!(view.proposal.operation_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(n.engine.votes(proposal_id).await.unwrap().len(), 1);

    let status = n.engine.timelock_status(&hash).await.unwrap();
    assert_eq!(status.operation.status, OperationStatus::Queued);

    // the sequence continues past the reopened rows
    n.ledger.mint(&addr(3), Power::from(800u32)).await;
    let next = n
        .engine
        .create_proposal(&ctx, &addr(3), new_proposal("Second"))
        .await
        .unwrap();
    assert_eq!(next.id, proposal_id + 1);
}
