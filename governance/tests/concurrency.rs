mod common;

use common::*;
use governance::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_double_vote_records_once() {
    let h = Arc::new(Harness::new().await);
    h.fund(3, 1_000).await;
    let proposal = h.propose(3, "Race").await;
    h.open_voting(&proposal);

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        let id = proposal.id;
        let choice = if i % 2 == 0 { VoteChoice::For } else { VoteChoice::Against };
        handles.push(tokio::spawn(async move {
            h.engine.cast_vote(&h.ctx, id, &addr(3), choice, None).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, GovernanceError::AlreadyVoted { .. })),
        }
    }
    assert_eq!(accepted, 1);

    let view = h.engine.proposal(proposal.id).await.unwrap();
    assert_eq!(view.proposal.tally.total(), power(1_000));
    assert_eq!(h.engine.votes(proposal.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_execute_and_cancel_race_settles_once() {
    let h = Arc::new(Harness::new().await);
    h.fund(3, 1_000).await;
    let proposal = h.succeeded_proposal(3, 3, "Settle once").await;
    let queued = h.engine.queue(&h.ctx, proposal.id, None, None).await.unwrap();
    let hash = queued.operation_hash.clone();
    h.clock.set(queued.eta);

    let exec = {
        let h = h.clone();
        let hash = hash.clone();
        tokio::spawn(async move { h.engine.execute(&h.ctx, &hash, &addr(9)).await.map(|_| ()) })
    };
    let cancel = {
        let h = h.clone();
        let hash = hash.clone();
        tokio::spawn(async move {
            h.engine
                .cancel_timelock(&h.ctx, &hash, &addr(3), "race")
                .await
                .map(|_| ())
        })
    };

    let results = [exec.await.unwrap(), cancel.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let status = h.engine.timelock_status(&hash).await.unwrap();
    assert!(status.state.is_terminal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_signers_approve_exactly_once() {
    let h = Arc::new(Harness::with_config(test_config(3)).await);
    let proposal = h.create_multisig(101).await;

    let mut handles = Vec::new();
    for signer in 101..=105u8 {
        let h = h.clone();
        let proposal = proposal.clone();
        handles.push(tokio::spawn(async move { h.sign_multisig(&proposal, signer).await }));
    }

    let mut accepted = 0;
    let mut approvals = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => {
                accepted += 1;
                if updated.signature_count == 3 {
                    approvals += 1;
                    assert_eq!(updated.status, MultisigStatus::Approved);
                }
            }
            Err(e) => assert!(matches!(e, GovernanceError::MultisigNotPending { .. })),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(approvals, 1);

    let view = h.engine.multisig_proposal(proposal.id).await.unwrap();
    assert_eq!(view.proposal.signature_count, 3);
    assert_eq!(view.proposal.status, MultisigStatus::Approved);
    assert_eq!(view.signers.len(), 3);
}
