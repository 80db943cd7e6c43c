use civic_node::{Node, NodeConfig, StorageKind};
use ed25519_dalek::{Signer, SigningKey};
use governance::*;
use std::sync::Arc;

const T0: Timestamp = 1_700_000_000;

fn addr(n: u8) -> Address {
    format!("0x{:040x}", n).parse().unwrap()
}

fn key(n: u8) -> SigningKey {
    SigningKey::from_bytes(&[n; 32])
}

fn sample_toml(data_dir: &str, storage: &str) -> String {
    format!(
        r#"
node_name = "test-node"
listen_addr = "127.0.0.1:0"
data_dir = "{data_dir}"
storage = "{storage}"

[signer_keys]
"{s1}" = "{k1}"
"{s2}" = "{k2}"

[[allocations]]
address = "{holder}"
amount = "5000"
self_delegate = true

[governance]
quorum_bps = 500

[governance.multisig]
signers = ["{s1}", "{s2}"]
required_signatures = 2
"#,
        s1 = addr(101),
        s2 = addr(102),
        k1 = hex::encode(key(101).verifying_key().to_bytes()),
        k2 = hex::encode(key(102).verifying_key().to_bytes()),
        holder = addr(1),
    )
}

#[test]
fn test_parse_full_config() {
    let config = NodeConfig::from_toml(&sample_toml("/tmp/civic", "sled")).unwrap();
    assert_eq!(config.node_name, "test-node");
    assert_eq!(config.storage, StorageKind::Sled);
    assert_eq!(config.governance.quorum_bps, 500);
    assert_eq!(config.governance.voting_period_secs, 7 * 86_400);
    assert_eq!(config.governance.multisig.signers.len(), 2);
    assert_eq!(config.signer_keys.len(), 2);
    assert_eq!(config.allocations[0].amount, Power::from(5_000u32));
}

#[test]
fn test_rejects_invalid_config() {
    assert!(NodeConfig::from_toml("[governance]\nquorum_bps = 20000\n").is_err());
    assert!(NodeConfig::from_toml("storage = \"rocks\"\n").is_err());
    assert!(NodeConfig::from_toml("[signer_keys]\n\"nope\" = \"00\"\n").is_err());
}

#[tokio::test]
async fn test_build_memory_node() {
    let config = NodeConfig::from_toml(&sample_toml("", "memory")).unwrap();
    let node = Node::build(config, Arc::new(ManualClock::new(T0)))
        .await
        .unwrap();

    let snapshot = node.engine.voting_power(&addr(1)).await.unwrap();
    assert_eq!(snapshot.voting_power, Power::from(5_000u32));
    assert_eq!(snapshot.delegation.delegatee, Some(addr(1)));

    // configured keys verify multisig approvals
    let ctx = RequestContext::system();
    let proposal = node
        .engine
        .create_multisig_proposal(
            &ctx,
            &addr(101),
            NewMultisigProposal {
                kind: MultisigType::ParameterChange,
                target: addr(70),
                payload: vec![],
                value: Power::from(0u32),
                duration_days: 3,
            },
        )
        .await
        .unwrap();
    let domain = SignatureDomain::from(&node.config.governance.relay);
    let message = signing_message(&domain, &proposal.approval_digest());
    for n in [101u8, 102] {
        node.engine
            .sign_multisig_proposal(&ctx, proposal.id, &addr(n), key(n).sign(&message).to_bytes().to_vec())
            .await
            .unwrap();
    }
    let view = node.engine.multisig_proposal(proposal.id).await.unwrap();
    assert_eq!(view.proposal.status, MultisigStatus::Approved);
}

#[tokio::test]
async fn test_sled_node_restart_keeps_delegation() {
    let dir = tempfile::tempdir().unwrap();
    let toml = sample_toml(&dir.path().display().to_string(), "sled");

    {
        let node = Node::build(
            NodeConfig::from_toml(&toml).unwrap(),
            Arc::new(ManualClock::new(T0)),
        )
        .await
        .unwrap();
        node.flush().unwrap();
    }

    let node = Node::build(
        NodeConfig::from_toml(&toml).unwrap(),
        Arc::new(ManualClock::new(T0 + 60)),
    )
    .await
    .unwrap();
    let snapshot = node.engine.voting_power(&addr(1)).await.unwrap();
    assert_eq!(snapshot.delegation.history.len(), 1);
}
