//! End-to-end tests for Concord flows.
//!
//! Each test builds its own in-process cluster: participant nodes, an
//! observer node, a notary, and the in-memory network between them. Flows
//! run for real, through the responders, so every assertion here is about
//! what the nodes actually end up storing.

use std::sync::Arc;
use std::time::Duration;

use concord_protocol::config::FlowConfig;
use concord_protocol::flow::{CoSigningState, FlowError, FlowStep, PostCommitException};
use concord_protocol::identity::NodeName;
use concord_protocol::storage::{RecordRole, RecordStatus, RecordStore};
use concord_protocol::transaction::{
    CommandKind, LegalityVerifier, RejectAll, StructuralVerifier, UniquenessKey,
};
use concord_protocol::{Cluster, ClusterBuilder};

const NOTARY: &str = "O=Notary,L=London,C=GB";
const PARTY_A: &str = "O=PartyA,L=London,C=GB";
const PARTY_B: &str = "O=PartyB,L=New York,C=US";
const PARTY_C: &str = "O=PartyC,L=Paris,C=FR";
const REGULATOR: &str = "O=Regulator,L=Zurich,C=CH";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn structural() -> Arc<dyn LegalityVerifier> {
    Arc::new(StructuralVerifier)
}

/// PartyA hosts alice and dave, PartyB hosts bob and carol, PartyC hosts
/// erin. The regulator hosts nobody.
fn builder_with(party_b_verifier: Arc<dyn LegalityVerifier>) -> ClusterBuilder {
    ClusterBuilder::new(NOTARY)
        .node(PARTY_A, structural())
        .node(PARTY_B, party_b_verifier)
        .node(PARTY_C, structural())
        .node(REGULATOR, structural())
        .account("alice", PARTY_A)
        .account("dave", PARTY_A)
        .account("bob", PARTY_B)
        .account("carol", PARTY_B)
        .account("erin", PARTY_C)
}

fn cluster() -> Cluster {
    builder_with(structural()).build().expect("cluster")
}

fn regulator() -> Option<NodeName> {
    Some(NodeName::from(REGULATOR))
}

fn records(cluster: &Cluster, node: &str) -> Vec<concord_protocol::storage::StoredRecord> {
    cluster.vault(node).expect("vault").all_records().expect("records")
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_transition_reaches_both_participants_and_the_regulator() {
    let cluster = cluster();
    let node_a = cluster.node(PARTY_A).unwrap();
    let mut events = node_a.subscribe();

    let outcome = node_a
        .start_transition("alice", "bob", regulator())
        .await
        .expect("flow succeeds");

    assert!(outcome.exceptions.is_empty());
    let tx = &outcome.transaction;
    assert_eq!(tx.signed.proposal.command.kind, CommandKind::Start);
    tx.verify().expect("finalized transaction verifies");

    let alice = cluster.directory().by_name("alice").unwrap();
    let bob = cluster.directory().by_name("bob").unwrap();
    let record = tx.signed.proposal.record().unwrap();
    assert_eq!(record.linear_id, outcome.linear_id);
    assert_eq!(record.source_account, alice.id);
    assert_eq!(record.target_account, bob.id);

    for node in [PARTY_A, PARTY_B] {
        let stored = records(&cluster, node);
        assert_eq!(stored.len(), 1, "{node} holds the record");
        assert_eq!(stored[0].role, RecordRole::Participant);
        assert_eq!(stored[0].status, RecordStatus::Active);
        assert_eq!(stored[0].record.linear_id, outcome.linear_id);
    }

    let observed = records(&cluster, REGULATOR);
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].role, RecordRole::Observer);
    assert!(records(&cluster, PARTY_C).is_empty());

    assert_eq!(cluster.notary().committed_count(), 1);
    assert_eq!(
        cluster
            .notary()
            .holder_of(&UniquenessKey::ActiveAccount(alice.id))
            .unwrap()
            .as_deref(),
        Some(outcome.tx_id())
    );

    let mut steps = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.flow_id, outcome.flow_id);
        steps.push(event.step);
    }
    assert!(steps.contains(&FlowStep::CoSigning {
        state: CoSigningState::FullySigned
    }));
    assert!(steps.contains(&FlowStep::Reporting));
    assert_eq!(
        steps.last(),
        Some(&FlowStep::Finished {
            tx_id: outcome.tx_id().to_string()
        })
    );

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn fully_signed_means_exactly_the_command_signers() {
    let cluster = cluster();
    let outcome = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", None)
        .await
        .unwrap();

    let signed = &outcome.transaction.signed;
    let required = &signed.proposal.command.signers;
    let present: Vec<_> = signed.signatures.signers().cloned().collect();
    assert_eq!(required.len(), 2);
    assert_eq!(&present, required);
    assert!(signed.is_fully_signed());

    // Merging a signature that is already present changes nothing.
    let mut signatures = signed.signatures.clone();
    let existing = signatures.get(&required[0]).unwrap().clone();
    signatures.merge(&signed.proposal, existing).unwrap();
    assert_eq!(signatures, signed.signatures);

    // The origin attestation is the node's, not one of the signers.
    assert_eq!(signed.attestation.node.name.as_str(), PARTY_A);
    assert!(!required.contains(&signed.attestation.node.owning_key));

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn transition_between_accounts_on_one_node_needs_no_messages() {
    let cluster = cluster();
    let outcome = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "dave", None)
        .await
        .unwrap();

    assert!(outcome.transaction.signed.is_fully_signed());
    assert_eq!(cluster.network().messages_sent(), 0);
    assert_eq!(records(&cluster, PARTY_A).len(), 1);

    cluster.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Uniqueness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn known_conflict_is_refused_before_any_message() {
    let cluster = cluster();
    let node_a = cluster.node(PARTY_A).unwrap();
    node_a.start_transition("alice", "bob", None).await.unwrap();

    let party_a = NodeName::from(PARTY_A);
    let sent_before = cluster.network().messages_sent_by(&party_a);

    let err = node_a
        .start_transition("alice", "carol", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Conflict { ref account } if account == "alice"));

    // bob is busy too, and PartyA knows it from its own vault.
    let err = node_a.start_transition("dave", "bob", None).await.unwrap_err();
    assert!(matches!(err, FlowError::Conflict { ref account } if account == "bob"));

    assert_eq!(cluster.network().messages_sent_by(&party_a), sent_before);
    assert_eq!(cluster.notary().committed_count(), 1);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn racing_initiators_are_ordered_by_the_notary() {
    let cluster = cluster();
    let node_a = cluster.node(PARTY_A).unwrap();
    let node_c = cluster.node(PARTY_C).unwrap();

    let (first, second) = futures::join!(
        node_a.start_transition("alice", "bob", None),
        node_c.start_transition("erin", "bob", None),
    );

    let (winner, loser) = match (first, second) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        (a, b) => panic!("expected exactly one success, got {a:?} and {b:?}"),
    };
    match loser {
        FlowError::ConsensusRejected { conflicting_tx, .. } => {
            assert_eq!(conflicting_tx, winner.tx_id());
        }
        other => panic!("expected ConsensusRejected, got {other:?}"),
    }

    assert_eq!(cluster.notary().committed_count(), 1);
    let bob_records = records(&cluster, PARTY_B);
    assert_eq!(bob_records.len(), 1);
    assert_eq!(bob_records[0].record.linear_id, winner.linear_id);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn counterparty_forgets_the_losing_session() {
    let config = FlowConfig {
        session_ttl_ms: 2_000,
        ..FlowConfig::with_notary(NOTARY)
    };
    let cluster = builder_with(structural()).config(config).build().unwrap();
    let node_a = cluster.node(PARTY_A).unwrap();
    let node_c = cluster.node(PARTY_C).unwrap();
    let node_b = cluster.node(PARTY_B).unwrap();

    let (first, second) = futures::join!(
        node_a.start_transition("alice", "bob", None),
        node_c.start_transition("erin", "bob", None),
    );
    assert!(first.is_ok() != second.is_ok());

    // PartyB signed both; only the winner's session was closed by finality.
    assert_eq!(node_b.pending_sessions(), 1);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(node_b.pending_sessions(), 0);

    cluster.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Failures before commit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counterparty_rejection_leaves_nothing_anywhere() {
    let cluster = builder_with(Arc::new(RejectAll("bob does not consent".into())))
        .build()
        .unwrap();

    let err = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", regulator())
        .await
        .unwrap_err();
    match err {
        FlowError::Rejected { reason } => assert!(reason.contains("bob does not consent")),
        other => panic!("expected Rejected, got {other:?}"),
    }

    for node in cluster.node_names() {
        assert!(records(&cluster, node.as_str()).is_empty(), "{node} stored something");
    }
    assert_eq!(cluster.notary().committed_count(), 0);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_counterparty_fails_the_flow() {
    let cluster = cluster();
    cluster.disconnect(PARTY_B);

    let err = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Transport(_)), "got {err:?}");
    assert!(records(&cluster, PARTY_A).is_empty());
    assert_eq!(cluster.notary().committed_count(), 0);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let cluster = cluster();
    let err = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "mallory", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));
    cluster.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Failures after commit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_regulator_is_a_compliance_exception() {
    let cluster = cluster();
    cluster.disconnect(REGULATOR);

    let outcome = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", regulator())
        .await
        .expect("the transaction is final regardless");

    assert_eq!(outcome.exceptions.len(), 1);
    assert!(matches!(
        &outcome.exceptions[0],
        PostCommitException::Compliance { observer, .. } if observer.as_str() == REGULATOR
    ));

    assert_eq!(records(&cluster, PARTY_A).len(), 1);
    assert_eq!(records(&cluster, PARTY_B).len(), 1);
    assert!(records(&cluster, REGULATOR).is_empty());
    assert_eq!(cluster.notary().committed_count(), 1);

    cluster.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Conclusion and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concluding_frees_both_accounts() {
    let cluster = cluster();
    let node_a = cluster.node(PARTY_A).unwrap();
    let started = node_a.start_transition("alice", "bob", regulator()).await.unwrap();

    let concluded = node_a
        .conclude_transition(started.linear_id, regulator())
        .await
        .unwrap();
    assert_eq!(concluded.linear_id, started.linear_id);
    assert_eq!(
        concluded.transaction.signed.proposal.command.kind,
        CommandKind::Conclude
    );
    assert!(concluded.exceptions.is_empty());

    for node in [PARTY_A, PARTY_B, REGULATOR] {
        let stored = records(&cluster, node);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, RecordStatus::Consumed, "{node}");
        assert_eq!(stored[0].consumed_by.as_deref(), Some(concluded.tx_id()));
    }

    // Concluding twice finds nothing active.
    let err = node_a
        .conclude_transition(started.linear_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));

    // Both accounts can transition again.
    let again = node_a.start_transition("alice", "bob", None).await.unwrap();
    assert_ne!(again.linear_id, started.linear_id);
    assert_eq!(cluster.notary().committed_count(), 3);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn counterparty_can_conclude_too() {
    let cluster = cluster();
    let started = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", None)
        .await
        .unwrap();

    cluster
        .node(PARTY_B)
        .unwrap()
        .conclude_transition(started.linear_id, None)
        .await
        .unwrap();

    let stored = records(&cluster, PARTY_A);
    assert_eq!(stored[0].status, RecordStatus::Consumed);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn records_and_claims_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let cluster = builder_with(structural())
        .data_dir(dir.path())
        .build()
        .unwrap();
    let outcome = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "bob", None)
        .await
        .unwrap();
    let alice_id = cluster.directory().by_name("alice").unwrap().id;
    cluster.shutdown().await.unwrap();

    // Same topology, rebuilt from names alone.
    let cluster = builder_with(structural())
        .data_dir(dir.path())
        .build()
        .unwrap();
    assert_eq!(cluster.directory().by_name("alice").unwrap().id, alice_id);

    let stored = records(&cluster, PARTY_B);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].record.linear_id, outcome.linear_id);
    assert!(stored[0].is_active());

    let alice = cluster.directory().by_name("alice").unwrap();
    assert_eq!(
        cluster
            .notary()
            .holder_of(&UniquenessKey::ActiveAccount(alice.id))
            .unwrap()
            .as_deref(),
        Some(outcome.tx_id())
    );

    let err = cluster
        .node(PARTY_A)
        .unwrap()
        .start_transition("alice", "carol", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Conflict { .. }));
    assert_eq!(cluster.network().messages_sent(), 0);

    cluster.shutdown().await.unwrap();
}
