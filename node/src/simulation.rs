//! # Simulated Deployment
//!
//! The fixed topology the binary runs: three participant nodes, an observer
//! and a notary on one in-process network, every node enforcing the
//! transition contract.
//!
//! | Node      | Accounts | Role        |
//! |-----------|----------|-------------|
//! | PartyA    | alice    | participant |
//! | PartyB    | bob      | participant |
//! | PartyC    | carol    | participant |
//! | Regulator |          | observer    |

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use concord_contracts::TransitionContract;
use concord_protocol::config::FlowConfig;
use concord_protocol::identity::NodeName;
use concord_protocol::transaction::LegalityVerifier;
use concord_protocol::{Cluster, ClusterBuilder, ClusterError, FlowError, TransitionOutcome};

use crate::metrics::NodeMetrics;

pub const PARTY_A: &str = "O=PartyA,L=London,C=GB";
pub const PARTY_B: &str = "O=PartyB,L=New York,C=US";
pub const PARTY_C: &str = "O=PartyC,L=Paris,C=FR";
pub const REGULATOR: &str = "O=Regulator,L=Zurich,C=CH";

/// Build the standard topology around `config.notary`.
pub fn build_cluster(config: &FlowConfig, data_dir: Option<&Path>) -> Result<Cluster, ClusterError> {
    let contract = || -> Arc<dyn LegalityVerifier> { Arc::new(TransitionContract::new()) };
    let mut builder = ClusterBuilder::new(config.notary.as_str())
        .config(config.clone())
        .node(PARTY_A, contract())
        .node(PARTY_B, contract())
        .node(PARTY_C, contract())
        .node(REGULATOR, contract())
        .account("alice", PARTY_A)
        .account("bob", PARTY_B)
        .account("carol", PARTY_C);
    if let Some(dir) = data_dir {
        builder = builder.data_dir(dir);
    }
    builder.build()
}

pub fn regulator() -> NodeName {
    NodeName::from(REGULATOR)
}

/// Run a start flow from the node hosting `source`, recording metrics.
pub async fn start_transition(
    cluster: &Cluster,
    metrics: &NodeMetrics,
    source: &str,
    target: &str,
    observer: Option<NodeName>,
) -> Result<TransitionOutcome, FlowError> {
    let account = cluster
        .directory()
        .by_name(source)
        .ok_or_else(|| FlowError::NotFound(format!("account '{source}'")))?;
    let node = cluster
        .node(account.host.as_str())
        .ok_or_else(|| FlowError::NotFound(format!("node {}", account.host)))?;

    metrics.flows_started_total.inc();
    let started = Instant::now();
    let result = node.start_transition(source, target, observer).await;
    metrics.record_flow(&result, started.elapsed());
    metrics.sync_session_messages(cluster.network().messages_sent());

    match &result {
        Ok(outcome) => info!(
            tx_id = %outcome.tx_id(),
            linear_id = %outcome.linear_id,
            exceptions = outcome.exceptions.len(),
            "transition finalized"
        ),
        Err(e) => debug!(error = %e, kind = e.kind(), "transition failed"),
    }
    result
}

/// JSON shape of a flow result on stdout and in the API.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlowReport {
    Finalized(TransitionOutcome),
    Failed { kind: String, error: String },
}

impl From<Result<TransitionOutcome, FlowError>> for FlowReport {
    fn from(result: Result<TransitionOutcome, FlowError>) -> Self {
        match result {
            Ok(outcome) => FlowReport::Finalized(outcome),
            Err(e) => FlowReport::Failed {
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RaceReport {
    pub alice_to_bob: FlowReport,
    pub carol_to_bob: FlowReport,
}

/// Race alice (PartyA) and carol (PartyC) for bob. The notary lets exactly
/// one through.
pub async fn race(cluster: &Cluster, metrics: &NodeMetrics, observer: Option<NodeName>) -> RaceReport {
    let (first, second) = futures::join!(
        start_transition(cluster, metrics, "alice", "bob", observer.clone()),
        start_transition(cluster, metrics, "carol", "bob", observer),
    );
    RaceReport {
        alice_to_bob: first.into(),
        carol_to_bob: second.into(),
    }
}
