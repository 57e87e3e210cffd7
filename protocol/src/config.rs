//! # Protocol Configuration & Constants
//!
//! Constants shared by every node, plus [`FlowConfig`], the per-node knobs
//! the surrounding application sets: which notary is pinned and how long
//! each suspension point of a flow may block.
//!
//! The protocol itself mandates no timeouts. The defaults below are what
//! the node binary uses when nothing else is configured.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Major version. Responders refuse session messages from another major.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Full version string carried in every session envelope.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version byte mixed into the canonical bytes of every transaction, so a
/// format change also changes every transaction id.
pub const TRANSACTION_FORMAT_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

pub const SIGNING_ALGORITHM: &str = "Ed25519";

pub const SIGNATURE_LENGTH: usize = 64;

pub const PUBLIC_KEY_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Name the node binary pins as its notary when none is configured.
pub const DEFAULT_NOTARY_NAME: &str = "O=Notary,L=London,C=GB";

/// Capacity of each node's inbox. Senders wait when a responder falls
/// this far behind.
pub const NODE_INBOX_CAPACITY: usize = 256;

/// Capacity of a flow's event broadcast channel.
pub const FLOW_EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Default Timeouts
// ---------------------------------------------------------------------------

/// Remote pseudonym key round trip.
pub const DEFAULT_KEY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Counterparty re-verification and signature.
pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Notary commit.
pub const DEFAULT_NOTARY_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery of a finalized transaction to one participant or observer.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a responder remembers a session it signed in. Covers the
/// initiator's signature, notary and delivery timeouts.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(75);

// ---------------------------------------------------------------------------
// FlowConfig
// ---------------------------------------------------------------------------

/// Per-node flow settings.
///
/// Durations serialize as milliseconds so the node can read this from a
/// JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// The notary every transaction built on this node names.
    pub notary: String,
    pub key_request_timeout_ms: u64,
    pub signature_timeout_ms: u64,
    pub notary_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
    /// A signed session with no finality after this long is forgotten.
    pub session_ttl_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            notary: DEFAULT_NOTARY_NAME.to_string(),
            key_request_timeout_ms: DEFAULT_KEY_REQUEST_TIMEOUT.as_millis() as u64,
            signature_timeout_ms: DEFAULT_SIGNATURE_TIMEOUT.as_millis() as u64,
            notary_timeout_ms: DEFAULT_NOTARY_TIMEOUT.as_millis() as u64,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT.as_millis() as u64,
            session_ttl_ms: DEFAULT_SESSION_TTL.as_millis() as u64,
        }
    }
}

impl FlowConfig {
    /// Default timeouts with a specific pinned notary.
    pub fn with_notary(notary: impl Into<String>) -> Self {
        Self {
            notary: notary.into(),
            ..Default::default()
        }
    }

    pub fn key_request_timeout(&self) -> Duration {
        Duration::from_millis(self.key_request_timeout_ms)
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_millis(self.signature_timeout_ms)
    }

    pub fn notary_timeout(&self) -> Duration {
        Duration::from_millis(self.notary_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }
}

/// `true` if `version` shares our major version.
pub fn is_compatible_version(version: &str) -> bool {
    version.starts_with(&format!("{}.", PROTOCOL_VERSION_MAJOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_pins_default_notary() {
        let config = FlowConfig::default();
        assert_eq!(config.notary, DEFAULT_NOTARY_NAME);
        assert_eq!(config.signature_timeout(), DEFAULT_SIGNATURE_TIMEOUT);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: FlowConfig =
            serde_json::from_str(r#"{ "notary": "O=Other", "notary_timeout_ms": 5 }"#).unwrap();
        assert_eq!(config.notary, "O=Other");
        assert_eq!(config.notary_timeout(), Duration::from_millis(5));
        assert_eq!(config.delivery_timeout(), DEFAULT_DELIVERY_TIMEOUT);
        assert_eq!(config.session_ttl(), DEFAULT_SESSION_TTL);
    }

    #[test]
    fn session_ttl_outlasts_the_initiator_timeouts() {
        assert!(
            DEFAULT_SESSION_TTL >= DEFAULT_SIGNATURE_TIMEOUT + DEFAULT_NOTARY_TIMEOUT + DEFAULT_DELIVERY_TIMEOUT
        );
    }

    #[test]
    fn version_compatibility_checks_major() {
        assert!(is_compatible_version(PROTOCOL_VERSION));
        assert!(is_compatible_version("0.9.3"));
        assert!(!is_compatible_version("1.0.0"));
    }

    #[test]
    fn crypto_parameter_sizes() {
        assert_eq!(SIGNATURE_LENGTH, 64);
        assert_eq!(PUBLIC_KEY_LENGTH, 32);
        assert_eq!(SIGNING_ALGORITHM, "Ed25519");
    }
}
