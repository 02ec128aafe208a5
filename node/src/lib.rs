//! Chord DHT Node Library
//!
//! This library provides the per-node Chord protocol engine over a statically
//! built ring, together with the transport, timer and directory collaborators
//! it runs on. It is used by the `chord-sim` binary and by the integration
//! test harness.

pub mod directory;
pub mod error;
pub mod ids;
pub mod node;
pub mod scheduler;
pub mod search;
pub mod transport;

use std::time::Duration;

// Re-export main types for public API
pub use directory::Directory;
pub use error::{NodeError, TransportError};
pub use node::{ChordNode, NodeStats, StoredItem};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
pub use search::SearchCompleted;
pub use transport::{LocalTransport, TcpTransport, Transport};

// Re-export from lib crate for convenience
pub use chord_lib::messages::{ChordMessage, MessageKind, Operation, SearchFailure, SearchId};
pub use chord_lib::ring::{NodeRecord, Ring};
pub use chord_lib::{Identifier, IdentifierSpace};

/// Configuration for a ChordNode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordConfig {
    pub id_bits: u32,
    pub request_timeout: Duration,
    /// How long a forwarder keeps the visited set of a search it did not end.
    /// Defaults to `request_timeout`.
    pub visited_ttl: Option<Duration>,
    pub forward_notices: bool,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            id_bits: 14,
            request_timeout: Duration::from_secs(5),
            visited_ttl: None,
            forward_notices: false,
        }
    }
}

impl ChordConfig {
    pub fn space(&self) -> Result<IdentifierSpace, NodeError> {
        Ok(IdentifierSpace::new(self.id_bits)?)
    }

    pub fn visited_ttl(&self) -> Duration {
        self.visited_ttl.unwrap_or(self.request_timeout)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.space()?;
        if self.request_timeout.is_zero() {
            return Err(NodeError::Config("request timeout must be non-zero".to_string()));
        }
        if self.visited_ttl().is_zero() {
            return Err(NodeError::Config("visited ttl must be non-zero".to_string()));
        }
        Ok(())
    }
}
