use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Identifier;

/// Unique per origin; `(origin_id, search_id)` identifies an operation ring-wide.
pub type SearchId = u32;

/// Upper bound on the bincode size of any `ChordMessage`.
pub const MAX_ENCODED_LEN: usize = 38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    LookupRequest,
    LookupResponse,
    StoreRequest,
    StoreResponse,
    GetRequest,
    GetResponse,
    // Observability only, never affects routing
    ForwardNotice,
}

impl MessageKind {
    /// Numeric message type as logged by the simulation.
    pub fn code(&self) -> u8 {
        match self {
            MessageKind::LookupRequest => 1,
            MessageKind::LookupResponse => 2,
            MessageKind::StoreRequest => 3,
            MessageKind::StoreResponse => 4,
            MessageKind::GetRequest => 5,
            MessageKind::GetResponse => 6,
            MessageKind::ForwardNotice => 7,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::LookupRequest | MessageKind::StoreRequest | MessageKind::GetRequest
        )
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::LookupResponse | MessageKind::StoreResponse | MessageKind::GetResponse
        )
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            MessageKind::LookupRequest | MessageKind::LookupResponse => Some(Operation::Lookup),
            MessageKind::StoreRequest | MessageKind::StoreResponse => Some(Operation::Store),
            MessageKind::GetRequest | MessageKind::GetResponse => Some(Operation::Get),
            MessageKind::ForwardNotice => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Lookup,
    Store,
    Get,
}

impl Operation {
    pub fn request_kind(&self) -> MessageKind {
        match self {
            Operation::Lookup => MessageKind::LookupRequest,
            Operation::Store => MessageKind::StoreRequest,
            Operation::Get => MessageKind::GetRequest,
        }
    }

    pub fn response_kind(&self) -> MessageKind {
        match self {
            Operation::Lookup => MessageKind::LookupResponse,
            Operation::Store => MessageKind::StoreResponse,
            Operation::Get => MessageKind::GetResponse,
        }
    }
}

/// Why a search ended without finding its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum SearchFailure {
    #[error("routing loop detected")]
    RoutingLoopDetected,
    #[error("hop limit exceeded")]
    HopLimitExceeded,
    #[error("no forward progress possible")]
    NoForwardProgress,
    #[error("request timed out")]
    RequestTimedOut,
    #[error("key not found at the responsible node")]
    NotFound,
}

/// Identity of one routing pass for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub origin_id: Identifier,
    pub search_id: SearchId,
    pub key: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordMessage {
    pub kind: MessageKind,
    pub search_id: SearchId,
    /// Immediate sender. For responses, the node that ended the search.
    pub source_id: Identifier,
    pub origin_id: Identifier,
    /// Receiving node. For a forward notice, the hop the request went to.
    pub destination_id: Identifier,
    pub key: Identifier,
    pub hop_count: u32,
    pub payload_size: u32,
    pub success: bool,
    pub failure: Option<SearchFailure>,
}

impl ChordMessage {
    /// A fresh request as seen by its origin at hop zero.
    pub fn request(
        operation: Operation,
        search_id: SearchId,
        origin_id: Identifier,
        key: Identifier,
        payload_size: u32,
    ) -> Self {
        Self {
            kind: operation.request_kind(),
            search_id,
            source_id: origin_id,
            origin_id,
            destination_id: origin_id,
            key,
            hop_count: 0,
            payload_size,
            success: false,
            failure: None,
        }
    }

    /// The same request handed from `from` to `to`, one hop further.
    pub fn forwarded(&self, from: Identifier, to: Identifier) -> Self {
        Self {
            source_id: from,
            destination_id: to,
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Response for this request, addressed straight back to the origin.
    pub fn response(&self, responder: Identifier, outcome: Result<u32, SearchFailure>) -> Self {
        let (success, payload_size, failure) = match outcome {
            Ok(size) => (true, size, None),
            Err(reason) => (false, 0, Some(reason)),
        };
        Self {
            kind: self
                .kind
                .operation()
                .map(|op| op.response_kind())
                .unwrap_or(self.kind),
            search_id: self.search_id,
            source_id: responder,
            origin_id: self.origin_id,
            destination_id: self.origin_id,
            key: self.key,
            hop_count: self.hop_count,
            payload_size,
            success,
            failure,
        }
    }

    /// Tells the previous hop that `from` passed this request on to `next_hop`.
    pub fn forward_notice(&self, from: Identifier, next_hop: Identifier) -> Self {
        Self {
            kind: MessageKind::ForwardNotice,
            search_id: self.search_id,
            source_id: from,
            origin_id: self.origin_id,
            destination_id: next_hop,
            key: self.key,
            hop_count: self.hop_count,
            payload_size: 0,
            success: true,
            failure: None,
        }
    }

    pub fn search_key(&self) -> SearchKey {
        SearchKey {
            origin_id: self.origin_id,
            search_id: self.search_id,
            key: self.key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_ENCODED_LEN {
            return Err(CodecError::Oversized(bytes.len()));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("message of {0} bytes exceeds the wire limit")]
    Oversized(usize),
}
