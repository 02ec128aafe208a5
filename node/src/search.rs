// Per-node bookkeeping for in-flight searches
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chord_lib::messages::{ChordMessage, Operation, SearchFailure, SearchId, SearchKey};
use chord_lib::Identifier;
use tokio::time::Instant;

use crate::scheduler::TimerHandle;

/// An operation this node originated and is still waiting on.
#[derive(Debug)]
pub struct PendingRequest {
    pub operation: Operation,
    pub key: Identifier,
    pub started_at: Instant,
    pub timer: Option<TimerHandle>,
}

#[derive(Debug)]
struct VisitedSet {
    nodes: HashSet<Identifier>,
    /// `(previous hop, hop count)` of every copy this node accepted
    arrivals: HashSet<(Identifier, u32)>,
    touched: Instant,
}

/// How a request arriving at a node relates to what it already handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Fresh,
    /// Same previous hop and hop count as a copy already handled
    Duplicate,
    /// Reached this node again along a different path
    Revisit,
}

/// Outcome of one originated operation, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCompleted {
    pub search_id: SearchId,
    pub origin: Identifier,
    pub operation: Operation,
    pub key: Identifier,
    pub success: bool,
    pub hop_count: u32,
    /// Node that ended the search; `None` when it timed out.
    pub responder: Option<Identifier>,
    pub failure: Option<SearchFailure>,
    pub payload_size: u32,
    pub elapsed: Duration,
}

impl SearchCompleted {
    pub fn from_response(origin: Identifier, pending: &PendingRequest, response: &ChordMessage) -> Self {
        Self {
            search_id: response.search_id,
            origin,
            operation: pending.operation,
            key: pending.key,
            success: response.success,
            hop_count: response.hop_count,
            responder: Some(response.source_id),
            failure: response.failure,
            payload_size: response.payload_size,
            elapsed: pending.started_at.elapsed(),
        }
    }

    pub fn timed_out(origin: Identifier, search_id: SearchId, pending: &PendingRequest) -> Self {
        Self {
            search_id,
            origin,
            operation: pending.operation,
            key: pending.key,
            success: false,
            hop_count: 0,
            responder: None,
            failure: Some(SearchFailure::RequestTimedOut),
            payload_size: 0,
            elapsed: pending.started_at.elapsed(),
        }
    }
}

#[derive(Debug)]
pub struct SearchTable {
    pending: HashMap<SearchId, PendingRequest>,
    visited: HashMap<SearchKey, VisitedSet>,
    visited_ttl: Duration,
    sweep_armed: bool,
}

impl SearchTable {
    /// Visited sets untouched for `visited_ttl` are dropped on the next sweep.
    pub fn new(visited_ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            visited: HashMap::new(),
            visited_ttl,
            sweep_armed: false,
        }
    }

    pub fn insert_pending(&mut self, search_id: SearchId, operation: Operation, key: Identifier) {
        self.pending.insert(
            search_id,
            PendingRequest {
                operation,
                key,
                started_at: Instant::now(),
                timer: None,
            },
        );
    }

    /// Stores the timeout handle. If the search already completed the handle
    /// is handed back so the caller can cancel it.
    pub fn attach_timer(&mut self, search_id: SearchId, timer: TimerHandle) -> Option<TimerHandle> {
        match self.pending.get_mut(&search_id) {
            Some(pending) => {
                pending.timer = Some(timer);
                None
            }
            None => Some(timer),
        }
    }

    /// Removes the entry; only the first caller gets it.
    pub fn claim(&mut self, search_id: SearchId) -> Option<PendingRequest> {
        self.sweep(Instant::now());
        self.pending.remove(&search_id)
    }

    /// Claims the entry a response belongs to, leaving mismatched entries alone.
    pub fn claim_response(&mut self, response: &ChordMessage) -> Option<PendingRequest> {
        let matches = self.pending.get(&response.search_id).is_some_and(|pending| {
            pending.key == response.key
                && response.kind.operation() == Some(pending.operation)
        });
        if matches {
            self.pending.remove(&response.search_id)
        } else {
            None
        }
    }

    /// Records `node` (and the hop it came from) as having handled `search`.
    pub fn visit(
        &mut self,
        search: SearchKey,
        node: Identifier,
        previous_hop: Identifier,
        hop_count: u32,
        now: Instant,
    ) -> Visit {
        let ttl = self.visited_ttl;
        self.visited
            .retain(|key, set| *key == search || now.duration_since(set.touched) < ttl);

        let set = self.visited.entry(search).or_insert_with(|| VisitedSet {
            nodes: HashSet::new(),
            arrivals: HashSet::new(),
            touched: now,
        });
        set.touched = now;
        let arrival = (previous_hop, hop_count);
        if set.nodes.contains(&node) {
            if set.arrivals.contains(&arrival) {
                return Visit::Duplicate;
            }
            return Visit::Revisit;
        }
        set.nodes.insert(node);
        set.nodes.insert(previous_hop);
        set.arrivals.insert(arrival);
        Visit::Fresh
    }

    pub fn was_visited(&self, search: &SearchKey, node: Identifier) -> bool {
        self.visited
            .get(search)
            .is_some_and(|set| set.nodes.contains(&node))
    }

    pub fn clear_visited(&mut self, search: &SearchKey) {
        self.visited.remove(search);
        self.sweep(Instant::now());
    }

    /// Drops visited sets untouched for longer than the ttl.
    pub fn sweep(&mut self, now: Instant) {
        let ttl = self.visited_ttl;
        self.visited
            .retain(|_, set| now.duration_since(set.touched) < ttl);
    }

    /// Marks a sweep as scheduled. Returns false if one already was.
    pub fn arm_sweep(&mut self) -> bool {
        !std::mem::replace(&mut self.sweep_armed, true)
    }

    pub fn disarm_sweep(&mut self) {
        self.sweep_armed = false;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }
}
