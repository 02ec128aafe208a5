use chord_lib::messages::{ChordMessage, MessageKind, Operation, SearchFailure, SearchId, SearchKey};
use chord_lib::ring::{NodeRecord, Ring};
use chord_lib::{Identifier, IdentifierSpace};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::directory::Directory;
use crate::error::NodeError;
use crate::scheduler::Scheduler;
use crate::search::{SearchCompleted, SearchTable, Visit};
use crate::transport::Transport;
use crate::ChordConfig;

macro_rules! log_info {
    ($id:expr, $($arg:tt)*) => ({
        info!("[{}] {}", $id, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($id:expr, $($arg:tt)*) => ({
        warn!("[{}] {}", $id, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($id:expr, $($arg:tt)*) => ({
        error!("[{}] {}", $id, format_args!($($arg)*));
    })
}

macro_rules! log_debug {
    ($id:expr, $($arg:tt)*) => ({
        debug!("[{}] {}", $id, format_args!($($arg)*));
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredItem {
    pub key: Identifier,
    pub size_bytes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub items_stored: u64,
    pub bytes_stored: u64,
}

pub struct ChordNode<T: Transport, S: Scheduler> {
    pub record: NodeRecord,
    space: IdentifierSpace,
    directory: Arc<dyn Directory>,
    config: ChordConfig,
    transport: Arc<T>,
    scheduler: Arc<S>,
    store: Arc<Mutex<HashMap<Identifier, StoredItem>>>,
    searches: Arc<Mutex<SearchTable>>,
    stats: Arc<Mutex<NodeStats>>,
    next_search_id: Arc<AtomicU32>,
    completions: Arc<Mutex<Option<UnboundedSender<SearchCompleted>>>>,
}

impl<T: Transport, S: Scheduler> Clone for ChordNode<T, S> {
    fn clone(&self) -> Self {
        ChordNode {
            record: self.record.clone(),
            space: self.space,
            directory: self.directory.clone(),
            config: self.config.clone(),
            transport: self.transport.clone(),
            scheduler: self.scheduler.clone(),
            store: self.store.clone(), // This clones the Arc, not the HashMap
            searches: self.searches.clone(),
            stats: self.stats.clone(),
            next_search_id: self.next_search_id.clone(),
            completions: self.completions.clone(),
        }
    }
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport, S: Scheduler> ChordNode<T, S> {
    pub fn new(
        record: NodeRecord,
        directory: Arc<dyn Directory>,
        config: ChordConfig,
        transport: Arc<T>,
        scheduler: Arc<S>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let space = config.space()?;
        if record.fingers.len() != space.bits() as usize {
            return Err(NodeError::Config(format!(
                "node {} has {} fingers, expected {}",
                record.id,
                record.fingers.len(),
                space.bits()
            )));
        }

        let searches = SearchTable::new(config.visited_ttl());
        Ok(ChordNode {
            record,
            space,
            directory,
            config,
            transport,
            scheduler,
            store: Arc::new(Mutex::new(HashMap::new())),
            searches: Arc::new(Mutex::new(searches)),
            stats: Arc::new(Mutex::new(NodeStats::default())),
            next_search_id: Arc::new(AtomicU32::new(1)),
            completions: Arc::new(Mutex::new(None)),
        })
    }

    /// Builds the node for `id` from a shared ring, which also serves as its directory.
    pub fn from_ring(
        ring: &Arc<Ring>,
        id: Identifier,
        config: ChordConfig,
        transport: Arc<T>,
        scheduler: Arc<S>,
    ) -> Result<Self, NodeError> {
        if ring.space().bits() != config.id_bits {
            return Err(NodeError::Config(format!(
                "ring uses {} bits but the node is configured for {}",
                ring.space().bits(),
                config.id_bits
            )));
        }
        let record = ring.record(id).cloned().ok_or(NodeError::InvalidTarget(id))?;
        let directory: Arc<dyn Directory> = ring.clone();
        Self::new(record, directory, config, transport, scheduler)
    }

    pub fn id(&self) -> Identifier {
        self.record.id
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// Returns a fresh completion stream, replacing any earlier subscriber.
    pub fn subscribe(&self) -> UnboundedReceiver<SearchCompleted> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_completion_sender(tx);
        rx
    }

    /// Lets several nodes report into one shared completion channel.
    pub fn set_completion_sender(&self, sender: UnboundedSender<SearchCompleted>) {
        *lock(&self.completions) = Some(sender);
    }

    pub async fn lookup(&self, key: Identifier) -> SearchId {
        self.originate(Operation::Lookup, key, 0).await
    }

    pub async fn get(&self, key: Identifier) -> SearchId {
        self.originate(Operation::Get, key, 0).await
    }

    pub async fn store(&self, key: Identifier, size_bytes: u32) -> SearchId {
        self.originate(Operation::Store, key, size_bytes).await
    }

    /// Places an item in the local store, overwriting the size of an existing one.
    pub fn add_item(&self, key: Identifier, size_bytes: u32) {
        let key = self.space.wrap(u64::from(key));
        lock(&self.store).insert(key, StoredItem { key, size_bytes });
    }

    pub fn has_item(&self, key: Identifier) -> bool {
        lock(&self.store).contains_key(&key)
    }

    pub fn stored_keys(&self) -> Vec<Identifier> {
        let mut keys: Vec<Identifier> = lock(&self.store).keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn stats(&self) -> NodeStats {
        let mut stats = *lock(&self.stats);
        let store = lock(&self.store);
        stats.items_stored = store.len() as u64;
        stats.bytes_stored = store.values().map(|item| u64::from(item.size_bytes)).sum();
        stats
    }

    pub fn pending_searches(&self) -> usize {
        lock(&self.searches).pending_len()
    }

    pub fn visited_sets(&self) -> usize {
        lock(&self.searches).visited_len()
    }

    async fn originate(&self, operation: Operation, key: Identifier, payload_size: u32) -> SearchId {
        let key = self.space.wrap(u64::from(key));
        let search_id = self.next_search_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.searches).insert_pending(search_id, operation, key);

        let node = self.clone();
        let timer = self.scheduler.after(
            self.config.request_timeout,
            Box::pin(async move { node.expire(search_id) }),
        );
        if let Some(timer) = lock(&self.searches).attach_timer(search_id, timer) {
            timer.cancel();
        }

        log_info!(
            self.record.id,
            "Starting {:?} #{} for key {}",
            operation,
            search_id,
            key
        );
        let request = ChordMessage::request(operation, search_id, self.record.id, key, payload_size);
        self.handle_request(request).await;
        search_id
    }

    fn expire(&self, search_id: SearchId) {
        let claimed = {
            let mut searches = lock(&self.searches);
            let claimed = searches.claim(search_id);
            if let Some(pending) = &claimed {
                searches.clear_visited(&SearchKey {
                    origin_id: self.record.id,
                    search_id,
                    key: pending.key,
                });
            }
            claimed
        };

        match claimed {
            Some(pending) => {
                log_warn!(
                    self.record.id,
                    "{:?} #{} for key {} timed out",
                    pending.operation,
                    search_id,
                    pending.key
                );
                self.complete(SearchCompleted::timed_out(self.record.id, search_id, &pending));
            }
            None => log_debug!(self.record.id, "Timer for #{} fired after completion", search_id),
        }
    }

    fn complete(&self, done: SearchCompleted) {
        log_info!(
            self.record.id,
            "{:?} #{} for key {} finished: success={} hops={} failure={:?}",
            done.operation,
            done.search_id,
            done.key,
            done.success,
            done.hop_count,
            done.failure
        );
        if let Some(sender) = lock(&self.completions).as_ref() {
            if sender.send(done).is_err() {
                log_debug!(self.record.id, "Completion receiver dropped");
            }
        }
    }

    /// Entry point for every message the transport hands to this node.
    pub async fn handle_message(&self, message: ChordMessage) {
        // A forward notice names the next hop, not its receiver
        if message.kind != MessageKind::ForwardNotice && message.destination_id != self.record.id {
            log_warn!(
                self.record.id,
                "Dropping {:?} addressed to node {}",
                message.kind,
                message.destination_id
            );
            return;
        }
        lock(&self.stats).messages_received += 1;
        log_debug!(
            self.record.id,
            "Received {:?} (type {}) from {} for key {}",
            message.kind,
            message.kind.code(),
            message.source_id,
            message.key
        );

        match message.kind {
            MessageKind::LookupRequest | MessageKind::StoreRequest | MessageKind::GetRequest => {
                self.handle_request(message).await
            }
            MessageKind::LookupResponse | MessageKind::StoreResponse | MessageKind::GetResponse => {
                self.handle_response(message)
            }
            MessageKind::ForwardNotice => log_debug!(
                self.record.id,
                "Node {} forwarded #{} from {} to {}",
                message.source_id,
                message.search_id,
                message.origin_id,
                message.destination_id
            ),
        }
    }

    async fn handle_request(&self, request: ChordMessage) {
        let id = self.record.id;
        let ring_len = self.directory.len();
        let search = request.search_key();
        let Some(operation) = request.kind.operation() else {
            return;
        };

        if request.hop_count as usize >= ring_len {
            log_warn!(
                id,
                "#{} from {} for key {} hit the hop limit ({} hops)",
                request.search_id,
                request.origin_id,
                request.key,
                request.hop_count
            );
            return self.finish(&request, Err(SearchFailure::HopLimitExceeded)).await;
        }

        let visit = lock(&self.searches).visit(
            search,
            id,
            request.source_id,
            request.hop_count,
            Instant::now(),
        );
        match visit {
            Visit::Fresh => {}
            Visit::Duplicate => {
                log_debug!(
                    id,
                    "Ignoring duplicate copy of #{} from {} (hop {})",
                    request.search_id,
                    request.source_id,
                    request.hop_count
                );
                return;
            }
            Visit::Revisit => {
                log_warn!(id, "#{} from {} revisited this node", request.search_id, request.origin_id);
                return self.finish(&request, Err(SearchFailure::RoutingLoopDetected)).await;
            }
        }

        if operation != Operation::Store {
            let hit = lock(&self.store).get(&request.key).copied();
            if let Some(item) = hit {
                log_debug!(id, "Key {} found locally", request.key);
                return self.finish(&request, Ok(item.size_bytes)).await;
            }
        }

        if self.record.is_responsible(ring_len, request.key) {
            let outcome = match operation {
                Operation::Store => {
                    self.add_item(request.key, request.payload_size);
                    log_info!(id, "Stored key {} ({} bytes)", request.key, request.payload_size);
                    Ok(request.payload_size)
                }
                Operation::Lookup | Operation::Get => Err(SearchFailure::NotFound),
            };
            return self.finish(&request, outcome).await;
        }

        let next = self.record.next_hop(request.key);
        if next == id {
            log_warn!(id, "No finger makes progress toward key {}", request.key);
            return self.finish(&request, Err(SearchFailure::NoForwardProgress)).await;
        }
        let revisit = lock(&self.searches).was_visited(&search, next);
        if revisit {
            log_warn!(
                id,
                "Next hop {} for #{} was already visited",
                next,
                request.search_id
            );
            return self.finish(&request, Err(SearchFailure::RoutingLoopDetected)).await;
        }

        log_debug!(
            id,
            "Forwarding {:?} #{} for key {} to {} (hop {}, {} left)",
            request.kind,
            request.search_id,
            request.key,
            next,
            request.hop_count + 1,
            self.space.distance(next, request.key)
        );
        if self.config.forward_notices && request.source_id != id {
            let notice = request.forward_notice(id, next);
            self.send_to(request.source_id, notice).await;
        }
        if request.origin_id != id {
            self.arm_sweep();
        }
        self.send_to(next, request.forwarded(id, next)).await;
    }

    // Forwarders never hear how a search ended, so their visited sets expire on a timer.
    fn arm_sweep(&self) {
        if !lock(&self.searches).arm_sweep() {
            return;
        }
        let node = self.clone();
        let _timer = self.scheduler.after(
            self.config.visited_ttl(),
            Box::pin(async move { node.sweep_visited() }),
        );
    }

    fn sweep_visited(&self) {
        let remaining = {
            let mut searches = lock(&self.searches);
            searches.disarm_sweep();
            searches.sweep(Instant::now());
            searches.visited_len()
        };
        if remaining > 0 {
            self.arm_sweep();
        }
    }

    // The search ends here; answer the origin.
    async fn finish(&self, request: &ChordMessage, outcome: Result<u32, SearchFailure>) {
        lock(&self.searches).clear_visited(&request.search_key());
        let response = request.response(self.record.id, outcome);
        if response.destination_id == self.record.id {
            self.handle_response(response);
        } else {
            self.send_to(response.destination_id, response).await;
        }
    }

    fn handle_response(&self, response: ChordMessage) {
        let claimed = {
            let mut searches = lock(&self.searches);
            searches.clear_visited(&response.search_key());
            searches.claim_response(&response)
        };

        match claimed {
            Some(mut pending) => {
                if let Some(timer) = pending.timer.take() {
                    timer.cancel();
                }
                self.complete(SearchCompleted::from_response(self.record.id, &pending, &response));
            }
            None => log_debug!(
                self.record.id,
                "Discarding stale {:?} #{} for key {} from {}",
                response.kind,
                response.search_id,
                response.key,
                response.source_id
            ),
        }
    }

    async fn send_to(&self, target: Identifier, message: ChordMessage) {
        let Some(address) = self.directory.address_of(target) else {
            log_error!(
                self.record.id,
                "{}; dropping {:?} #{}",
                NodeError::InvalidTarget(target),
                message.kind,
                message.search_id
            );
            return;
        };

        lock(&self.stats).messages_sent += 1;
        let kind = message.kind;
        if let Err(e) = self.transport.send(&address, message).await {
            log_warn!(
                self.record.id,
                "Failed to send {:?} to node {} at {}: {}",
                kind,
                target,
                address,
                e
            );
        }
    }

    /// Drains `inbox` one message at a time until every sender is gone.
    pub async fn run_inbox(self, mut inbox: UnboundedReceiver<ChordMessage>) {
        while let Some(message) = inbox.recv().await {
            self.handle_message(message).await;
        }
        log_debug!(self.record.id, "Inbox closed");
    }
}
