use async_trait::async_trait;
use chord_lib::messages::ChordMessage;
use chord_node::{Transport, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// What happened to one message handed to the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Duplicated,
    Dropped,
    NodeFailed,
    Unregistered,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub to: String,
    pub message: ChordMessage,
    pub outcome: DeliveryOutcome,
}

/// Simulates network communication between nodes in the test environment
/// Routes Chord messages between node inboxes without actual TCP connections
#[derive(Clone)]
pub struct NetworkSimulator {
    /// Maps node addresses to inbox channels
    nodes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<ChordMessage>>>>,
    /// Controls message delivery timing and failures
    delivery_controller: Arc<RwLock<DeliveryController>>,
    /// Every send attempt, in order
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    rng: Arc<Mutex<StdRng>>,
}

#[derive(Default)]
struct DeliveryController {
    /// Addresses that silently swallow everything sent to them
    failed_nodes: HashSet<String>,
    /// Base latency in milliseconds
    latency_ms: u64,
    /// Extra random delay per message; any non-zero value reorders traffic
    jitter_ms: u64,
    /// Drop rate for messages (0.0 to 1.0)
    drop_rate: f64,
    /// Chance that a delivered message arrives twice (0.0 to 1.0)
    duplicate_rate: f64,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSimulator {
    pub fn new() -> Self {
        Self::with_seed(7)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            delivery_controller: Arc::new(RwLock::new(DeliveryController::default())),
            deliveries: Arc::new(Mutex::new(Vec::new())),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Register a node with the simulator and get its inbox
    pub async fn register_node(&self, address: &str) -> mpsc::UnboundedReceiver<ChordMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.write().await.insert(address.to_string(), tx);
        rx
    }

    /// Mark a node as failed (messages to it vanish)
    pub async fn mark_node_failed(&self, address: &str) {
        self.delivery_controller
            .write()
            .await
            .failed_nodes
            .insert(address.to_string());
    }

    /// Mark a node as recovered
    pub async fn mark_node_recovered(&self, address: &str) {
        self.delivery_controller
            .write()
            .await
            .failed_nodes
            .remove(address);
    }

    /// Set simulated network latency
    pub async fn set_latency(&self, latency_ms: u64) {
        self.delivery_controller.write().await.latency_ms = latency_ms;
    }

    /// Add up to `jitter_ms` of random delay per message so deliveries overtake each other
    pub async fn set_reorder(&self, jitter_ms: u64) {
        self.delivery_controller.write().await.jitter_ms = jitter_ms;
    }

    /// Set message drop rate (0.0 = no drops, 1.0 = drop all)
    pub async fn set_drop_rate(&self, drop_rate: f64) {
        self.delivery_controller.write().await.drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    pub async fn set_duplicate_rate(&self, duplicate_rate: f64) {
        self.delivery_controller.write().await.duplicate_rate = duplicate_rate.clamp(0.0, 1.0);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.outcome == outcome)
            .count()
    }

    fn record(&self, to: &str, message: &ChordMessage, outcome: DeliveryOutcome) {
        self.deliveries.lock().unwrap().push(Delivery {
            to: to.to_string(),
            message: message.clone(),
            outcome,
        });
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().unwrap().gen::<f64>() < rate
    }

    fn delay(&self, latency_ms: u64, jitter_ms: u64) -> Duration {
        let jitter = if jitter_ms > 0 {
            self.rng.lock().unwrap().gen_range(0..=jitter_ms)
        } else {
            0
        };
        Duration::from_millis(latency_ms + jitter)
    }
}

#[async_trait]
impl Transport for NetworkSimulator {
    async fn send(&self, address: &str, message: ChordMessage) -> Result<(), TransportError> {
        let (latency_ms, jitter_ms, drop_rate, duplicate_rate, failed) = {
            let controller = self.delivery_controller.read().await;
            (
                controller.latency_ms,
                controller.jitter_ms,
                controller.drop_rate,
                controller.duplicate_rate,
                controller.failed_nodes.contains(address),
            )
        };

        // A failed node goes silent; the sender cannot tell
        if failed {
            self.record(address, &message, DeliveryOutcome::NodeFailed);
            return Ok(());
        }
        if self.roll(drop_rate) {
            self.record(address, &message, DeliveryOutcome::Dropped);
            return Ok(());
        }

        let sender = match self.nodes.read().await.get(address) {
            Some(sender) => sender.clone(),
            None => {
                self.record(address, &message, DeliveryOutcome::Unregistered);
                return Err(TransportError::Unreachable(address.to_string()));
            }
        };

        let copies = if self.roll(duplicate_rate) { 2 } else { 1 };
        self.record(
            address,
            &message,
            if copies == 2 {
                DeliveryOutcome::Duplicated
            } else {
                DeliveryOutcome::Delivered
            },
        );

        for _ in 0..copies {
            let delay = self.delay(latency_ms, jitter_ms);
            let sender = sender.clone();
            let message = message.clone();
            if delay.is_zero() {
                let _ = sender.send(message);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(message);
                });
            }
        }
        Ok(())
    }
}
