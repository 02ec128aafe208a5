use crate::integration::{ManualScheduler, NetworkSimulator};
use chord_lib::messages::{Operation, SearchId};
use chord_lib::ring::{NodeRecord, Ring};
use chord_lib::{Identifier, IdentifierSpace};
use chord_node::{ChordConfig, ChordNode, Directory, SearchCompleted};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type SimNode = ChordNode<NetworkSimulator, ManualScheduler>;

const COMPLETION_WAIT: Duration = Duration::from_secs(5);

/// Main test harness that orchestrates multi-node Chord ring tests
pub struct TestHarness {
    /// Simulated network for message routing
    network: Arc<NetworkSimulator>,
    /// Timeouts only fire on request
    scheduler: Arc<ManualScheduler>,
    ring: Arc<Ring>,
    config: ChordConfig,
    /// Records used to build nodes; may be edited before `start`
    records: BTreeMap<Identifier, NodeRecord>,
    nodes: BTreeMap<Identifier, SimNode>,
    /// Background tasks draining node inboxes
    tasks: Vec<JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<SearchCompleted>,
    completion_rx: mpsc::UnboundedReceiver<SearchCompleted>,
    /// Completions received but not yet claimed by a waiter
    unclaimed: Vec<SearchCompleted>,
    /// Every completion ever received
    history: Vec<SearchCompleted>,
}

pub fn sim_address(id: Identifier) -> String {
    format!("sim-node-{}", id)
}

impl TestHarness {
    /// Build a ring from explicit ids in an m-bit space
    pub fn new(bits: u32, ids: &[Identifier]) -> Result<Self, Box<dyn Error>> {
        let config = ChordConfig {
            id_bits: bits,
            ..ChordConfig::default()
        };
        Self::with_config(ids, config, NetworkSimulator::new())
    }

    pub fn with_config(
        ids: &[Identifier],
        config: ChordConfig,
        network: NetworkSimulator,
    ) -> Result<Self, Box<dyn Error>> {
        let space = IdentifierSpace::new(config.id_bits)?;
        let ring = Arc::new(Ring::build(
            space,
            ids.iter().map(|id| (*id, sim_address(*id))),
        )?);
        let records = ring
            .records()
            .iter()
            .map(|record| (record.id, record.clone()))
            .collect();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            network: Arc::new(network),
            scheduler: Arc::new(ManualScheduler::new()),
            ring,
            config,
            records,
            nodes: BTreeMap::new(),
            tasks: Vec::new(),
            completion_tx,
            completion_rx,
            unclaimed: Vec::new(),
            history: Vec::new(),
        })
    }

    /// Replace a node's finger table before the ring starts
    pub fn override_fingers(
        &mut self,
        id: Identifier,
        fingers: Vec<Identifier>,
    ) -> Result<(), Box<dyn Error>> {
        if !self.nodes.is_empty() {
            return Err("fingers can only be overridden before start".into());
        }
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| format!("node {} is not on the ring", id))?;
        record.fingers = fingers;
        Ok(())
    }

    /// Create every node and start processing messages
    pub async fn start(&mut self) -> Result<(), Box<dyn Error>> {
        for (id, record) in &self.records {
            let directory: Arc<dyn Directory> = self.ring.clone();
            let node = ChordNode::new(
                record.clone(),
                directory,
                self.config.clone(),
                self.network.clone(),
                self.scheduler.clone(),
            )?;
            node.set_completion_sender(self.completion_tx.clone());

            let inbox = self.network.register_node(&record.address).await;
            self.tasks.push(tokio::spawn(node.clone().run_inbox(inbox)));
            self.nodes.insert(*id, node);
        }
        Ok(())
    }

    pub fn node(&self, id: Identifier) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.ring.ids()
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn network(&self) -> &NetworkSimulator {
        &self.network
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    /// Originate an operation without waiting for it to finish
    pub async fn begin(
        &self,
        operation: Operation,
        from: Identifier,
        key: Identifier,
    ) -> Result<SearchId, Box<dyn Error>> {
        let node = self
            .node(from)
            .ok_or_else(|| format!("node {} is not running", from))?;
        Ok(match operation {
            Operation::Lookup => node.lookup(key).await,
            Operation::Get => node.get(key).await,
            Operation::Store => node.store(key, 1024).await,
        })
    }

    pub async fn lookup(
        &mut self,
        from: Identifier,
        key: Identifier,
    ) -> Result<SearchCompleted, Box<dyn Error>> {
        let search_id = self.begin(Operation::Lookup, from, key).await?;
        self.wait_for(from, search_id).await
    }

    pub async fn get(
        &mut self,
        from: Identifier,
        key: Identifier,
    ) -> Result<SearchCompleted, Box<dyn Error>> {
        let search_id = self.begin(Operation::Get, from, key).await?;
        self.wait_for(from, search_id).await
    }

    pub async fn store(
        &mut self,
        from: Identifier,
        key: Identifier,
    ) -> Result<SearchCompleted, Box<dyn Error>> {
        let search_id = self.begin(Operation::Store, from, key).await?;
        self.wait_for(from, search_id).await
    }

    /// Wait for the completion of one search, keeping others for later waiters
    pub async fn wait_for(
        &mut self,
        origin: Identifier,
        search_id: SearchId,
    ) -> Result<SearchCompleted, Box<dyn Error>> {
        let matches = |done: &SearchCompleted| done.origin == origin && done.search_id == search_id;
        if let Some(index) = self.unclaimed.iter().position(matches) {
            return Ok(self.unclaimed.remove(index));
        }

        loop {
            let done = tokio::time::timeout(COMPLETION_WAIT, self.completion_rx.recv())
                .await
                .map_err(|_| format!("search #{} from node {} never completed", search_id, origin))?
                .ok_or("completion channel closed")?;
            self.history.push(done.clone());
            if matches(&done) {
                return Ok(done);
            }
            self.unclaimed.push(done);
        }
    }

    /// How many completions were reported for one search so far
    pub fn completion_count(&mut self, origin: Identifier, search_id: SearchId) -> usize {
        while let Ok(done) = self.completion_rx.try_recv() {
            self.history.push(done.clone());
            self.unclaimed.push(done);
        }
        self.history
            .iter()
            .filter(|done| done.origin == origin && done.search_id == search_id)
            .count()
    }

    /// Fire every outstanding request timeout
    pub async fn fire_timeouts(&self) -> usize {
        self.scheduler.fire_all().await
    }

    /// Give delayed deliveries time to land
    pub async fn settle(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
