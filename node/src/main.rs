use chord_lib::ring::Ring;
use chord_lib::Identifier;
use chord_node::ids::{assign_ids, sha1_identity_hash};
use chord_node::{ChordConfig, ChordNode, LocalTransport, NodeError, SearchCompleted, TokioScheduler};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const FILE_SIZE: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimConfig {
    nodes: usize,
    files: usize,
    lookups: usize,
    bits: u32,
    seed: u64,
    timeout: Duration,
}

impl SimConfig {
    fn from_env() -> Self {
        Self {
            nodes: env_or("CHORD_NODES", 50),
            files: env_or("CHORD_FILES", 100),
            lookups: env_or("CHORD_LOOKUPS", 20),
            bits: env_or("CHORD_BITS", 14),
            seed: env_or("CHORD_SEED", 9),
            timeout: Duration::from_millis(env_or("CHORD_TIMEOUT_MS", 5000)),
        }
    }
}

fn env_or<V: FromStr>(name: &str, default: V) -> V {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

async fn collect(rx: &mut UnboundedReceiver<SearchCompleted>, expected: usize) -> Vec<SearchCompleted> {
    let mut results = Vec::with_capacity(expected);
    while results.len() < expected {
        match rx.recv().await {
            Some(done) => results.push(done),
            None => break,
        }
    }
    results
}

async fn run(sim: SimConfig) -> Result<(), NodeError> {
    let config = ChordConfig {
        id_bits: sim.bits,
        request_timeout: sim.timeout,
        ..ChordConfig::default()
    };
    config.validate()?;
    let space = config.space()?;

    let identities: Vec<String> = (0..sim.nodes)
        .map(|i| format!("10.0.{}.{}_{}", i / 256, i % 256, i))
        .collect();
    let ids = assign_ids(space, &identities, sha1_identity_hash)?;
    let ring = Arc::new(Ring::build(
        space,
        ids.iter().copied().zip(identities.iter().cloned()),
    )?);
    info!("Built a ring of {} nodes in a {}-bit space", ring.len(), space.bits());
    debug!("{}", ring.describe());

    let transport = Arc::new(LocalTransport::new());
    let scheduler = Arc::new(TokioScheduler);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut nodes = Vec::with_capacity(ring.len());
    for record in ring.records() {
        let node = ChordNode::from_ring(
            &ring,
            record.id,
            config.clone(),
            transport.clone(),
            scheduler.clone(),
        )?;
        node.set_completion_sender(done_tx.clone());
        let inbox = transport.register(&record.address);
        tokio::spawn(node.clone().run_inbox(inbox));
        nodes.push(node);
    }

    let mut rng = StdRng::seed_from_u64(sim.seed);
    let files = sim.files.min(usize::try_from(space.size()).unwrap_or(usize::MAX));
    let mut seen = HashSet::with_capacity(files);
    let mut file_ids: Vec<Identifier> = Vec::with_capacity(files);
    while file_ids.len() < files {
        let key = space.wrap(rng.gen_range(0..space.size()));
        if seen.insert(key) {
            file_ids.push(key);
        }
    }

    for key in &file_ids {
        if let Some(node) = nodes.choose(&mut rng) {
            node.store(*key, FILE_SIZE).await;
        }
    }
    let stored = collect(&mut done_rx, file_ids.len()).await;
    info!(
        "Stored {}/{} files",
        stored.iter().filter(|done| done.success).count(),
        file_ids.len()
    );

    let Some(reader) = nodes.choose(&mut rng) else {
        return Ok(());
    };
    let targets: Vec<Identifier> = file_ids
        .choose_multiple(&mut rng, sim.lookups)
        .copied()
        .collect();
    for key in &targets {
        reader.get(*key).await;
    }

    let results = collect(&mut done_rx, targets.len()).await;
    for done in &results {
        info!(
            "File {}: found={} hops={} responder={:?} failure={:?} elapsed={:?}",
            done.key, done.success, done.hop_count, done.responder, done.failure, done.elapsed
        );
    }
    let found = results.iter().filter(|done| done.success).count();
    info!("Found {}/{} files from node {}", found, targets.len(), reader.id());
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sim = SimConfig::from_env();
    info!("Starting simulation with {:?}", sim);
    if let Err(e) = run(sim).await {
        error!("Simulation failed: {}", e);
        std::process::exit(1);
    }
}
