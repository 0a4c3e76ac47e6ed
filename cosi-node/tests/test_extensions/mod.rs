#![allow(dead_code)]
//! In-process tree of nodes used by the round scenarios.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use blake2::{Blake2b, Digest, digest::consts::U32};
use cosi_crypto::{HashId, KeyPair, Ristretto255, Suite};
use cosi_node::{
    Node, NodeBuilder, NodeConfiguration, PeerId, RoundCallbacks, RoundCompletion, RoundNumber,
    StdResult, ViewNumber, messages::AnnouncementMessage, transport::ChannelNetwork,
};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use slog::Drain;
use tokio::task::JoinHandle;

pub fn logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(Arc::new(drain), slog::o!())
}

/// Client value submitted by `node` in `round`.
pub fn client_value(node: &str, round: RoundNumber) -> HashId {
    Blake2b::<U32>::digest(format!("{node}/{round}")).to_vec()
}

/// Callbacks submitting one client value per round and recording the completed rounds.
pub struct RecordingCallbacks {
    node: PeerId,
    completions: Mutex<Vec<RoundCompletion<Ristretto255>>>,
}

impl RecordingCallbacks {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            completions: Mutex::new(vec![]),
        }
    }

    pub fn completions(&self) -> Vec<RoundCompletion<Ristretto255>> {
        self.completions.lock().unwrap().clone()
    }
}

impl RoundCallbacks<Ristretto255> for RecordingCallbacks {
    fn announcement(
        &self,
        _view: ViewNumber,
        round: RoundNumber,
        _announcement: &AnnouncementMessage,
    ) -> Vec<HashId> {
        vec![client_value(&self.node, round)]
    }

    fn round_completed(&self, completion: RoundCompletion<Ristretto255>) {
        self.completions.lock().unwrap().push(completion);
    }
}

pub struct TreeTester {
    pub network: ChannelNetwork<Ristretto255>,
    pub hosts: Vec<PeerId>,
    pub key_pairs: Vec<KeyPair<Ristretto255>>,
    pub nodes: Vec<Node<Ristretto255>>,
    pub callbacks: Vec<Arc<RecordingCallbacks>>,
    handles: Vec<JoinHandle<StdResult<()>>>,
}

impl TreeTester {
    /// Tree of `size` hosts, `node-0` is the root of view 0.
    pub fn build<F>(size: usize, configuration: F) -> Self
    where
        F: Fn(usize) -> NodeConfiguration,
    {
        let mut rng = ChaCha20Rng::from_seed([42u8; 32]);
        let network = ChannelNetwork::new();
        let hosts: Vec<PeerId> = (0..size).map(|i| format!("node-{i}")).collect();
        let key_pairs: Vec<KeyPair<Ristretto255>> = hosts
            .iter()
            .map(|_| KeyPair::generate(&Ristretto255, &mut rng))
            .collect();
        let peer_keys: BTreeMap<PeerId, _> = hosts
            .iter()
            .cloned()
            .zip(key_pairs.iter().map(|key_pair| *key_pair.public_key()))
            .collect();
        let logger = logger();

        let mut nodes = vec![];
        let mut callbacks = vec![];
        for (index, host) in hosts.iter().enumerate() {
            let recorder = Arc::new(RecordingCallbacks::new(host));
            let node = NodeBuilder::new(
                host,
                Ristretto255,
                key_pairs[index].clone(),
                Arc::new(network.endpoint(host)),
            )
            .with_host_list(hosts.clone())
            .with_peer_keys(peer_keys.clone())
            .with_configuration(configuration(index))
            .with_callbacks(recorder.clone())
            .with_logger(logger.clone())
            .build()
            .unwrap();
            nodes.push(node);
            callbacks.push(recorder);
        }

        Self {
            network,
            hosts,
            key_pairs,
            nodes,
            callbacks,
            handles: vec![],
        }
    }

    /// Tree of `size` hosts sharing the sample configuration.
    pub fn healthy(size: usize) -> Self {
        Self::build(size, |_| NodeConfiguration::new_sample())
    }

    pub fn start(mut self) -> Self {
        self.handles = self.nodes.iter().map(|node| node.start()).collect();
        self
    }

    /// Public keys of every host, the roster a signature of the tree is checked against.
    pub fn roster(&self) -> BTreeMap<PeerId, <Ristretto255 as Suite>::Point> {
        self.hosts
            .iter()
            .cloned()
            .zip(self.key_pairs.iter().map(|key_pair| *key_pair.public_key()))
            .collect()
    }

    pub fn node(&self, index: usize) -> &Node<Ristretto255> {
        &self.nodes[index]
    }

    /// Node that is root of its current view, if any.
    pub async fn current_root(&self) -> Option<&Node<Ristretto255>> {
        for node in &self.nodes {
            if node.is_root().await {
                return Some(node);
            }
        }

        None
    }

    pub async fn round_table_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![];
        for node in &self.nodes {
            sizes.push(node.round_table_size().await);
        }

        sizes
    }

    /// Wait for the serving loop of every node to stop and return their outcomes.
    pub async fn stopped(&mut self, timeout: Duration) -> Vec<StdResult<()>> {
        let mut outcomes = vec![];
        for handle in self.handles.drain(..) {
            let outcome = tokio::time::timeout(timeout, handle)
                .await
                .expect("node should stop in time")
                .expect("node task should not panic");
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Wait for the serving loop of node `index` to stop.
    pub async fn node_stopped(&mut self, index: usize, timeout: Duration) -> StdResult<()> {
        let handle = self.handles.remove(index);

        tokio::time::timeout(timeout, handle)
            .await
            .expect("node should stop in time")
            .expect("node task should not panic")
    }
}
