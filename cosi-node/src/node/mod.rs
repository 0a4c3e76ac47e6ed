//! Protocol engine of a node.
//!
//! Every inbound event, messages of the peers as well as timers and requests of the API, goes
//! through one queue consumed by a single dispatch loop ([Node::run]). Only this loop mutates
//! the rounds, so the state of a round is never shared between concurrent handlers.

mod connections;
mod protocol;
mod view_change;

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use cosi_crypto::{CollectiveSignature, ExceptionEntry, HashId, KeyPair, Suite};
use slog::{Logger, crit, debug, info, o, warn};
use tokio::{
    sync::{Mutex, RwLock, broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Instant, timeout_at},
};

use crate::{
    NodeError, PeerId, RoundCheckpoint, RoundError, RoundNumber, StdError, StdResult, ViewNumber,
    callbacks::{NoCallbacks, RoundCallbacks},
    configuration::NodeConfiguration,
    error::as_node_error,
    failure::{FailureInjector, FailurePolicy, NoFailure},
    heartbeat::Heartbeat,
    logging::node_logger,
    messages::{AnnouncementMessage, MessageType, SigningMessage, StatusReturnMessage},
    round::{COSI_ROUND, RoundRegistry, RoundTable},
    topology::{View, Views},
    transport::{Connection, Transport},
    vote::{Vote, VoteKind, VoteLog},
};

/// Request to start a round, see [Node::start_announcement].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementRequest {
    /// Tag of the round variant
    pub round_type: String,
    /// Message to sign
    pub message: Vec<u8>,
    /// Round deadline, the configured `max_wait` if `None`
    pub timeout: Option<Duration>,
}

impl AnnouncementRequest {
    /// AnnouncementRequest factory
    pub fn new(round_type: &str, message: &[u8]) -> Self {
        Self {
            round_type: round_type.to_string(),
            message: message.to_vec(),
            timeout: None,
        }
    }

    /// Set the round deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a round, as seen by the root.
#[derive(Debug, Clone)]
pub struct RoundSummary<S: Suite> {
    /// View of the round
    pub view: ViewNumber,
    /// Round number
    pub round: RoundNumber,
    /// Signed message, including the digest of the vote if any
    pub message: Vec<u8>,
    /// Global merkle root, empty for rounds without merkle tree
    pub merkle_root: HashId,
    /// Collective signature
    pub signature: CollectiveSignature<S>,
    /// Number of signers
    pub signers: u64,
    /// Participants left out of the signature
    pub exceptions: Vec<ExceptionEntry<S>>,
    /// Nodes that acknowledged the signature
    pub status: StatusReturnMessage,
    /// Tallied proposal decided by the round
    pub vote: Option<Vote>,
}

/// Published each time a node installs a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChangeNotification {
    /// Installed view
    pub view: ViewNumber,
    /// Root of the installed view
    pub root: Option<PeerId>,
    /// True if this node is the root of the installed view
    pub is_root: bool,
}

/// Progress of a round started by this node.
enum RoundEvent<S: Suite> {
    Committed,
    Completed(Box<RoundSummary<S>>),
    Failed(StdError),
}

/// Events consumed by the dispatch loop.
enum Inbound<S: Suite> {
    Message {
        from: PeerId,
        message: SigningMessage<S>,
    },
    Start {
        view: ViewNumber,
        round: RoundNumber,
        announcement: AnnouncementMessage,
    },
    ConnectionClosed {
        peer: PeerId,
        connection: Arc<dyn Connection<S>>,
    },
    ChildTimeout {
        round: RoundNumber,
        phase: MessageType,
    },
    RoundExpired {
        round: RoundNumber,
    },
    Cancel {
        round: RoundNumber,
    },
    HeartbeatExpired,
}

struct NodeInner<S: Suite> {
    id: PeerId,
    suite: S,
    key_pair: KeyPair<S>,
    peer_keys: BTreeMap<PeerId, S::Point>,
    configuration: NodeConfiguration,
    views: RwLock<Views>,
    changing_view: Mutex<Option<ViewNumber>>,
    pending_view_change: Mutex<Option<ViewNumber>>,
    transport: Arc<dyn Transport<S>>,
    connections: Mutex<BTreeMap<PeerId, Arc<dyn Connection<S>>>>,
    inbound_tx: mpsc::UnboundedSender<Inbound<S>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound<S>>>>,
    rounds: Mutex<RoundTable<S>>,
    waiters: Mutex<BTreeMap<RoundNumber, mpsc::UnboundedSender<RoundEvent<S>>>>,
    registry: RoundRegistry<S>,
    callbacks: Arc<dyn RoundCallbacks<S>>,
    failure: Arc<dyn FailurePolicy>,
    heartbeat: Arc<Heartbeat>,
    last_seen_round: AtomicU64,
    vote_log: Mutex<VoteLog>,
    announce_lock: Mutex<()>,
    closed: watch::Sender<bool>,
    view_changes: broadcast::Sender<ViewChangeNotification>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    logger: Logger,
}

/// Builder of a [Node].
pub struct NodeBuilder<S: Suite> {
    id: PeerId,
    suite: S,
    key_pair: KeyPair<S>,
    transport: Arc<dyn Transport<S>>,
    view: Option<View>,
    host_list: Option<Vec<PeerId>>,
    peer_keys: BTreeMap<PeerId, S::Point>,
    configuration: NodeConfiguration,
    callbacks: Arc<dyn RoundCallbacks<S>>,
    failure: Option<Arc<dyn FailurePolicy>>,
    registry: RoundRegistry<S>,
    logger: Logger,
}

impl<S: Suite> NodeBuilder<S> {
    /// Builder of the node `id`, reachable through `transport`.
    pub fn new(
        id: &str,
        suite: S,
        key_pair: KeyPair<S>,
        transport: Arc<dyn Transport<S>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            suite,
            key_pair,
            transport,
            view: None,
            host_list: None,
            peer_keys: BTreeMap::new(),
            configuration: NodeConfiguration::default(),
            callbacks: Arc::new(NoCallbacks),
            failure: None,
            registry: RoundRegistry::with_defaults(),
            logger: Logger::root(slog::Discard, o!()),
        }
    }

    /// Start in an explicit tree.
    pub fn with_view(mut self, view: View) -> Self {
        self.view = Some(view);
        self
    }

    /// Start in view 0 derived from `host_list`.
    pub fn with_host_list(mut self, host_list: Vec<PeerId>) -> Self {
        self.host_list = Some(host_list);
        self
    }

    /// Public keys of the other hosts, used to record absent children as exceptions.
    pub fn with_peer_keys(mut self, peer_keys: BTreeMap<PeerId, S::Point>) -> Self {
        self.peer_keys = peer_keys;
        self
    }

    /// Node configuration
    pub fn with_configuration(mut self, configuration: NodeConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Application hooks
    pub fn with_callbacks(mut self, callbacks: Arc<dyn RoundCallbacks<S>>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Failure policy, replacing the one built from the configuration
    pub fn with_failure_policy(mut self, failure: Arc<dyn FailurePolicy>) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Round variants
    pub fn with_registry(mut self, registry: RoundRegistry<S>) -> Self {
        self.registry = registry;
        self
    }

    /// Parent logger
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Build the node, it does nothing until [Node::run] or [Node::start] is called.
    pub fn build(self) -> StdResult<Node<S>> {
        let branching = self.configuration.branching_factor;
        let view = match (self.view, &self.host_list) {
            (Some(view), _) => view,
            (None, Some(host_list)) => View::derive(0, host_list, &self.id, branching).ok_or(
                NodeError::NotInHostList {
                    node: self.id.clone(),
                    view: 0,
                },
            )?,
            (None, None) => {
                return Err(anyhow!(
                    "Node '{}' needs an initial view or a host list",
                    self.id
                ));
            }
        };
        let failure = self.failure.unwrap_or_else(|| {
            if self.configuration.failure.is_disabled() {
                Arc::new(NoFailure)
            } else {
                Arc::new(FailureInjector::new(
                    &self.id,
                    self.configuration.failure.clone(),
                ))
            }
        });
        let logger = node_logger(&self.logger, &self.id);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (view_changes, _) = broadcast::channel(16);

        Ok(Node {
            inner: Arc::new(NodeInner {
                views: RwLock::new(Views::new(self.id.clone(), view, branching)),
                heartbeat: Arc::new(Heartbeat::new(self.configuration.heartbeat_timeout())),
                id: self.id,
                suite: self.suite,
                key_pair: self.key_pair,
                peer_keys: self.peer_keys,
                configuration: self.configuration,
                changing_view: Mutex::new(None),
                pending_view_change: Mutex::new(None),
                transport: self.transport,
                connections: Mutex::new(BTreeMap::new()),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                rounds: Mutex::new(RoundTable::new()),
                waiters: Mutex::new(BTreeMap::new()),
                registry: self.registry,
                callbacks: self.callbacks,
                failure,
                last_seen_round: AtomicU64::new(0),
                vote_log: Mutex::new(VoteLog::new()),
                announce_lock: Mutex::new(()),
                closed: watch::Sender::new(false),
                view_changes,
                tasks: StdMutex::new(vec![]),
                logger,
            }),
        })
    }
}

/// Participant of the collective signing tree.
pub struct Node<S: Suite> {
    inner: Arc<NodeInner<S>>,
}

impl<S: Suite> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Suite> Node<S> {
    /// Identity of the node
    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    /// Run [Node::run] in a new task.
    pub fn start(&self) -> JoinHandle<StdResult<()>> {
        let node = self.clone();

        tokio::spawn(async move { node.run().await })
    }

    /// Serve the node until it is closed or a fatal error occurs.
    pub async fn run(&self) -> StdResult<()> {
        let inner = &self.inner;
        let mut inbound = inner
            .inbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("Node '{}' is already running", inner.id))?;
        let mut closed = inner.closed.subscribe();
        let view = inner.current_view().await;
        info!(inner.logger, "Node starting"; "view" => view);

        inner.spawn_acceptor();
        inner.spawn_heartbeat();
        let has_parent = {
            let views = inner.views.read().await;
            views.parent(views.current_number()).is_some()
        };
        if has_parent {
            inner.heartbeat.arm();
        }

        let result = loop {
            let event = tokio::select! {
                event = inbound.recv() => event,
                _ = closed.wait_for(|closed| *closed) => None,
            };
            let Some(event) = event else {
                break Ok(());
            };

            if let Err(error) = inner.handle_event(event).await {
                if as_node_error(&error).is_some_and(NodeError::is_fatal) {
                    crit!(inner.logger, "Fatal error, stopping the node"; "error" => ?error);
                    break Err(error);
                }
                warn!(inner.logger, "Event handling failed"; "error" => ?error);
            }
        };

        inner.shutdown().await;
        info!(inner.logger, "Node stopped");

        result
    }

    /// Start a round as root of the current view.
    ///
    /// Returns once every node acknowledged the signature or defaulted, or when the deadline
    /// expires. On expiry the round is cancelled on this node.
    pub async fn start_announcement(
        &self,
        request: AnnouncementRequest,
    ) -> Result<RoundSummary<S>, RoundError> {
        let inner = &self.inner;
        let _announcing = inner.announce_lock.lock().await;
        if inner.is_closed() {
            return Err(RoundError::Closed(inner.last_seen_round()));
        }

        let view = inner.current_view().await;
        if !inner.views.read().await.is_root(view) {
            return Err(RoundError::Rejected(anyhow!(NodeError::NotRoot {
                node: inner.id.clone(),
                view,
            })));
        }
        if !inner.registry.contains(&request.round_type) {
            return Err(RoundError::Rejected(anyhow!(
                NodeError::UnknownRoundType(request.round_type)
            )));
        }

        let round = inner.last_seen_round.fetch_add(1, Ordering::SeqCst) + 1;
        let vote = inner.view_change_proposal(view, round).await;
        let mut message = request.message;
        if let Some(vote) = &vote {
            message.extend(vote.digest().map_err(RoundError::Rejected)?);
        }
        let announcement = AnnouncementMessage {
            round_type: request.round_type,
            message,
            timestamp: chrono::Utc::now().timestamp(),
            vote,
        };

        let (events_tx, mut events) = mpsc::unbounded_channel();
        inner.waiters.lock().await.insert(round, events_tx);
        inner
            .inbound_tx
            .send(Inbound::Start {
                view,
                round,
                announcement,
            })
            .map_err(|_| RoundError::Closed(round))?;

        let deadline = Instant::now() + request.timeout.unwrap_or(inner.configuration.max_wait());
        let mut checkpoint = RoundCheckpoint::Commitment;
        loop {
            match timeout_at(deadline, events.recv()).await {
                Err(_) => {
                    warn!(inner.logger, "Round timed out"; "round" => round, "checkpoint" => %checkpoint);
                    inner.cancel_round(round).await;
                    return Err(RoundError::Timeout { round, checkpoint });
                }
                Ok(None) => return Err(RoundError::Closed(round)),
                Ok(Some(RoundEvent::Committed)) => {
                    debug!(inner.logger, "Commitment checkpoint reached"; "round" => round);
                    checkpoint = RoundCheckpoint::Completion;
                }
                Ok(Some(RoundEvent::Completed(summary))) => return Ok(*summary),
                Ok(Some(RoundEvent::Failed(error))) => {
                    return match as_node_error(&error) {
                        Some(NodeError::Cancelled(_)) => Err(RoundError::Cancelled(round)),
                        Some(NodeError::Closed) => Err(RoundError::Closed(round)),
                        _ => Err(RoundError::Failed { round, error }),
                    };
                }
            }
        }
    }

    /// Start a `cosi` round signing `message` with the configured deadline.
    pub async fn start_signing_round(
        &self,
        message: &[u8],
    ) -> Result<RoundSummary<S>, RoundError> {
        self.start_announcement(AnnouncementRequest::new(COSI_ROUND, message))
            .await
    }

    /// Move to `view` without waiting for a round, see [NodeError::AlreadyChangingView] and
    /// [NodeError::StaleViewChange] for the rejected attempts.
    pub async fn try_view_change(&self, view: ViewNumber) -> Result<(), NodeError> {
        self.inner.try_view_change(view).await
    }

    /// Propose a vote to the tree.
    ///
    /// A view change is attached to the next round started by this node. A shutdown closes
    /// the whole tree. Membership changes are not supported.
    pub async fn propose_vote(&self, kind: VoteKind) -> Result<(), NodeError> {
        match kind {
            VoteKind::ViewChange { view, .. } => {
                let current = self.inner.current_view().await;
                if view <= current {
                    return Err(NodeError::StaleViewChange {
                        requested: view,
                        current,
                    });
                }
                *self.inner.pending_view_change.lock().await = Some(view);
                Ok(())
            }
            VoteKind::Shutdown => {
                self.inner.close_all().await;
                Ok(())
            }
            kind @ (VoteKind::AddNode { .. } | VoteKind::RemoveNode { .. }) => {
                Err(NodeError::UnsupportedVote(kind.to_string()))
            }
        }
    }

    /// Current view number
    pub async fn current_view(&self) -> ViewNumber {
        self.inner.current_view().await
    }

    /// View `number`, if still known
    pub async fn view(&self, number: ViewNumber) -> Option<Arc<View>> {
        self.inner.views.read().await.get(number)
    }

    /// True if this node is the root of the current view
    pub async fn is_root(&self) -> bool {
        let views = self.inner.views.read().await;
        views.is_root(views.current_number())
    }

    /// Number of rounds in flight on this node
    pub async fn round_table_size(&self) -> usize {
        self.inner.rounds.lock().await.len()
    }

    /// Highest round number seen by this node
    pub fn last_seen_round(&self) -> RoundNumber {
        self.inner.last_seen_round()
    }

    /// Index of the last vote applied by this node
    pub async fn last_vote_index(&self) -> u64 {
        self.inner.vote_log.lock().await.last_index()
    }

    /// Notifications of the views installed from now on
    pub fn subscribe_view_changes(&self) -> broadcast::Receiver<ViewChangeNotification> {
        self.inner.view_changes.subscribe()
    }

    /// True once the node is closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close this node only.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Close the subtree of this node, the whole tree when called on the root.
    pub async fn close_all(&self) {
        self.inner.close_all().await;
    }
}

impl<S: Suite> NodeInner<S> {
    async fn current_view(&self) -> ViewNumber {
        self.views.read().await.current_number()
    }

    fn last_seen_round(&self) -> RoundNumber {
        self.last_seen_round.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn spawn_heartbeat(&self) {
        let heartbeat = self.heartbeat.clone();
        let inbound = self.inbound_tx.clone();

        self.track(tokio::spawn(async move {
            heartbeat
                .run(move || {
                    let _ = inbound.send(Inbound::HeartbeatExpired);
                })
                .await;
        }));
    }

    async fn handle_event(self: &Arc<Self>, event: Inbound<S>) -> StdResult<()> {
        match event {
            Inbound::Message { from, message } => self.handle_message(from, message).await,
            Inbound::Start {
                view,
                round,
                announcement,
            } => {
                let result = self.start_round(view, round, announcement).await;
                self.settle(round, result).await
            }
            Inbound::ConnectionClosed { peer, connection } => {
                self.handle_connection_closed(peer, connection).await;
                Ok(())
            }
            Inbound::ChildTimeout { round, phase } => {
                let result = self.handle_child_timeout(round, phase).await;
                self.settle(round, result).await
            }
            Inbound::RoundExpired { round } => {
                if self.rounds.lock().await.remove(round).is_some() {
                    warn!(self.logger, "Round expired before completion"; "round" => round);
                }
                Ok(())
            }
            Inbound::Cancel { round } => {
                if self.rounds.lock().await.remove(round).is_some() {
                    info!(self.logger, "Round cancelled"; "round" => round);
                }
                Ok(())
            }
            Inbound::HeartbeatExpired => self.handle_heartbeat_expiry().await,
        }
    }

    /// Outcome of the handling of a round event: a fatal error stops the node, any other error
    /// aborts the round.
    async fn settle(&self, round: RoundNumber, result: StdResult<()>) -> StdResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(error) if as_node_error(&error).is_some_and(NodeError::is_fatal) => Err(error),
            Err(error) => {
                self.abort_round(round, error).await;
                Ok(())
            }
        }
    }

    async fn abort_round(&self, round: RoundNumber, error: StdError) {
        self.rounds.lock().await.remove(round);
        match self.waiters.lock().await.remove(&round) {
            Some(waiter) => {
                let _ = waiter.send(RoundEvent::Failed(error));
            }
            None => warn!(self.logger, "Round aborted"; "round" => round, "error" => ?error),
        }
    }

    async fn notify_waiter(&self, round: RoundNumber, event: RoundEvent<S>) {
        let mut waiters = self.waiters.lock().await;
        let sent = match &event {
            RoundEvent::Committed => waiters.get(&round).map(|waiter| waiter.send(event)),
            _ => waiters.remove(&round).map(|waiter| waiter.send(event)),
        };
        if sent.is_none() {
            debug!(self.logger, "No caller waits for this round"; "round" => round);
        }
    }

    async fn cancel_round(&self, round: RoundNumber) {
        self.waiters.lock().await.remove(&round);
        if let Some(entry) = self.rounds.lock().await.get(round) {
            entry.scope.cancel();
        }
        let _ = self.inbound_tx.send(Inbound::Cancel { round });
    }

    async fn view_change_proposal(&self, view: ViewNumber, round: RoundNumber) -> Option<Vote> {
        let pending = self.pending_view_change.lock().await.take();
        let target = pending.or_else(|| {
            self.configuration
                .time_for_view_change(round)
                .then_some(view + 1)
        })?;
        let root = self.views.read().await.root_for(target)?;
        let index = self.vote_log.lock().await.last_index() + 1;
        info!(self.logger, "Proposing a view change"; "round" => round, "view" => target, "root" => &root);

        Some(Vote::view_change(index, target, root))
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        info!(self.logger, "Closing the node");
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        self.closed.send_replace(true);
        self.heartbeat.stop();

        let connections = std::mem::take(&mut *self.connections.lock().await);
        for connection in connections.values() {
            connection.close().await;
        }
        self.transport.close().await;
        self.rounds.lock().await.clear();
        self.waiters.lock().await.clear();

        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }
}
