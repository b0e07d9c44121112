//! # Client Facade
//!
//! Boot sequencing, fleet membership, outbound publishing and event
//! emission. The client owns the bus connections, the state manager, the
//! worker pools, the pending-request registry and the address directory;
//! a single dispatch task consumes worker reports and state events and
//! fans them out.

use crate::bridge::SchemaRegistry;
use crate::emitter::{EventEmitter, EventSubscription};
use crate::errors::{ClientError, FailureReason};
use crate::formatters::FormatterRegistry;
use crate::registry::{ClosedRequest, PendingRequestRegistry, RequestHandle, RequestTimeouts};
use crate::supervisor::extract_alerted;
use crate::worker::{IngressWorker, WorkerOptions};
use edgelink_bus::{BusConnector, BusTransport, MqttConnector, TopicScheme};
use edgelink_crypto::{encrypt_for, sign_envelope, stable_json_string, EdgeIdentity};
use edgelink_state::{
    AddressDirectory, HeartbeatSnapshot, InProcessState, NodeTime, RedisState, SharedState,
    StateEvent, SupervisorSnapshot,
};
use edgelink_telemetry::MemoryUsageAggregator;
use edgelink_types::commands::{
    INSTANCE_COMMAND, INSTANCE_CONFIG, PAYLOAD_INSTANCE_ID, PAYLOAD_NAME, PAYLOAD_SIGNATURE,
    PIPELINE_COMMAND, STICKY_COMMAND_ID,
};
use edgelink_types::envelope::{
    ACTION, EE_ENCRYPTED_DATA, EE_ID, EE_IS_ENCRYPTED, EE_MESSAGE_ID, EE_MESSAGE_SEQ,
    EE_PAYLOAD_PATH, EE_TIMESTAMP, EE_TIMEZONE, EE_TOTAL_MESSAGES, INITIATOR_ID, PAYLOAD,
    SESSION_ID, TIME,
};
use edgelink_types::{
    Address, ClientEvent, CommandAction, EdgeClientConfig, FleetDelta, FleetSet,
    NotificationRecord, PayloadPath, ProcessedMessage, StateBackendKind, StreamKind, Target,
    WorkerCommand, WorkerId, WorkerReport, FLEET_WILDCARD,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Time allowed for all workers to acknowledge start.
const BOOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between fleet-registration resolution attempts.
const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Time allowed for a worker to drain on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports buffered between workers and the dispatch task.
const REPORT_CHANNEL_CAPACITY: usize = 1024;

struct WorkerHandle {
    id: WorkerId,
    commands: mpsc::Sender<WorkerCommand>,
}

struct ClientInner {
    config: EdgeClientConfig,
    initiator: String,
    identity: Arc<EdgeIdentity>,
    state: Arc<dyn SharedState>,
    directory: AddressDirectory,
    topics: TopicScheme,
    publisher: Arc<dyn BusTransport>,
    registry: Arc<PendingRequestRegistry>,
    emitter: EventEmitter,
    workers: Vec<WorkerHandle>,
    worker_joins: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    fleet: Mutex<FleetSet>,
    alerted: Mutex<BTreeSet<String>>,
    supervisor_status: Mutex<BTreeMap<String, Value>>,
    aggregator: Arc<MemoryUsageAggregator>,
    schemas: SchemaRegistry,
    started_workers: AtomicUsize,
    shutting_down: AtomicBool,
}

impl ClientInner {
    async fn send_to_workers(&self, stream: Option<StreamKind>, command: WorkerCommand) {
        for handle in &self.workers {
            if stream.map_or(true, |s| handle.id.stream == s) {
                let _ = handle.commands.send(command.clone()).await;
            }
        }
    }

    fn in_fleet(&self, node: &str) -> bool {
        let fleet = self.fleet.lock().unwrap_or_else(|e| e.into_inner());
        if fleet.is_wildcard() {
            return true;
        }
        if fleet.contains(node) {
            return true;
        }
        self.directory
            .get_address(node)
            .is_some_and(|address| fleet.contains(address.as_str()))
    }
}

/// Builds an [`EdgeClient`].
pub struct EdgeClientBuilder {
    config: EdgeClientConfig,
    connector: Option<Arc<dyn BusConnector>>,
    formatters: FormatterRegistry,
    schemas: SchemaRegistry,
    timeouts: RequestTimeouts,
    identity: Option<EdgeIdentity>,
}

impl EdgeClientBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: EdgeClientConfig) -> Self {
        Self {
            config,
            connector: None,
            formatters: FormatterRegistry::new(),
            schemas: SchemaRegistry::new(),
            timeouts: RequestTimeouts::default(),
            identity: None,
        }
    }

    /// Use a custom bus connector (tests use the in-memory bus).
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn BusConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Register a custom formatter.
    #[must_use]
    pub fn with_formatter(
        mut self,
        name: &str,
        formatter: Arc<dyn crate::formatters::Formatter>,
    ) -> Self {
        self.formatters.register(name, formatter);
        self
    }

    /// Override the request timers (tests shorten them).
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Use an already-loaded identity (PEM or secret-word flows).
    #[must_use]
    pub fn with_identity(mut self, identity: EdgeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Pre-register plugin schemas.
    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Boot the client: load the identity, create the state manager,
    /// spawn the worker pools, wait for their start acknowledgements and
    /// apply the configured initial fleet.
    pub async fn boot(self) -> Result<EdgeClient, ClientError> {
        let config = self.config;
        let initiator = config.effective_initiator();

        // Identity-load errors are fatal at boot.
        let identity = match self.identity {
            Some(identity) => identity,
            None => match &config.blockchain.key {
                Some(key) if key.trim_start().starts_with("-----BEGIN") => {
                    EdgeIdentity::from_pem(key)?
                }
                Some(key) => EdgeIdentity::from_der_hex(key)?,
                None => EdgeIdentity::generate(),
            },
        };
        let identity = Arc::new(identity);
        info!(initiator = %initiator, address = %identity.address(), "booting client");

        let state: Arc<dyn SharedState> = match config.state_manager {
            StateBackendKind::Internal => Arc::new(InProcessState::new()),
            StateBackendKind::External => Arc::new(
                RedisState::connect(&config.external, &config.broadcast_channel(&initiator))
                    .await?,
            ),
        };

        let topics = TopicScheme::new(
            config.topic_root.clone(),
            initiator.clone(),
            config.bus.prefix.clone(),
        );
        let connector: Arc<dyn BusConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(MqttConnector::new(config.bus.clone())),
        };

        let base_client_id = config
            .bus
            .client_id
            .clone()
            .unwrap_or_else(|| initiator.clone());
        let publisher = connector.connect(&format!("{base_client_id}_tx")).await?;

        let (registry, closed_rx) = PendingRequestRegistry::new(self.timeouts);
        let emitter = EventEmitter::new();
        let aggregator = Arc::new(MemoryUsageAggregator::new());
        let formatters = Arc::new(self.formatters);

        // Wildcard fleets filter nothing; everything else starts empty and
        // fills through registration below.
        let wildcard = config.fleet.iter().any(|f| f == FLEET_WILDCARD);
        let initial_fleet = if wildcard {
            FleetSet::all()
        } else {
            FleetSet::empty()
        };

        let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let mut workers = Vec::new();
        let mut worker_joins = Vec::new();
        let mut total_workers = 0;
        for stream in StreamKind::ALL {
            for index in 0..config.threads.for_stream(stream) {
                total_workers += 1;
                let id = WorkerId { stream, index };
                let client_id = format!("{base_client_id}_{}_{index}", stream.topic_suffix());
                let transport = connector.connect(&client_id).await?;
                let (cmd_tx, cmd_rx) = mpsc::channel(64);

                let worker = IngressWorker::new(
                    WorkerOptions {
                        id,
                        identity: identity.clone(),
                        secure: config.blockchain.secure,
                        fleet: initial_fleet.clone(),
                        formatters: formatters.clone(),
                        inbox_id: state.inbox_id().to_string(),
                    },
                    reports_tx.clone(),
                );
                let topic = topics.inbound(stream);
                worker_joins.push(tokio::spawn(worker.run(transport, topic, cmd_rx)));
                workers.push(WorkerHandle {
                    id,
                    commands: cmd_tx,
                });
            }
        }
        // Workers hold the only report senders; dispatch ends when the
        // last worker exits.
        drop(reports_tx);

        let inner = Arc::new(ClientInner {
            initiator,
            identity,
            directory: AddressDirectory::new(),
            topics,
            publisher,
            registry,
            emitter,
            workers,
            worker_joins: Mutex::new(worker_joins),
            background: Mutex::new(Vec::new()),
            fleet: Mutex::new(initial_fleet),
            alerted: Mutex::new(BTreeSet::new()),
            supervisor_status: Mutex::new(BTreeMap::new()),
            aggregator,
            schemas: self.schemas,
            started_workers: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            state,
            config,
        });

        let (boot_tx, boot_rx) = oneshot::channel();
        let state_events = inner.state.events();
        {
            let dispatch_inner = inner.clone();
            let handle = tokio::spawn(dispatch(
                dispatch_inner,
                reports_rx,
                state_events,
                closed_rx,
                boot_tx,
                total_workers,
            ));
            inner
                .background
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        tokio::time::timeout(BOOT_TIMEOUT, boot_rx)
            .await
            .map_err(|_| ClientError::BootFailed("workers did not start in time".to_string()))?
            .map_err(|_| ClientError::BootFailed("dispatch ended during boot".to_string()))?;

        let client = EdgeClient {
            inner: inner.clone(),
        };
        client.inner.emitter.emit(ClientEvent::ClientBooted {
            address: client.inner.identity.address(),
        });
        client.inner.emitter.emit(ClientEvent::BlockchainAddress {
            address: client.inner.identity.address(),
        });

        // Memory poll loop.
        {
            let poll_inner = inner.clone();
            let interval = Duration::from_secs(10);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    poll_inner
                        .send_to_workers(None, WorkerCommand::MemoryUsage)
                        .await;
                    poll_inner.aggregator.log_aggregate();
                }
            });
            inner
                .background
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        // Apply the configured initial fleet; unresolved names retry in
        // the background until the directory can resolve them.
        for entry in client.inner.config.fleet.clone() {
            if entry == FLEET_WILDCARD {
                continue;
            }
            let register_inner = inner.clone();
            let handle = tokio::spawn(async move {
                if let Err(error) = register_with_retry(&register_inner, &entry).await {
                    warn!(node = %entry, error = %error, "initial fleet registration failed");
                }
            });
            inner
                .background
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        Ok(client)
    }
}

/// The booted client handle. Cloning is cheap; all clones share one
/// engine.
#[derive(Clone)]
pub struct EdgeClient {
    inner: Arc<ClientInner>,
}

impl EdgeClient {
    /// The client's own network address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.inner.identity.address()
    }

    /// The client's initiator id.
    #[must_use]
    pub fn initiator(&self) -> &str {
        &self.inner.initiator
    }

    /// Subscribe to one event name (or plugin signature).
    #[must_use]
    pub fn subscribe(&self, event_name: &str) -> EventSubscription {
        self.inner.emitter.subscribe(event_name)
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.inner.emitter.events()
    }

    /// The schema registry of the domain-model bridge.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    /// Last heartbeat snapshot of a node.
    pub async fn get_node_info(
        &self,
        address: &Address,
    ) -> Result<Option<HeartbeatSnapshot>, ClientError> {
        Ok(self.inner.state.get_node_info(address).await?)
    }

    /// All addresses observed on the bus with their last-seen stamps.
    pub async fn get_universe(&self) -> Result<BTreeMap<String, u64>, ClientError> {
        Ok(self.inner.state.get_universe().await?)
    }

    /// Known supervisors.
    pub async fn get_network_supervisors(&self) -> Result<Vec<Address>, ClientError> {
        Ok(self.inner.state.get_network_supervisors().await?)
    }

    /// Last network view of a supervisor.
    pub async fn get_network_snapshot(
        &self,
        supervisor: &Address,
    ) -> Result<Option<SupervisorSnapshot>, ClientError> {
        Ok(self.inner.state.get_network_snapshot(supervisor).await?)
    }

    /// Resolve a node name or address through the directory.
    #[must_use]
    pub fn get_address(&self, node_or_address: &str) -> Option<Address> {
        self.inner.directory.get_address(node_or_address)
    }

    /// Last-known human name of an address.
    #[must_use]
    pub fn get_node_for_address(&self, address: &Address) -> Option<String> {
        self.inner.directory.get_node_for_address(address)
    }

    /// Add a node to the tracked fleet, retrying every 2 s until the
    /// directory can resolve it.
    pub async fn register_edge_node(&self, target: &str) -> Result<Address, ClientError> {
        register_with_retry(&self.inner, target).await
    }

    /// Remove a node from the tracked fleet, retrying every 2 s until the
    /// directory can resolve it.
    pub async fn deregister_edge_node(&self, target: &str) -> Result<Address, ClientError> {
        let inner = &self.inner;
        let address = resolve_with_retry(inner, target).await?;

        {
            let mut fleet = inner.fleet.lock().unwrap_or_else(|e| e.into_inner());
            fleet.remove(&address);
        }
        let delta = FleetDelta::remove(address.clone());
        inner
            .send_to_workers(None, WorkerCommand::UpdateFleet(delta.clone()))
            .await;
        inner.state.broadcast_update_fleet(delta).await?;
        inner.emitter.emit(ClientEvent::EngineDeregistered {
            address: address.clone(),
        });
        Ok(address)
    }

    /// Publish a command towards a node and open the pending request that
    /// tracks its notifications.
    pub async fn send_command(
        &self,
        target: &str,
        action: CommandAction,
        payload: Value,
    ) -> Result<RequestHandle, ClientError> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::Relaxed) {
            return Err(ClientError::ShuttingDown);
        }

        let receiver = inner
            .directory
            .get_address(target)
            .ok_or_else(|| ClientError::ReceiverNotFound(target.to_string()))?;

        let watches = compute_watches(&receiver, action, &payload);
        let sticky_id = extract_sticky_id(&payload);
        let handle = inner.registry.open(action, &watches);

        if let Some(sticky_id) = &sticky_id {
            inner
                .send_to_workers(
                    Some(StreamKind::Payloads),
                    WorkerCommand::WatchForStickySessionId {
                        sticky_id: sticky_id.clone(),
                        inbox_id: inner.state.inbox_id().to_string(),
                    },
                )
                .await;
            inner
                .state
                .broadcast_payload_sticky_session(sticky_id, inner.state.inbox_id())
                .await?;
        }

        if !watches.is_empty() {
            inner
                .send_to_workers(
                    Some(StreamKind::Notifications),
                    WorkerCommand::WatchForSessionId {
                        session_id: handle.id().to_string(),
                        inbox_id: inner.state.inbox_id().to_string(),
                        paths: watches.clone(),
                    },
                )
                .await;
            inner
                .state
                .broadcast_request_id(handle.id(), &watches, inner.state.inbox_id())
                .await?;
        }

        let now = chrono::Utc::now();
        let mut message = Map::new();
        message.insert(ACTION.to_string(), json!(action.as_str()));
        message.insert(PAYLOAD.to_string(), payload);
        message.insert(INITIATOR_ID.to_string(), json!(inner.initiator));
        message.insert(SESSION_ID.to_string(), json!(handle.id()));
        message.insert(EE_ID.to_string(), json!(Uuid::new_v4().to_string()));
        message.insert(
            EE_MESSAGE_ID.to_string(),
            json!(Uuid::new_v4().to_string()),
        );
        message.insert(EE_MESSAGE_SEQ.to_string(), json!(1));
        message.insert(EE_TOTAL_MESSAGES.to_string(), json!(1));
        message.insert(TIME.to_string(), json!(now.to_rfc3339()));
        message.insert(EE_TIMESTAMP.to_string(), json!(now.to_rfc3339()));
        message.insert(EE_TIMEZONE.to_string(), json!("UTC"));

        if inner.config.blockchain.encrypt {
            let secret = json!({
                ACTION: message.remove(ACTION).unwrap_or(Value::Null),
                PAYLOAD: message.remove(PAYLOAD).unwrap_or(Value::Null),
            });
            let blob = encrypt_for(
                &inner.identity,
                &receiver,
                stable_json_string(&secret).as_bytes(),
            )?;
            message.insert(EE_IS_ENCRYPTED.to_string(), json!(true));
            message.insert(EE_ENCRYPTED_DATA.to_string(), json!(blob));
        }
        // Commands address the node itself.
        message.insert(
            EE_PAYLOAD_PATH.to_string(),
            PayloadPath::node(receiver.as_str()).to_value(),
        );

        let signed = sign_envelope(&inner.identity, message);
        let frame = serde_json::to_vec(&Value::Object(signed))
            .map_err(|e| ClientError::BootFailed(e.to_string()))?;

        let topic = inner.topics.outbound(&receiver);
        if let Err(error) = inner.publisher.publish(&topic, frame).await {
            error!(topic = %topic, error = %error, "command publish failed");
            inner
                .registry
                .fail(handle.id(), FailureReason::PublishFailed);
            return Err(ClientError::Bus(error));
        }
        debug!(topic = %topic, action = %action, request_id = %handle.id(), "command published");

        Ok(handle)
    }

    /// Stop accepting publishes, fail outstanding requests, drain the
    /// workers and close the bus and cache handles.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(initiator = %inner.initiator, "client shutting down");

        inner.registry.fail_all(FailureReason::Shutdown);
        inner.send_to_workers(None, WorkerCommand::Shutdown).await;

        let joins: Vec<JoinHandle<()>> = {
            let mut guard = inner.worker_joins.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for join in joins {
            if tokio::time::timeout(DRAIN_TIMEOUT, join).await.is_err() {
                warn!("worker did not drain in time");
            }
        }

        let background: Vec<JoinHandle<()>> = {
            let mut guard = inner.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in background {
            task.abort();
        }

        inner.publisher.close().await;
        inner.state.close().await?;
        Ok(())
    }
}

async fn resolve_with_retry(
    inner: &Arc<ClientInner>,
    target: &str,
) -> Result<Address, ClientError> {
    let target = Target::parse(target)
        .map_err(|_| ClientError::ReceiverNotFound(target.to_string()))?;
    loop {
        if inner.shutting_down.load(Ordering::Relaxed) {
            return Err(ClientError::ShuttingDown);
        }
        if let Some(address) = inner.directory.resolve(&target) {
            return Ok(address);
        }
        debug!(node = %target, "target unresolved, retrying");
        tokio::time::sleep(REGISTER_RETRY_INTERVAL).await;
    }
}

async fn register_with_retry(
    inner: &Arc<ClientInner>,
    target: &str,
) -> Result<Address, ClientError> {
    let address = resolve_with_retry(inner, target).await?;

    {
        let mut fleet = inner.fleet.lock().unwrap_or_else(|e| e.into_inner());
        fleet.add(&address);
    }
    let delta = FleetDelta::add(address.clone());
    inner
        .send_to_workers(None, WorkerCommand::UpdateFleet(delta.clone()))
        .await;
    inner.state.broadcast_update_fleet(delta).await?;
    inner.emitter.emit(ClientEvent::EngineRegistered {
        address: address.clone(),
    });
    Ok(address)
}

/// The single consumer of worker reports, state events and request-close
/// notices.
async fn dispatch(
    inner: Arc<ClientInner>,
    mut reports: mpsc::Receiver<WorkerReport>,
    mut state_events: broadcast::Receiver<StateEvent>,
    mut closed: mpsc::UnboundedReceiver<ClosedRequest>,
    boot_tx: oneshot::Sender<()>,
    total_workers: usize,
) {
    let mut boot_tx = Some(boot_tx);
    let mut state_open = true;
    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => {
                    handle_report(&inner, report, &mut boot_tx, total_workers).await;
                }
                None => break,
            },
            event = state_events.recv(), if state_open => match event {
                Ok(event) => handle_state_event(&inner, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => state_open = false,
            },
            notice = closed.recv() => if let Some(notice) = notice {
                handle_closed_request(&inner, notice).await;
            },
        }
    }
    debug!("dispatch ended");
}

async fn handle_report(
    inner: &Arc<ClientInner>,
    report: WorkerReport,
    boot_tx: &mut Option<oneshot::Sender<()>>,
    total_workers: usize,
) {
    match report {
        WorkerReport::Started(id) => {
            inner.emitter.emit(ClientEvent::TopicSubscribed {
                topic: inner.topics.inbound(id.stream),
            });
            let started = inner.started_workers.fetch_add(1, Ordering::SeqCst) + 1;
            if started == total_workers {
                if let Some(tx) = boot_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
        WorkerReport::Stopped(id) => {
            debug!(worker = %id, "worker stopped");
        }
        WorkerReport::Observed {
            address,
            timestamp_ms,
            ..
        } => match inner.state.mark_as_seen(&address, timestamp_ms).await {
            Ok(true) => {}
            Ok(false) => warn!(address = %address, "universe write skipped (lock busy)"),
            Err(error) => warn!(address = %address, error = %error, "universe write failed"),
        },
        WorkerReport::Message { message, .. } => {
            handle_message(inner, *message).await;
        }
        WorkerReport::RequestResponse { inbox_id, record } => {
            if let Err(error) = inner
                .state
                .deliver_request_response(&inbox_id, record)
                .await
            {
                warn!(inbox = %inbox_id, error = %error, "request-response delivery failed");
            }
        }
        WorkerReport::StickyPayload { inbox_id, message } => {
            if let Err(error) = inner
                .state
                .deliver_sticky_payload(&inbox_id, *message)
                .await
            {
                warn!(inbox = %inbox_id, error = %error, "sticky delivery failed");
            }
        }
        WorkerReport::SupervisorStatus { supervisor, status } => {
            let mut statuses = inner
                .supervisor_status
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            statuses.insert(supervisor.as_str().to_string(), status);
        }
        WorkerReport::AddressesRefresh(book) => {
            inner.directory.replace(&book);
            let snapshot = inner.directory.snapshot();
            inner
                .send_to_workers(None, WorkerCommand::RefreshAddresses(snapshot.clone()))
                .await;
            if let Err(error) = inner.state.broadcast_update_addresses(snapshot).await {
                warn!(error = %error, "address broadcast failed");
            }
        }
        WorkerReport::NodesDown { supervisor, nodes } => {
            inner
                .emitter
                .emit(ClientEvent::NetworkNodeDown { supervisor, nodes });
        }
        WorkerReport::SupervisorPayload {
            supervisor,
            message,
        } => {
            handle_supervisor_payload(inner, supervisor, *message).await;
        }
        WorkerReport::Memory { worker, report } => {
            inner.aggregator.record(worker, report);
        }
        WorkerReport::Transport {
            connected, detail, ..
        } => {
            inner
                .emitter
                .emit(ClientEvent::ConnectionStatus { connected, detail });
        }
    }
}

async fn handle_message(inner: &Arc<ClientInner>, message: ProcessedMessage) {
    match message.stream {
        StreamKind::Heartbeats => {
            let data = &message.data;
            let snapshot = HeartbeatSnapshot {
                last_update_ms: unix_ms(),
                node_time: NodeTime {
                    date: data
                        .get("CURRENT_TIME")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    utc: data
                        .get("TIMEZONE")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
                data: data.clone(),
            };
            if let Err(error) = inner
                .state
                .node_info_update(&message.sender, snapshot)
                .await
            {
                warn!(address = %message.sender, error = %error, "heartbeat store failed");
            }

            let pipelines = message.context.metadata["PIPELINES"].clone();
            inner
                .send_to_workers(
                    None,
                    WorkerCommand::UpdateState {
                        address: message.sender.clone(),
                        state: pipelines,
                    },
                )
                .await;

            let node = inner.directory.get_node_for_address(&message.sender);
            let message = Box::new(message);
            inner.emitter.emit(ClientEvent::HeartbeatFromAddress {
                address: message.sender.clone(),
                message: message.clone(),
            });
            inner
                .emitter
                .emit(ClientEvent::HeartbeatFromEngine { node, message });
        }
        StreamKind::Notifications => {
            let record = NotificationRecord::from_body(message.path.clone(), &message.data);
            inner.emitter.emit(ClientEvent::Notification { record });
        }
        StreamKind::Payloads => {
            let signature = message
                .path
                .signature
                .clone()
                .unwrap_or_else(|| "PAYLOAD".to_string());
            inner.emitter.emit(ClientEvent::Payload {
                signature,
                message: Box::new(message),
            });
        }
    }
}

async fn handle_supervisor_payload(
    inner: &Arc<ClientInner>,
    supervisor: Address,
    message: ProcessedMessage,
) {
    let status = {
        let mut statuses = inner
            .supervisor_status
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        statuses
            .remove(supervisor.as_str())
            .unwrap_or(Value::Null)
    };

    let snapshot = SupervisorSnapshot {
        name: inner.directory.get_node_for_address(&supervisor),
        address: supervisor.clone(),
        status,
        timestamp: unix_ms(),
        payload: message.data.clone(),
    };
    match inner
        .state
        .update_network_snapshot(&supervisor, snapshot)
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(supervisor = %supervisor, "supervisor write skipped (lock busy)"),
        Err(error) => warn!(supervisor = %supervisor, error = %error, "supervisor store failed"),
    }

    reconcile_alerts(inner, &message);

    inner.emitter.emit(ClientEvent::SupervisorPayload {
        supervisor,
        message: Box::new(message),
    });
}

/// Compute online/offline edges from the supervisor's alert list.
fn reconcile_alerts(inner: &Arc<ClientInner>, message: &ProcessedMessage) {
    let Some(data) = message.data.as_object() else {
        return;
    };
    let now: BTreeMap<String, Option<String>> = extract_alerted(data)
        .into_iter()
        .map(|down| (down.node, down.last_seen))
        .collect();

    let mut alerted = inner.alerted.lock().unwrap_or_else(|e| e.into_inner());

    for (node, last_seen) in &now {
        if alerted.contains(node) || !inner.in_fleet(node) {
            continue;
        }
        inner.emitter.emit(ClientEvent::EngineOffline {
            node: node.clone(),
            address: inner.directory.get_address(node),
            last_seen: last_seen.clone(),
        });
    }
    let recovered: Vec<String> = alerted
        .iter()
        .filter(|node| !now.contains_key(*node))
        .cloned()
        .collect();
    for node in recovered {
        if inner.in_fleet(&node) {
            inner.emitter.emit(ClientEvent::EngineOnline {
                node: node.clone(),
                address: inner.directory.get_address(&node),
            });
        }
        alerted.remove(&node);
    }
    for node in now.keys() {
        alerted.insert(node.clone());
    }
}

async fn handle_state_event(inner: &Arc<ClientInner>, event: StateEvent) {
    match event {
        StateEvent::RequestResponseNotification { inbox_id, record } => {
            if inbox_id == inner.state.inbox_id() {
                inner.registry.handle_notification(&record);
            }
        }
        StateEvent::StickyPayloadReceived { inbox_id, message } => {
            if inbox_id == inner.state.inbox_id() {
                let signature = message
                    .path
                    .signature
                    .clone()
                    .unwrap_or_else(|| "PAYLOAD".to_string());
                inner
                    .emitter
                    .emit(ClientEvent::Payload { signature, message });
            }
        }
        // Peer broadcasts only exist on the distributed backend; the
        // in-process backend's echoes were already applied locally.
        StateEvent::FleetUpdate(delta) if inner.state.is_distributed() => {
            {
                let mut fleet = inner.fleet.lock().unwrap_or_else(|e| e.into_inner());
                fleet.apply(&delta);
            }
            inner
                .send_to_workers(None, WorkerCommand::UpdateFleet(delta))
                .await;
        }
        StateEvent::AddressUpdate(book) if inner.state.is_distributed() => {
            inner.directory.replace(&book);
            inner
                .send_to_workers(None, WorkerCommand::RefreshAddresses(book))
                .await;
        }
        StateEvent::RequestWatch {
            session_id,
            inbox_id,
            paths,
            watch,
        } if inner.state.is_distributed() => {
            let command = if watch {
                WorkerCommand::WatchForSessionId {
                    session_id,
                    inbox_id,
                    paths,
                }
            } else {
                WorkerCommand::IgnoreSessionId {
                    session_id,
                    inbox_id,
                    paths,
                }
            };
            inner
                .send_to_workers(Some(StreamKind::Notifications), command)
                .await;
        }
        StateEvent::StickySession {
            sticky_id,
            inbox_id,
        } if inner.state.is_distributed() => {
            inner
                .send_to_workers(
                    Some(StreamKind::Payloads),
                    WorkerCommand::WatchForStickySessionId {
                        sticky_id,
                        inbox_id,
                    },
                )
                .await;
        }
        _ => {}
    }
}

async fn handle_closed_request(inner: &Arc<ClientInner>, notice: ClosedRequest) {
    if notice.paths.is_empty() {
        return;
    }
    inner
        .send_to_workers(
            Some(StreamKind::Notifications),
            WorkerCommand::IgnoreSessionId {
                session_id: notice.id.clone(),
                inbox_id: inner.state.inbox_id().to_string(),
                paths: notice.paths.clone(),
            },
        )
        .await;
    if let Err(error) = inner
        .state
        .broadcast_ignore_request_id(&notice.id, &notice.paths, inner.state.inbox_id())
        .await
    {
        warn!(request_id = %notice.id, error = %error, "ignore broadcast failed");
    }
}

/// One watch per affected object, per command kind.
fn compute_watches(receiver: &Address, action: CommandAction, payload: &Value) -> Vec<PayloadPath> {
    let node = receiver.as_str();
    match action {
        CommandAction::UpdatePipelineInstance => instance_watch(node, payload).into_iter().collect(),
        CommandAction::BatchUpdatePipelineInstance => payload
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|element| instance_watch(node, element))
            .collect(),
        CommandAction::UpdateConfig
        | CommandAction::PipelineCommand
        | CommandAction::ArchiveConfig => payload
            .get(PAYLOAD_NAME)
            .and_then(Value::as_str)
            .map(|name| PayloadPath::pipeline(node, name))
            .into_iter()
            .collect(),
    }
}

fn instance_watch(node: &str, element: &Value) -> Option<PayloadPath> {
    let name = element.get(PAYLOAD_NAME).and_then(Value::as_str)?;
    let signature = element.get(PAYLOAD_SIGNATURE).and_then(Value::as_str)?;
    let instance = element.get(PAYLOAD_INSTANCE_ID).and_then(Value::as_str)?;
    Some(PayloadPath::instance(node, name, signature, instance))
}

/// Sticky id from `INSTANCE_CONFIG.INSTANCE_COMMAND.__COMMAND_ID` or
/// `PIPELINE_COMMAND.__COMMAND_ID`; batch payloads surface the first one
/// found.
fn extract_sticky_id(payload: &Value) -> Option<String> {
    let from_element = |element: &Value| -> Option<String> {
        element
            .get(INSTANCE_CONFIG)
            .and_then(|config| config.get(INSTANCE_COMMAND))
            .and_then(|command| command.get(STICKY_COMMAND_ID))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                element
                    .get(PIPELINE_COMMAND)
                    .and_then(|command| command.get(STICKY_COMMAND_ID))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    };

    match payload {
        Value::Array(elements) => elements.iter().find_map(from_element),
        other => from_element(other),
    }
}

fn unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
