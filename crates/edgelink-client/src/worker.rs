//! # Ingress Worker
//!
//! One worker task per pool slot. A worker owns a bus subscription and a
//! command channel and processes frames serially through the decode
//! pipeline:
//!
//! 1. frame → UTF-8 → JSON object
//! 2. signature verification (drop on failure when `secure`)
//! 3. decryption of `EE_ENCRYPTED_DATA` (drop on auth failure)
//! 4. universe observation (any verified sender counts)
//! 5. `EE_PAYLOAD_PATH` required
//! 6. supervisor side-effects (payload workers, before the fleet filter)
//! 7. fleet filter
//! 8. formatter dispatch (`EE_FORMATTER`, default `raw`)
//! 9. per-kind decoding and context assembly
//! 10. routing to reports (events, request responses, sticky payloads)
//!
//! Workers never mutate client state and never let an error escape the
//! task; malformed traffic is counted and dropped.

use crate::formatters::FormatterRegistry;
use crate::heartbeat::{decode_heartbeat, PLUGINS};
use crate::supervisor::{
    extract_address_book, extract_alerted, extract_status, is_supervisor_path,
};
use edgelink_bus::{BusSubscription, BusTransport};
use edgelink_crypto::{decrypt_from, verify_envelope, EdgeIdentity};
use edgelink_types::commands::{COMMAND_PARAMS, STICKY_COMMAND_ID};
use edgelink_types::envelope::{
    DATA, EE_ENCRYPTED_DATA, EE_FORMATTER, EE_IS_ENCRYPTED, EE_PAYLOAD_PATH, EE_SENDER,
};
use edgelink_types::{
    Address, AddressBook, FleetSet, MemoryReport, MessageContext, NotificationRecord,
    PayloadPath, ProcessedMessage, StreamKind, WorkerCommand, WorkerId, WorkerReport,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Prefix of payload keys lifted into `PLUGIN_META`.
const PLUGIN_META_PREFIX: &str = "_P_";
/// Prefix of payload keys lifted into `PIPELINE_META`.
const PIPELINE_META_PREFIX: &str = "_C_";

/// Startup options of one worker.
pub struct WorkerOptions {
    /// Pool identity.
    pub id: WorkerId,
    /// Signing identity, for verification and decryption.
    pub identity: Arc<EdgeIdentity>,
    /// Drop frames that fail verification.
    pub secure: bool,
    /// Initial fleet filter.
    pub fleet: FleetSet,
    /// Formatter registry (built before worker start).
    pub formatters: Arc<FormatterRegistry>,
    /// This process's inbox id; locally matched notifications route here.
    pub inbox_id: String,
}

struct WatchEntry {
    session_id: String,
    inbox_id: String,
}

/// A single ingress worker.
pub struct IngressWorker {
    id: WorkerId,
    identity: Arc<EdgeIdentity>,
    secure: bool,
    fleet: FleetSet,
    formatters: Arc<FormatterRegistry>,
    reports: mpsc::Sender<WorkerReport>,
    directory: AddressBook,
    state: HashMap<String, Value>,
    watch_paths: HashMap<String, Vec<WatchEntry>>,
    session_watch: HashMap<String, String>,
    sticky: HashMap<String, String>,
    counters: MemoryReport,
    inbox_id: String,
}

impl IngressWorker {
    /// Build a worker from its startup options.
    #[must_use]
    pub fn new(options: WorkerOptions, reports: mpsc::Sender<WorkerReport>) -> Self {
        Self {
            id: options.id,
            identity: options.identity,
            secure: options.secure,
            fleet: options.fleet,
            formatters: options.formatters,
            reports,
            directory: AddressBook::default(),
            state: HashMap::new(),
            watch_paths: HashMap::new(),
            session_watch: HashMap::new(),
            sticky: HashMap::new(),
            counters: MemoryReport::default(),
            inbox_id: options.inbox_id,
        }
    }

    /// Subscribe and run until shutdown. Consumes the worker.
    pub async fn run(
        mut self,
        transport: Arc<dyn BusTransport>,
        topic: String,
        mut commands: mpsc::Receiver<WorkerCommand>,
    ) {
        let mut subscription: BusSubscription = match transport.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(error) => {
                warn!(worker = %self.id, error = %error, "subscription failed, worker exits");
                let _ = self
                    .reports
                    .send(WorkerReport::Transport {
                        worker: self.id,
                        connected: false,
                        detail: error.to_string(),
                    })
                    .await;
                let _ = self.reports.send(WorkerReport::Stopped(self.id)).await;
                return;
            }
        };

        let mut status = transport.status();
        let mut status_open = true;
        let _ = self.reports.send(WorkerReport::Started(self.id)).await;
        debug!(worker = %self.id, topic = %topic, "worker running");

        loop {
            tokio::select! {
                frame = subscription.recv() => match frame {
                    Some(frame) => self.handle_frame(frame.payload).await,
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(WorkerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                change = status.recv(), if status_open => match change {
                    Ok(change) => {
                        let _ = self.reports.send(WorkerReport::Transport {
                            worker: self.id,
                            connected: change.connected,
                            detail: change.detail,
                        }).await;
                    }
                    Err(_) => status_open = false,
                },
            }
        }

        transport.close().await;
        let _ = self.reports.send(WorkerReport::Stopped(self.id)).await;
        debug!(worker = %self.id, "worker stopped");
    }

    fn drop_frame(&mut self, reason: &str) {
        self.counters.frames_dropped += 1;
        debug!(worker = %self.id, reason, "frame dropped");
    }

    /// Run one raw frame through the decode pipeline.
    pub async fn handle_frame(&mut self, payload: Vec<u8>) {
        self.counters.frames_received += 1;

        let Ok(text) = String::from_utf8(payload) else {
            return self.drop_frame("frame is not UTF-8");
        };
        let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(&text) else {
            return self.drop_frame("frame is not a JSON object");
        };

        if self.secure && !verify_envelope(&envelope) {
            return self.drop_frame("signature verification failed");
        }

        let sender = envelope
            .get(EE_SENDER)
            .and_then(Value::as_str)
            .and_then(|s| Address::parse(s).ok());

        if envelope
            .get(EE_IS_ENCRYPTED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let Some(sender) = &sender else {
                return self.drop_frame("encrypted frame without sender");
            };
            let Some(blob) = envelope.get(EE_ENCRYPTED_DATA).and_then(Value::as_str) else {
                return self.drop_frame("encrypted frame without data");
            };
            let Some(plain) = decrypt_from(&self.identity, sender, blob) else {
                return self.drop_frame("decryption failed");
            };
            let Ok(Value::Object(inner)) = serde_json::from_slice::<Value>(&plain) else {
                return self.drop_frame("decrypted data is not a JSON object");
            };
            envelope.remove(EE_ENCRYPTED_DATA);
            for (key, value) in inner {
                envelope.insert(key, value);
            }
        }

        // Any verified sender enters the universe, before path and fleet
        // checks.
        if let Some(address) = &sender {
            let _ = self
                .reports
                .send(WorkerReport::Observed {
                    worker: self.id,
                    address: address.clone(),
                    timestamp_ms: now_ms(),
                })
                .await;
        }

        let Some(path) = envelope
            .get(EE_PAYLOAD_PATH)
            .and_then(PayloadPath::from_value)
        else {
            return self.drop_frame("missing payload path");
        };

        if self.id.stream == StreamKind::Payloads && is_supervisor_path(&path) {
            self.handle_supervisor(&envelope, &path, sender.as_ref()).await;
        }

        if !self.fleet.allows(&path.node) {
            return self.drop_frame("outside fleet");
        }

        let formatter_name = envelope.get(EE_FORMATTER).and_then(Value::as_str);
        let Some(formatter) = self.formatters.get(formatter_name) else {
            warn!(worker = %self.id, formatter = ?formatter_name, "unknown formatter");
            return self.drop_frame("unknown formatter");
        };
        let Some(shaped) = formatter.decode(envelope) else {
            return self.drop_frame("formatter rejected frame");
        };

        let Some(sender) = sender else {
            return self.drop_frame("frame without sender address");
        };

        let data = data_portion(&shaped);
        match self.id.stream {
            StreamKind::Heartbeats => self.route_heartbeat(sender, path, data).await,
            StreamKind::Notifications => self.route_notification(sender, path, data).await,
            StreamKind::Payloads => self.route_payload(sender, path, data).await,
        }
        self.counters.frames_processed += 1;
    }

    async fn handle_supervisor(
        &mut self,
        envelope: &Map<String, Value>,
        path: &PayloadPath,
        sender: Option<&Address>,
    ) {
        let Some(supervisor) = sender else {
            return;
        };

        let _ = self
            .reports
            .send(WorkerReport::SupervisorStatus {
                supervisor: supervisor.clone(),
                status: extract_status(envelope),
            })
            .await;

        let book = extract_address_book(envelope);
        if !book.is_empty() {
            let _ = self
                .reports
                .send(WorkerReport::AddressesRefresh(book))
                .await;
        }

        let alerted = extract_alerted(envelope);
        if !alerted.is_empty() {
            let _ = self
                .reports
                .send(WorkerReport::NodesDown {
                    supervisor: supervisor.clone(),
                    nodes: alerted,
                })
                .await;
        }

        let message = ProcessedMessage {
            stream: StreamKind::Payloads,
            sender: supervisor.clone(),
            path: path.clone(),
            data: Value::Object(data_portion(envelope)),
            context: MessageContext::default(),
        };
        let _ = self
            .reports
            .send(WorkerReport::SupervisorPayload {
                supervisor: supervisor.clone(),
                message: Box::new(message),
            })
            .await;
    }

    async fn route_heartbeat(&mut self, sender: Address, path: PayloadPath, data: Map<String, Value>) {
        let view = decode_heartbeat(data);
        let message = ProcessedMessage {
            stream: StreamKind::Heartbeats,
            sender,
            path,
            data: view.raw,
            context: MessageContext {
                pipeline: None,
                instance: None,
                metadata: json!({
                    "PIPELINES": view.pipelines,
                    "NODE": view.node,
                    "HARDWARE": view.hardware,
                }),
            },
        };
        let _ = self
            .reports
            .send(WorkerReport::Message {
                worker: self.id,
                message: Box::new(message),
            })
            .await;
    }

    async fn route_notification(
        &mut self,
        sender: Address,
        path: PayloadPath,
        data: Map<String, Value>,
    ) {
        let body = Value::Object(data);
        let record = NotificationRecord::from_body(path.clone(), &body);

        let mut inboxes: BTreeSet<String> = BTreeSet::new();
        if let Some(session_id) = &record.session_id {
            if let Some(inbox) = self.session_watch.get(session_id) {
                inboxes.insert(inbox.clone());
            }
        }
        if let Some(entries) = self.watch_paths.get(&path.path_key()) {
            for entry in entries {
                inboxes.insert(entry.inbox_id.clone());
            }
        }
        for inbox_id in inboxes {
            let _ = self
                .reports
                .send(WorkerReport::RequestResponse {
                    inbox_id,
                    record: record.clone(),
                })
                .await;
        }

        let metadata = json!({
            "NOTIFICATION": {
                "CODE": record.code,
                "TYPE": record.kind,
                "TAG": record.tag,
            }
        });
        let context = self.assemble_context(&path, metadata);
        let message = ProcessedMessage {
            stream: StreamKind::Notifications,
            sender,
            path,
            data: body,
            context,
        };
        let _ = self
            .reports
            .send(WorkerReport::Message {
                worker: self.id,
                message: Box::new(message),
            })
            .await;
    }

    async fn route_payload(&mut self, sender: Address, path: PayloadPath, data: Map<String, Value>) {
        let mut plugin_meta = Map::new();
        let mut pipeline_meta = Map::new();
        let mut body = Map::new();
        for (key, value) in data {
            if key.starts_with(PLUGIN_META_PREFIX) {
                plugin_meta.insert(key, value);
            } else if key.starts_with(PIPELINE_META_PREFIX) {
                pipeline_meta.insert(key, value);
            } else {
                body.insert(key, value);
            }
        }

        let sticky_inbox = body
            .get(COMMAND_PARAMS)
            .and_then(|p| p.get(STICKY_COMMAND_ID))
            .and_then(Value::as_str)
            .and_then(|sticky_id| self.sticky.get(sticky_id))
            .cloned();

        let metadata = json!({
            "PLUGIN_META": plugin_meta,
            "PIPELINE_META": pipeline_meta,
        });
        let context = self.assemble_context(&path, metadata);
        let message = ProcessedMessage {
            stream: StreamKind::Payloads,
            sender,
            path,
            data: Value::Object(body),
            context,
        };

        // Sticky payloads go only to their bound inbox.
        let report = match sticky_inbox {
            Some(inbox_id) => WorkerReport::StickyPayload {
                inbox_id,
                message: Box::new(message),
            },
            None => WorkerReport::Message {
                worker: self.id,
                message: Box::new(message),
            },
        };
        let _ = self.reports.send(report).await;
    }

    /// Build the message context from the worker's local pipeline state.
    fn assemble_context(&self, path: &PayloadPath, metadata: Value) -> MessageContext {
        let node_state = self.state.get(&path.node).or_else(|| {
            // Name-keyed senders resolve through the directory copy.
            self.directory
                .address_of(&path.node)
                .and_then(|address| self.state.get(address.as_str()))
        });

        let pipeline = match (&node_state, &path.pipeline) {
            (Some(state), Some(name)) => state.get(name).cloned(),
            _ => None,
        };
        let instance = match (&pipeline, &path.signature, &path.instance) {
            (Some(pipeline), Some(signature), Some(instance)) => pipeline
                .get(PLUGINS)
                .and_then(|plugins| plugins.get(signature))
                .and_then(|instances| instances.get(instance))
                .cloned(),
            _ => None,
        };

        MessageContext {
            pipeline,
            instance,
            metadata,
        }
    }

    /// Apply a client command.
    pub async fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::UpdateState { address, state } => {
                self.state.insert(address.as_str().to_string(), state);
            }
            WorkerCommand::UpdateFleet(delta) => {
                self.fleet.apply(&delta);
            }
            WorkerCommand::RefreshAddresses(book) => {
                self.directory = book;
            }
            WorkerCommand::WatchForSessionId {
                session_id,
                inbox_id,
                paths,
            } => {
                self.session_watch
                    .insert(session_id.clone(), inbox_id.clone());
                for path in paths {
                    self.watch_paths
                        .entry(path.path_key())
                        .or_default()
                        .push(WatchEntry {
                            session_id: session_id.clone(),
                            inbox_id: inbox_id.clone(),
                        });
                }
            }
            WorkerCommand::IgnoreSessionId {
                session_id,
                inbox_id,
                paths,
            } => {
                self.session_watch.remove(&session_id);
                for path in paths {
                    let key = path.path_key();
                    if let Some(entries) = self.watch_paths.get_mut(&key) {
                        entries.retain(|e| {
                            !(e.session_id == session_id && e.inbox_id == inbox_id)
                        });
                        if entries.is_empty() {
                            self.watch_paths.remove(&key);
                        }
                    }
                }
            }
            WorkerCommand::WatchForStickySessionId {
                sticky_id,
                inbox_id,
            } => {
                self.sticky.insert(sticky_id, inbox_id);
            }
            WorkerCommand::MemoryUsage => {
                let report = MemoryReport {
                    watch_entries: self.watch_paths.values().map(Vec::len).sum(),
                    sticky_entries: self.sticky.len(),
                    state_nodes: self.state.len(),
                    ..self.counters.clone()
                };
                let _ = self
                    .reports
                    .send(WorkerReport::Memory {
                        worker: self.id,
                        report,
                    })
                    .await;
            }
            WorkerCommand::Shutdown => {
                // Handled by the run loop.
            }
        }
    }

    /// The process inbox id locally matched notifications route to.
    #[must_use]
    pub fn inbox_id(&self) -> &str {
        &self.inbox_id
    }
}

/// The data portion of a formatted envelope: the `DATA` object when the
/// formatter produced one, otherwise every non-envelope key.
fn data_portion(shaped: &Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Object(data)) = shaped.get(DATA) {
        return data.clone();
    }
    shaped
        .iter()
        .filter(|(key, _)| !key.starts_with("EE_") && key.as_str() != DATA)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
