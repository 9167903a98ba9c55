// ── Communicator ──
//
// Lifecycle owner for the engine: binds the shared sockets, seeds the
// registry, spawns the listener, beacon, publisher, command processor and
// one worker per device, and tears everything down cooperatively.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::beacon::{BeaconSettings, BeaconState, beacon_task};
use crate::command::{Command, CommandEnvelope, CommandResult, CommandVector, route_command};
use crate::config::CommunicatorConfig;
use crate::discovery::listener_task;
use crate::error::CoreError;
use crate::firmware::{FirmwareOrchestrator, FirmwareUpdate};
use crate::model::{DeviceStatus, NetworkStatus, Output, PerfStats};
use crate::perf::PerfMonitor;
use crate::protocol::Directive;
use crate::publisher::publisher_task;
use crate::services::{Fault, FaultStats, Services};
use crate::store::{DeviceRegistry, DeviceSlot, Link, NewDevice};
use crate::worker::Worker;

const COMMAND_CHANNEL_SIZE: usize = 64;
const OUTPUT_CHANNEL_SIZE: usize = 256;

// ── Communicator ─────────────────────────────────────────────────────

/// The engine handle.
///
/// Cheaply cloneable via `Arc<CommunicatorInner>`. Construction binds the
/// shared sockets and seeds saved devices; [`start()`](Self::start)
/// spawns the background tasks.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommunicatorInner>,
}

pub(crate) struct CommunicatorInner {
    pub(crate) config: CommunicatorConfig,
    pub(crate) services: Services,
    pub(crate) registry: DeviceRegistry,
    pub(crate) firmware: FirmwareOrchestrator,
    pub(crate) beacon: BeaconSettings,
    pub(crate) perf: PerfMonitor,
    /// Rendezvous socket: discovery in, listener replies out.
    pub(crate) listener: UdpSocket,
    /// Broadcast-capable socket for beacons and fleet directives.
    pub(crate) control: UdpSocket,
    listener_addr: SocketAddr,
    output_tx: broadcast::Sender<Arc<Output>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    pub(crate) cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Communicator {
    /// Validate `config`, bind the shared sockets and seed saved devices
    /// as DISCONNECTED. Does not spawn anything.
    pub async fn new(config: CommunicatorConfig, services: Services) -> Result<Self, CoreError> {
        config.validate()?;

        let listener = bind_listener(config.bind_ip, config.listener_port).await?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| CoreError::socket("reading listener address", e))?;

        let control_addr = SocketAddr::new(config.bind_ip, 0);
        let control = UdpSocket::bind(control_addr)
            .await
            .map_err(|source| CoreError::Bind {
                addr: control_addr,
                source,
            })?;
        control
            .set_broadcast(true)
            .map_err(|e| CoreError::socket("enabling broadcast", e))?;

        let registry = DeviceRegistry::new(
            config.max_fans,
            config.mailbox_capacity,
            config.lock_timeout,
        );
        for saved in &config.saved_devices {
            registry
                .register(NewDevice {
                    mac: saved.mac.clone(),
                    name: saved.name.clone(),
                    fans: saved.fans,
                    status: DeviceStatus::Disconnected,
                    link: Link::default(),
                })
                .await?;
        }

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let beacon = BeaconSettings::new(config.broadcast_ip.clone());

        info!(
            listener = %listener_addr,
            devices = registry.len(),
            "communicator initialized"
        );

        Ok(Self {
            inner: Arc::new(CommunicatorInner {
                config,
                services,
                registry,
                firmware: FirmwareOrchestrator::new(),
                beacon,
                perf: PerfMonitor::new(),
                listener,
                control,
                listener_addr,
                output_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn every background task. Fails if already started or stopped.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Stopped);
        }
        let Some(rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("communicator already started".into()));
        };

        // Clear connections left over from a previous session.
        self.inner.broadcast(&Directive::Disconnect).await;

        {
            let mut handles = self.inner.task_handles.lock().await;
            handles.push(tokio::spawn(listener_task(Arc::clone(&self.inner))));
            handles.push(tokio::spawn(beacon_task(Arc::clone(&self.inner))));
            handles.push(tokio::spawn(publisher_task(Arc::clone(&self.inner))));
            handles.push(tokio::spawn(command_processor_task(
                Arc::clone(&self.inner),
                rx,
            )));
        }

        for slot in self.inner.registry.slots().iter() {
            self.inner.spawn_worker(Arc::clone(slot)).await;
        }

        info!(listener = %self.inner.listener_addr, "communicator started");
        Ok(())
    }

    /// Broadcast a disconnect, cancel every task and wait for them to exit.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
        // Workers spawned while draining land in the list again; loop
        // until it stays empty.
        loop {
            let drained: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
            if drained.is_empty() {
                break;
            }
            for handle in drained {
                let _ = handle.await;
            }
        }
        debug!("communicator stopped");
    }

    /// Resolves once the communicator has been told to stop.
    pub async fn stopped(&self) {
        self.inner.cancel.cancelled().await;
    }

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Route a command and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Stopped);
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: Some(tx),
            })
            .await
            .map_err(|_| CoreError::Stopped)?;
        rx.await.map_err(|_| CoreError::Stopped)?
    }

    /// Decode a control-plane vector and queue it without waiting.
    ///
    /// Decoding failures (unknown opcode, bad arguments) are logged and
    /// returned; nothing is queued in that case.
    pub async fn submit(&self, vector: CommandVector) -> Result<(), CoreError> {
        let command = Command::try_from(vector).inspect_err(|e| {
            warn!(error = %e, "rejected command vector");
        })?;
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: None,
            })
            .await
            .map_err(|_| CoreError::Stopped)
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to published outputs.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Output>> {
        self.inner.output_tx.subscribe()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.inner.config
    }

    pub fn listener_addr(&self) -> SocketAddr {
        self.inner.listener_addr
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.inner.network_status()
    }

    pub fn beacon_state(&self) -> Arc<BeaconState> {
        self.inner.beacon.get()
    }

    /// Pause or resume discovery beacons.
    pub fn set_broadcasting(&self, enabled: bool) {
        self.inner.beacon.set_enabled(enabled);
    }

    pub fn firmware_update(&self) -> Option<FirmwareUpdate> {
        self.inner.firmware.current()
    }

    pub fn perf_stats(&self) -> PerfStats {
        self.inner.perf.stats()
    }

    pub fn fault_stats(&self) -> FaultStats {
        self.inner.services.recovery.stats()
    }
}

// ── Shared internals ─────────────────────────────────────────────────

impl CommunicatorInner {
    pub(crate) fn listener_port(&self) -> u16 {
        self.listener_addr.port()
    }

    /// File a fault with the recovery policy.
    pub(crate) fn report(&self, origin: &str, error: &CoreError) {
        self.perf.error();
        self.services
            .recovery
            .report(Fault::from_error(origin, error));
    }

    pub(crate) fn publish(&self, output: Output) {
        trace!(kind = output.kind(), "publishing output");
        // No subscribers is fine.
        let _ = self.output_tx.send(Arc::new(output));
    }

    pub(crate) fn network_status(&self) -> NetworkStatus {
        let beacon = self.beacon.get();
        NetworkStatus {
            connected: !self.cancel.is_cancelled(),
            listener_ip: self.listener_addr.ip(),
            listener_port: self.listener_addr.port(),
            broadcast_ip: beacon.ip.clone(),
            broadcast_port: self.config.broadcast_port,
            broadcast_mode: beacon.mode,
            broadcasting: beacon.enabled,
        }
    }

    /// Reply to a discovery sender from the listener socket.
    pub(crate) async fn reply(&self, directive: &Directive, to: SocketAddr) {
        let message = directive.encode(self.config.passcode());
        if let Err(e) = self.listener.send_to(message.as_bytes(), to).await {
            self.report("listener", &CoreError::socket("replying to device", e));
        }
    }

    /// Send a directive to one address from the control socket.
    pub(crate) async fn send_control(&self, directive: &Directive, to: SocketAddr) {
        let message = directive.encode(self.config.passcode());
        match self.control.send_to(message.as_bytes(), to).await {
            Ok(_) => trace!(%to, %message, "directive sent"),
            Err(e) => self.report("control", &CoreError::socket("sending directive", e)),
        }
    }

    /// Send a directive to the current broadcast address.
    pub(crate) async fn broadcast(&self, directive: &Directive) {
        match self.beacon.broadcast_addr(self.config.broadcast_port) {
            Some(addr) => self.send_control(directive, addr).await,
            None => warn!("no valid broadcast address; directive not sent"),
        }
    }

    /// Broadcast a disconnect and raise the stop signal. Idempotent.
    pub(crate) async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.broadcast(&Directive::Disconnect).await;
        self.cancel.cancel();
        info!("communicator stopping");
    }

    pub(crate) async fn spawn_worker(self: &Arc<Self>, slot: Arc<DeviceSlot>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let worker = Worker::new(Arc::clone(self), slot);
        let handle = tokio::spawn(worker.run());
        self.task_handles.lock().await.push(handle);
    }
}

/// Process commands from the mpsc channel until cancelled.
async fn command_processor_task(
    inner: Arc<CommunicatorInner>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
) {
    let cancel = inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let opcode = envelope.command.opcode();
                let result = route_command(&inner, envelope.command).await;
                match envelope.response_tx {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(%opcode, error = %e, "command failed");
                        }
                    }
                }
            }
        }
    }
    debug!("command processor stopped");
}

/// Bind the listener on `port`, falling back to an ephemeral port when
/// the preferred one is taken.
async fn bind_listener(ip: IpAddr, port: u16) -> Result<UdpSocket, CoreError> {
    let preferred = SocketAddr::new(ip, port);
    match UdpSocket::bind(preferred).await {
        Ok(socket) => Ok(socket),
        Err(e) if port != 0 && e.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(port, "listener port in use; falling back to an ephemeral port");
            let fallback = SocketAddr::new(ip, 0);
            UdpSocket::bind(fallback)
                .await
                .map_err(|source| CoreError::Bind {
                    addr: fallback,
                    source,
                })
        }
        Err(source) => Err(CoreError::Bind {
            addr: preferred,
            source,
        }),
    }
}
