// ── Per-device worker ──
//
// One task per registered device. Owns the device's private sockets and
// drives its connection state machine: handshake while KNOWN, one
// request/reply exchange per period while CONNECTED, and a bounded sleep
// in every other state. At most one exchange is in flight at a time.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::communicator::CommunicatorInner;
use crate::error::CoreError;
use crate::model::{DeviceStatus, Feedback};
use crate::perf::Metric;
use crate::protocol::{Frame, HandshakeDescriptor, Payload, Reply, parse_reply};
use crate::services::TrafficClass;
use crate::store::{DeviceSlot, MailboxCommand};

/// Device-private socket pair.
#[derive(Debug)]
struct DeviceSockets {
    /// Receives the device's replies.
    inbound: UdpSocket,
    /// Sends frames to the device.
    outbound: UdpSocket,
}

impl DeviceSockets {
    async fn bind(ip: IpAddr) -> Result<Self, CoreError> {
        let addr = SocketAddr::new(ip, 0);
        let inbound = UdpSocket::bind(addr)
            .await
            .map_err(|source| CoreError::Bind { addr, source })?;
        let outbound = UdpSocket::bind(addr)
            .await
            .map_err(|source| CoreError::Bind { addr, source })?;
        Ok(Self { inbound, outbound })
    }

    fn ports(&self) -> Result<(u16, u16), CoreError> {
        let inbound = self
            .inbound
            .local_addr()
            .map_err(|e| CoreError::socket("reading inbound port", e))?;
        let outbound = self
            .outbound
            .local_addr()
            .map_err(|e| CoreError::socket("reading outbound port", e))?;
        Ok((inbound.port(), outbound.port()))
    }
}

pub(crate) struct Worker {
    inner: Arc<CommunicatorInner>,
    slot: Arc<DeviceSlot>,
    status_rx: watch::Receiver<DeviceStatus>,
    sockets: Option<DeviceSockets>,
    /// Resent whenever the mailbox is empty.
    last_command: Payload,
    /// Consecutive cycles without a reply.
    missed: u32,
    /// The last-chance reconnect probe is offered once per connection.
    reconnect_probe_spent: bool,
    buf: Vec<u8>,
    origin: String,
}

impl Worker {
    pub(crate) fn new(inner: Arc<CommunicatorInner>, slot: Arc<DeviceSlot>) -> Self {
        let status_rx = slot.subscribe_status();
        let buf = vec![0u8; inner.config.max_length];
        let origin = format!("device {} ({})", slot.index(), slot.mac());
        Self {
            inner,
            slot,
            status_rx,
            sockets: None,
            last_command: Payload::Ping,
            missed: 0,
            reconnect_probe_spent: false,
            buf,
            origin,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.inner.cancel.clone();
        let index = self.slot.index();
        debug!(index, mac = %self.slot.mac(), "worker started");

        while !cancel.is_cancelled() {
            let status = *self.status_rx.borrow_and_update();
            let step = match status {
                DeviceStatus::Known => self.handshake().await,
                DeviceStatus::Connected => self.exchange().await,
                DeviceStatus::Available | DeviceStatus::Updating | DeviceStatus::Disconnected => {
                    self.idle().await;
                    Ok(())
                }
            };

            if let Err(e) = step {
                if e.is_fatal() {
                    error!(index, error = %e, "worker terminated");
                    break;
                }
                self.inner.report(&self.origin, &e);
                // Skip the rest of this cycle.
                self.pause().await;
            }
        }
        debug!(index, "worker stopped");
    }

    // ── States ───────────────────────────────────────────────────────

    /// Sleep one period or until the status changes.
    async fn idle(&mut self) {
        let period = self.inner.config.period;
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {}
            _ = self.status_rx.changed() => {}
            () = tokio::time::sleep(period) => {}
        }
    }

    async fn pause(&self) {
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {}
            () = tokio::time::sleep(self.inner.config.period) => {}
        }
    }

    async fn handshake(&mut self) -> Result<(), CoreError> {
        let index = self.slot.index();
        self.ensure_sockets().await?;
        self.slot.indices.reset();
        self.missed = 0;
        self.reconnect_probe_spent = false;
        self.last_command = Payload::Ping;

        let descriptor = Payload::Handshake(self.descriptor()?);
        let budget = self.inner.config.handshake_attempts;

        for attempt in 1..=budget {
            self.send(&descriptor).await?;
            trace!(index, attempt, "handshake sent");
            loop {
                match self.receive(TrafficClass::Heartbeat).await? {
                    Some(Reply::HandshakeAck) => {
                        self.inner
                            .registry
                            .set_status(index, DeviceStatus::Connected)
                            .await?;
                        info!(index, mac = %self.slot.mac(), "device connected");
                        return Ok(());
                    }
                    Some(Reply::HandshakePending) => {
                        debug!(index, "handshake acknowledged, waiting");
                    }
                    Some(other) => {
                        debug!(index, ?other, "unexpected reply during handshake");
                        break;
                    }
                    None => break,
                }
            }
            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }
        }

        warn!(index, attempts = budget, "handshake failed; disconnecting");
        if let Err(e) = self.send(&Payload::Disconnect).await {
            self.inner.report(&self.origin, &e);
        }
        // Fresh ports for the next attempt.
        self.sockets = None;
        if let Err(e) = self.ensure_sockets().await {
            self.inner.report(&self.origin, &e);
        }
        self.inner
            .registry
            .set_status(index, DeviceStatus::Disconnected)
            .await?;
        Ok(())
    }

    /// One steady-state cycle: send at most one command, wait for a reply.
    async fn exchange(&mut self) -> Result<(), CoreError> {
        let index = self.slot.index();
        let version = self.slot.version();
        if self.inner.firmware.needs_reboot(&version) {
            info!(index, %version, "rebooting device for firmware update");
            self.send(&Payload::Reboot).await?;
            self.inner
                .registry
                .set_status(index, DeviceStatus::Disconnected)
                .await?;
            return Ok(());
        }

        let payload = match self.slot.mailbox().pop() {
            None => self.last_command.clone(),
            Some(MailboxCommand::DutyCycle { dc, selection }) => {
                self.last_command = Payload::DutyCycle { dc, selection };
                self.last_command.clone()
            }
            Some(MailboxCommand::DutyCycleVector(dcs)) => {
                self.last_command = Payload::DutyCycleVector(dcs);
                self.last_command.clone()
            }
            Some(MailboxCommand::Disconnect) => return self.release(Payload::Disconnect).await,
            Some(MailboxCommand::Reboot) => return self.release(Payload::Reboot).await,
        };

        self.send(&payload).await?;
        let sent_at = Instant::now();
        match self.receive(TrafficClass::Data).await? {
            Some(reply) => {
                self.inner.perf.record(Metric::RoundTrip, sent_at.elapsed());
                self.missed = 0;
                self.apply(reply).await
            }
            None => self.on_missed().await,
        }
    }

    /// Send a connection-ending frame and mark the device DISCONNECTED
    /// without waiting for a reply.
    ///
    /// Goes out sequenced on the device channel, not as a passcode
    /// directive to the listener port, so it orders after queued setpoints.
    async fn release(&mut self, payload: Payload) -> Result<(), CoreError> {
        let index = self.slot.index();
        self.send(&payload).await?;
        info!(index, %payload, "connection released");
        self.inner
            .registry
            .set_status(index, DeviceStatus::Disconnected)
            .await?;
        Ok(())
    }

    async fn on_missed(&mut self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Ok(());
        }
        let index = self.slot.index();
        let limit = self.inner.config.max_timeouts;
        self.missed += 1;

        if self.missed < limit {
            if self.missed + 1 == limit {
                self.send(&Payload::Probe).await?;
            }
            trace!(index, missed = self.missed, limit, "reply missed");
            return Ok(());
        }

        if !self.reconnect_probe_spent {
            self.reconnect_probe_spent = true;
            self.send(&Payload::ReconnectProbe).await?;
            if let Some(reply) = self.receive(TrafficClass::Data).await? {
                debug!(index, "device answered the reconnect probe");
                self.missed = 0;
                return self.apply(reply).await;
            }
        }

        warn!(index, mac = %self.slot.mac(), missed = self.missed, "device timed out");
        self.missed = 0;
        self.send(&Payload::Disconnect).await?;
        self.inner
            .registry
            .set_status(index, DeviceStatus::Disconnected)
            .await?;
        Ok(())
    }

    async fn apply(&mut self, reply: Reply) -> Result<(), CoreError> {
        let index = self.slot.index();
        match reply {
            Reply::Telemetry {
                data_index,
                rpm,
                duty_cycle,
            } => {
                let stored = self.slot.indices.data.load(Ordering::Acquire);
                if data_index > stored {
                    self.slot.indices.data.store(data_index, Ordering::Release);
                    self.slot.store_feedback(Feedback { rpm, duty_cycle });
                } else {
                    debug!(index, data_index, stored, "discarding stale telemetry");
                }
            }
            Reply::IndexReset => {
                self.slot.indices.inbound.store(0, Ordering::Release);
                debug!(index, "inbound index reset");
            }
            Reply::PingRequest => self.send(&Payload::Ping).await?,
            Reply::ReconnectAck
            | Reply::Maintain
            | Reply::HandshakeAck
            | Reply::HandshakePending
            | Reply::ProbeAck => {}
            Reply::Error(text) => error!(index, mac = %self.slot.mac(), "device error: {text}"),
            Reply::Unknown(tag) => warn!(index, %tag, "unrecognized reply"),
        }
        Ok(())
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn ensure_sockets(&mut self) -> Result<(), CoreError> {
        if self.sockets.is_none() {
            let sockets = DeviceSockets::bind(self.inner.config.bind_ip).await?;
            let (inbound, outbound) = sockets.ports()?;
            debug!(index = self.slot.index(), inbound, outbound, "device sockets bound");
            self.sockets = Some(sockets);
        }
        Ok(())
    }

    fn descriptor(&self) -> Result<HandshakeDescriptor, CoreError> {
        let sockets = self
            .sockets
            .as_ref()
            .ok_or_else(|| CoreError::Internal("handshake without sockets".into()))?;
        let (inbound_port, outbound_port) = sockets.ports()?;
        let config = &self.inner.config;
        Ok(HandshakeDescriptor {
            inbound_port,
            outbound_port,
            period_ms: config.period.as_millis(),
            broadcast_period_ms: config.broadcast_period.as_millis(),
            max_timeouts: config.max_timeouts,
            max_fans: config.max_fans,
            profile: config.fan_profile.clone(),
        })
    }

    /// Send a frame. Handshakes reset the outbound sequence to 0; every
    /// other frame takes the next sequence number.
    async fn send(&mut self, payload: &Payload) -> Result<(), CoreError> {
        let endpoint = self.slot.endpoint().ok_or_else(|| CoreError::NoEndpoint {
            mac: self.slot.mac().to_string(),
        })?;
        let sockets = self
            .sockets
            .as_ref()
            .ok_or_else(|| CoreError::Internal("send without sockets".into()))?;

        let outbound = &self.slot.indices.outbound;
        let seq = if payload.is_handshake() {
            outbound.store(0, Ordering::Release);
            0
        } else {
            outbound.fetch_add(1, Ordering::AcqRel) + 1
        };

        let frame = Frame { seq, payload }.to_string();
        let target = SocketAddr::new(endpoint.ip, endpoint.outbound_port);
        let started = Instant::now();
        sockets
            .outbound
            .send_to(frame.as_bytes(), target)
            .await
            .map_err(|e| CoreError::socket("sending to device", e))?;
        self.inner.perf.record(Metric::MessageSend, started.elapsed());
        self.inner.perf.message_sent();
        trace!(index = self.slot.index(), seq, %frame, "sent");
        Ok(())
    }

    /// Wait up to one timeout for the next fresh reply.
    ///
    /// Replies whose sequence number is not above the last accepted one
    /// are discarded and the wait continues until the deadline.
    async fn receive(&mut self, class: TrafficClass) -> Result<Option<Reply>, CoreError> {
        let wait = self.inner.services.timeouts.timeout_for(class);
        let deadline = tokio::time::Instant::now() + wait;
        let width = self.inner.config.max_fans;
        let index = self.slot.index();
        let started = Instant::now();

        loop {
            let Some(sockets) = self.sockets.as_ref() else {
                return Err(CoreError::Internal("receive without sockets".into()));
            };
            let received = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return Ok(None),
                r = tokio::time::timeout_at(deadline, sockets.inbound.recv_from(&mut self.buf)) => r,
            };
            let len = match received {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(CoreError::socket("receiving from device", e)),
                Ok(Ok((len, _))) => len,
            };

            let (seq, reply) = match parse_reply(&self.buf[..len], width) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(index, error = %e, "discarding malformed reply");
                    self.inner.perf.error();
                    continue;
                }
            };

            let inbound = &self.slot.indices.inbound;
            let last = inbound.load(Ordering::Acquire);
            if seq <= last {
                debug!(index, seq, last, "discarding out-of-order reply");
                continue;
            }
            inbound.store(seq, Ordering::Release);
            self.inner.perf.message_received();
            self.inner
                .perf
                .record(Metric::MessageReceive, started.elapsed());
            trace!(index, seq, ?reply, "received");
            return Ok(Some(reply));
        }
    }
}
