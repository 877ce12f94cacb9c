use super::liveness::{HandshakeConfig, LivenessPolicy};
use super::state::{ConnectionState, ReceiverEventKind, ReceiverStatus};
use super::watchdog::Watchdog;
use super::SharedConsumer;
use crate::protocol::PacketDecoder;
use crate::sample::{MotionClock, Sample};
use crate::transport::{Transport, TransportFactory};
use bevy::log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Everything a session needs besides its transport
pub struct SessionParams {
    pub factory: Arc<dyn TransportFactory>,
    pub decoder: Arc<dyn PacketDecoder>,
    pub consumer: SharedConsumer,
    pub status: Arc<ReceiverStatus>,
    pub clock: MotionClock,
    pub policy: LivenessPolicy,
    pub handshake: Option<HandshakeConfig>,
    pub peer: Option<SocketAddr>,
    /// Set by `stop()`; a halted session never reconnects or publishes
    pub halted: Arc<AtomicBool>,
}

/// Serialized state machine for one receiver session
///
/// All socket callbacks (datagram, fault, timer) go through here on the
/// worker thread, so decode and liveness updates stay in arrival order.
/// Times are explicit so the watchdog and reconnect logic can be driven
/// deterministically.
pub struct SessionCore {
    params: SessionParams,
    transport: Option<Box<dyn Transport>>,
    watchdog: Watchdog,
    next_handshake: Option<Instant>,
    next_reopen: Option<Instant>,
    active_peer: Option<SocketAddr>,
    /// The next listener was opened because of a fault; hold the hello back
    fault_backoff: bool,
}

impl SessionCore {
    /// Wrap a freshly opened transport; the caller publishes `Connecting`
    pub fn new(params: SessionParams, transport: Box<dyn Transport>, now: Instant) -> Self {
        let watchdog = Watchdog::new(params.policy.data_timeout());
        let mut core = Self {
            params,
            transport: Some(transport),
            watchdog,
            next_handshake: None,
            next_reopen: None,
            active_peer: None,
            fault_backoff: false,
        };
        core.on_opened(now);
        core
    }

    pub fn state(&self) -> ConnectionState {
        self.params.status.state()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.params.policy
    }

    /// Hot-swap liveness parameters without touching the connection
    pub fn set_policy(&mut self, policy: LivenessPolicy) {
        self.watchdog.set_window(policy.data_timeout());
        self.params.policy = policy;
    }

    /// One pass of the worker loop: receive (bounded wait), then timers
    pub fn step(&mut self, buf: &mut [u8]) {
        let received = match self.transport.as_mut() {
            Some(transport) => transport.recv(buf),
            None => {
                thread::sleep(self.params.policy.poll_interval());
                Ok(None)
            }
        };

        let now = Instant::now();
        match received {
            Ok(Some((len, from))) => self.on_datagram(&buf[..len], from, now),
            Ok(None) => {}
            Err(e) => self.on_transport_fault(e, now),
        }
        self.on_timer(Instant::now());
    }

    /// Decode one datagram; only a successful decode counts as liveness
    pub fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        if self.transport.is_none() {
            return;
        }

        if !self.accepts(from) {
            debug!("ignoring datagram from foreign peer {}", from);
            self.record(now, ReceiverEventKind::ForeignPeer(from));
            return;
        }

        let values = match self.params.decoder.decode(bytes) {
            Ok(values) => values,
            Err(e) => {
                debug!("dropping {} byte datagram from {}: {}", bytes.len(), from, e);
                self.record(now, ReceiverEventKind::DecodeFailed(e.to_string()));
                return;
            }
        };

        if self.active_peer.is_none() {
            self.active_peer = Some(from);
        }
        self.watchdog.reset_timeout_timer(now);

        if self.state() != ConnectionState::Connected {
            self.next_handshake = None;
            self.publish(now, ConnectionState::Connected);
        }

        // A consumer may have stopped the receiver from on_state_change
        if self.is_halted() {
            return;
        }
        let sample = Sample::new(self.params.clock.secs_at(now), values);
        if let Ok(mut consumer) = self.params.consumer.lock() {
            consumer.on_sample(sample);
        }
    }

    /// Peer reset, send failure, or any other socket error
    pub fn on_transport_fault(&mut self, err: io::Error, now: Instant) {
        warn!("motion transport fault: {}", err);
        self.record(now, ReceiverEventKind::TransportFault(err.to_string()));
        self.fault_backoff = true;
        self.teardown(now);
    }

    /// Watchdog expiry, handshake retries and delayed reopen
    pub fn on_timer(&mut self, now: Instant) {
        if self.transport.is_none() {
            if let Some(due) = self.next_reopen {
                if now >= due {
                    self.reopen(now);
                }
            }
            return;
        }

        match self.state() {
            ConnectionState::Connected => {
                if self.watchdog.is_expired(now) {
                    warn!(
                        "no motion data for {:?}, restarting listener",
                        self.params.policy.data_timeout()
                    );
                    self.record(now, ReceiverEventKind::WatchdogExpired);
                    self.teardown(now);
                }
            }
            ConnectionState::Connecting => self.send_handshake_if_due(now),
            ConnectionState::Disconnected => {}
        }
    }

    /// Close the transport for good
    pub fn shutdown(&mut self) {
        self.transport = None;
        self.watchdog.disarm();
        self.next_handshake = None;
        self.next_reopen = None;
        self.active_peer = None;
        self.params.status.set_local_addr(None);
    }

    fn accepts(&self, from: SocketAddr) -> bool {
        if let Some(active) = self.active_peer {
            return active == from;
        }
        match self.params.peer {
            Some(peer) => peer.ip() == from.ip(),
            None => true,
        }
    }

    fn on_opened(&mut self, now: Instant) {
        self.watchdog.disarm();
        self.active_peer = None;
        self.next_reopen = None;
        let backoff = std::mem::take(&mut self.fault_backoff);
        self.next_handshake = match (&self.params.handshake, self.params.peer) {
            (Some(handshake), Some(_)) if backoff => Some(deadline(now, handshake.interval())),
            (Some(_), Some(_)) => Some(now),
            _ => None,
        };

        let local = self.transport.as_ref().and_then(|t| t.local_addr().ok());
        self.params.status.set_local_addr(local);
        if let Some(addr) = local {
            info!("motion receiver listening on {}", addr);
            self.record(now, ReceiverEventKind::Listening(addr));
        }
    }

    fn send_handshake_if_due(&mut self, now: Instant) {
        let (token, interval) = match &self.params.handshake {
            Some(handshake) => (handshake.token.clone(), handshake.interval()),
            None => return,
        };
        let (peer, due) = match (self.params.peer, self.next_handshake) {
            (Some(peer), Some(due)) => (peer, due),
            _ => return,
        };
        if now < due {
            return;
        }

        let sent = match self.transport.as_mut() {
            Some(transport) => transport.send_to(token.as_bytes(), peer),
            None => return,
        };
        match sent {
            Ok(()) => {
                debug!("sent handshake to {}", peer);
                self.record(now, ReceiverEventKind::HandshakeSent(peer));
                self.next_handshake = Some(deadline(now, interval));
            }
            Err(e) => self.on_transport_fault(e, now),
        }
    }

    /// Drop the connection and, unless halted, start over with a new listener
    fn teardown(&mut self, now: Instant) {
        self.shutdown();
        if self.is_halted() {
            return;
        }
        self.publish(now, ConnectionState::Connecting);
        self.reopen(now);
    }

    fn reopen(&mut self, now: Instant) {
        if self.is_halted() {
            return;
        }
        match self.params.factory.open(self.params.policy.poll_interval()) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.on_opened(now);
            }
            Err(e) => {
                warn!("failed to reopen motion listener: {}", e);
                self.record(now, ReceiverEventKind::ReopenFailed(e.to_string()));
                self.next_reopen = Some(deadline(now, self.params.policy.reconnect_delay()));
            }
        }
    }

    fn publish(&mut self, now: Instant, state: ConnectionState) {
        if self.is_halted() {
            return;
        }
        if self.params.status.set_state(state) {
            info!("motion stream {}", state);
            self.record(now, ReceiverEventKind::StateChanged(state));
            if let Ok(mut consumer) = self.params.consumer.lock() {
                consumer.on_state_change(state);
            }
        }
    }

    fn record(&self, now: Instant, kind: ReceiverEventKind) {
        self.params.status.record(self.params.clock.secs_at(now), kind);
    }

    fn is_halted(&self) -> bool {
        self.params.halted.load(Ordering::Acquire)
    }
}

fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or(now)
}
