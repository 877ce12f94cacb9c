// Reconnecting motion receiver
//
// One listener, at most one peer. The session worker thread owns the socket:
// - Connecting: listener open, optional hello sent to the peer every 2s
// - Connected: watchdog armed, renewed by every decoded packet
// - peer fault / transport error / watchdog expiry: tear down, and unless
//   stopped, open a brand new listener and go back to Connecting

pub mod liveness;
pub mod session;
pub mod state;
pub mod watchdog;

pub use liveness::{HandshakeConfig, LivenessPolicy};
pub use state::{ConnectionState, ReceiverEvent, ReceiverEventKind, ReceiverStatus};
pub use watchdog::Watchdog;

use crate::error::{RelayError, Result};
use crate::protocol::PacketDecoder;
use crate::sample::{MotionClock, Sample};
use crate::transport::{TransportFactory, DATAGRAM_BUFFER};
use bevy::log::info;
use session::{SessionCore, SessionParams};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Receives decoded samples and state changes, on the receiver's context
pub trait MotionConsumer: Send + 'static {
    fn on_sample(&mut self, sample: Sample);

    fn on_state_change(&mut self, _state: ConnectionState) {}
}

pub type SharedConsumer = Arc<Mutex<Box<dyn MotionConsumer>>>;

enum Control {
    UpdateLiveness(LivenessPolicy),
    Stop,
}

struct Session {
    control: Sender<Control>,
    halted: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Stop the worker; joins unless called from the worker itself
    fn halt(self) {
        self.halted.store(true, Ordering::Release);
        let _ = self.control.send(Control::Stop);
        if self.worker.thread().id() != thread::current().id() {
            let _ = self.worker.join();
        }
    }
}

pub struct MotionReceiver {
    factory: Arc<dyn TransportFactory>,
    decoder: Arc<dyn PacketDecoder>,
    consumer: SharedConsumer,
    clock: MotionClock,
    status: Arc<ReceiverStatus>,
    policy: Mutex<LivenessPolicy>,
    handshake: Option<HandshakeConfig>,
    peer: Mutex<Option<SocketAddr>>,
    session: Mutex<Option<Session>>,
}

impl MotionReceiver {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        decoder: Arc<dyn PacketDecoder>,
        consumer: impl MotionConsumer,
        clock: MotionClock,
        policy: LivenessPolicy,
    ) -> Self {
        Self {
            factory,
            decoder,
            consumer: Arc::new(Mutex::new(Box::new(consumer))),
            clock,
            status: Arc::new(ReceiverStatus::default()),
            policy: Mutex::new(policy),
            handshake: None,
            peer: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Send `handshake.token` to the peer while connecting
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Start (or restart) listening, with auto-reconnect enabled
    ///
    /// Only a failure to open the listener is reported here; everything the
    /// peer does afterwards shows up through [`ConnectionState`].
    pub fn connect(&self, peer: Option<SocketAddr>) -> Result<()> {
        let previous = lock(&self.session).take();
        if let Some(session) = previous {
            session.halt();
        }
        *lock(&self.peer) = peer;

        let policy = lock(&self.policy).clone();
        let transport = match self.factory.open(policy.poll_interval()) {
            Ok(transport) => transport,
            Err(e) => {
                self.publish_local(ConnectionState::Disconnected);
                return Err(RelayError::bind(self.factory.bind_addr(), e));
            }
        };

        let halted = Arc::new(AtomicBool::new(false));
        let params = SessionParams {
            factory: Arc::clone(&self.factory),
            decoder: Arc::clone(&self.decoder),
            consumer: Arc::clone(&self.consumer),
            status: Arc::clone(&self.status),
            clock: self.clock.clone(),
            policy,
            handshake: self.handshake.clone(),
            peer,
            halted: Arc::clone(&halted),
        };
        let core = SessionCore::new(params, transport, Instant::now());
        self.publish_local(ConnectionState::Connecting);

        let (control, commands) = mpsc::channel();
        let worker_halted = Arc::clone(&halted);
        let worker = thread::Builder::new()
            .name("motion-receiver".into())
            .spawn(move || run_session(core, commands, worker_halted));
        let worker = match worker {
            Ok(worker) => worker,
            Err(source) => {
                self.status.set_local_addr(None);
                self.publish_local(ConnectionState::Disconnected);
                return Err(RelayError::Spawn {
                    name: "motion-receiver",
                    source,
                });
            }
        };

        *lock(&self.session) = Some(Session {
            control,
            halted,
            worker,
        });
        Ok(())
    }

    /// Disable auto-reconnect and tear everything down
    ///
    /// Idempotent; safe to call from inside a consumer callback.
    pub fn stop(&self) {
        let previous = lock(&self.session).take();
        let was_running = previous.is_some();
        if let Some(session) = previous {
            session.halt();
        }

        self.status.set_local_addr(None);
        if was_running {
            info!("motion receiver stopped");
            self.status
                .record(self.clock.now_secs(), ReceiverEventKind::Stopped);
        }
        self.publish_local(ConnectionState::Disconnected);
    }

    /// Swap timeout/retry parameters without interrupting the connection
    pub fn update_liveness(&self, policy: LivenessPolicy) {
        *lock(&self.policy) = policy.clone();
        if let Some(session) = lock(&self.session).as_ref() {
            let _ = session.control.send(Control::UpdateLiveness(policy));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    pub fn status(&self) -> Arc<ReceiverStatus> {
        Arc::clone(&self.status)
    }

    /// Address of the open listener, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.status.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *lock(&self.peer)
    }

    pub fn recent_events(&self) -> Vec<ReceiverEvent> {
        self.status.events()
    }

    fn publish_local(&self, state: ConnectionState) {
        if !self.status.set_state(state) {
            return;
        }
        info!("motion stream {}", state);
        self.status
            .record(self.clock.now_secs(), ReceiverEventKind::StateChanged(state));
        // Busy means we are inside a consumer callback; it already knows
        if let Ok(mut consumer) = self.consumer.try_lock() {
            consumer.on_state_change(state);
        }
    }
}

impl Drop for MotionReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_session(mut core: SessionCore, commands: Receiver<Control>, halted: Arc<AtomicBool>) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    'session: loop {
        loop {
            match commands.try_recv() {
                Ok(Control::UpdateLiveness(policy)) => core.set_policy(policy),
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break 'session,
                Err(TryRecvError::Empty) => break,
            }
        }
        if halted.load(Ordering::Acquire) {
            break;
        }
        core.step(&mut buf);
    }
    core.shutdown();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TextDecoder;
    use crate::transport::{ChannelPeer, ChannelTransportFactory};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    struct Forward(mpsc::Sender<Vec<f32>>);

    impl MotionConsumer for Forward {
        fn on_sample(&mut self, sample: Sample) {
            let _ = self.0.send(sample.into_values());
        }
    }

    type ReceiverSlot = Arc<OnceLock<Weak<MotionReceiver>>>;

    // Stops its own receiver from inside a callback
    struct StopFromCallback {
        receiver: ReceiverSlot,
        samples: mpsc::Sender<Vec<f32>>,
        on_connected: bool,
    }

    impl StopFromCallback {
        fn stop_receiver(&self) {
            if let Some(receiver) = self.receiver.get().and_then(Weak::upgrade) {
                receiver.stop();
            }
        }
    }

    impl MotionConsumer for StopFromCallback {
        fn on_sample(&mut self, sample: Sample) {
            let _ = self.samples.send(sample.into_values());
            if !self.on_connected {
                self.stop_receiver();
            }
        }

        fn on_state_change(&mut self, state: ConnectionState) {
            if self.on_connected && state == ConnectionState::Connected {
                self.stop_receiver();
            }
        }
    }

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 49983))
    }

    fn remote() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50001))
    }

    fn receiver_with(consumer: impl MotionConsumer, timeout_secs: f64) -> (MotionReceiver, ChannelPeer) {
        let (factory, peer) = ChannelTransportFactory::new(local());
        let receiver = MotionReceiver::new(
            Arc::new(factory),
            Arc::new(TextDecoder::new(vec!["jawOpen".into()], 3)),
            consumer,
            MotionClock::new(),
            LivenessPolicy {
                data_timeout_secs: timeout_secs,
                reconnect_delay_secs: 0.05,
                poll_interval_ms: 5,
            },
        );
        (receiver, peer)
    }

    fn receiver(
        timeout_secs: f64,
    ) -> (MotionReceiver, ChannelPeer, mpsc::Receiver<Vec<f32>>) {
        let (tx, rx) = mpsc::channel();
        let (receiver, peer) = receiver_with(Forward(tx), timeout_secs);
        (receiver, peer, rx)
    }

    fn self_stopping_receiver(
        on_connected: bool,
    ) -> (Arc<MotionReceiver>, ChannelPeer, mpsc::Receiver<Vec<f32>>) {
        let slot: ReceiverSlot = Arc::new(OnceLock::new());
        let (tx, rx) = mpsc::channel();
        let consumer = StopFromCallback {
            receiver: Arc::clone(&slot),
            samples: tx,
            on_connected,
        };
        let (receiver, peer) = receiver_with(consumer, 5.0);
        let receiver = Arc::new(receiver);
        let _ = slot.set(Arc::downgrade(&receiver));
        (receiver, peer, rx)
    }

    fn reopen_failures(receiver: &MotionReceiver) -> usize {
        receiver
            .recent_events()
            .iter()
            .filter(|event| matches!(event.kind, ReceiverEventKind::ReopenFailed(_)))
            .count()
    }

    fn wait_for(receiver: &MotionReceiver, state: ConnectionState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if receiver.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_connect_receive_and_stop() {
        let (receiver, peer, samples) = receiver(5.0);
        assert_eq!(receiver.state(), ConnectionState::Disconnected);

        receiver.connect(None).unwrap();
        assert_eq!(receiver.state(), ConnectionState::Connecting);
        assert_eq!(receiver.local_addr(), Some(local()));

        assert!(peer.send(b"jawOpen&1|=4,5,6", remote()));
        let values = samples.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(values, vec![1.0, 4.0, 5.0, 6.0]);
        assert!(wait_for(&receiver, ConnectionState::Connected));

        receiver.stop();
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
        assert_eq!(receiver.local_addr(), None);
        receiver.stop();
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_silence_triggers_reconnect() {
        let (receiver, peer, samples) = receiver(0.1);
        receiver.connect(None).unwrap();

        peer.send(b"jawOpen&1|=4,5,6", remote());
        samples.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(wait_for(&receiver, ConnectionState::Connected));

        assert!(wait_for(&receiver, ConnectionState::Connecting));
        let deadline = Instant::now() + Duration::from_secs(2);
        while peer.opens() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(peer.opens() >= 2);

        // The fresh listener accepts data again
        peer.send(b"jawOpen&2|=4,5,6", remote());
        let values = samples.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(values[0], 2.0);
        receiver.stop();
    }

    #[test]
    fn test_bind_failure_is_synchronous() {
        let (receiver, peer, _samples) = receiver(1.0);
        peer.fail_next_opens(1);

        let result = receiver.connect(None);
        assert!(matches!(result, Err(RelayError::Bind { .. })));
        assert_eq!(receiver.state(), ConnectionState::Disconnected);

        receiver.connect(None).unwrap();
        assert_eq!(receiver.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_reconnect_replaces_listener() {
        let (receiver, peer, _samples) = receiver(1.0);
        receiver.connect(None).unwrap();
        receiver.connect(Some(remote())).unwrap();

        assert_eq!(peer.opens(), 2);
        assert_eq!(receiver.peer(), Some(remote()));
        assert_eq!(receiver.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_handshake_sent_on_connect() {
        let (receiver, peer, _samples) = receiver(1.0);
        let receiver = receiver.with_handshake(HandshakeConfig::new("MOTION_HELLO"));
        receiver.connect(Some(remote())).unwrap();

        let (token, to) = peer.recv_outbound(Duration::from_secs(2)).unwrap();
        assert_eq!(token, b"MOTION_HELLO".to_vec());
        assert_eq!(to, remote());
    }

    #[test]
    fn test_update_liveness_keeps_session() {
        let (receiver, peer, samples) = receiver(0.1);
        receiver.connect(None).unwrap();
        receiver.update_liveness(LivenessPolicy {
            data_timeout_secs: 30.0,
            reconnect_delay_secs: 0.05,
            poll_interval_ms: 5,
        });

        peer.send(b"jawOpen&1|=4,5,6", remote());
        samples.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(300));

        assert_eq!(receiver.state(), ConnectionState::Connected);
        assert_eq!(peer.opens(), 1);
    }

    #[test]
    fn test_stop_from_sample_callback() {
        let (receiver, peer, samples) = self_stopping_receiver(false);
        receiver.connect(None).unwrap();

        peer.send(b"jawOpen&1|=4,5,6", remote());
        assert_eq!(
            samples.recv_timeout(Duration::from_secs(2)).unwrap(),
            vec![1.0, 4.0, 5.0, 6.0]
        );
        assert!(wait_for(&receiver, ConnectionState::Disconnected));
        assert_eq!(receiver.local_addr(), None);

        peer.send(b"jawOpen&2|=4,5,6", remote());
        assert!(samples.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
        assert!(receiver
            .recent_events()
            .iter()
            .any(|event| event.kind == ReceiverEventKind::Stopped));
    }

    #[test]
    fn test_stop_from_state_callback() {
        let (receiver, peer, samples) = self_stopping_receiver(true);
        receiver.connect(None).unwrap();

        peer.send(b"jawOpen&1|=4,5,6", remote());
        assert!(wait_for(&receiver, ConnectionState::Disconnected));

        // The packet that connected is never delivered
        peer.send(b"jawOpen&2|=4,5,6", remote());
        assert!(samples.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
        assert_eq!(peer.opens(), 1);

        // A later connect starts over normally
        receiver.connect(None).unwrap();
        assert_eq!(receiver.state(), ConnectionState::Connecting);
        receiver.stop();
    }

    #[test]
    fn test_stop_while_reopen_is_failing() {
        let (receiver, peer, samples) = receiver(0.1);
        receiver.connect(None).unwrap();
        peer.send(b"jawOpen&1|=4,5,6", remote());
        samples.recv_timeout(Duration::from_secs(2)).unwrap();
        peer.fail_next_opens(1000);

        let deadline = Instant::now() + Duration::from_secs(3);
        while reopen_failures(&receiver) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(reopen_failures(&receiver) > 0);
        assert_eq!(receiver.state(), ConnectionState::Connecting);

        receiver.stop();
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
        assert_eq!(receiver.local_addr(), None);

        let failures = reopen_failures(&receiver);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(reopen_failures(&receiver), failures);
        assert_eq!(receiver.state(), ConnectionState::Disconnected);
        assert_eq!(peer.opens(), 1);
    }
}
