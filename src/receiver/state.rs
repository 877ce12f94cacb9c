use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;

/// Connection lifecycle of a [`MotionReceiver`](super::MotionReceiver)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReceiverEventKind {
    Listening(SocketAddr),
    StateChanged(ConnectionState),
    HandshakeSent(SocketAddr),
    DecodeFailed(String),
    ForeignPeer(SocketAddr),
    TransportFault(String),
    WatchdogExpired,
    ReopenFailed(String),
    Stopped,
}

/// One entry in the receiver's event log, stamped in clock seconds
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiverEvent {
    pub at: f64,
    pub kind: ReceiverEventKind,
}

/// Bounded history of recent receiver events
pub struct EventLog {
    events: VecDeque<ReceiverEvent>,
    capacity: usize,
}

pub const EVENT_LOG_CAPACITY: usize = 64;

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, at: f64, kind: ReceiverEventKind) {
        self.events.push_back(ReceiverEvent { at, kind });
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ReceiverEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

/// Observable status shared between a receiver and its session worker
#[derive(Default)]
pub struct ReceiverStatus {
    state: Mutex<ConnectionState>,
    local_addr: Mutex<Option<SocketAddr>>,
    events: Mutex<EventLog>,
}

impl ReceiverStatus {
    pub fn state(&self) -> ConnectionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Returns true when the state actually changed
    pub(crate) fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let changed = *state != next;
        *state = next;
        changed
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    pub(crate) fn set_local_addr(&self, addr: Option<SocketAddr>) {
        if let Ok(mut current) = self.local_addr.lock() {
            *current = addr;
        }
    }

    pub(crate) fn record(&self, at: f64, kind: ReceiverEventKind) {
        if let Ok(mut events) = self.events.lock() {
            events.record(at, kind);
        }
    }

    pub fn events(&self) -> Vec<ReceiverEvent> {
        match self.events.lock() {
            Ok(events) => events.snapshot(),
            Err(_) => Vec::new(),
        }
    }
}
