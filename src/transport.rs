use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// UDP receive buffer size
pub const DATAGRAM_BUFFER: usize = 65536;

/// One open listener for the lifetime of a single session
///
/// Dropping it closes the underlying socket.
pub trait Transport: Send {
    /// Wait up to the poll interval for one datagram
    ///
    /// `Ok(None)` means nothing arrived; `Err` is a transport fault.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Creates a fresh listener for every (re)connect
pub trait TransportFactory: Send + Sync {
    fn open(&self, poll_interval: Duration) -> io::Result<Box<dyn Transport>>;

    /// Address the factory binds to, for error messages
    fn bind_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct UdpTransportFactory {
    bind_addr: SocketAddr,
}

impl UdpTransportFactory {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

impl TransportFactory for UdpTransportFactory {
    fn open(&self, poll_interval: Duration) -> io::Result<Box<dyn Transport>> {
        let socket = UdpSocket::bind(self.bind_addr)?;
        socket.set_read_timeout(Some(poll_interval.max(Duration::from_millis(1))))?;
        Ok(Box::new(UdpTransport { socket }))
    }

    fn bind_addr(&self) -> Option<SocketAddr> {
        Some(self.bind_addr)
    }
}

struct UdpTransport {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.socket.send_to(bytes, addr).map(|_| ())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

enum Inbound {
    Datagram(Vec<u8>, SocketAddr),
    Fault(io::ErrorKind),
}

/// In-memory transport for loopback wiring and tests
///
/// Every `open` creates a new channel, so datagrams injected through the
/// [`ChannelPeer`] only reach the most recently opened transport.
pub struct ChannelTransportFactory {
    shared: Arc<ChannelShared>,
}

/// Remote end of a [`ChannelTransportFactory`]
#[derive(Clone)]
pub struct ChannelPeer {
    shared: Arc<ChannelShared>,
}

struct ChannelShared {
    local_addr: SocketAddr,
    inbound: Mutex<Option<Sender<Inbound>>>,
    outbound_tx: Mutex<Sender<(Vec<u8>, SocketAddr)>>,
    outbound_rx: Mutex<Receiver<(Vec<u8>, SocketAddr)>>,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    failing_sends: Arc<AtomicBool>,
}

impl ChannelTransportFactory {
    pub fn new(local_addr: SocketAddr) -> (Self, ChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let shared = Arc::new(ChannelShared {
            local_addr,
            inbound: Mutex::new(None),
            outbound_tx: Mutex::new(outbound_tx),
            outbound_rx: Mutex::new(outbound_rx),
            opens: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
            failing_sends: Arc::new(AtomicBool::new(false)),
        });
        let peer = ChannelPeer {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, peer)
    }
}

impl TransportFactory for ChannelTransportFactory {
    fn open(&self, poll_interval: Duration) -> io::Result<Box<dyn Transport>> {
        let failing = self.shared.failing_opens.load(Ordering::Acquire);
        if failing > 0 {
            self.shared.failing_opens.store(failing - 1, Ordering::Release);
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "simulated bind failure"));
        }

        let (sender, receiver) = mpsc::channel();
        if let Ok(mut inbound) = self.shared.inbound.lock() {
            *inbound = Some(sender);
        }
        let outbound = match self.shared.outbound_tx.lock() {
            Ok(tx) => tx.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        self.shared.opens.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(ChannelTransport {
            local_addr: self.shared.local_addr,
            inbound: receiver,
            outbound,
            poll_interval,
            failing_sends: Arc::clone(&self.shared.failing_sends),
        }))
    }

    fn bind_addr(&self) -> Option<SocketAddr> {
        Some(self.shared.local_addr)
    }
}

impl ChannelPeer {
    /// Deliver a datagram to the currently open transport
    pub fn send(&self, bytes: &[u8], from: SocketAddr) -> bool {
        self.inject(Inbound::Datagram(bytes.to_vec(), from))
    }

    /// Make the currently open transport report an error
    pub fn fault(&self, kind: io::ErrorKind) -> bool {
        self.inject(Inbound::Fault(kind))
    }

    fn inject(&self, message: Inbound) -> bool {
        match self.shared.inbound.lock() {
            Ok(inbound) => match inbound.as_ref() {
                Some(sender) => sender.send(message).is_ok(),
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Next datagram the receiver sent, if any
    pub fn recv_outbound(&self, timeout: Duration) -> Option<(Vec<u8>, SocketAddr)> {
        let rx = self.shared.outbound_rx.lock().ok()?;
        rx.recv_timeout(timeout).ok()
    }

    /// How many listeners have been opened so far
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::Acquire)
    }

    /// Fail the next `count` opens as if the port were taken
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.failing_opens.store(count, Ordering::Release);
    }

    /// Make every send fail, as if the peer's network were unreachable
    pub fn fail_sends(&self, failing: bool) {
        self.shared.failing_sends.store(failing, Ordering::Release);
    }
}

struct ChannelTransport {
    local_addr: SocketAddr,
    inbound: Receiver<Inbound>,
    outbound: Sender<(Vec<u8>, SocketAddr)>,
    poll_interval: Duration,
    failing_sends: Arc<AtomicBool>,
}

impl Transport for ChannelTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inbound.recv_timeout(self.poll_interval) {
            Ok(Inbound::Datagram(bytes, from)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(Some((len, from)))
            }
            Ok(Inbound::Fault(kind)) => Err(io::Error::new(kind, "simulated transport fault")),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "listener replaced",
            )),
        }
    }

    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        if self.failing_sends.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "peer unreachable"));
        }
        self.outbound
            .send((bytes.to_vec(), addr))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_channel_reaches_latest_open() {
        let (factory, peer) = ChannelTransportFactory::new(addr(5000));
        let mut first = factory.open(Duration::from_millis(10)).unwrap();
        let mut second = factory.open(Duration::from_millis(10)).unwrap();
        assert_eq!(peer.opens(), 2);

        assert!(peer.send(b"hello", addr(6000)));
        let mut buf = [0u8; 16];
        assert_eq!(second.recv(&mut buf).unwrap(), Some((5, addr(6000))));
        assert_eq!(&buf[..5], b"hello");

        // The replaced listener is cut off
        assert!(first.recv(&mut buf).is_err());
    }

    #[test]
    fn test_channel_fault_and_timeout() {
        let (factory, peer) = ChannelTransportFactory::new(addr(5000));
        let mut transport = factory.open(Duration::from_millis(5)).unwrap();
        let mut buf = [0u8; 16];

        assert_eq!(transport.recv(&mut buf).unwrap(), None);
        peer.fault(io::ErrorKind::ConnectionReset);
        assert_eq!(
            transport.recv(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
    }

    #[test]
    fn test_channel_outbound_and_bind_failure() {
        let (factory, peer) = ChannelTransportFactory::new(addr(5000));
        peer.fail_next_opens(1);
        assert!(factory.open(Duration::from_millis(5)).is_err());

        let mut transport = factory.open(Duration::from_millis(5)).unwrap();
        transport.send_to(b"HELLO", addr(7000)).unwrap();
        assert_eq!(
            peer.recv_outbound(Duration::from_millis(100)),
            Some((b"HELLO".to_vec(), addr(7000)))
        );
    }

    #[test]
    fn test_udp_recv_times_out() {
        let factory = UdpTransportFactory::new(addr(0));
        let mut transport = factory.open(Duration::from_millis(5)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(transport.recv(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_udp_receives_datagram() {
        let factory = UdpTransportFactory::new(addr(0));
        let mut transport = factory.open(Duration::from_millis(200)).unwrap();
        let target = transport.local_addr().unwrap();

        let sender = UdpSocket::bind(addr(0)).unwrap();
        sender.send_to(b"abc", target).unwrap();

        let mut buf = [0u8; DATAGRAM_BUFFER];
        let (len, from) = transport.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"abc");
        assert_eq!(from, sender.local_addr().unwrap());
    }
}
