use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use log::{info, warn};

use crate::channels::{ChannelHandle, Transmit};
use crate::command::CommandRouter;
use crate::error::{TelemetryError, TelemetryResult};
use crate::types::TelemetrySnapshot;

/// Wire size of `TelemetryRecord`.
pub const RECORD_SIZE: usize = 56;
const MAX_WRITE_LEN: usize = 512;

/// Fourteen `f32`s in a fixed order with no version field:
/// `[ax, ay, az, gx, gy, gz, gyro_roll, gyro_pitch, gyro_yaw,
///   fusion_roll, fusion_pitch, fusion_yaw, temperature_c, time_sec]`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TelemetryRecord {
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
    pub gyro_roll: f32,
    pub gyro_pitch: f32,
    pub gyro_yaw: f32,
    pub fusion_roll: f32,
    pub fusion_pitch: f32,
    pub fusion_yaw: f32,
    pub temperature_c: f32,
    pub time_sec: f32,
}

const _: () = assert!(std::mem::size_of::<TelemetryRecord>() == RECORD_SIZE);

impl From<&TelemetrySnapshot> for TelemetryRecord {
    fn from(s: &TelemetrySnapshot) -> Self {
        Self {
            ax: s.accel.x,
            ay: s.accel.y,
            az: s.accel.z,
            gx: s.gyro.x,
            gy: s.gyro.y,
            gz: s.gyro.z,
            gyro_roll: s.accumulated_gyro.roll,
            gyro_pitch: s.accumulated_gyro.pitch,
            gyro_yaw: s.accumulated_gyro.yaw,
            fusion_roll: s.fusion.roll,
            fusion_pitch: s.fusion.pitch,
            fusion_yaw: s.fusion.yaw,
            temperature_c: s.temperature_c,
            time_sec: s.time_sec,
        }
    }
}

impl TelemetryRecord {
    /// Native byte order; every supported host is little-endian.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    pub fn fields(&self) -> [f32; 14] {
        bytemuck::cast(*self)
    }
}

/// Shared "peer connected" condition. Channels registered with
/// `suppress_while_connected` are switched off the moment a peer connects and
/// back on when it leaves.
#[derive(Clone, Debug, Default)]
pub struct ConnectionFlag {
    connected: Arc<AtomicBool>,
    suppressed: Arc<Mutex<Vec<ChannelHandle>>>,
}

impl ConnectionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, connected: bool) {
        let suppressed = self
            .suppressed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.connected.store(connected, Ordering::Release);
        for channel in suppressed.iter() {
            channel.set_active(!connected);
        }
    }

    pub fn get(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn suppress_while_connected(&self, channel: ChannelHandle) {
        let mut suppressed = self
            .suppressed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channel.set_active(!self.get());
        suppressed.push(channel);
    }
}

/// Notification-style link: one peer at a time, records pushed to it,
/// control writes pulled from it.
pub trait NotifyLink: Send + 'static {
    fn connection(&self) -> ConnectionFlag;

    fn is_connected(&self) -> bool {
        self.connection().get()
    }

    fn notify(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Control writes received since the last poll, one payload each.
    fn poll_writes(&mut self) -> io::Result<Vec<Vec<u8>>>;
}

pub struct WirelessTransmitter<L: NotifyLink> {
    link: L,
    router: CommandRouter,
}

impl<L: NotifyLink> WirelessTransmitter<L> {
    pub fn new(link: L, router: CommandRouter) -> Self {
        Self { link, router }
    }

    pub fn connection(&self) -> ConnectionFlag {
        self.link.connection()
    }
}

impl<L: NotifyLink> Transmit for WirelessTransmitter<L> {
    fn transmit(&mut self, snapshot: &TelemetrySnapshot) -> TelemetryResult<()> {
        for payload in self.link.poll_writes()? {
            self.router.dispatch(&payload);
        }

        if self.link.is_connected() {
            let record = TelemetryRecord::from(snapshot);
            self.link.notify(record.as_bytes())?;
        }
        Ok(())
    }
}

/// Host stand-in for a notify characteristic: the last UDP peer to send a
/// datagram is the connected central until it goes quiet for `timeout`.
pub struct UdpNotifyLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    last_seen: Instant,
    timeout: Duration,
    connection: ConnectionFlag,
}

impl UdpNotifyLink {
    pub fn bind<A: ToSocketAddrs>(addr: A, timeout: Duration) -> TelemetryResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        info!("Wireless link listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            peer: None,
            last_seen: Instant::now(),
            timeout,
            connection: ConnectionFlag::new(),
        })
    }

    pub fn local_addr(&self) -> TelemetryResult<SocketAddr> {
        self.socket.local_addr().map_err(TelemetryError::from)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn expire_peer(&mut self) {
        if let Some(peer) = self.peer {
            if self.last_seen.elapsed() > self.timeout {
                info!("Wireless peer {} timed out", peer);
                self.peer = None;
                self.connection.set(false);
            }
        }
    }
}

impl NotifyLink for UdpNotifyLink {
    fn connection(&self) -> ConnectionFlag {
        self.connection.clone()
    }

    fn notify(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.peer {
            Some(peer) => self.socket.send_to(payload, peer).map(|_| ()),
            None => Ok(()),
        }
    }

    fn poll_writes(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let mut writes = Vec::new();
        let mut buf = [0u8; MAX_WRITE_LEN];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    if self.peer != Some(src) {
                        if let Some(old) = self.peer {
                            warn!("Wireless peer {} replaced by {}", old, src);
                        } else {
                            info!("Wireless peer connected: {}", src);
                        }
                        self.peer = Some(src);
                        self.connection.set(true);
                    }
                    self.last_seen = Instant::now();
                    if len > 0 {
                        writes.push(buf[..len].to_vec());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        self.expire_peer();
        Ok(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;
    use crate::command::Command;
    use crate::processor::ProcessorHandle;
    use crate::types::{Axes, EulerAngles};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLink {
        connection: ConnectionFlag,
        inbound: Vec<Vec<u8>>,
        notified: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl NotifyLink for FakeLink {
        fn connection(&self) -> ConnectionFlag {
            self.connection.clone()
        }

        fn notify(&mut self, payload: &[u8]) -> io::Result<()> {
            self.notified.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        fn poll_writes(&mut self) -> io::Result<Vec<Vec<u8>>> {
            Ok(std::mem::take(&mut self.inbound))
        }
    }

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            accel: Axes::new(0.1, 0.2, 0.98),
            gyro: Axes::new(1.0, 2.0, 3.0),
            accumulated_gyro: EulerAngles {
                roll: 4.0,
                pitch: 5.0,
                yaw: 6.0,
            },
            fusion: EulerAngles {
                roll: 7.0,
                pitch: 8.0,
                yaw: 9.0,
            },
            temperature_c: 31.5,
            time_sec: 12.25,
        }
    }

    #[test]
    fn test_record_layout() {
        let record = TelemetryRecord::from(&snapshot());
        let bytes = record.as_bytes();
        assert_eq!(bytes.len(), RECORD_SIZE);

        let fields = record.fields();
        assert_eq!(
            fields,
            [0.1, 0.2, 0.98, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 31.5, 12.25]
        );
        // fusion yaw is the 12th field
        assert_eq!(&bytes[44..48], &9.0_f32.to_ne_bytes());
        assert_eq!(TelemetryRecord::from_bytes(bytes), Some(record));
        assert_eq!(TelemetryRecord::from_bytes(&bytes[..40]), None);
    }

    #[test]
    fn test_no_notify_without_peer() {
        let (handle, _rx) = ProcessorHandle::detached();
        let link = FakeLink::default();
        let notified = Arc::clone(&link.notified);
        let mut tx = WirelessTransmitter::new(link, CommandRouter::new(handle, "wireless"));

        tx.transmit(&snapshot()).unwrap();
        assert!(notified.lock().unwrap().is_empty());

        tx.connection().set(true);
        tx.transmit(&snapshot()).unwrap();
        assert_eq!(notified.lock().unwrap().len(), 1);
        assert_eq!(notified.lock().unwrap()[0].len(), RECORD_SIZE);
    }

    struct Sink;

    impl Transmit for Sink {
        fn transmit(&mut self, _snapshot: &TelemetrySnapshot) -> TelemetryResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_connect_switches_suppressed_channel_immediately() {
        let connection = ConnectionFlag::new();
        let serial = Channel::new("serial", Sink, Duration::from_millis(10));
        connection.suppress_while_connected(serial.handle());
        assert!(serial.is_active());

        connection.set(true);
        assert!(!serial.is_active());
        connection.set(false);
        assert!(serial.is_active());
    }

    #[test]
    fn test_udp_connect_and_timeout_toggle_suppressed_channel() {
        let mut link = UdpNotifyLink::bind("127.0.0.1:0", Duration::from_millis(20)).unwrap();
        let serial = Channel::new("serial", Sink, Duration::from_millis(10));
        link.connection().suppress_while_connected(serial.handle());

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"hello", link.local_addr().unwrap()).unwrap();
        poll_until_connected(&mut link);
        assert!(!serial.is_active());

        std::thread::sleep(Duration::from_millis(40));
        link.poll_writes().unwrap();
        assert!(serial.is_active());
    }

    #[test]
    fn test_control_writes_routed() {
        let (handle, rx) = ProcessorHandle::detached();
        let link = FakeLink {
            inbound: vec![b" reset_gyro\r\n".to_vec(), b"NOPE".to_vec()],
            ..Default::default()
        };
        let mut tx = WirelessTransmitter::new(link, CommandRouter::new(handle, "wireless"));
        tx.transmit(&snapshot()).unwrap();

        let commands: Vec<Command> = rx.try_iter().collect();
        assert_eq!(commands, vec![Command::ResetGyro]);
    }

    fn poll_until_connected(link: &mut UdpNotifyLink) -> Vec<Vec<u8>> {
        for _ in 0..200 {
            let writes = link.poll_writes().unwrap();
            if link.is_connected() {
                return writes;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("peer never connected");
    }

    #[test]
    fn test_udp_peer_connects_and_receives() {
        let mut link = UdpNotifyLink::bind("127.0.0.1:0", Duration::from_secs(3)).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        client
            .send_to(b"RESET_GYRO", link.local_addr().unwrap())
            .unwrap();

        let writes = poll_until_connected(&mut link);
        assert_eq!(writes, vec![b"RESET_GYRO".to_vec()]);
        assert_eq!(link.peer(), Some(client.local_addr().unwrap()));

        let record = TelemetryRecord::from(&snapshot());
        link.notify(record.as_bytes()).unwrap();
        let mut buf = [0u8; 128];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(len, RECORD_SIZE);
        assert_eq!(TelemetryRecord::from_bytes(&buf[..len]), Some(record));
    }

    #[test]
    fn test_udp_peer_times_out() {
        let mut link = UdpNotifyLink::bind("127.0.0.1:0", Duration::from_millis(20)).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"", link.local_addr().unwrap()).unwrap();

        let writes = poll_until_connected(&mut link);
        assert!(writes.is_empty());

        std::thread::sleep(Duration::from_millis(40));
        link.poll_writes().unwrap();
        assert!(!link.is_connected());
        assert_eq!(link.peer(), None);
    }
}
