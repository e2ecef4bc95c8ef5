//! X-Plane UDP transport
//!
//! Subscribes every cell dataref with an `RREF\0` registration datagram
//! and decodes the inbound `RREF` response stream: repeated 8-byte
//! `(index: i32 LE, value: f32 LE)` records against the registration
//! table. All multi-byte values are little-endian regardless of host
//! byte order. Key presses go out as `CMND\0` command datagrams.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::device::Key;
use crate::sim::{
    ConnectionState, McduBuffers, SimAdapter, SimulatedMcdus, StateRecorder, NETWORK_BACKOFF,
};

use super::{apply_value, cell_subscriptions, key_command, DatarefSub};

/// Default X-Plane UDP port
pub const DEFAULT_PORT: u16 = 49000;

/// Requested updates per second for every subscription
const RREF_INTERVAL: i32 = 5;
/// Name field width in a registration datagram
const RREF_NAME_LEN: usize = 400;
/// Offset of the first inbound value record
const RREF_DATA_OFFSET: usize = 5;
/// Registrations go stale when a client stays quiet; re-send this often
const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(60);

/// Build one subscription datagram: `RREF\0`, interval, index, then the
/// zero-padded dataref name.
pub fn rref_subscribe_datagram(interval: i32, index: i32, name: &str) -> Vec<u8> {
    let mut dgram = BytesMut::with_capacity(5 + 4 + 4 + RREF_NAME_LEN);
    dgram.put_slice(b"RREF\0");
    dgram.put_i32_le(interval);
    dgram.put_i32_le(index);
    let name = name.as_bytes();
    dgram.put_slice(name);
    dgram.put_bytes(0, RREF_NAME_LEN - name.len().min(RREF_NAME_LEN));
    dgram.to_vec()
}

/// Build a command-activation datagram
pub fn cmnd_datagram(path: &str) -> Vec<u8> {
    let mut dgram = BytesMut::with_capacity(5 + path.len());
    dgram.put_slice(b"CMND\0");
    dgram.put_slice(path.as_bytes());
    dgram.to_vec()
}

/// Decode one inbound `RREF` datagram against the registration table,
/// applying each record to the seat buffers. Returns the number of
/// records applied. Malformed datagrams are dropped whole.
pub fn decode_rref(buf: &[u8], subs: &[DatarefSub], buffers: &McduBuffers) -> usize {
    if buf.len() < RREF_DATA_OFFSET || &buf[0..4] != b"RREF" {
        return 0;
    }
    let mut applied = 0;
    let mut i = RREF_DATA_OFFSET;
    while i + 8 <= buf.len() {
        let index = i32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let value = f32::from_le_bytes([buf[i + 4], buf[i + 5], buf[i + 6], buf[i + 7]]);
        if let Ok(slot) = usize::try_from(index) {
            if let Some(sub) = subs.get(slot) {
                apply_value(buffers, sub.target, value);
                applied += 1;
            }
        }
        i += 8;
    }
    applied
}

/// The X-Plane UDP adapter
pub struct XplaneUdpAdapter {
    base: SimulatedMcdus,
    addr: String,
    out_tx: Option<mpsc::UnboundedSender<String>>,
}

impl XplaneUdpAdapter {
    pub fn new(host: &str, port: u16, observer_present: bool) -> Self {
        Self {
            base: SimulatedMcdus::new(observer_present),
            addr: format!("{host}:{port}"),
            out_tx: None,
        }
    }
}

impl SimAdapter for XplaneUdpAdapter {
    fn mcdus(&self) -> &SimulatedMcdus {
        &self.base
    }

    fn mcdus_mut(&mut self) -> &mut SimulatedMcdus {
        &mut self.base
    }

    async fn reconnect(&mut self) {
        self.base.teardown().await;
        self.out_tx = None;
        self.base.record_state(ConnectionState::Connecting);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_connection(
            self.addr.clone(),
            self.base.buffers().clone(),
            self.base.state_recorder(),
            cancel_rx,
            out_rx,
        ));
        self.base.install_task(handle, cancel_tx);
        self.out_tx = Some(out_tx);
    }

    async fn disconnect(&mut self) {
        self.out_tx = None;
        self.base.teardown().await;
    }

    fn send_key(&mut self, key: Key, pressed: bool) {
        // Commands fire once, on the press edge
        if !pressed || self.base.state() != ConnectionState::Connected {
            return;
        }
        let Some(path) = key_command(self.base.selected_seat(), key) else {
            return;
        };
        if let Some(tx) = &self.out_tx {
            let _ = tx.send(path);
        }
    }
}

async fn run_connection(
    addr: String,
    buffers: McduBuffers,
    state: StateRecorder,
    mut cancel: watch::Receiver<bool>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    let subs = cell_subscriptions();
    let mut buf = vec![0u8; 4096];

    'outer: while !*cancel.borrow() {
        let sock = match connect(&addr).await {
            Ok(sock) => sock,
            Err(e) => {
                debug!("X-Plane UDP unreachable: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = subscribe_all(&sock, &subs).await {
            warn!("RREF registration failed: {e}");
            if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                break;
            }
            continue;
        }
        state.record(ConnectionState::Connected);

        let mut resub = tokio::time::interval(RESUBSCRIBE_INTERVAL);
        resub.tick().await; // immediate first tick is the registration above

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break 'outer;
                    }
                }
                received = sock.recv(&mut buf) => {
                    match received {
                        Ok(n) => {
                            if decode_rref(&buf[..n], &subs, &buffers) > 0 {
                                buffers.request_refresh();
                            }
                        }
                        Err(e) => {
                            debug!("UDP receive failed: {e}");
                            state.record(ConnectionState::Connecting);
                            if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                                break 'outer;
                            }
                            break;
                        }
                    }
                }
                cmd = out_rx.recv() => {
                    match cmd {
                        Some(path) => {
                            if let Err(e) = sock.send(&cmnd_datagram(&path)).await {
                                debug!("CMND send failed: {e}");
                            }
                        }
                        None => break 'outer,
                    }
                }
                _ = resub.tick() => {
                    if let Err(e) = subscribe_all(&sock, &subs).await {
                        debug!("RREF re-registration failed: {e}");
                    }
                }
            }
        }
    }

    state.record(ConnectionState::Disconnected);
}

async fn connect(addr: &str) -> std::io::Result<UdpSocket> {
    let sock = UdpSocket::bind("0.0.0.0:0").await?;
    sock.connect(addr).await?;
    Ok(sock)
}

/// Register every subscription, one padded datagram each
async fn subscribe_all(sock: &UdpSocket, subs: &[DatarefSub]) -> std::io::Result<()> {
    for (index, sub) in subs.iter().enumerate() {
        sock.send(&rref_subscribe_datagram(RREF_INTERVAL, index as i32, &sub.name))
            .await?;
    }
    Ok(())
}

/// Sleep for `wait`, returning early (true) when cancelled
async fn wait_or_cancelled(cancel: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = cancel.changed() => *cancel.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CduColor;
    use crate::device::Seat;
    use crate::sim::xplane::DatarefTarget;

    #[test]
    fn test_subscribe_datagram_layout() {
        let dgram = rref_subscribe_datagram(5, 42, "AirbusFBW/MCDU1titlew[0]");
        assert_eq!(dgram.len(), 413);
        assert_eq!(&dgram[0..5], b"RREF\0");
        assert_eq!(i32::from_le_bytes(dgram[5..9].try_into().unwrap()), 5);
        assert_eq!(i32::from_le_bytes(dgram[9..13].try_into().unwrap()), 42);
        assert_eq!(&dgram[13..37], b"AirbusFBW/MCDU1titlew[0]");
        assert_eq!(dgram[37], 0);
        assert_eq!(dgram[412], 0);
    }

    #[test]
    fn test_cmnd_datagram() {
        let dgram = cmnd_datagram("AirbusFBW/MCDU1LSK1L");
        assert_eq!(&dgram[0..5], b"CMND\0");
        assert_eq!(&dgram[5..], b"AirbusFBW/MCDU1LSK1L");
    }

    /// The registration-table scenario: index 1 registered as
    /// `AirbusFBW/MCDU1titlew[0]`, one `(1, 3.14)` record, exactly one
    /// cell update with char code 3 at the mapped position, white style.
    #[test]
    fn test_decode_rref_scenario() {
        let subs = vec![
            DatarefSub {
                name: "AirbusFBW/MCDU1spw[0]".into(),
                target: DatarefTarget::Cell {
                    seat: Seat::Captain,
                    line: 13,
                    col: 0,
                    color: CduColor::White,
                    small: false,
                },
            },
            DatarefSub {
                name: "AirbusFBW/MCDU1titlew[0]".into(),
                target: DatarefTarget::Cell {
                    seat: Seat::Captain,
                    line: 0,
                    col: 0,
                    color: CduColor::White,
                    small: false,
                },
            },
        ];
        let buffers = McduBuffers::new(false);

        let mut packet = Vec::new();
        packet.extend_from_slice(b"RREF\0");
        packet.extend_from_slice(&1i32.to_le_bytes());
        packet.extend_from_slice(&3.14f32.to_le_bytes());

        assert_eq!(decode_rref(&packet, &subs, &buffers), 1);
        let buf = buffers.seat(Seat::Captain);
        assert_eq!(buf.screen.get(0, 0).unwrap().ch as u32, 3);
        assert_eq!(buf.screen.get(0, 0).unwrap().color, CduColor::White);
        // The other registration stayed untouched
        assert_eq!(buf.screen.get(13, 0).unwrap().ch, ' ');
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let buffers = McduBuffers::new(false);
        assert_eq!(decode_rref(b"JUNK", &[], &buffers), 0);
        assert_eq!(decode_rref(b"RREF\0\x01\x02", &[], &buffers), 0);
        // Out-of-table indices are skipped, not errors
        let mut packet = Vec::new();
        packet.extend_from_slice(b"RREF\0");
        packet.extend_from_slice(&99i32.to_le_bytes());
        packet.extend_from_slice(&1.0f32.to_le_bytes());
        assert_eq!(decode_rref(&packet, &[], &buffers), 0);
    }

    #[tokio::test]
    async fn test_reconnect_is_idempotent() {
        let mut adapter = XplaneUdpAdapter::new("127.0.0.1", DEFAULT_PORT, false);
        adapter.reconnect().await;
        assert!(adapter.base.has_running_task());
        // A second reconnect tears the first task down and starts fresh
        adapter.reconnect().await;
        assert!(adapter.base.has_running_task());
        adapter.disconnect().await;
        assert!(!adapter.base.has_running_task());
        assert_eq!(adapter.base.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_key_while_disconnected_is_noop() {
        let mut adapter = XplaneUdpAdapter::new("127.0.0.1", DEFAULT_PORT, false);
        // Must not panic and must not enqueue anything
        adapter.send_key(Key::LineSelectLeft1, true);
        assert!(adapter.out_tx.is_none());
    }
}
