//! Simulator adapters
//!
//! One shared base ([`SimulatedMcdus`]) holding two or three per-seat
//! screen/LED buffers plus connection-state bookkeeping, and one
//! concrete adapter per wire protocol:
//! - graphql: GraphQL subscriptions over websocket
//! - jsonws: raw JSON websocket feed
//! - xplane::udp / xplane::rest / xplane::ws: the three X-Plane transports
//!
//! Adapters translate their native wire format into writes against the
//! seat buffers; the bridge copies the selected seat out to the device.

pub mod graphql;
pub mod jsonws;
pub mod xplane;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::core::{Leds, Screen};
use crate::device::{DeviceFamily, Key, Seat};

pub use graphql::GraphqlAdapter;
pub use jsonws::JsonWsAdapter;
pub use xplane::rest::XplaneRestAdapter;
pub use xplane::udp::XplaneUdpAdapter;
pub use xplane::ws::XplaneWsAdapter;

/// Connection lifecycle of one adapter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Backoff after a network-reachability failure
pub const NETWORK_BACKOFF: Duration = Duration::from_secs(5);
/// Backoff after a protocol-level (websocket) failure
pub const PROTOCOL_BACKOFF: Duration = Duration::from_secs(1);
/// How long teardown waits for a connection task to observe cancellation
pub const TEARDOWN_WAIT: Duration = Duration::from_secs(5);

/// One simulated seat's display state: a screen and its LED bank,
/// independent of which physical device eventually shows it.
#[derive(Debug, Clone, Default)]
pub struct SimulatorMcduBuffer {
    pub screen: Screen,
    pub leds: Leds,
}

struct BuffersInner {
    captain: Mutex<SimulatorMcduBuffer>,
    first_officer: Mutex<SimulatorMcduBuffer>,
    observer: Option<Mutex<SimulatorMcduBuffer>>,
    refresh: Notify,
}

/// Shared handle to the per-seat buffers.
///
/// Each seat buffer has exactly one writer (its adapter's inbound
/// channel); readers copy the whole buffer under the seat lock, so a
/// late pixel is the worst a race can produce.
#[derive(Clone)]
pub struct McduBuffers {
    inner: Arc<BuffersInner>,
}

impl McduBuffers {
    pub fn new(observer_present: bool) -> Self {
        Self {
            inner: Arc::new(BuffersInner {
                captain: Mutex::new(SimulatorMcduBuffer::default()),
                first_officer: Mutex::new(SimulatorMcduBuffer::default()),
                observer: observer_present.then(|| Mutex::new(SimulatorMcduBuffer::default())),
                refresh: Notify::new(),
            }),
        }
    }

    /// Whether an observer seat buffer exists
    pub fn observer_present(&self) -> bool {
        self.inner.observer.is_some()
    }

    /// Lock one seat's buffer. An absent observer seat falls back to
    /// the captain's buffer.
    pub fn seat(&self, seat: Seat) -> MutexGuard<'_, SimulatorMcduBuffer> {
        let m = match seat {
            Seat::Captain => &self.inner.captain,
            Seat::FirstOfficer => &self.inner.first_officer,
            Seat::Observer => self.inner.observer.as_ref().unwrap_or(&self.inner.captain),
        };
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy one seat's whole buffer out
    pub fn snapshot(&self, seat: Seat) -> SimulatorMcduBuffer {
        self.seat(seat).clone()
    }

    /// Signal that the physical display should be re-painted
    pub fn request_refresh(&self) {
        self.inner.refresh.notify_one();
    }

    /// Wait for the next refresh signal
    pub async fn refresh_requested(&self) {
        self.inner.refresh.notified().await;
    }
}

/// A running connection: its background task and cancel signal
struct ConnectionTask {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

/// Cloneable handle a connection task uses to record state transitions.
/// Observers are notified exactly when the value changes.
#[derive(Clone)]
pub struct StateRecorder(watch::Sender<ConnectionState>);

impl StateRecorder {
    pub fn record(&self, state: ConnectionState) {
        let changed = self.0.send_if_modified(|cur| {
            if *cur == state {
                false
            } else {
                *cur = state;
                true
            }
        });
        if changed {
            info!("Connection state -> {state:?}");
        }
    }
}

/// The shared adapter base: per-seat buffers, seat selection and the
/// connection-state machine. Each concrete adapter embeds one.
pub struct SimulatedMcdus {
    buffers: McduBuffers,
    selected_tx: watch::Sender<Seat>,
    state_tx: watch::Sender<ConnectionState>,
    task: Option<ConnectionTask>,
}

impl SimulatedMcdus {
    pub fn new(observer_present: bool) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (selected_tx, _) = watch::channel(Seat::Captain);
        Self {
            buffers: McduBuffers::new(observer_present),
            selected_tx,
            state_tx,
            task: None,
        }
    }

    pub fn buffers(&self) -> &McduBuffers {
        &self.buffers
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Record a state transition. Observers are notified exactly when
    /// the value differs from the previous one, after the field has
    /// been updated.
    pub fn record_state(&self, state: ConnectionState) {
        self.state_recorder().record(state);
    }

    /// A cloneable recorder for connection tasks
    pub fn state_recorder(&self) -> StateRecorder {
        StateRecorder(self.state_tx.clone())
    }

    /// The seat currently mirrored onto the physical display
    pub fn selected_seat(&self) -> Seat {
        *self.selected_tx.borrow()
    }

    /// Subscribe to seat-selection changes. Connection tasks use this
    /// to poll the visible seat faster than the hidden one.
    pub fn watch_selected_seat(&self) -> watch::Receiver<Seat> {
        self.selected_tx.subscribe()
    }

    /// Cycle the selected seat: captain -> first officer -> observer
    /// (when present) -> captain. Always requests an immediate re-copy
    /// of the newly selected seat, even absent new simulator data.
    pub fn advance_selected_seat(&mut self) -> Seat {
        let next = match (self.selected_seat(), self.buffers.observer_present()) {
            (Seat::Captain, _) => Seat::FirstOfficer,
            (Seat::FirstOfficer, true) => Seat::Observer,
            (Seat::FirstOfficer, false) => Seat::Captain,
            (Seat::Observer, _) => Seat::Captain,
        };
        self.selected_tx.send_replace(next);
        info!("Selected seat -> {next:?}");
        self.buffers.request_refresh();
        next
    }

    /// Install a freshly spawned connection task. Any previous task
    /// must have been torn down first.
    pub fn install_task(&mut self, handle: JoinHandle<()>, cancel: watch::Sender<bool>) {
        debug_assert!(self.task.is_none());
        self.task = Some(ConnectionTask { handle, cancel });
    }

    /// Whether a connection task is currently running
    pub fn has_running_task(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    /// Tear down the current connection, if any: signal cancellation,
    /// wait a bounded time for the task to exit, abort on timeout
    /// (best effort, proceed anyway).
    pub async fn teardown(&mut self) {
        let Some(task) = self.task.take() else { return };
        self.record_state(ConnectionState::Disconnecting);
        let _ = task.cancel.send(true);
        let abort = task.handle.abort_handle();
        match tokio::time::timeout(TEARDOWN_WAIT, task.handle).await {
            Ok(_) => debug!("Connection task ended"),
            Err(_) => {
                warn!("Connection task ignored cancellation; aborting");
                abort.abort();
            }
        }
        self.record_state(ConnectionState::Disconnected);
    }
}

/// The uniform buffer-and-reconnect contract every adapter implements
pub trait SimAdapter {
    /// The shared base
    fn mcdus(&self) -> &SimulatedMcdus;
    fn mcdus_mut(&mut self) -> &mut SimulatedMcdus;

    /// Tear down any existing connection and establish a new one.
    /// Idempotent and safe to call repeatedly; transport failures are
    /// absorbed into timed retries, never returned.
    async fn reconnect(&mut self);

    /// Tear down and stay disconnected
    async fn disconnect(&mut self);

    /// Forward a key transition to the simulator. A silent no-op while
    /// disconnected: nothing is enqueued, nothing fails.
    fn send_key(&mut self, key: Key, pressed: bool);

    /// The device family whose key set this simulator expects
    fn native_family(&self) -> DeviceFamily {
        DeviceFamily::Mcdu
    }
}

/// Concrete adapter dispatch for the binary
pub enum Simulator {
    Graphql(GraphqlAdapter),
    JsonWs(JsonWsAdapter),
    XplaneUdp(XplaneUdpAdapter),
    XplaneRest(XplaneRestAdapter),
    XplaneWs(XplaneWsAdapter),
}

impl Simulator {
    pub fn mcdus(&self) -> &SimulatedMcdus {
        match self {
            Simulator::Graphql(a) => a.mcdus(),
            Simulator::JsonWs(a) => a.mcdus(),
            Simulator::XplaneUdp(a) => a.mcdus(),
            Simulator::XplaneRest(a) => a.mcdus(),
            Simulator::XplaneWs(a) => a.mcdus(),
        }
    }

    pub fn mcdus_mut(&mut self) -> &mut SimulatedMcdus {
        match self {
            Simulator::Graphql(a) => a.mcdus_mut(),
            Simulator::JsonWs(a) => a.mcdus_mut(),
            Simulator::XplaneUdp(a) => a.mcdus_mut(),
            Simulator::XplaneRest(a) => a.mcdus_mut(),
            Simulator::XplaneWs(a) => a.mcdus_mut(),
        }
    }

    pub async fn reconnect(&mut self) {
        match self {
            Simulator::Graphql(a) => a.reconnect().await,
            Simulator::JsonWs(a) => a.reconnect().await,
            Simulator::XplaneUdp(a) => a.reconnect().await,
            Simulator::XplaneRest(a) => a.reconnect().await,
            Simulator::XplaneWs(a) => a.reconnect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        match self {
            Simulator::Graphql(a) => a.disconnect().await,
            Simulator::JsonWs(a) => a.disconnect().await,
            Simulator::XplaneUdp(a) => a.disconnect().await,
            Simulator::XplaneRest(a) => a.disconnect().await,
            Simulator::XplaneWs(a) => a.disconnect().await,
        }
    }

    pub fn send_key(&mut self, key: Key, pressed: bool) {
        match self {
            Simulator::Graphql(a) => a.send_key(key, pressed),
            Simulator::JsonWs(a) => a.send_key(key, pressed),
            Simulator::XplaneUdp(a) => a.send_key(key, pressed),
            Simulator::XplaneRest(a) => a.send_key(key, pressed),
            Simulator::XplaneWs(a) => a.send_key(key, pressed),
        }
    }

    pub fn native_family(&self) -> DeviceFamily {
        match self {
            Simulator::Graphql(a) => a.native_family(),
            Simulator::JsonWs(a) => a.native_family(),
            Simulator::XplaneUdp(a) => a.native_family(),
            Simulator::XplaneRest(a) => a.native_family(),
            Simulator::XplaneWs(a) => a.native_family(),
        }
    }
}

/// Classify a websocket connect/stream error into its retry backoff:
/// network-reachability failures wait longer than protocol-level ones.
pub(crate) fn ws_error_backoff(err: &tokio_tungstenite::tungstenite::Error) -> Duration {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Io(_) | Error::Url(_) => NETWORK_BACKOFF,
        _ => PROTOCOL_BACKOFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_cycle_without_observer() {
        let mut base = SimulatedMcdus::new(false);
        assert_eq!(base.selected_seat(), Seat::Captain);
        assert_eq!(base.advance_selected_seat(), Seat::FirstOfficer);
        assert_eq!(base.advance_selected_seat(), Seat::Captain);
    }

    #[test]
    fn test_seat_cycle_with_observer() {
        let mut base = SimulatedMcdus::new(true);
        assert_eq!(base.advance_selected_seat(), Seat::FirstOfficer);
        assert_eq!(base.advance_selected_seat(), Seat::Observer);
        assert_eq!(base.advance_selected_seat(), Seat::Captain);
    }

    #[tokio::test]
    async fn test_advance_seat_requests_refresh() {
        let mut base = SimulatedMcdus::new(false);
        base.advance_selected_seat();
        // The notification must already be pending
        tokio::time::timeout(Duration::from_millis(50), base.buffers().refresh_requested())
            .await
            .expect("refresh was not requested");
    }

    #[test]
    fn test_record_state_notifies_only_on_change() {
        let base = SimulatedMcdus::new(false);
        let mut rx = base.watch_state();
        rx.mark_unchanged();

        base.record_state(ConnectionState::Disconnected); // no change
        assert!(!rx.has_changed().unwrap());

        base.record_state(ConnectionState::Connecting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_teardown_cancels_task() {
        let mut base = SimulatedMcdus::new(false);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            // Cooperative loop: exits when cancelled
            while !*cancel_rx.borrow() {
                if cancel_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        base.install_task(handle, cancel_tx);
        assert!(base.has_running_task());
        base.teardown().await;
        assert!(!base.has_running_task());
        assert_eq!(base.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_teardown_twice_is_safe() {
        let mut base = SimulatedMcdus::new(false);
        base.teardown().await;
        base.teardown().await;
        assert_eq!(base.state(), ConnectionState::Disconnected);
    }
}
