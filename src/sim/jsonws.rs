//! JSON websocket simulator adapter
//!
//! A push feed over a plain websocket: the client sends `requestUpdate`
//! once after connecting, the server answers with `update:<json>`
//! frames carrying both seats' display content as markup text plus
//! annunciator booleans. Key presses go back as `event:` frames.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::compositor::Compositor;
use crate::core::{Annunciator, CduColor};
use crate::device::{Key, Seat};
use crate::sim::{
    ws_error_backoff, ConnectionState, McduBuffers, SimAdapter, SimulatedMcdus, StateRecorder,
    PROTOCOL_BACKOFF,
};

/// Default bridge-server port
pub const DEFAULT_PORT: u16 = 8380;

const UPDATE_PREFIX: &str = "update:";

/// One seat's display payload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SeatPayload {
    title: String,
    title_left: String,
    page: String,
    /// Twelve markup lines: alternating label and content rows
    lines: Vec<String>,
    scratchpad: String,
    /// Up, down slew arrows
    arrows: Vec<bool>,
    annunciators: AnnunciatorPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnnunciatorPayload {
    fail: bool,
    fm: bool,
    mcdu: bool,
    menu: bool,
    fm1: bool,
    ind: bool,
    rdy: bool,
    status: bool,
    fm2: bool,
}

/// One `update:` frame: both seats, either may be absent
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdatePayload {
    left: Option<SeatPayload>,
    right: Option<SeatPayload>,
}

/// Render one seat payload into its buffer
fn apply_seat_payload(buffers: &McduBuffers, seat: Seat, payload: &SeatPayload) {
    let mut buf = buffers.seat(seat);
    buf.screen.clear();

    buf.screen.style(CduColor::White, false);
    let mut comp = Compositor::new(&mut buf.screen);
    comp.label_left(0, &payload.title_left)
        .centered(0, &payload.title)
        .label_right(0, &payload.page);
    for (i, markup) in payload.lines.iter().take(12).enumerate() {
        buf.screen.style(CduColor::White, false);
        Compositor::new(&mut buf.screen).write(i + 1, 0, markup);
    }
    buf.screen.style(CduColor::White, false);
    Compositor::new(&mut buf.screen).label_left(13, &payload.scratchpad);

    let up = payload.arrows.first().copied().unwrap_or(false);
    let down = payload.arrows.get(1).copied().unwrap_or(false);
    buf.screen
        .put_at(13, 22, if up { '↑' } else { ' ' }, CduColor::White, false);
    buf.screen
        .put_at(13, 23, if down { '↓' } else { ' ' }, CduColor::White, false);

    let a = &payload.annunciators;
    for (ann, lit) in [
        (Annunciator::Fail, a.fail),
        (Annunciator::Fm, a.fm),
        (Annunciator::Mcdu, a.mcdu),
        (Annunciator::Menu, a.menu),
        (Annunciator::Fm1, a.fm1),
        (Annunciator::Ind, a.ind),
        (Annunciator::Rdy, a.rdy),
        (Annunciator::Status, a.status),
        (Annunciator::Fm2, a.fm2),
    ] {
        buf.leds.set(ann, lit);
    }
}

/// Parse and apply one inbound text frame. Returns whether buffers
/// changed.
fn handle_frame(text: &str, buffers: &McduBuffers) -> bool {
    let Some(body) = text.strip_prefix(UPDATE_PREFIX) else {
        return false;
    };
    let update: UpdatePayload = match serde_json::from_str(body) {
        Ok(update) => update,
        Err(e) => {
            debug!("Malformed update frame: {e}");
            return false;
        }
    };
    let mut any = false;
    if let Some(left) = &update.left {
        apply_seat_payload(buffers, Seat::Captain, left);
        any = true;
    }
    if let Some(right) = &update.right {
        apply_seat_payload(buffers, Seat::FirstOfficer, right);
        any = true;
    }
    any
}

/// Outbound key event frame
fn key_event(seat: Seat, key: Key) -> Option<String> {
    // Serde gives every key a stable snake_case wire name
    let name = serde_json::to_value(key).ok()?;
    let side = match seat {
        Seat::FirstOfficer => "right",
        _ => "left",
    };
    Some(format!("event:{side}:{}", name.as_str()?))
}

/// The JSON websocket adapter
pub struct JsonWsAdapter {
    base: SimulatedMcdus,
    url: String,
    out_tx: Option<mpsc::UnboundedSender<String>>,
}

impl JsonWsAdapter {
    pub fn new(host: &str, port: u16, observer_present: bool) -> Self {
        Self {
            base: SimulatedMcdus::new(observer_present),
            url: format!("ws://{host}:{port}/interfaces/v1/mcdu"),
            out_tx: None,
        }
    }
}

impl SimAdapter for JsonWsAdapter {
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
            self.url.clone(),
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
        // This feed takes press events only
        if !pressed || self.base.state() != ConnectionState::Connected {
            return;
        }
        let Some(frame) = key_event(self.base.selected_seat(), key) else {
            return;
        };
        if let Some(tx) = &self.out_tx {
            let _ = tx.send(frame);
        }
    }
}

async fn run_connection(
    url: String,
    buffers: McduBuffers,
    state: StateRecorder,
    mut cancel: watch::Receiver<bool>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    'outer: while !*cancel.borrow() {
        let (mut socket, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("Bridge server connect failed: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = socket.send(Message::text("requestUpdate")).await {
            debug!("requestUpdate failed: {e}");
            state.record(ConnectionState::Connecting);
            if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                break;
            }
            continue;
        }
        state.record(ConnectionState::Connected);

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        let _ = socket.close(None).await;
                        break 'outer;
                    }
                }
                frame = out_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = socket.send(Message::text(frame)).await {
                                debug!("Key event send failed: {e}");
                            }
                        }
                        None => {
                            let _ = socket.close(None).await;
                            break 'outer;
                        }
                    }
                }
                msg = socket.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if handle_frame(&text, &buffers) {
                                buffers.request_refresh();
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Bridge server closed the socket");
                            state.record(ConnectionState::Connecting);
                            if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                                break 'outer;
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("Bridge server socket error: {e}");
                            state.record(ConnectionState::Connecting);
                            if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                                break 'outer;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    state.record(ConnectionState::Disconnected);
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

    #[test]
    fn test_update_frame_applies_both_seats() {
        let buffers = McduBuffers::new(false);
        let frame = format!(
            "update:{}",
            serde_json::json!({
                "left": {
                    "title": "<green>INIT",
                    "lines": ["<small>CO RTE"],
                    "scratchpad": "HELLO",
                    "annunciators": { "rdy": true }
                },
                "right": {
                    "title": "MENU"
                }
            })
        );
        assert!(handle_frame(&frame, &buffers));

        let left = buffers.seat(Seat::Captain);
        // Title centres on row 0
        let start = (24 - 4) / 2;
        assert_eq!(left.screen.get(0, start).unwrap().ch, 'I');
        assert_eq!(left.screen.get(0, start).unwrap().color, CduColor::Green);
        assert_eq!(left.screen.get(1, 0).unwrap().ch, 'C');
        assert!(left.screen.get(1, 0).unwrap().small);
        assert_eq!(left.screen.get(13, 0).unwrap().ch, 'H');
        assert!(left.leds.get(Annunciator::Rdy));
        drop(left);

        let right = buffers.seat(Seat::FirstOfficer);
        assert_eq!(right.screen.get(0, 10).unwrap().ch, 'M');
        assert!(!right.leds.get(Annunciator::Rdy));
    }

    #[test]
    fn test_non_update_frames_are_ignored() {
        let buffers = McduBuffers::new(false);
        assert!(!handle_frame("mcduConnected", &buffers));
        assert!(!handle_frame("update:not json", &buffers));
    }

    #[test]
    fn test_arrows_render_at_scratchpad_edge() {
        let buffers = McduBuffers::new(false);
        let frame = format!(
            "update:{}",
            serde_json::json!({ "left": { "arrows": [true, false] } })
        );
        assert!(handle_frame(&frame, &buffers));
        let buf = buffers.seat(Seat::Captain);
        assert_eq!(buf.screen.get(13, 22).unwrap().ch, '↑');
        assert_eq!(buf.screen.get(13, 23).unwrap().ch, ' ');
    }

    #[test]
    fn test_key_event_frames() {
        assert_eq!(
            key_event(Seat::Captain, Key::LineSelectLeft1).as_deref(),
            Some("event:left:line_select_left1")
        );
        assert_eq!(
            key_event(Seat::FirstOfficer, Key::Clear).as_deref(),
            Some("event:right:clear")
        );
    }
}
