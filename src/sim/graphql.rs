//! GraphQL simulator adapter
//!
//! Speaks the `graphql-transport-ws` subprotocol: `connection_init`,
//! wait for `connection_ack`, then one long-lived subscription over
//! named variables. Screen variables carry the whole display as
//! fourteen markup lines joined by newlines; annunciator variables are
//! numeric booleans. Key presses go out as mutations writing an
//! integer transition value on the same socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::compositor::Compositor;
use crate::core::{Annunciator, CduColor, ROWS};
use crate::device::{Key, Seat};
use crate::sim::{
    ws_error_backoff, ConnectionState, McduBuffers, SimAdapter, SimulatedMcdus, StateRecorder,
    PROTOCOL_BACKOFF,
};

/// Default GraphQL endpoint port
pub const DEFAULT_PORT: u16 = 8083;

/// How long to wait for `connection_ack`
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Variable name of one seat's full display
fn screen_variable(seat: Seat) -> &'static str {
    match seat {
        Seat::FirstOfficer => "MCDU_SCREEN_2",
        _ => "MCDU_SCREEN_1",
    }
}

/// Annunciator variable names of one seat
fn annunciator_variables(seat: Seat) -> [(String, Annunciator); 9] {
    let unit = if seat == Seat::FirstOfficer { 2 } else { 1 };
    [
        ("FAIL", Annunciator::Fail),
        ("FM", Annunciator::Fm),
        ("MCDU", Annunciator::Mcdu),
        ("MENU", Annunciator::Menu),
        ("FM1", Annunciator::Fm1),
        ("IND", Annunciator::Ind),
        ("RDY", Annunciator::Rdy),
        ("STATUS", Annunciator::Status),
        ("FM2", Annunciator::Fm2),
    ]
    .map(|(name, ann)| (format!("MCDU_ANNUNC_{name}_{unit}"), ann))
}

/// Key variable name, or `None` for local-only keys
fn key_variable(seat: Seat, key: Key) -> Option<String> {
    let unit = if seat == Seat::FirstOfficer { 2 } else { 1 };
    let name = match key {
        Key::LineSelectLeft1 => "LSK1L",
        Key::LineSelectLeft2 => "LSK2L",
        Key::LineSelectLeft3 => "LSK3L",
        Key::LineSelectLeft4 => "LSK4L",
        Key::LineSelectLeft5 => "LSK5L",
        Key::LineSelectLeft6 => "LSK6L",
        Key::LineSelectRight1 => "LSK1R",
        Key::LineSelectRight2 => "LSK2R",
        Key::LineSelectRight3 => "LSK3R",
        Key::LineSelectRight4 => "LSK4R",
        Key::LineSelectRight5 => "LSK5R",
        Key::LineSelectRight6 => "LSK6R",
        Key::Dir => "DIR",
        Key::Prog => "PROG",
        Key::Perf => "PERF",
        Key::Init => "INIT",
        Key::Data => "DATA",
        Key::Fplan => "FPLN",
        Key::RadNav => "RAD_NAV",
        Key::FuelPred => "FUEL_PRED",
        Key::SecFplan => "SEC_FPLN",
        Key::AtcComm => "ATC_COMM",
        Key::McduMenu => "MENU",
        Key::Airport => "AIRPORT",
        Key::Overfly => "OVERFLY",
        Key::UpArrow => "UP",
        Key::DownArrow => "DOWN",
        Key::LeftArrow => "LEFT",
        Key::RightArrow => "RIGHT",
        Key::KeyA => "A",
        Key::KeyB => "B",
        Key::KeyC => "C",
        Key::KeyD => "D",
        Key::KeyE => "E",
        Key::KeyF => "F",
        Key::KeyG => "G",
        Key::KeyH => "H",
        Key::KeyI => "I",
        Key::KeyJ => "J",
        Key::KeyK => "K",
        Key::KeyL => "L",
        Key::KeyM => "M",
        Key::KeyN => "N",
        Key::KeyO => "O",
        Key::KeyP => "P",
        Key::KeyQ => "Q",
        Key::KeyR => "R",
        Key::KeyS => "S",
        Key::KeyT => "T",
        Key::KeyU => "U",
        Key::KeyV => "V",
        Key::KeyW => "W",
        Key::KeyX => "X",
        Key::KeyY => "Y",
        Key::KeyZ => "Z",
        Key::Slash => "SLASH",
        Key::Space => "SP",
        Key::Clear => "CLR",
        Key::Digit0 => "0",
        Key::Digit1 => "1",
        Key::Digit2 => "2",
        Key::Digit3 => "3",
        Key::Digit4 => "4",
        Key::Digit5 => "5",
        Key::Digit6 => "6",
        Key::Digit7 => "7",
        Key::Digit8 => "8",
        Key::Digit9 => "9",
        Key::Dot => "DOT",
        Key::PlusMinus => "PLUSMINUS",
        Key::Brt | Key::Dim => return None,
    };
    Some(format!("MCDU_KEY_{name}_{unit}"))
}

fn subscribe_message() -> String {
    json!({
        "id": "mcdu",
        "type": "subscribe",
        "payload": {
            "query": "subscription { variableChanged { name value } }"
        }
    })
    .to_string()
}

fn mutation_message(seq: u64, name: &str, value: i64) -> String {
    json!({
        "id": format!("key-{seq}"),
        "type": "subscribe",
        "payload": {
            "query": "mutation SetVariable($name: String!, $value: Float!) { setVariable(name: $name, value: $value) }",
            "variables": { "name": name, "value": value }
        }
    })
    .to_string()
}

/// Render one full-display payload into a seat screen: fourteen markup
/// lines, style state resetting at each line start.
fn apply_screen_text(buffers: &McduBuffers, seat: Seat, text: &str) {
    let mut buf = buffers.seat(seat);
    buf.screen.clear();
    for (line, markup) in text.lines().take(ROWS).enumerate() {
        buf.screen.style(CduColor::White, false);
        Compositor::new(&mut buf.screen).write(line, 0, markup);
    }
}

/// Apply one `variableChanged` event. Returns whether a buffer changed.
fn apply_variable(buffers: &McduBuffers, name: &str, value: &serde_json::Value) -> bool {
    for seat in [Seat::Captain, Seat::FirstOfficer] {
        if name == screen_variable(seat) {
            if let Some(text) = value.as_str() {
                apply_screen_text(buffers, seat, text);
                return true;
            }
            return false;
        }
        for (var, ann) in annunciator_variables(seat) {
            if name == var {
                if let Some(f) = value.as_f64() {
                    buffers.seat(seat).leds.set(ann, f > 0.5);
                    return true;
                }
                return false;
            }
        }
    }
    false
}

/// The GraphQL adapter
pub struct GraphqlAdapter {
    base: SimulatedMcdus,
    url: String,
    out_tx: Option<mpsc::UnboundedSender<(String, i64)>>,
}

impl GraphqlAdapter {
    pub fn new(host: &str, port: u16, observer_present: bool) -> Self {
        Self {
            base: SimulatedMcdus::new(observer_present),
            url: format!("ws://{host}:{port}/graphql"),
            out_tx: None,
        }
    }
}

impl SimAdapter for GraphqlAdapter {
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
        if self.base.state() != ConnectionState::Connected {
            return;
        }
        let Some(name) = key_variable(self.base.selected_seat(), key) else {
            return;
        };
        if let Some(tx) = &self.out_tx {
            let _ = tx.send((name, i64::from(pressed)));
        }
    }
}

async fn run_connection(
    url: String,
    buffers: McduBuffers,
    state: StateRecorder,
    mut cancel: watch::Receiver<bool>,
    mut out_rx: mpsc::UnboundedReceiver<(String, i64)>,
) {
    'outer: while !*cancel.borrow() {
        let mut socket = match open_socket(&url).await {
            Ok(socket) => socket,
            Err(e) => {
                debug!("GraphQL connect failed: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = handshake(&mut socket).await {
            debug!("GraphQL handshake failed: {e}");
            state.record(ConnectionState::Connecting);
            if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                break;
            }
            continue;
        }
        state.record(ConnectionState::Connected);

        let mut seq: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        let _ = socket.close(None).await;
                        break 'outer;
                    }
                }
                cmd = out_rx.recv() => {
                    match cmd {
                        Some((name, value)) => {
                            seq += 1;
                            if let Err(e) = socket.send(Message::text(mutation_message(seq, &name, value))).await {
                                debug!("Mutation send failed: {e}");
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
                            match handle_text(&text, &buffers) {
                                TextAction::Refresh => buffers.request_refresh(),
                                TextAction::Pong => {
                                    if let Err(e) = socket.send(Message::text(pong_message())).await {
                                        debug!("Pong send failed: {e}");
                                    }
                                }
                                TextAction::None => {}
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("GraphQL socket closed");
                            state.record(ConnectionState::Connecting);
                            if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                                break 'outer;
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("GraphQL socket error: {e}");
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

type WsSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_socket(url: &str) -> Result<WsSocket, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("graphql-transport-ws"),
    );
    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

/// `connection_init`, wait for `connection_ack`, then subscribe
async fn handshake(socket: &mut WsSocket) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    use tokio_tungstenite::tungstenite::Error;

    socket
        .send(Message::text(json!({ "type": "connection_init", "payload": {} }).to_string()))
        .await?;

    let acked = tokio::time::timeout(ACK_TIMEOUT, async {
        while let Some(msg) = socket.next().await {
            if let Message::Text(text) = msg? {
                let v: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
                match v.get("type").and_then(|t| t.as_str()) {
                    Some("connection_ack") => return Ok(true),
                    Some(other) => debug!("Pre-ack message: {other}"),
                    None => {}
                }
            }
        }
        Ok::<bool, Error>(false)
    })
    .await;

    match acked {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => return Err(Error::ConnectionClosed),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!("No connection_ack within {ACK_TIMEOUT:?}");
            return Err(Error::ConnectionClosed);
        }
    }

    socket.send(Message::text(subscribe_message())).await
}

/// What the receive arm must do after one inbound text message
#[derive(Debug, PartialEq, Eq)]
enum TextAction {
    /// A buffer changed, repaint the device
    Refresh,
    /// Protocol-level ping, answer with a pong frame
    Pong,
    None,
}

fn pong_message() -> String {
    json!({ "type": "pong" }).to_string()
}

fn handle_text(text: &str, buffers: &McduBuffers) -> TextAction {
    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text) else {
        return TextAction::None;
    };
    match msg.get("type").and_then(|t| t.as_str()) {
        Some("next") => {
            let Some(event) = msg.pointer("/payload/data/variableChanged") else {
                return TextAction::None;
            };
            let Some(name) = event.get("name").and_then(|n| n.as_str()) else {
                return TextAction::None;
            };
            let Some(value) = event.get("value") else {
                return TextAction::None;
            };
            if apply_variable(buffers, name, value) {
                TextAction::Refresh
            } else {
                TextAction::None
            }
        }
        Some("error") => {
            warn!("GraphQL subscription error: {text}");
            TextAction::None
        }
        // The subprotocol's own keepalive, distinct from the websocket
        // ping frames tungstenite answers internally
        Some("ping") => TextAction::Pong,
        _ => TextAction::None,
    }
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
    fn test_screen_payload_renders_markup() {
        let buffers = McduBuffers::new(false);
        let text = "  <green>TITLE\n<small><cyan>SUB";
        apply_screen_text(&buffers, Seat::Captain, text);

        let buf = buffers.seat(Seat::Captain);
        let cell = buf.screen.get(0, 2).unwrap();
        assert_eq!(cell.ch, 'T');
        assert_eq!(cell.color, CduColor::Green);
        assert!(!cell.small);

        let cell = buf.screen.get(1, 0).unwrap();
        assert_eq!(cell.ch, 'S');
        assert_eq!(cell.color, CduColor::Cyan);
        assert!(cell.small);
    }

    #[test]
    fn test_screen_payload_resets_style_per_line() {
        let buffers = McduBuffers::new(false);
        apply_screen_text(&buffers, Seat::Captain, "<red>A\nB");
        let buf = buffers.seat(Seat::Captain);
        assert_eq!(buf.screen.get(0, 0).unwrap().color, CduColor::Red);
        assert_eq!(buf.screen.get(1, 0).unwrap().color, CduColor::White);
    }

    #[test]
    fn test_variable_routing() {
        let buffers = McduBuffers::new(false);
        assert!(apply_variable(
            &buffers,
            "MCDU_ANNUNC_RDY_2",
            &serde_json::json!(1.0)
        ));
        assert!(buffers.seat(Seat::FirstOfficer).leds.get(Annunciator::Rdy));
        assert!(!buffers.seat(Seat::Captain).leds.get(Annunciator::Rdy));

        assert!(!apply_variable(
            &buffers,
            "SOME_OTHER_VARIABLE",
            &serde_json::json!(1.0)
        ));
    }

    #[test]
    fn test_key_variables() {
        assert_eq!(
            key_variable(Seat::Captain, Key::LineSelectLeft1).as_deref(),
            Some("MCDU_KEY_LSK1L_1")
        );
        assert_eq!(
            key_variable(Seat::FirstOfficer, Key::Clear).as_deref(),
            Some("MCDU_KEY_CLR_2")
        );
        assert!(key_variable(Seat::Captain, Key::Brt).is_none());
    }

    #[test]
    fn test_next_message_parses() {
        let buffers = McduBuffers::new(false);
        let msg = serde_json::json!({
            "id": "mcdu",
            "type": "next",
            "payload": { "data": { "variableChanged": {
                "name": "MCDU_ANNUNC_FAIL_1",
                "value": 1.0
            }}}
        })
        .to_string();
        assert_eq!(handle_text(&msg, &buffers), TextAction::Refresh);
        assert!(buffers.seat(Seat::Captain).leds.get(Annunciator::Fail));
    }

    #[test]
    fn test_ping_wants_pong_reply() {
        let buffers = McduBuffers::new(false);
        let ping = serde_json::json!({ "type": "ping" }).to_string();
        assert_eq!(handle_text(&ping, &buffers), TextAction::Pong);

        let pong: serde_json::Value = serde_json::from_str(&pong_message()).unwrap();
        assert_eq!(pong["type"], "pong");

        // Unknown message types stay silent
        let ka = serde_json::json!({ "type": "ka" }).to_string();
        assert_eq!(handle_text(&ka, &buffers), TextAction::None);
    }
}
