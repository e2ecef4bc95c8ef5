//! X-Plane websocket transport
//!
//! Resolves dataref names to ids over the REST directory, then holds a
//! websocket open against `/api/v2` for pushed updates. The server
//! streams `dataref_update_values` messages keyed by numeric id;
//! dataref names are classified into row targets by pattern once, at
//! subscription time. Key presses become `command_set_is_active`
//! requests on the same socket.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::core::{Annunciator, CduColor};
use crate::device::{Key, Seat};
use crate::sim::{
    ws_error_backoff, ConnectionState, McduBuffers, SimAdapter, SimulatedMcdus, StateRecorder,
    NETWORK_BACKOFF, PROTOCOL_BACKOFF,
};

use super::rest::{fetch_command_directory, fetch_dataref_directory};
use super::{apply_row_bytes, apply_value, key_command, style_color, unit_seat, DatarefTarget, RowKind};

/// Default X-Plane web API port
pub const DEFAULT_PORT: u16 = 8086;

/// Classify one dataref name into its unit, row and style suffix
pub fn classify_row(name: &str) -> Option<(u8, RowKind, char)> {
    static ROW_RE: OnceLock<Regex> = OnceLock::new();
    let re = ROW_RE.get_or_init(|| {
        Regex::new(r"^AirbusFBW/MCDU([12])(title|stitle|scont[1-6]|sp|label[1-6]|cont[1-6])([a-z])$")
            .unwrap()
    });
    let caps = re.captures(name)?;
    let unit: u8 = caps[1].parse().ok()?;
    let style = caps[3].chars().next()?;
    let token = &caps[2];
    let kind = match token {
        "title" => RowKind::Title,
        "stitle" => RowKind::SubTitle,
        "sp" => RowKind::Scratchpad,
        _ => {
            let n: u8 = token[token.len() - 1..].parse().ok()?;
            if token.starts_with("scont") {
                RowKind::SmallCont(n)
            } else if token.starts_with("cont") {
                RowKind::Cont(n)
            } else {
                RowKind::Label(n)
            }
        }
    };
    Some((unit, kind, style))
}

/// Classify one dataref name into a scalar target (annunciators, slew)
pub fn classify_scalar(name: &str) -> Option<DatarefTarget> {
    static SCALAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCALAR_RE.get_or_init(|| {
        Regex::new(r"^AirbusFBW/MCDU([12])(VertSlewKeys|Annun(Fail|Fm1|Fm2|Fm|Mcdu|Menu|Ind|Rdy|Status))$")
            .unwrap()
    });
    let caps = re.captures(name)?;
    let unit: u8 = caps[1].parse().ok()?;
    let seat = unit_seat(unit);
    if &caps[2] == "VertSlewKeys" {
        return Some(DatarefTarget::VertSlew { seat });
    }
    let ann = match caps.get(3)?.as_str() {
        "Fail" => Annunciator::Fail,
        "Fm" => Annunciator::Fm,
        "Mcdu" => Annunciator::Mcdu,
        "Menu" => Annunciator::Menu,
        "Fm1" => Annunciator::Fm1,
        "Ind" => Annunciator::Ind,
        "Rdy" => Annunciator::Rdy,
        "Status" => Annunciator::Status,
        "Fm2" => Annunciator::Fm2,
        _ => return None,
    };
    Some(DatarefTarget::Annunciator { seat, ann })
}

/// One subscribed row dataref
#[derive(Debug, Clone)]
struct WsRow {
    seat: Seat,
    line: usize,
    color: CduColor,
    small: bool,
}

/// Everything resolved from the directory for the socket's lifetime
struct WsDirectory {
    rows: HashMap<i64, WsRow>,
    /// Ids contributing to each line, in stacking order
    lines: HashMap<(Seat, usize), Vec<i64>>,
    scalars: HashMap<i64, DatarefTarget>,
    commands: HashMap<String, i64>,
}

impl WsDirectory {
    fn subscription_ids(&self) -> Vec<i64> {
        self.rows.keys().chain(self.scalars.keys()).copied().collect()
    }
}

fn build_directory(
    datarefs: &[super::rest::DirEntry],
    commands: Vec<super::rest::DirEntry>,
) -> Option<WsDirectory> {
    let mut dir = WsDirectory {
        rows: HashMap::new(),
        lines: HashMap::new(),
        scalars: HashMap::new(),
        commands: commands.into_iter().map(|e| (e.name, e.id)).collect(),
    };
    for entry in datarefs {
        if let Some((unit, kind, style)) = classify_row(&entry.name) {
            let seat = unit_seat(unit);
            let line = kind.line();
            dir.rows.insert(
                entry.id,
                WsRow {
                    seat,
                    line,
                    color: style_color(style),
                    small: kind.small(),
                },
            );
            dir.lines.entry((seat, line)).or_default().push(entry.id);
        } else if let Some(target) = classify_scalar(&entry.name) {
            dir.scalars.insert(entry.id, target);
        }
    }
    if dir.rows.is_empty() {
        return None;
    }
    Some(dir)
}

#[derive(Serialize)]
struct WsRequest<'a, P: Serialize> {
    req_id: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    params: P,
}

fn subscribe_message(req_id: u64, ids: &[i64]) -> String {
    let datarefs: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
    serde_json::to_string(&WsRequest {
        req_id,
        kind: "dataref_subscribe_values",
        params: json!({ "datarefs": datarefs }),
    })
    .unwrap_or_default()
}

fn command_message(req_id: u64, id: i64) -> String {
    serde_json::to_string(&WsRequest {
        req_id,
        kind: "command_set_is_active",
        params: json!({
            "commands": [{ "id": id, "is_active": true, "duration": 0.0 }]
        }),
    })
    .unwrap_or_default()
}

/// Decode one pushed value into row bytes. Byte-array datarefs arrive
/// either base64-encoded or as plain number arrays depending on the
/// server version.
fn value_bytes(value: &serde_json::Value) -> Option<Vec<u8>> {
    match value {
        serde_json::Value::String(s) => BASE64.decode(s).ok(),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .map(|v| v.as_i64().unwrap_or(0) as u8)
                .collect(),
        ),
        _ => None,
    }
}

/// Apply one `dataref_update_values` payload. Each touched line is
/// recomposed from the latest bytes of every style variant, in
/// directory order, non-blank bytes winning.
fn apply_update(
    data: &serde_json::Map<String, serde_json::Value>,
    dir: &WsDirectory,
    cache: &mut HashMap<i64, Vec<u8>>,
    buffers: &McduBuffers,
) -> bool {
    let mut touched: Vec<(Seat, usize)> = Vec::new();
    let mut any = false;

    for (key, value) in data {
        let Ok(id) = key.parse::<i64>() else { continue };
        if let Some(row) = dir.rows.get(&id) {
            if let Some(bytes) = value_bytes(value) {
                cache.insert(id, bytes);
                if !touched.contains(&(row.seat, row.line)) {
                    touched.push((row.seat, row.line));
                }
            }
        } else if let Some(&target) = dir.scalars.get(&id) {
            if let Some(f) = value.as_f64() {
                apply_value(buffers, target, f as f32);
                any = true;
            }
        }
    }

    for (seat, line) in touched {
        let mut buf = buffers.seat(seat);
        buf.screen.clear_line(line);
        if let Some(ids) = dir.lines.get(&(seat, line)) {
            for id in ids {
                if let Some(bytes) = cache.get(id) {
                    if let Some(row) = dir.rows.get(id) {
                        apply_row_bytes(&mut buf.screen, line, row.color, row.small, bytes);
                    }
                }
            }
        }
        any = true;
    }
    any
}

/// The X-Plane websocket adapter
pub struct XplaneWsAdapter {
    base: SimulatedMcdus,
    base_url: String,
    ws_url: String,
    out_tx: Option<mpsc::UnboundedSender<String>>,
}

impl XplaneWsAdapter {
    pub fn new(host: &str, port: u16, observer_present: bool) -> Self {
        Self {
            base: SimulatedMcdus::new(observer_present),
            base_url: format!("http://{host}:{port}"),
            ws_url: format!("ws://{host}:{port}/api/v2"),
            out_tx: None,
        }
    }
}

impl SimAdapter for XplaneWsAdapter {
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
            self.base_url.clone(),
            self.ws_url.clone(),
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
    base_url: String,
    ws_url: String,
    buffers: McduBuffers,
    state: StateRecorder,
    mut cancel: watch::Receiver<bool>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    let client = reqwest::Client::new();

    'outer: while !*cancel.borrow() {
        let dir = match fetch_directory(&client, &base_url).await {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                debug!("No MCDU datarefs published; retrying");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                debug!("X-Plane REST directory unreachable: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                    break;
                }
                continue;
            }
        };

        let (mut socket, _) = match tokio_tungstenite::connect_async(&ws_url).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("X-Plane websocket connect failed: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                    break;
                }
                continue;
            }
        };

        let mut req_id: u64 = 1;
        if let Err(e) = socket
            .send(Message::text(subscribe_message(req_id, &dir.subscription_ids())))
            .await
        {
            debug!("Subscribe failed: {e}");
            state.record(ConnectionState::Connecting);
            if wait_or_cancelled(&mut cancel, ws_error_backoff(&e)).await {
                break;
            }
            continue;
        }
        state.record(ConnectionState::Connected);

        let mut cache: HashMap<i64, Vec<u8>> = HashMap::new();

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
                        Some(path) => {
                            let Some(&id) = dir.commands.get(&path) else {
                                debug!("No such command in directory: {path}");
                                continue;
                            };
                            req_id += 1;
                            if let Err(e) = socket.send(Message::text(command_message(req_id, id))).await {
                                debug!("Command send failed: {e}");
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
                            if handle_text(&text, &dir, &mut cache, &buffers) {
                                buffers.request_refresh();
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("X-Plane websocket closed");
                            state.record(ConnectionState::Connecting);
                            if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                                break 'outer;
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("X-Plane websocket error: {e}");
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

fn handle_text(
    text: &str,
    dir: &WsDirectory,
    cache: &mut HashMap<i64, Vec<u8>>,
    buffers: &McduBuffers,
) -> bool {
    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text) else {
        return false;
    };
    match msg.get("type").and_then(|t| t.as_str()) {
        Some("dataref_update_values") => msg
            .get("data")
            .and_then(|d| d.as_object())
            .is_some_and(|data| apply_update(data, dir, cache, buffers)),
        Some("result") => {
            if msg.get("success").and_then(|s| s.as_bool()) == Some(false) {
                warn!("X-Plane rejected request: {text}");
            }
            false
        }
        _ => false,
    }
}

async fn fetch_directory(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Option<WsDirectory>, reqwest::Error> {
    let datarefs = fetch_dataref_directory(client, base_url).await?;
    let commands = fetch_command_directory(client, base_url).await?;
    Ok(build_directory(&datarefs, commands))
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
    fn test_classify_rows() {
        assert_eq!(
            classify_row("AirbusFBW/MCDU1titlew"),
            Some((1, RowKind::Title, 'w'))
        );
        assert_eq!(
            classify_row("AirbusFBW/MCDU2scont3g"),
            Some((2, RowKind::SmallCont(3), 'g'))
        );
        assert_eq!(
            classify_row("AirbusFBW/MCDU1spa"),
            Some((1, RowKind::Scratchpad, 'a'))
        );
        assert_eq!(
            classify_row("AirbusFBW/MCDU1label6y"),
            Some((1, RowKind::Label(6), 'y'))
        );
        assert!(classify_row("AirbusFBW/MCDU1AnnunFail").is_none());
        assert!(classify_row("sim/time/total_running_time_sec").is_none());
    }

    #[test]
    fn test_classify_scalars() {
        assert_eq!(
            classify_scalar("AirbusFBW/MCDU2AnnunFm1"),
            Some(DatarefTarget::Annunciator {
                seat: Seat::FirstOfficer,
                ann: Annunciator::Fm1,
            })
        );
        assert_eq!(
            classify_scalar("AirbusFBW/MCDU1AnnunFm"),
            Some(DatarefTarget::Annunciator {
                seat: Seat::Captain,
                ann: Annunciator::Fm,
            })
        );
        assert_eq!(
            classify_scalar("AirbusFBW/MCDU1VertSlewKeys"),
            Some(DatarefTarget::VertSlew { seat: Seat::Captain })
        );
        assert!(classify_scalar("AirbusFBW/MCDU1titlew").is_none());
    }

    #[test]
    fn test_request_envelopes() {
        let msg: serde_json::Value =
            serde_json::from_str(&subscribe_message(1, &[7, 9])).unwrap();
        assert_eq!(msg["req_id"], 1);
        assert_eq!(msg["type"], "dataref_subscribe_values");
        assert_eq!(msg["params"]["datarefs"][0]["id"], 7);

        let msg: serde_json::Value = serde_json::from_str(&command_message(2, 42)).unwrap();
        assert_eq!(msg["type"], "command_set_is_active");
        assert_eq!(msg["params"]["commands"][0]["id"], 42);
        assert_eq!(msg["params"]["commands"][0]["is_active"], true);
    }

    fn entry(id: i64, name: &str) -> super::super::rest::DirEntry {
        serde_json::from_value(json!({ "id": id, "name": name })).unwrap()
    }

    #[test]
    fn test_update_recomposes_lines() {
        let datarefs = vec![
            entry(1, "sim/time/total_running_time_sec"),
            entry(10, "AirbusFBW/MCDU1cont1g"),
            entry(11, "AirbusFBW/MCDU1cont1w"),
        ];
        let dir = build_directory(&datarefs, vec![]).unwrap();
        let buffers = McduBuffers::new(false);
        let mut cache = HashMap::new();

        // Green text arrives first
        let update = json!({ "10": BASE64.encode(b"AB") });
        assert!(apply_update(update.as_object().unwrap(), &dir, &mut cache, &buffers));
        assert_eq!(buffers.seat(Seat::Captain).screen.get(2, 0).unwrap().ch, 'A');

        // A white style variant for the same cells wins on recompose
        let update = json!({ "11": BASE64.encode(b"XY") });
        assert!(apply_update(update.as_object().unwrap(), &dir, &mut cache, &buffers));
        let buf = buffers.seat(Seat::Captain);
        assert_eq!(buf.screen.get(2, 0).unwrap().ch, 'X');
        assert_eq!(buf.screen.get(2, 0).unwrap().color, CduColor::White);
    }

    #[test]
    fn test_update_applies_scalars() {
        let datarefs = vec![
            entry(10, "AirbusFBW/MCDU1titlew"),
            entry(20, "AirbusFBW/MCDU1AnnunRdy"),
        ];
        let dir = build_directory(&datarefs, vec![]).unwrap();
        let buffers = McduBuffers::new(false);
        let mut cache = HashMap::new();

        let update = json!({ "20": 1.0 });
        assert!(apply_update(update.as_object().unwrap(), &dir, &mut cache, &buffers));
        assert!(buffers.seat(Seat::Captain).leds.get(Annunciator::Rdy));
    }
}
