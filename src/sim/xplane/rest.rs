//! X-Plane REST transport
//!
//! Talks to the X-Plane 12.1+ web API. On connect it downloads the
//! dataref and command directories to resolve names to numeric ids,
//! then polls whole-row byte-array datarefs on three schedules: the
//! scratchpad of the visible seat every 100ms, the rest of the visible
//! seat every 750ms, and the hidden seat every 30s. Key presses become
//! command activations.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::core::CduColor;
use crate::device::{Key, Seat};
use crate::sim::{
    ConnectionState, McduBuffers, SimAdapter, SimulatedMcdus, StateRecorder, NETWORK_BACKOFF,
    PROTOCOL_BACKOFF,
};

use super::{
    apply_row_bytes, key_command, row_dataref, style_color, unit_annunciators, unit_rows,
    unit_seat, DatarefTarget, RowKind,
};

/// Default X-Plane web API port
pub const DEFAULT_PORT: u16 = 8086;

/// Visible-seat scratchpad poll
const FAST_POLL: Duration = Duration::from_millis(100);
/// Visible-seat full poll
const VISIBLE_POLL: Duration = Duration::from_millis(750);
/// Hidden-seat full poll
const HIDDEN_POLL: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct DirResponse {
    data: Vec<DirEntry>,
}

#[derive(Deserialize)]
pub(super) struct DirEntry {
    pub(super) id: i64,
    pub(super) name: String,
}

#[derive(Deserialize)]
struct ValueResponse {
    data: serde_json::Value,
}

/// One pollable row dataref, resolved to its numeric id
#[derive(Debug, Clone)]
struct RowPoll {
    id: i64,
    line: usize,
    color: CduColor,
    small: bool,
    scratchpad: bool,
}

/// One pollable scalar dataref
#[derive(Debug, Clone)]
struct ScalarPoll {
    id: i64,
    target: DatarefTarget,
}

/// Everything resolved from the directories for one aircraft
struct Resolved {
    rows: HashMap<Seat, Vec<RowPoll>>,
    scalars: HashMap<Seat, Vec<ScalarPoll>>,
    commands: HashMap<String, i64>,
}

/// Resolve row and annunciator datarefs against a name-to-id directory.
/// Returns `None` when the loaded aircraft exposes no MCDU datarefs.
fn resolve(datarefs: &[DirEntry], commands: Vec<DirEntry>) -> Option<Resolved> {
    let ids: HashMap<&str, i64> = datarefs.iter().map(|e| (e.name.as_str(), e.id)).collect();

    let mut rows: HashMap<Seat, Vec<RowPoll>> = HashMap::new();
    let mut scalars: HashMap<Seat, Vec<ScalarPoll>> = HashMap::new();
    for unit in [1u8, 2] {
        let seat = unit_seat(unit);
        for (kind, style) in unit_rows() {
            let name = row_dataref(unit, kind, style);
            if let Some(&id) = ids.get(name.as_str()) {
                rows.entry(seat).or_default().push(RowPoll {
                    id,
                    line: kind.line(),
                    color: style_color(style),
                    small: kind.small(),
                    scratchpad: matches!(kind, RowKind::Scratchpad),
                });
            }
        }
        let seat_scalars = scalars.entry(seat).or_default();
        if let Some(&id) = ids.get(row_dataref(unit, RowKind::VertSlew, 'w').as_str()) {
            seat_scalars.push(ScalarPoll {
                id,
                target: DatarefTarget::VertSlew { seat },
            });
        }
        for sub in unit_annunciators(unit) {
            if let Some(&id) = ids.get(sub.name.as_str()) {
                seat_scalars.push(ScalarPoll {
                    id,
                    target: sub.target,
                });
            }
        }
    }
    if rows.values().all(|v| v.is_empty()) {
        return None;
    }

    Some(Resolved {
        rows,
        scalars,
        commands: commands.into_iter().map(|e| (e.name, e.id)).collect(),
    })
}

/// Decode one `/value` payload: byte-array datarefs arrive as base64
/// strings, scalars as JSON numbers.
fn decode_value(data: &serde_json::Value) -> Option<DecodedValue> {
    match data {
        serde_json::Value::String(s) => BASE64.decode(s).ok().map(DecodedValue::Bytes),
        serde_json::Value::Number(n) => n.as_f64().map(|f| DecodedValue::Scalar(f as f32)),
        _ => None,
    }
}

enum DecodedValue {
    Bytes(Vec<u8>),
    Scalar(f32),
}

/// The X-Plane REST adapter
pub struct XplaneRestAdapter {
    base: SimulatedMcdus,
    base_url: String,
    out_tx: Option<mpsc::UnboundedSender<String>>,
}

impl XplaneRestAdapter {
    pub fn new(host: &str, port: u16, observer_present: bool) -> Self {
        Self {
            base: SimulatedMcdus::new(observer_present),
            base_url: format!("http://{host}:{port}"),
            out_tx: None,
        }
    }
}

impl SimAdapter for XplaneRestAdapter {
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
            self.base.buffers().clone(),
            self.base.state_recorder(),
            self.base.watch_selected_seat(),
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
    buffers: McduBuffers,
    state: StateRecorder,
    selected: watch::Receiver<Seat>,
    mut cancel: watch::Receiver<bool>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    let client = reqwest::Client::new();

    'outer: while !*cancel.borrow() {
        let resolved = match fetch_directories(&client, &base_url).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                // API reachable but no MCDU datarefs; aircraft not loaded yet
                debug!("No MCDU datarefs published; retrying");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, PROTOCOL_BACKOFF).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                debug!("X-Plane REST API unreachable: {e}");
                state.record(ConnectionState::Connecting);
                if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                    break;
                }
                continue;
            }
        };
        state.record(ConnectionState::Connected);

        let mut fast = tokio::time::interval(FAST_POLL);
        let mut visible = tokio::time::interval(VISIBLE_POLL);
        let mut hidden = tokio::time::interval(HIDDEN_POLL);

        loop {
            let seat = *selected.borrow();
            let poll = tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break 'outer;
                    }
                    continue;
                }
                cmd = out_rx.recv() => {
                    match cmd {
                        Some(path) => {
                            if let Err(e) = activate_command(&client, &base_url, &resolved, &path).await {
                                debug!("Command activation failed: {e}");
                            }
                            continue;
                        }
                        None => break 'outer,
                    }
                }
                _ = fast.tick() => Poll::Scratchpad(seat),
                _ = visible.tick() => Poll::Seat(seat),
                _ = hidden.tick() => Poll::HiddenSeats(seat),
            };

            let outcome = match poll {
                Poll::Scratchpad(seat) => poll_rows(&client, &base_url, &resolved, seat, true, &buffers).await,
                Poll::Seat(seat) => poll_seat(&client, &base_url, &resolved, seat, &buffers).await,
                Poll::HiddenSeats(visible_seat) => {
                    let mut r = Ok(false);
                    for seat in [Seat::Captain, Seat::FirstOfficer] {
                        if seat != visible_seat {
                            r = merge(r, poll_seat(&client, &base_url, &resolved, seat, &buffers).await);
                        }
                    }
                    r
                }
            };
            match outcome {
                Ok(true) => buffers.request_refresh(),
                Ok(false) => {}
                Err(e) => {
                    warn!("X-Plane REST poll failed: {e}");
                    state.record(ConnectionState::Connecting);
                    if wait_or_cancelled(&mut cancel, NETWORK_BACKOFF).await {
                        break 'outer;
                    }
                    break;
                }
            }
        }
    }

    state.record(ConnectionState::Disconnected);
}

enum Poll {
    Scratchpad(Seat),
    Seat(Seat),
    HiddenSeats(Seat),
}

fn merge(a: Result<bool, reqwest::Error>, b: Result<bool, reqwest::Error>) -> Result<bool, reqwest::Error> {
    Ok(a? | b?)
}

async fn fetch_directories(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Option<Resolved>, reqwest::Error> {
    let datarefs = fetch_dataref_directory(client, base_url).await?;
    let commands = fetch_command_directory(client, base_url).await?;
    Ok(resolve(&datarefs, commands))
}

pub(super) async fn fetch_dataref_directory(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<DirEntry>, reqwest::Error> {
    let resp: DirResponse = client
        .get(format!("{base_url}/api/v2/datarefs"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(resp.data)
}

pub(super) async fn fetch_command_directory(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<DirEntry>, reqwest::Error> {
    // The command directory path is capitalised in this API version
    let resp: DirResponse = client
        .get(format!("{base_url}/api/v2/Commands"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(resp.data)
}

/// Poll one seat's rows and scalars. Returns whether anything was read.
async fn poll_seat(
    client: &reqwest::Client,
    base_url: &str,
    resolved: &Resolved,
    seat: Seat,
    buffers: &McduBuffers,
) -> Result<bool, reqwest::Error> {
    let mut any = poll_rows(client, base_url, resolved, seat, false, buffers).await?;
    for scalar in resolved.scalars.get(&seat).map(Vec::as_slice).unwrap_or(&[]) {
        let value = fetch_value(client, base_url, scalar.id).await?;
        if let Some(DecodedValue::Scalar(f)) = value {
            super::apply_value(buffers, scalar.target, f);
            any = true;
        }
    }
    Ok(any)
}

/// Poll one seat's row datarefs. With `scratchpad_only`, just the fast
/// lane. Each touched line is cleared once and the style variants are
/// stacked onto it.
async fn poll_rows(
    client: &reqwest::Client,
    base_url: &str,
    resolved: &Resolved,
    seat: Seat,
    scratchpad_only: bool,
    buffers: &McduBuffers,
) -> Result<bool, reqwest::Error> {
    let rows: Vec<&RowPoll> = resolved
        .rows
        .get(&seat)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter(|r| !scratchpad_only || r.scratchpad)
        .collect();
    if rows.is_empty() {
        return Ok(false);
    }

    // Fetch everything first so the screen lock is never held across IO
    let mut fetched = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(DecodedValue::Bytes(bytes)) = fetch_value(client, base_url, row.id).await? {
            fetched.push((row, bytes));
        }
    }
    if fetched.is_empty() {
        return Ok(false);
    }

    let mut buf = buffers.seat(seat);
    let mut cleared = [false; crate::core::ROWS];
    for (row, bytes) in fetched {
        if !cleared[row.line] {
            buf.screen.clear_line(row.line);
            cleared[row.line] = true;
        }
        apply_row_bytes(&mut buf.screen, row.line, row.color, row.small, &bytes);
    }
    Ok(true)
}

async fn fetch_value(
    client: &reqwest::Client,
    base_url: &str,
    id: i64,
) -> Result<Option<DecodedValue>, reqwest::Error> {
    let resp: ValueResponse = client
        .get(format!("{base_url}/api/v2/datarefs/{id}/value"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(decode_value(&resp.data))
}

async fn activate_command(
    client: &reqwest::Client,
    base_url: &str,
    resolved: &Resolved,
    path: &str,
) -> Result<(), reqwest::Error> {
    let Some(id) = resolved.commands.get(path) else {
        debug!("No such command in directory: {path}");
        return Ok(());
    };
    client
        .post(format!("{base_url}/api/v2/command/{id}/activate"))
        .json(&serde_json::json!({ "duration": 0.0 }))
        .send()
        .await?
        .error_for_status()?;
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
    use crate::core::Annunciator;

    fn entry(id: i64, name: &str) -> DirEntry {
        DirEntry {
            id,
            name: name.into(),
        }
    }

    #[test]
    fn test_resolve_requires_mcdu_datarefs() {
        let datarefs = vec![entry(1, "sim/time/total_running_time_sec")];
        assert!(resolve(&datarefs, vec![]).is_none());
    }

    #[test]
    fn test_resolve_maps_rows_and_commands() {
        let datarefs = vec![
            entry(10, "AirbusFBW/MCDU1titlew"),
            entry(11, "AirbusFBW/MCDU1spw"),
            entry(12, "AirbusFBW/MCDU1AnnunFail"),
            entry(13, "AirbusFBW/MCDU1VertSlewKeys"),
        ];
        let commands = vec![entry(100, "AirbusFBW/MCDU1LSK1L")];
        let resolved = resolve(&datarefs, commands).unwrap();

        let rows = &resolved.rows[&Seat::Captain];
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.id == 11 && r.scratchpad && r.line == 13));
        assert!(rows.iter().any(|r| r.id == 10 && !r.scratchpad && r.line == 0));

        let scalars = &resolved.scalars[&Seat::Captain];
        assert!(scalars.iter().any(|s| matches!(
            s.target,
            DatarefTarget::Annunciator {
                ann: Annunciator::Fail,
                ..
            }
        )));
        assert!(scalars
            .iter()
            .any(|s| matches!(s.target, DatarefTarget::VertSlew { .. })));
        assert_eq!(resolved.commands["AirbusFBW/MCDU1LSK1L"], 100);
    }

    #[test]
    fn test_decode_value_variants() {
        let encoded = BASE64.encode(b"HELLO");
        match decode_value(&serde_json::Value::String(encoded)) {
            Some(DecodedValue::Bytes(b)) => assert_eq!(b, b"HELLO"),
            _ => panic!("expected bytes"),
        }
        match decode_value(&serde_json::json!(1.0)) {
            Some(DecodedValue::Scalar(f)) => assert_eq!(f, 1.0),
            _ => panic!("expected scalar"),
        }
        assert!(decode_value(&serde_json::Value::Null).is_none());
    }
}
