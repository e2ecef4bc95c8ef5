//! CDU Bridge Binary
//!
//! Run with: cargo run -- --sim <backend> [options]
//!
//! Backends:
//!   graphql      GraphQL subscription feed
//!   jsonws       JSON websocket bridge server
//!   xplane-udp   X-Plane RREF/CMND datagrams
//!   xplane-rest  X-Plane 12.1 web API, polled
//!   xplane-ws    X-Plane 12.1 web API, pushed

use std::env;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use hidapi::HidApi;
use log::{info, warn};
use tokio::sync::mpsc;

use cdu_bridge::device::driver::{spawn_input_reader, spawn_watcher, CduDevice};
use cdu_bridge::device::font::{CduFont, FontTemplate};
use cdu_bridge::device::reports::BrightnessChannel;
use cdu_bridge::sim::{
    GraphqlAdapter, JsonWsAdapter, Simulator, XplaneRestAdapter, XplaneUdpAdapter, XplaneWsAdapter,
};
use cdu_bridge::{Bridge, BridgeError};

struct Options {
    sim: String,
    host: String,
    port: Option<u16>,
    brightness: u8,
    observer: bool,
    font: Option<String>,
}

fn usage() -> ! {
    println!("CDU Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: cdu-bridge --sim <backend> [options]");
    println!();
    println!("Backends: graphql, jsonws, xplane-udp, xplane-rest, xplane-ws");
    println!();
    println!("Options:");
    println!("  --host <addr>        Simulator host (default: 127.0.0.1)");
    println!("  --port <port>        Simulator port (default: per backend)");
    println!("  --brightness <0-100> Initial display brightness (default: 80)");
    println!("  --observer           Expose a third, observer seat");
    println!("  --font <file>        Upload a JSON bitmap font on startup");
    println!("  --help, -h           Show this help");
    std::process::exit(0);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options {
        sim: String::new(),
        host: "127.0.0.1".to_string(),
        port: None,
        brightness: 80,
        observer: false,
        font: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sim" | "--host" | "--port" | "--brightness" | "--font" => {
                let flag = args[i].clone();
                if i + 1 >= args.len() {
                    eprintln!("Error: {flag} requires a value");
                    std::process::exit(1);
                }
                let value = args[i + 1].clone();
                match flag.as_str() {
                    "--sim" => opts.sim = value,
                    "--host" => opts.host = value,
                    "--port" => match value.parse() {
                        Ok(port) => opts.port = Some(port),
                        Err(_) => {
                            eprintln!("Error: invalid port '{value}'");
                            std::process::exit(1);
                        }
                    },
                    "--brightness" => match value.parse::<u8>() {
                        Ok(pct) if pct <= 100 => opts.brightness = pct,
                        _ => {
                            eprintln!("Error: brightness must be 0-100");
                            std::process::exit(1);
                        }
                    },
                    "--font" => opts.font = Some(value),
                    _ => unreachable!(),
                }
                i += 2;
            }
            "--observer" => {
                opts.observer = true;
                i += 1;
            }
            "--help" | "-h" => usage(),
            other => {
                eprintln!("Error: unknown argument '{other}'");
                std::process::exit(1);
            }
        }
    }

    if opts.sim.is_empty() {
        eprintln!("Error: --sim is required (see --help)");
        std::process::exit(1);
    }
    opts
}

fn build_simulator(opts: &Options) -> Result<Simulator, BridgeError> {
    let host = opts.host.as_str();
    let observer = opts.observer;
    let sim = match opts.sim.as_str() {
        "graphql" => Simulator::Graphql(GraphqlAdapter::new(
            host,
            opts.port.unwrap_or(cdu_bridge::sim::graphql::DEFAULT_PORT),
            observer,
        )),
        "jsonws" => Simulator::JsonWs(JsonWsAdapter::new(
            host,
            opts.port.unwrap_or(cdu_bridge::sim::jsonws::DEFAULT_PORT),
            observer,
        )),
        "xplane-udp" => Simulator::XplaneUdp(XplaneUdpAdapter::new(
            host,
            opts.port.unwrap_or(cdu_bridge::sim::xplane::udp::DEFAULT_PORT),
            observer,
        )),
        "xplane-rest" => Simulator::XplaneRest(XplaneRestAdapter::new(
            host,
            opts.port.unwrap_or(cdu_bridge::sim::xplane::rest::DEFAULT_PORT),
            observer,
        )),
        "xplane-ws" => Simulator::XplaneWs(XplaneWsAdapter::new(
            host,
            opts.port.unwrap_or(cdu_bridge::sim::xplane::ws::DEFAULT_PORT),
            observer,
        )),
        other => return Err(BridgeError::UnknownBackend(other.to_string())),
    };
    Ok(sim)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = parse_args();
    let mut sim = build_simulator(&opts)?;

    let api = HidApi::new()?;
    let mut device = CduDevice::open(&api)?;
    info!(
        "CDU Bridge v{} driving {:?} via {}",
        env!("CARGO_PKG_VERSION"),
        device.id.family,
        opts.sim
    );

    if let Some(path) = &opts.font {
        let font: CduFont = serde_json::from_str(&fs::read_to_string(path)?)?;
        device.upload_font(&FontTemplate::airbus_9px(), &font)?;
    }
    device.set_brightness(BrightnessChannel::Display, opts.brightness)?;

    // Background device threads: key input and unplug detection
    let (event_tx, event_rx) = mpsc::channel(64);
    let stop = Arc::new(AtomicBool::new(false));
    let input_thread = spawn_input_reader(&api, device.id, event_tx.clone(), stop.clone())?;
    let watcher_thread = spawn_watcher(Arc::new(Mutex::new(api)), device.id, event_tx, stop.clone());

    sim.reconnect().await;

    let mut bridge = Bridge::new(device, sim, event_rx);
    bridge.run().await;

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    if input_thread.join().is_err() || watcher_thread.join().is_err() {
        warn!("Device thread panicked during shutdown");
    }

    Ok(())
}
