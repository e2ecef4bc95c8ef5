//! CDU device driver
//!
//! Owns the USB read/write plumbing around the pure encoders in
//! [`reports`](super::reports):
//! - display/LED/brightness writes with duplicate suppression
//! - a background thread draining input reports into key events
//! - a watcher thread that reports device unplug exactly once
//!
//! hidapi is inherently blocking, so both background loops are plain
//! `std::thread`s feeding a tokio channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::core::{Annunciator, Leds, Palette, Screen};
use crate::error::{BridgeError, DeviceError};

use super::font::{CduFont, FontTemplate};
use super::keys::{Key, KeyState, ReportDigest, INPUT_REPORT_LEN};
use super::reports::{
    encode_brightness, encode_display_if_changed, encode_led_changes, BrightnessChannel,
    DISPLAY_SETTLE_MS,
};
use super::{identify, DeviceFamily, DeviceIdentifier};

/// Events surfaced by the background device threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A key transition
    Key { key: Key, pressed: bool },
    /// The device left the bus
    Disconnected,
}

/// Indicators a device family can actually light
pub fn supported_annunciators(family: DeviceFamily) -> &'static [Annunciator] {
    match family {
        DeviceFamily::Mcdu => &[
            Annunciator::Fail,
            Annunciator::Fm,
            Annunciator::Mcdu,
            Annunciator::Menu,
            Annunciator::Fm1,
            Annunciator::Ind,
            Annunciator::Rdy,
            Annunciator::Status,
            Annunciator::Fm2,
        ],
        DeviceFamily::Pfp3N | DeviceFamily::Pfp7 => &[
            Annunciator::Fail,
            Annunciator::Exec,
            Annunciator::Msg,
            Annunciator::Ofst,
            Annunciator::Dspy,
        ],
    }
}

/// The opened physical unit: its display/LED buffers plus the write
/// half of the HID connection.
///
/// The [`Bridge`](crate::bridge::Bridge) loop is the single owner: all
/// mutation and flushing happens there, so concurrent writers can never
/// interleave partial frames.
pub struct CduDevice {
    pub id: DeviceIdentifier,
    dev: HidDevice,
    pub screen: Screen,
    pub leds: Leds,
    pub palette: Palette,
    /// 0-100, stepped by the BRT/DIM keys
    pub display_brightness: u8,
    last_fingerprint: Option<String>,
    last_leds: Leds,
    led_refresh_done: bool,
    last_flush: Option<Instant>,
}

impl CduDevice {
    /// Find and open the first known device on the bus
    pub fn open(api: &HidApi) -> Result<CduDevice, DeviceError> {
        for info in api.device_list() {
            if let Some(id) = identify(info.vendor_id(), info.product_id()) {
                info!(
                    "Opening {:?} ({:04x}:{:04x}, {:?} seat)",
                    id.family, id.vendor_id, id.product_id, id.seat
                );
                let dev = info.open_device(api)?;
                return Ok(CduDevice {
                    id,
                    dev,
                    screen: Screen::new(),
                    leds: Leds::new(),
                    palette: Palette::factory(),
                    display_brightness: 80,
                    last_fingerprint: None,
                    last_leds: Leds::new(),
                    led_refresh_done: false,
                    last_flush: None,
                });
            }
        }
        Err(DeviceError::NotFound)
    }

    /// Encode and send the screen. Skipped entirely when nothing changed
    /// since the last flush, unless `force` is set.
    ///
    /// A short settle delay is enforced between consecutive flushes:
    /// the device corrupts its own screen state when frames arrive
    /// back-to-back (hardware errata, see `DISPLAY_SETTLE_MS`).
    ///
    /// Blocking: both the settle wait (up to `DISPLAY_SETTLE_MS`) and
    /// the hidapi writes run on the calling thread. A flush is a
    /// blocking operation and is scheduled as one.
    pub fn refresh_display(&mut self, force: bool) -> Result<(), DeviceError> {
        let Some(packets) =
            encode_display_if_changed(&self.screen, &mut self.last_fingerprint, force)
        else {
            return Ok(());
        };

        if let Some(last) = self.last_flush {
            let settle = Duration::from_millis(DISPLAY_SETTLE_MS);
            let elapsed = last.elapsed();
            if elapsed < settle {
                thread::sleep(settle - elapsed);
            }
        }

        for packet in &packets {
            self.dev.write(packet)?;
        }
        self.last_flush = Some(Instant::now());
        debug!("Display flushed ({} reports)", packets.len());
        Ok(())
    }

    /// Send the indicators that changed since the previous refresh, or
    /// all supported ones when forced. The first refresh after open is
    /// always full.
    pub fn refresh_leds(&mut self, force: bool) -> Result<(), DeviceError> {
        let force = force || !self.led_refresh_done;
        let packets = encode_led_changes(
            &self.leds,
            &self.last_leds,
            supported_annunciators(self.id.family),
            force,
        );
        for packet in &packets {
            self.dev.write(packet)?;
        }
        self.last_leds = self.leds;
        self.led_refresh_done = true;
        Ok(())
    }

    /// Set one brightness channel. Always transmitted; brightness writes
    /// are never deduplicated.
    pub fn set_brightness(&mut self, channel: BrightnessChannel, percent: u8) -> Result<(), DeviceError> {
        if channel == BrightnessChannel::Display {
            self.display_brightness = percent.min(100);
        }
        self.dev.write(&encode_brightness(channel, percent))?;
        Ok(())
    }

    /// Step the display brightness by a signed amount
    pub fn step_brightness(&mut self, delta: i8) -> Result<(), DeviceError> {
        let next = (i16::from(self.display_brightness) + i16::from(delta)).clamp(0, 100) as u8;
        self.set_brightness(BrightnessChannel::Display, next)
    }

    /// Upload a bitmap font through the packet template
    pub fn upload_font(
        &mut self,
        template: &FontTemplate,
        font: &CduFont,
    ) -> Result<(), BridgeError> {
        let packets = template.fill(font)?;
        info!("Uploading font ({} packets)", packets.len());
        for packet in &packets {
            self.dev.write(packet).map_err(DeviceError::from)?;
        }
        Ok(())
    }
}

/// Spawn the background input reader.
///
/// The loop continuously drains the device's queued input reports and
/// decodes only the freshest one; upstream HID buffering otherwise
/// builds growing input lag. Read errors end the loop quietly; the
/// watcher reports the disconnect.
pub fn spawn_input_reader(
    api: &HidApi,
    id: DeviceIdentifier,
    tx: mpsc::Sender<DeviceEvent>,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, DeviceError> {
    let dev = api.open(id.vendor_id, id.product_id)?;
    Ok(thread::Builder::new()
        .name("cdu-input".into())
        .spawn(move || input_loop(dev, tx, stop))
        .expect("spawn input thread"))
}

fn input_loop(dev: HidDevice, tx: mpsc::Sender<DeviceEvent>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; INPUT_REPORT_LEN];
    let mut last_digest = ReportDigest::default();
    let mut last_state = KeyState::default();

    while !stop.load(Ordering::Relaxed) {
        // Block briefly for the next report
        let mut freshest: Option<usize> = None;
        match dev.read_timeout(&mut buf, 10) {
            Ok(0) => {}
            Ok(n) => freshest = Some(n),
            Err(e) => {
                debug!("Input read failed, stopping reader: {e}");
                return;
            }
        }

        // Drain anything else already queued, keeping only the last
        while freshest.is_some() {
            match dev.read_timeout(&mut buf, 0) {
                Ok(0) => break,
                Ok(n) => freshest = Some(n),
                Err(_) => break,
            }
        }

        let Some(n) = freshest else { continue };

        let digest = ReportDigest::of(&buf[..n]);
        if digest == last_digest {
            continue;
        }
        last_digest = digest;

        let Some(state) = KeyState::decode(&buf[..n]) else {
            continue;
        };
        for (key, pressed) in state.diff(&last_state) {
            if tx.blocking_send(DeviceEvent::Key { key, pressed }).is_err() {
                return;
            }
        }
        last_state = state;
    }
}

/// Spawn the unplug watcher: re-enumerates the bus once per second and
/// emits [`DeviceEvent::Disconnected`] exactly once when the opened
/// device is no longer listed.
pub fn spawn_watcher(
    api: Arc<Mutex<HidApi>>,
    id: DeviceIdentifier,
    tx: mpsc::Sender<DeviceEvent>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("cdu-watch".into())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(1));
                let present = {
                    let mut api = match api.lock() {
                        Ok(api) => api,
                        Err(_) => return,
                    };
                    if let Err(e) = api.refresh_devices() {
                        warn!("Device enumeration failed: {e}");
                        continue;
                    }
                    let present = api.device_list().any(|d| {
                        d.vendor_id() == id.vendor_id && d.product_id() == id.product_id
                    });
                    present
                };
                if !present {
                    info!("Device {:04x}:{:04x} disconnected", id.vendor_id, id.product_id);
                    let _ = tx.blocking_send(DeviceEvent::Disconnected);
                    return;
                }
            }
        })
        .expect("spawn watcher thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_annunciators_per_family() {
        let mcdu = supported_annunciators(DeviceFamily::Mcdu);
        assert_eq!(mcdu.len(), 9);
        assert!(mcdu.contains(&Annunciator::Rdy));
        assert!(!mcdu.contains(&Annunciator::Exec));

        let pfp = supported_annunciators(DeviceFamily::Pfp3N);
        assert!(pfp.contains(&Annunciator::Exec));
        assert!(!pfp.contains(&Annunciator::Rdy));
    }
}
