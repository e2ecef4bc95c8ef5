//! The bridge loop
//!
//! Owns the opened device and one simulator adapter, and shuttles
//! between them: key events flow device-to-simulator through the
//! keymap, display refreshes flow simulator-to-device through the seat
//! buffers. BRT and DIM are handled locally (brightness steps; pressed
//! together they cycle the mirrored seat). While the simulator is
//! unreachable the device shows a status page instead of stale flight
//! data.
//!
//! Device writes can fail at any moment once the unit is unplugged.
//! The loop never exits on a write error: it logs and carries on, and
//! the watcher thread's [`DeviceEvent::Disconnected`] is the sole
//! terminator.

use log::{info, warn};
use tokio::sync::mpsc;

use crate::compositor::Compositor;
use crate::core::{Annunciator, Leds, Screen};
use crate::device::driver::{supported_annunciators, CduDevice, DeviceEvent};
use crate::device::keymap::KeymapRegistry;
use crate::device::{DeviceFamily, Key};
use crate::error::DeviceError;
use crate::sim::{ConnectionState, Simulator};

/// Brightness change per BRT/DIM press, percent
const BRIGHTNESS_STEP: i8 = 10;

/// The bridge's view of the hardware.
///
/// [`CduDevice`] is the production implementation; tests substitute a
/// link whose flushes fail on demand.
pub trait DeviceLink {
    fn family(&self) -> DeviceFamily;
    fn screen(&mut self) -> &mut Screen;
    fn leds(&mut self) -> &mut Leds;
    fn flush_display(&mut self, force: bool) -> Result<(), DeviceError>;
    fn flush_leds(&mut self, force: bool) -> Result<(), DeviceError>;
    fn step_brightness(&mut self, delta: i8) -> Result<(), DeviceError>;
}

impl DeviceLink for CduDevice {
    fn family(&self) -> DeviceFamily {
        self.id.family
    }

    fn screen(&mut self) -> &mut Screen {
        &mut self.screen
    }

    fn leds(&mut self) -> &mut Leds {
        &mut self.leds
    }

    fn flush_display(&mut self, force: bool) -> Result<(), DeviceError> {
        self.refresh_display(force)
    }

    fn flush_leds(&mut self, force: bool) -> Result<(), DeviceError> {
        self.refresh_leds(force)
    }

    fn step_brightness(&mut self, delta: i8) -> Result<(), DeviceError> {
        CduDevice::step_brightness(self, delta)
    }
}

pub struct Bridge<D> {
    device: D,
    sim: Simulator,
    events: mpsc::Receiver<DeviceEvent>,
    keymap: KeymapRegistry,
    brt_down: bool,
    dim_down: bool,
}

impl<D: DeviceLink> Bridge<D> {
    pub fn new(device: D, sim: Simulator, events: mpsc::Receiver<DeviceEvent>) -> Self {
        Self {
            device,
            sim,
            events,
            keymap: KeymapRegistry::builtin(),
            brt_down: false,
            dim_down: false,
        }
    }

    /// Run until the device disconnects or its event channel closes
    pub async fn run(&mut self) {
        let buffers = self.sim.mcdus().buffers().clone();
        let mut state_rx = self.sim.mcdus().watch_state();

        self.paint_status(self.sim.mcdus().state());

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(DeviceEvent::Key { key, pressed }) => self.handle_key(key, pressed),
                        Some(DeviceEvent::Disconnected) | None => {
                            info!("Device gone, stopping bridge");
                            break;
                        }
                    }
                }
                _ = buffers.refresh_requested() => {
                    if self.sim.mcdus().state() == ConnectionState::Connected {
                        self.copy_selected_seat();
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    match state {
                        ConnectionState::Connected => self.copy_selected_seat(),
                        other => self.paint_status(other),
                    }
                }
            }
        }

        self.sim.disconnect().await;
    }

    /// Copy the selected seat's buffers onto the device and flush
    fn copy_selected_seat(&mut self) {
        let seat = self.sim.mcdus().selected_seat();
        let snap = self.sim.mcdus().buffers().snapshot(seat);

        self.device.screen().copy_from(&snap.screen);
        // Lamps the hardware does not carry stay dark
        let caps = supported_annunciators(self.device.family());
        for ann in Annunciator::ALL {
            let lit = caps.contains(&ann) && snap.leds.get(ann);
            self.device.leds().set(ann, lit);
        }

        if let Err(e) = self.device.flush_display(false) {
            warn!("Display flush failed: {e}");
        }
        if let Err(e) = self.device.flush_leds(false) {
            warn!("LED flush failed: {e}");
        }
    }

    fn handle_key(&mut self, key: Key, pressed: bool) {
        match key {
            Key::Brt => {
                self.brt_down = pressed;
                if pressed {
                    if self.dim_down {
                        self.sim.mcdus_mut().advance_selected_seat();
                    } else if let Err(e) = self.device.step_brightness(BRIGHTNESS_STEP) {
                        warn!("Brightness write failed: {e}");
                    }
                }
                return;
            }
            Key::Dim => {
                self.dim_down = pressed;
                if pressed {
                    if self.brt_down {
                        self.sim.mcdus_mut().advance_selected_seat();
                    } else if let Err(e) = self.device.step_brightness(-BRIGHTNESS_STEP) {
                        warn!("Brightness write failed: {e}");
                    }
                }
                return;
            }
            _ => {}
        }

        let translated =
            self.keymap
                .translate(self.device.family(), self.sim.native_family(), key);
        self.sim.send_key(translated, pressed);
    }

    /// Paint the local status page
    fn paint_status(&mut self, state: ConnectionState) {
        let (line, detail) = match state {
            ConnectionState::Disconnected => ("<red>DISCONNECTED", "SIMULATOR LINK DOWN"),
            ConnectionState::Connecting => ("<amber>CONNECTING", "WAITING FOR SIMULATOR"),
            ConnectionState::Disconnecting => ("<amber>DISCONNECTING", ""),
            ConnectionState::Connected => ("<green>CONNECTED", ""),
        };
        let screen = self.device.screen();
        screen.clear();
        Compositor::new(screen)
            .centered(0, "<small>CDU BRIDGE")
            .centered(6, line)
            .centered(8, &format!("<small>{detail}"));
        if let Err(e) = self.device.flush_display(true) {
            warn!("Status page flush failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Seat;
    use crate::sim::GraphqlAdapter;

    /// A link whose every write fails, as after an unplug
    struct DeadLink {
        screen: Screen,
        leds: Leds,
        display_flushes: usize,
        brightness_steps: usize,
    }

    impl DeadLink {
        fn new() -> Self {
            Self {
                screen: Screen::new(),
                leds: Leds::new(),
                display_flushes: 0,
                brightness_steps: 0,
            }
        }

        fn gone() -> DeviceError {
            DeviceError::Hid(hidapi::HidError::HidApiError {
                message: "device gone".into(),
            })
        }
    }

    impl DeviceLink for DeadLink {
        fn family(&self) -> DeviceFamily {
            DeviceFamily::Mcdu
        }

        fn screen(&mut self) -> &mut Screen {
            &mut self.screen
        }

        fn leds(&mut self) -> &mut Leds {
            &mut self.leds
        }

        fn flush_display(&mut self, _force: bool) -> Result<(), DeviceError> {
            self.display_flushes += 1;
            Err(Self::gone())
        }

        fn flush_leds(&mut self, _force: bool) -> Result<(), DeviceError> {
            Err(Self::gone())
        }

        fn step_brightness(&mut self, _delta: i8) -> Result<(), DeviceError> {
            self.brightness_steps += 1;
            Err(Self::gone())
        }
    }

    fn test_bridge(events: mpsc::Receiver<DeviceEvent>) -> Bridge<DeadLink> {
        let sim = Simulator::Graphql(GraphqlAdapter::new("127.0.0.1", 0, false));
        Bridge::new(DeadLink::new(), sim, events)
    }

    #[tokio::test]
    async fn test_write_failures_do_not_end_loop() {
        let (tx, rx) = mpsc::channel(8);
        let mut bridge = test_bridge(rx);

        // Every queued event hits a failing write before the watcher's
        // disconnect arrives; the loop must survive them all.
        tx.send(DeviceEvent::Key { key: Key::Brt, pressed: true }).await.unwrap();
        tx.send(DeviceEvent::Key { key: Key::Brt, pressed: false }).await.unwrap();
        tx.send(DeviceEvent::Disconnected).await.unwrap();
        bridge.run().await;

        // Status paint plus the brightness step were both attempted
        assert!(bridge.device.display_flushes >= 1);
        assert_eq!(bridge.device.brightness_steps, 1);
    }

    #[tokio::test]
    async fn test_connected_refresh_survives_flush_errors() {
        let (tx, rx) = mpsc::channel(8);
        let mut bridge = test_bridge(rx);
        bridge.sim.mcdus().record_state(ConnectionState::Connected);
        bridge.sim.mcdus().buffers().request_refresh();

        // The queued refresh is serviced first; the disconnect lands
        // only after its flush has already failed.
        let driver = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            tx.send(DeviceEvent::Disconnected).await.unwrap();
        };
        let ((), ()) = tokio::join!(bridge.run(), driver);

        // Initial status paint plus the connected-seat copy
        assert!(bridge.device.display_flushes >= 2);
    }

    #[tokio::test]
    async fn test_brt_dim_chord_advances_seat() {
        let (tx, rx) = mpsc::channel(8);
        let mut bridge = test_bridge(rx);
        assert_eq!(bridge.sim.mcdus().selected_seat(), Seat::Captain);

        tx.send(DeviceEvent::Key { key: Key::Brt, pressed: true }).await.unwrap();
        tx.send(DeviceEvent::Key { key: Key::Dim, pressed: true }).await.unwrap();
        tx.send(DeviceEvent::Disconnected).await.unwrap();
        bridge.run().await;

        assert_eq!(bridge.sim.mcdus().selected_seat(), Seat::FirstOfficer);
        // The chord must not also step brightness
        assert_eq!(bridge.device.brightness_steps, 1);
    }
}
