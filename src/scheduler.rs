//! The cooperative loop.
//!
//! One logical thread owns every component. Each cadence (sensor sampling,
//! message checking, rendering) is an independent deadline compared
//! against a monotonic clock; `poll` runs whatever is due and returns. No
//! component ever sleeps, so a slow reconnect can delay at most one
//! iteration, never starve the sensor.
//!
//! The scheduler is also where events are routed: gestures into the mode
//! machine, its announcements into the link, inbound messages back into the
//! mode machine, render targets into the animation engine, and fault codes
//! onto the status lane.

use core::fmt::Write as _;

use crate::color;
use crate::config::Config;
use crate::lamp::ModeMachine;
use crate::link::wire::{ControlMessage, Inbound, PeerMessage};
use crate::link::{Inbox, LinkError, NetworkLink};
use crate::ports::{ConfigStore, LampStrip, LinkTransport, TouchProbe};
use crate::render::AnimationEngine;
use crate::status::{StatusLane, StatusPattern};
use crate::touch::{TouchConfig, TouchEngine};

/// How long the green success hold stays on the strip.
const BOOT_SUCCESS_MS: u32 = 3_000;

/// How long the yellow unclassified-error pattern stays up.
const RUNTIME_FLASH_MS: u32 = 10_000;

pub struct Scheduler<P, S, T, C>
where
    P: TouchProbe,
    S: LampStrip,
    T: LinkTransport,
    C: ConfigStore,
{
    probe: P,
    strip: S,
    store: C,
    link: NetworkLink<T>,
    touch: TouchEngine,
    mode: ModeMachine,
    anim: AnimationEngine,
    status: StatusLane,
    sensor_tick_ms: u32,
    message_check_ms: u32,
    next_sensor_ms: u64,
    next_check_ms: u64,
    next_led_ms: u64,
    reboot_requested: bool,
}

impl<P, S, T, C> Scheduler<P, S, T, C>
where
    P: TouchProbe,
    S: LampStrip,
    T: LinkTransport,
    C: ConfigStore,
{
    pub fn new(config: &Config, probe: P, strip: S, transport: T, store: C) -> Self {
        Self {
            probe,
            strip,
            store,
            link: NetworkLink::new(transport, config),
            touch: TouchEngine::new(TouchConfig::from_config(config)),
            mode: ModeMachine::new(config),
            anim: AnimationEngine::new(config),
            status: StatusLane::new(),
            sensor_tick_ms: config.sensor_tick_ms,
            message_check_ms: config.message_check_ms,
            next_sensor_ms: 0,
            next_check_ms: 0,
            next_led_ms: 0,
            reboot_requested: false,
        }
    }

    /// Bring the link up and enter steady state. Shows the connecting color
    /// while the (bounded) connect sequence runs, the green hold on
    /// success, and the numbered fault pattern on failure, in which case
    /// the link keeps retrying on its fixed pacing once polling starts.
    pub fn boot(&mut self, now_ms: u64) {
        self.strip.fill(color::ORANGE);
        match self.link.connect(now_ms) {
            Ok(()) => self
                .status
                .show(StatusPattern::boot_success(), now_ms, Some(BOOT_SUCCESS_MS)),
            Err(error) => self.connectivity_fault(error, now_ms),
        }
        self.next_sensor_ms = now_ms;
        self.next_check_ms = now_ms;
        self.next_led_ms = now_ms;
    }

    /// Run every cadence that has come due.
    pub fn poll(&mut self, now_ms: u64) {
        if now_ms >= self.next_sensor_ms {
            self.next_sensor_ms = bump(self.next_sensor_ms, self.sensor_tick_ms, now_ms);
            self.sensor_tick(now_ms);
        }
        if now_ms >= self.next_check_ms {
            self.next_check_ms = bump(self.next_check_ms, self.message_check_ms, now_ms);
            self.message_check(now_ms);
        }
        if now_ms >= self.next_led_ms {
            self.led_tick(now_ms);
            self.next_led_ms = now_ms + self.anim.tick_len_ms(now_ms) as u64;
        }
    }

    /// The earliest instant at which `poll` has work again.
    pub fn next_deadline(&self) -> u64 {
        self.next_sensor_ms
            .min(self.next_check_ms)
            .min(self.next_led_ms)
    }

    /// Set by a remote `reboot` command; the embedding shell performs the
    /// actual reset.
    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    /// Surface an unclassified runtime error: yellow flash, keep going.
    pub fn report_runtime_error(&mut self, now_ms: u64) {
        self.status
            .show(StatusPattern::runtime_error(), now_ms, Some(RUNTIME_FLASH_MS));
    }

    fn sensor_tick(&mut self, now_ms: u64) {
        let raw = self.probe.read_raw();
        if let Some(gesture) = self.touch.tick(now_ms, raw) {
            log::debug!("gesture {gesture:?}");
            if let Some(message) = self.mode.on_gesture(gesture, now_ms) {
                self.announce(message, now_ms);
            }
        }
        if let Some(message) = self.mode.on_tick(now_ms) {
            self.announce(message, now_ms);
        }
    }

    fn announce(&mut self, message: PeerMessage, now_ms: u64) {
        if self.link.debug_feed_enabled() {
            let mut line = heapless::String::<48>::new();
            let _ = write!(line, "mode {}", self.mode.mode().name());
            self.link.publish_debug(&line);
        }
        if let Err(error) = self.link.publish_update(&message, now_ms) {
            self.connectivity_fault(error, now_ms);
        }
    }

    fn message_check(&mut self, now_ms: u64) {
        let was_connected = self.link.is_connected();
        let mut inbox = Inbox::new();
        match self.link.poll(now_ms, &mut inbox) {
            Ok(()) => {
                if !was_connected && self.link.is_connected() {
                    // Back up after an outage: drop the fault pattern and
                    // hold the success color like a fresh boot.
                    self.status.clear();
                    self.status.show(
                        StatusPattern::boot_success(),
                        now_ms,
                        Some(BOOT_SUCCESS_MS),
                    );
                }
            }
            Err(error) => self.connectivity_fault(error, now_ms),
        }

        for item in inbox {
            match item {
                Inbound::Peer(message) => self.mode.on_peer_message(message, now_ms),
                Inbound::Control(control) => self.handle_control(control, now_ms),
                // Echoes are consumed inside the link.
                Inbound::PingEcho => {}
            }
        }
    }

    fn handle_control(&mut self, control: ControlMessage, now_ms: u64) {
        if self.status.is_fault_active() {
            log::warn!("refusing remote command while faulted");
            return;
        }
        match control {
            ControlMessage::Reboot => {
                log::info!("reboot requested remotely");
                self.reboot_requested = true;
            }
            ControlMessage::ConfigUpdate { key, value } => {
                match self.store.apply_update(&key, &value) {
                    Ok(()) => log::info!("stored config update for `{key}`"),
                    Err(error) => {
                        log::warn!("config update for `{key}` failed: {error}");
                        self.report_runtime_error(now_ms);
                    }
                }
            }
        }
    }

    fn connectivity_fault(&mut self, error: LinkError, now_ms: u64) {
        if self.link.debug_feed_enabled() {
            let mut line = heapless::String::<48>::new();
            let _ = write!(line, "link fault {}", error.fault.code());
            self.link.publish_debug(&line);
        }
        self.status
            .show_fault(StatusPattern::connectivity(error.fault.code()), now_ms);
    }

    fn led_tick(&mut self, now_ms: u64) {
        if let Some(flash_color) = self.mode.take_flash() {
            self.anim.flash(flash_color, now_ms);
        }
        if let Some(update) = self.mode.take_render_update(now_ms) {
            self.anim.apply(update, now_ms);
        }
        let frame = match self.status.color_at(now_ms) {
            Some(status_color) => status_color,
            None => self.anim.tick(now_ms),
        };
        self.strip.fill(frame);
    }
}

/// Advance a fixed-cadence deadline, re-anchoring after a stall instead of
/// firing a burst of catch-up ticks.
fn bump(deadline: u64, interval_ms: u32, now_ms: u64) -> u64 {
    let next = deadline + interval_ms as u64;
    if next <= now_ms {
        now_ms + interval_ms as u64
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::sample;
    use crate::ports::{InboundFrame, SessionOptions, TransportError};

    struct StubProbe;

    impl TouchProbe for StubProbe {
        fn read_raw(&mut self) -> u16 {
            8_000
        }
    }

    #[derive(Default)]
    struct RecordingStrip {
        fills: std::vec::Vec<crate::color::Rgb>,
    }

    struct StripHandle(std::rc::Rc<std::cell::RefCell<RecordingStrip>>);

    impl LampStrip for StripHandle {
        fn fill(&mut self, color: crate::color::Rgb) {
            self.0.borrow_mut().fills.push(color);
        }
    }

    struct StubStore;

    impl ConfigStore for StubStore {
        fn load<'a>(&mut self, _buf: &'a mut [u8]) -> Result<&'a str, crate::ports::StoreError> {
            Err(crate::ports::StoreError::Unreadable)
        }

        fn apply_update(
            &mut self,
            _key: &str,
            _value: &str,
        ) -> Result<(), crate::ports::StoreError> {
            Ok(())
        }
    }

    /// Healthy transport that, like a real broker, echoes liveness probes
    /// back on their topic.
    #[derive(Default)]
    struct OkTransport {
        echoes: std::collections::VecDeque<InboundFrame>,
    }

    impl LinkTransport for OkTransport {
        fn join_network(
            &mut self,
            _ssid: &str,
            _password: &str,
            _timeout_ms: u32,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn check_internet(&mut self, _timeout_ms: u32) -> Result<(), TransportError> {
            Ok(())
        }

        fn open_session(&mut self, _options: &SessionOptions<'_>) -> Result<(), TransportError> {
            Ok(())
        }

        fn subscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if topic.ends_with("-ping") {
                self.echoes.push_back(InboundFrame {
                    topic: heapless::String::try_from(topic).unwrap(),
                    payload: heapless::Vec::from_slice(payload).unwrap(),
                });
            }
            Ok(())
        }

        fn poll_inbound(&mut self) -> Result<Option<InboundFrame>, TransportError> {
            Ok(self.echoes.pop_front())
        }
    }

    fn scheduler(
        strip: std::rc::Rc<std::cell::RefCell<RecordingStrip>>,
    ) -> Scheduler<StubProbe, StripHandle, OkTransport, StubStore> {
        Scheduler::new(
            &sample(),
            StubProbe,
            StripHandle(strip),
            OkTransport::default(),
            StubStore,
        )
    }

    #[test]
    fn deadlines_advance_at_their_own_cadences() {
        let strip = std::rc::Rc::new(std::cell::RefCell::new(RecordingStrip::default()));
        let mut scheduler = scheduler(strip.clone());
        scheduler.boot(0);

        // Sensor tick is 50 ms, message check 500 ms; idle animation keeps
        // the led cadence slow (500 ms).
        scheduler.poll(0);
        assert_eq!(scheduler.next_sensor_ms, 50);
        assert_eq!(scheduler.next_check_ms, 500);
        assert_eq!(scheduler.next_led_ms, 500);
        assert_eq!(scheduler.next_deadline(), 50);

        // Nothing due yet: polling is a no-op.
        scheduler.poll(30);
        assert_eq!(scheduler.next_sensor_ms, 50);

        scheduler.poll(50);
        assert_eq!(scheduler.next_sensor_ms, 100);
        assert_eq!(scheduler.next_check_ms, 500);
    }

    #[test]
    fn stalled_deadlines_reanchor_instead_of_bursting() {
        assert_eq!(bump(100, 50, 100), 150);
        // A 2 s stall does not cause 40 back-to-back sensor ticks.
        assert_eq!(bump(100, 50, 2_100), 2_150);
    }

    #[test]
    fn boot_shows_green_then_goes_dark() {
        let strip = std::rc::Rc::new(std::cell::RefCell::new(RecordingStrip::default()));
        let mut scheduler = scheduler(strip.clone());
        scheduler.boot(0);

        scheduler.poll(100);
        assert_eq!(*strip.borrow().fills.last().unwrap(), crate::color::GREEN);

        scheduler.poll(3_600);
        assert_eq!(*strip.borrow().fills.last().unwrap(), crate::color::OFF);
    }

    #[test]
    fn runtime_error_flashes_yellow_then_expires() {
        let strip = std::rc::Rc::new(std::cell::RefCell::new(RecordingStrip::default()));
        let mut scheduler = scheduler(strip.clone());
        scheduler.boot(0);
        scheduler.poll(0);

        scheduler.report_runtime_error(4_000);
        scheduler.poll(4_100);
        assert_eq!(*strip.borrow().fills.last().unwrap(), crate::color::YELLOW);

        // Expired after 10 s; the lamp goes back to its idle rendering.
        scheduler.poll(14_600);
        assert_eq!(*strip.borrow().fills.last().unwrap(), crate::color::OFF);
    }
}
