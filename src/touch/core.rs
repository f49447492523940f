use statig::{blocking::IntoStateMachineExt as _, prelude::*};

/// A discrete gesture derived from the sample stream. At most one gesture is
/// produced per sensor tick and it is consumed immediately by the mode
/// machine; nothing is queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gesture {
    /// A hand arrived on the sensor.
    Placed,
    /// The hand left the sensor (and did not complete a double tap).
    Removed,
    /// The hand has stayed on the sensor past the hold threshold.
    /// Emitted once per touch.
    HoldStarted,
    /// Second release within the tap window. Replaces `Removed` for that
    /// release.
    DoubleTap,
}

#[derive(Clone, Copy, Debug)]
pub struct TouchConfig {
    pub placed_sensitivity: u16,
    /// Negative: the drop between two samples that counts as a removal.
    pub removed_sensitivity: i32,
    pub hold_threshold_ms: u32,
    pub double_tap_window_ms: u32,
}

#[derive(Clone, Copy, Debug)]
enum TouchHsmEvent {
    Sample { now_ms: u64, raw: u16 },
}

#[derive(Default)]
struct DispatchContext {
    gesture: Option<Gesture>,
}

impl DispatchContext {
    fn emit(&mut self, gesture: Gesture) {
        if self.gesture.is_none() {
            self.gesture = Some(gesture);
        }
    }
}

pub struct TouchEngine {
    machine: statig::blocking::StateMachine<TouchHsm>,
}

impl TouchEngine {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            machine: TouchHsm::new(config).state_machine(),
        }
    }

    /// Feed one raw sample; returns the gesture this tick produced, if any.
    pub fn tick(&mut self, now_ms: u64, raw: u16) -> Option<Gesture> {
        let mut context = DispatchContext::default();
        self.machine
            .handle_with_context(&TouchHsmEvent::Sample { now_ms, raw }, &mut context);
        context.gesture
    }
}

struct TouchHsm {
    config: TouchConfig,
    prev: u16,
    primed: bool,
    touch_started_ms: u64,
    hold_emitted: bool,
    last_release_ms: Option<u64>,
}

impl TouchHsm {
    fn new(config: TouchConfig) -> Self {
        Self {
            config,
            prev: 0,
            primed: false,
            touch_started_ms: 0,
            hold_emitted: false,
            last_release_ms: None,
        }
    }

    fn delta(&self, raw: u16) -> i32 {
        raw as i32 - self.prev as i32
    }
}

#[state_machine(initial = "State::released()")]
impl TouchHsm {
    #[state]
    fn released(&mut self, context: &mut DispatchContext, event: &TouchHsmEvent) -> Outcome<State> {
        match event {
            TouchHsmEvent::Sample { now_ms, raw } => {
                let delta = self.delta(*raw);
                self.prev = *raw;
                if !self.primed {
                    // The very first sample only seeds the delta baseline,
                    // so a cold boot cannot register a phantom touch.
                    self.primed = true;
                    return Handled;
                }
                if delta >= self.config.placed_sensitivity as i32 {
                    self.touch_started_ms = *now_ms;
                    self.hold_emitted = false;
                    context.emit(Gesture::Placed);
                    return Transition(State::touched());
                }
                Handled
            }
        }
    }

    #[state]
    fn touched(&mut self, context: &mut DispatchContext, event: &TouchHsmEvent) -> Outcome<State> {
        match event {
            TouchHsmEvent::Sample { now_ms, raw } => {
                let delta = self.delta(*raw);
                self.prev = *raw;

                if delta <= self.config.removed_sensitivity {
                    let tap_window_open = self.last_release_ms.is_some_and(|last| {
                        now_ms.saturating_sub(last) <= self.config.double_tap_window_ms as u64
                    });
                    if !self.hold_emitted && tap_window_open {
                        // Window is consumed: a third quick tap starts a
                        // fresh window instead of chaining.
                        self.last_release_ms = None;
                        context.emit(Gesture::DoubleTap);
                    } else {
                        self.last_release_ms = Some(*now_ms);
                        context.emit(Gesture::Removed);
                    }
                    return Transition(State::released());
                }

                if !self.hold_emitted
                    && now_ms.saturating_sub(self.touch_started_ms)
                        >= self.config.hold_threshold_ms as u64
                {
                    self.hold_emitted = true;
                    context.emit(Gesture::HoldStarted);
                }
                Handled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: u16 = 8_000;
    const TOUCHED: u16 = 20_000;

    fn engine() -> TouchEngine {
        TouchEngine::new(TouchConfig {
            placed_sensitivity: 5_000,
            removed_sensitivity: -4_000,
            hold_threshold_ms: 5_000,
            double_tap_window_ms: 7_000,
        })
    }

    #[test]
    fn first_sample_only_primes() {
        let mut engine = engine();
        // Huge absolute value, but there is no baseline yet.
        assert_eq!(engine.tick(0, 60_000), None);
        assert_eq!(engine.tick(50, 60_100), None);
    }

    #[test]
    fn placed_emitted_once_per_episode() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(50, TOUCHED), Some(Gesture::Placed));
        // Staying on the sensor produces no further events.
        assert_eq!(engine.tick(100, TOUCHED + 100), None);
        assert_eq!(engine.tick(150, TOUCHED - 200), None);
        assert_eq!(engine.tick(200, IDLE), Some(Gesture::Removed));
    }

    #[test]
    fn hold_fires_exactly_at_threshold() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(50, TOUCHED), Some(Gesture::Placed));
        let mut events = Vec::new();
        for t in (1_000..=6_000).step_by(1_000) {
            if let Some(gesture) = engine.tick(50 + t, TOUCHED) {
                events.push((t, gesture));
            }
        }
        // Touch held 6 s with a 5 s threshold: one HoldStarted, at t == 5 s.
        assert_eq!(events, vec![(5_000, Gesture::HoldStarted)]);
        assert_eq!(engine.tick(6_100, IDLE), Some(Gesture::Removed));
    }

    #[test]
    fn release_before_threshold_never_holds() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(50, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(4_999, TOUCHED), None);
        assert_eq!(engine.tick(5_049, IDLE), Some(Gesture::Removed));
    }

    #[test]
    fn second_release_within_window_is_double_tap() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        // First tap, released at t=1000.
        assert_eq!(engine.tick(500, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(1_000, IDLE), Some(Gesture::Removed));
        // Second tap released 3.5 s later, inside the 7 s window.
        assert_eq!(engine.tick(4_000, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(4_500, IDLE), Some(Gesture::DoubleTap));
    }

    #[test]
    fn release_gap_beyond_window_is_plain_removal() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(500, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(1_000, IDLE), Some(Gesture::Removed));
        assert_eq!(engine.tick(9_000, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(9_500, IDLE), Some(Gesture::Removed));
    }

    #[test]
    fn double_tap_consumes_the_window() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(500, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(1_000, IDLE), Some(Gesture::Removed));
        assert_eq!(engine.tick(2_000, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(2_500, IDLE), Some(Gesture::DoubleTap));
        // A third quick tap opens a new window rather than chaining.
        assert_eq!(engine.tick(3_000, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(3_500, IDLE), Some(Gesture::Removed));
    }

    #[test]
    fn hold_release_is_never_a_double_tap() {
        let mut engine = engine();
        assert_eq!(engine.tick(0, IDLE), None);
        assert_eq!(engine.tick(500, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(1_000, IDLE), Some(Gesture::Removed));
        // Second touch becomes a hold; its release must stay `Removed`.
        assert_eq!(engine.tick(2_000, TOUCHED), Some(Gesture::Placed));
        assert_eq!(engine.tick(7_000, TOUCHED), Some(Gesture::HoldStarted));
        assert_eq!(engine.tick(7_500, IDLE), Some(Gesture::Removed));
    }
}
