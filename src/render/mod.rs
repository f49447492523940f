//! The animation engine.
//!
//! Consumes the render target the mode machine derives and turns it into one
//! uniform strip color per tick. Runs at two cadences: a fast tick while
//! brightness is visibly moving (fresh activation, fade tail, heartbeat,
//! flash, color cross-fade) and a slow tick through the long steady middle
//! of a fade, so the strip is not redrawn needlessly.

pub mod curves;

use crate::color::{self, Rgb};
use crate::config::Config;

/// Which curve the current mode calls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimKind {
    /// Nothing lit.
    Idle,
    /// Fade-out over a fixed duration (Active, and a lone sleeping peer).
    ActiveFade,
    /// Heartbeat pulse with no fixed end.
    Heartbeat,
    /// Fade-out over the sleep duration.
    SleepFade,
}

/// What the mode machine wants on the strip, derived fresh on every
/// contributing change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub kind: AnimKind,
    pub color: Rgb,
    /// Fade length for the fading kinds; unused otherwise.
    pub duration_ms: u32,
}

impl RenderTarget {
    pub const fn idle() -> Self {
        Self {
            kind: AnimKind::Idle,
            color: color::OFF,
            duration_ms: 0,
        }
    }
}

/// A target handed to the engine, with or without a curve restart.
///
/// A restart resets the curve epoch (fresh activation); a plain refresh
/// re-colors the running curve (e.g. the peer's contribution changed
/// mid-fade).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderUpdate {
    pub target: RenderTarget,
    pub restart: bool,
}

/// How long until the next render tick is worthwhile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickClass {
    Fast,
    Slow,
}

/// Color changes glide over this window instead of snapping.
const CROSS_FADE_MS: u32 = 500;

/// Share of a fade's duration that counts as its "critical" opening.
const FAST_OPENING_NUM: u32 = 3;
const FAST_OPENING_DEN: u32 = 10;

/// Share of a fade's duration that counts as its dying tail.
const FAST_TAIL_DEN: u32 = 5;

pub struct AnimationEngine {
    target: RenderTarget,
    started_ms: u64,
    cross_fade_from: Option<Rgb>,
    cross_fade_started_ms: u64,
    flash: Option<(Rgb, u64)>,
    last_output: Rgb,
    fast_tick_ms: u32,
    slow_tick_ms: u32,
}

impl AnimationEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            target: RenderTarget::idle(),
            started_ms: 0,
            cross_fade_from: None,
            cross_fade_started_ms: 0,
            flash: None,
            last_output: color::OFF,
            fast_tick_ms: config.led_fast_tick_ms,
            slow_tick_ms: config.led_slow_tick_ms,
        }
    }

    /// Adopt a new target. Identical input is a no-op, so re-deriving an
    /// unchanged target never disturbs a running curve.
    pub fn apply(&mut self, update: RenderUpdate, now_ms: u64) {
        if update.restart {
            self.cross_fade_from = Some(self.last_output);
            self.cross_fade_started_ms = now_ms;
            self.target = update.target;
            self.started_ms = now_ms;
        } else if update.target != self.target {
            self.cross_fade_from = Some(self.last_output);
            self.cross_fade_started_ms = now_ms;
            self.target = update.target;
        }
    }

    /// One-shot 3 s flash, overriding the running curve for its duration.
    pub fn flash(&mut self, color: Rgb, now_ms: u64) {
        self.flash = Some((color, now_ms));
    }

    /// Compute the strip color for this tick.
    pub fn tick(&mut self, now_ms: u64) -> Rgb {
        if let Some((flash_color, flash_started)) = self.flash {
            let elapsed = now_ms.saturating_sub(flash_started);
            if elapsed >= curves::FLASH_DURATION_MS as u64 {
                self.flash = None;
            } else {
                let output = color::dim(flash_color, curves::flash(elapsed));
                self.last_output = output;
                return output;
            }
        }

        let elapsed = now_ms.saturating_sub(self.started_ms);
        let base = match self.target.kind {
            AnimKind::Idle => color::OFF,
            AnimKind::ActiveFade | AnimKind::SleepFade => color::dim(
                self.target.color,
                curves::fade(elapsed, self.target.duration_ms),
            ),
            AnimKind::Heartbeat => color::dim(self.target.color, curves::heartbeat(elapsed)),
        };

        let output = match self.cross_fade_from {
            Some(from) => {
                let t = now_ms.saturating_sub(self.cross_fade_started_ms) as u32;
                if t >= CROSS_FADE_MS {
                    self.cross_fade_from = None;
                    base
                } else {
                    lerp(from, base, t, CROSS_FADE_MS)
                }
            }
            None => base,
        };
        self.last_output = output;
        output
    }

    pub fn tick_class(&self, now_ms: u64) -> TickClass {
        if self.flash.is_some() || self.cross_fade_from.is_some() {
            return TickClass::Fast;
        }
        match self.target.kind {
            AnimKind::Heartbeat => TickClass::Fast,
            AnimKind::Idle => TickClass::Slow,
            AnimKind::ActiveFade | AnimKind::SleepFade => {
                let duration = self.target.duration_ms as u64;
                let elapsed = now_ms.saturating_sub(self.started_ms);
                let opening = duration * FAST_OPENING_NUM as u64 / FAST_OPENING_DEN as u64;
                let tail_start = duration - duration / FAST_TAIL_DEN as u64;
                if elapsed < opening || (elapsed >= tail_start && elapsed < duration) {
                    TickClass::Fast
                } else {
                    TickClass::Slow
                }
            }
        }
    }

    /// Milliseconds until the next tick at the current cadence.
    pub fn tick_len_ms(&self, now_ms: u64) -> u32 {
        match self.tick_class(now_ms) {
            TickClass::Fast => self.fast_tick_ms,
            TickClass::Slow => self.slow_tick_ms,
        }
    }
}

fn lerp(from: Rgb, to: Rgb, t: u32, duration: u32) -> Rgb {
    let channel = |a: u8, b: u8| -> u8 {
        let a = a as i32;
        let b = b as i32;
        (a + (b - a) * t as i32 / duration as i32) as u8
    };
    Rgb::new(
        channel(from.r, to.r),
        channel(from.g, to.g),
        channel(from.b, to.b),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    fn engine() -> AnimationEngine {
        AnimationEngine {
            target: RenderTarget::idle(),
            started_ms: 0,
            cross_fade_from: None,
            cross_fade_started_ms: 0,
            flash: None,
            last_output: color::OFF,
            fast_tick_ms: 20,
            slow_tick_ms: 500,
        }
    }

    fn active(color: Rgb) -> RenderUpdate {
        RenderUpdate {
            target: RenderTarget {
                kind: AnimKind::ActiveFade,
                color,
                duration_ms: 10_000,
            },
            restart: true,
        }
    }

    #[test]
    fn idle_renders_dark_and_slow() {
        let mut engine = engine();
        assert_eq!(engine.tick(0), color::OFF);
        assert_eq!(engine.tick_class(0), TickClass::Slow);
    }

    #[test]
    fn activation_starts_full_after_cross_fade() {
        let mut engine = engine();
        engine.apply(active(Rgb::new(200, 100, 0)), 1_000);
        // Past the cross-fade window the curve output is authoritative:
        // 600 ms into a 10 s quadratic fade is still near full brightness.
        assert_eq!(engine.tick(1_600), Rgb::new(176, 88, 0));
    }

    #[test]
    fn retrigger_restarts_the_fade_from_full() {
        let mut engine = engine();
        let orange = Rgb::new(200, 100, 0);
        engine.apply(active(orange), 0);
        let deep = engine.tick(9_000);
        assert!(deep.r < 10);
        // Re-trigger late in the fade: after the cross-fade settles the
        // output is back near full brightness.
        engine.apply(active(orange), 9_000);
        let restarted = engine.tick(9_600);
        assert!(restarted.r > 170, "got {restarted:?}");
    }

    #[test]
    fn refresh_recolors_without_restarting() {
        let mut engine = engine();
        engine.apply(active(Rgb::new(200, 0, 0)), 0);
        let _ = engine.tick(5_000);
        // Peer contribution changes the color mid-fade.
        engine.apply(
            RenderUpdate {
                target: RenderTarget {
                    kind: AnimKind::ActiveFade,
                    color: Rgb::new(0, 200, 0),
                    duration_ms: 10_000,
                },
                restart: false,
            },
            5_000,
        );
        let output = engine.tick(5_600);
        // Same curve position as an uninterrupted fade, new hue.
        assert_eq!(output.r, 0);
        assert!(output.g > 0);
        // The fade still expires at the original deadline.
        assert_eq!(engine.tick(10_600), color::OFF);
    }

    #[test]
    fn identical_update_is_a_no_op() {
        let mut engine = engine();
        engine.apply(active(Rgb::new(200, 100, 0)), 0);
        let _ = engine.tick(600);
        let before = engine.tick(5_000);
        engine.apply(
            RenderUpdate {
                restart: false,
                ..active(Rgb::new(200, 100, 0))
            },
            5_000,
        );
        assert_eq!(engine.tick(5_000), before);
    }

    #[test]
    fn flash_overrides_then_returns_to_curve() {
        let mut engine = engine();
        engine.apply(
            RenderUpdate {
                target: RenderTarget {
                    kind: AnimKind::SleepFade,
                    color: Rgb::new(10, 0, 60),
                    duration_ms: 100_000,
                },
                restart: true,
            },
            0,
        );
        let _ = engine.tick(600);
        engine.flash(Rgb::new(255, 0, 0), 10_000);
        // Peak of the flash is the full message color.
        assert_eq!(engine.tick(10_300), Rgb::new(255, 0, 0));
        assert_eq!(engine.tick_class(10_300), TickClass::Fast);
        // After 3 s the sleep curve dictates the output again.
        let resumed = engine.tick(13_100);
        assert_eq!(resumed.g, 0);
        assert!(resumed.b > 0 && resumed.r < resumed.b);
    }

    #[test]
    fn cadence_fast_in_opening_and_tail_slow_in_between() {
        let mut engine = engine();
        engine.apply(active(Rgb::new(200, 100, 0)), 0);
        let _ = engine.tick(600);
        assert_eq!(engine.tick_class(1_000), TickClass::Fast); // opening 30%
        assert_eq!(engine.tick_class(5_000), TickClass::Slow); // steady middle
        assert_eq!(engine.tick_class(8_500), TickClass::Fast); // tail 20%
        assert_eq!(engine.tick_class(11_000), TickClass::Slow); // expired
        assert_eq!(engine.tick_len_ms(5_000), 500);
        assert_eq!(engine.tick_len_ms(1_000), 20);
    }

    #[test]
    fn heartbeat_always_fast() {
        let mut engine = engine();
        engine.apply(
            RenderUpdate {
                target: RenderTarget {
                    kind: AnimKind::Heartbeat,
                    color: Rgb::new(200, 100, 0),
                    duration_ms: 0,
                },
                restart: true,
            },
            0,
        );
        let _ = engine.tick(600);
        assert_eq!(engine.tick_class(60_000), TickClass::Fast);
    }
}
