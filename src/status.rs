//! Status indication on the strip.
//!
//! The lamp talks to its owner through fixed light patterns: solid blue
//! while booting, solid orange while connecting, a green hold on success,
//! and flash sequences for the error taxonomy. The solid phases are plain
//! fills at the call sites that block through them; everything else is a
//! pure function of phase so the scheduler can tick it without sleeping,
//! and takes priority over the mode animation while active.

use crate::color::{self, Rgb};

/// On/off timing of one connectivity flash within a counted group.
const COUNT_ON_MS: u64 = 1_000;
const COUNT_OFF_MS: u64 = 500;
/// Dark pause separating counted groups.
const COUNT_GAP_MS: u64 = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusPattern {
    Solid(Rgb),
    /// Plain repeating blink.
    Blink { color: Rgb, on_ms: u32, off_ms: u32 },
    /// `count` flashes, a pause, repeat: the numbered connectivity codes.
    CountedFlash { color: Rgb, count: u8 },
}

impl StatusPattern {
    /// Boot or reconnect succeeded; shown for three seconds.
    pub const fn boot_success() -> Self {
        Self::Solid(color::GREEN)
    }

    /// Configuration validation failed. Fatal, never retried.
    pub const fn fatal_config() -> Self {
        Self::Blink {
            color: color::RED,
            on_ms: 1_500,
            off_ms: 500,
        }
    }

    /// Connectivity failure with its numbered code.
    pub const fn connectivity(code: u8) -> Self {
        Self::CountedFlash {
            color: color::ORANGE,
            count: code,
        }
    }

    /// Unclassified runtime error; best-effort operation continues.
    pub const fn runtime_error() -> Self {
        Self::Blink {
            color: color::YELLOW,
            on_ms: 2_000,
            off_ms: 1_000,
        }
    }

    /// Strip color at `phase_ms` since the pattern started.
    pub fn color_at(&self, phase_ms: u64) -> Rgb {
        match *self {
            Self::Solid(c) => c,
            Self::Blink { color, on_ms, off_ms } => {
                let cycle = phase_ms % (on_ms as u64 + off_ms as u64);
                if cycle < on_ms as u64 {
                    color
                } else {
                    color::OFF
                }
            }
            Self::CountedFlash { color, count } => {
                let group = count as u64 * (COUNT_ON_MS + COUNT_OFF_MS);
                let cycle = phase_ms % (group + COUNT_GAP_MS);
                if cycle >= group {
                    return color::OFF;
                }
                if cycle % (COUNT_ON_MS + COUNT_OFF_MS) < COUNT_ON_MS {
                    color
                } else {
                    color::OFF
                }
            }
        }
    }
}

/// The one pattern currently overriding the mode animation, if any.
pub struct StatusLane {
    active: Option<Entry>,
}

struct Entry {
    pattern: StatusPattern,
    started_ms: u64,
    until_ms: Option<u64>,
    fault: bool,
}

impl StatusLane {
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Show a transient pattern, optionally self-expiring.
    pub fn show(&mut self, pattern: StatusPattern, now_ms: u64, ttl_ms: Option<u32>) {
        self.active = Some(Entry {
            pattern,
            started_ms: now_ms,
            until_ms: ttl_ms.map(|ttl| now_ms + ttl as u64),
            fault: false,
        });
    }

    /// Show a fault pattern. Stays until explicitly cleared, and blocks
    /// remote commands while it does.
    pub fn show_fault(&mut self, pattern: StatusPattern, now_ms: u64) {
        self.active = Some(Entry {
            pattern,
            started_ms: now_ms,
            until_ms: None,
            fault: true,
        });
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn is_fault_active(&self) -> bool {
        self.active.as_ref().is_some_and(|entry| entry.fault)
    }

    /// The override color for this tick, or `None` when the mode animation
    /// owns the strip. Expired transients clear themselves here.
    pub fn color_at(&mut self, now_ms: u64) -> Option<Rgb> {
        let entry = self.active.as_ref()?;
        if entry.until_ms.is_some_and(|until| now_ms >= until) {
            self.active = None;
            return None;
        }
        Some(entry.pattern.color_at(now_ms - entry.started_ms))
    }
}

impl Default for StatusLane {
    fn default() -> Self {
        Self::new()
    }
}
