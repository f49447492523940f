use crate::color::{self, Rgb};
use crate::config::Config;
use crate::link::wire::PeerMessage;
use crate::render::{AnimKind, RenderTarget, RenderUpdate};
use crate::touch::Gesture;

/// The local lighting mode. Exactly one is current at any time and only the
/// mode machine transitions it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LampMode {
    Inactive,
    Active { started_ms: u64 },
    /// Heartbeat phase while the hand stays on the sensor. No fixed end.
    Holding,
    Asleep { started_ms: u64 },
}

impl LampMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active { .. } => "active",
            Self::Holding => "holding",
            Self::Asleep { .. } => "asleep",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerMode {
    Inactive,
    Active,
    Holding,
    Asleep,
}

/// What we last heard from the other lamp. Updated only from decoded
/// inbound messages; goes stale if the peer falls silent for too long, so a
/// peer that died without a `Deactivate` cannot tint us forever.
#[derive(Clone, Copy, Debug)]
pub struct PeerState {
    pub mode: PeerMode,
    pub color: Rgb,
    pub updated_ms: u64,
    pub stale: bool,
}

impl PeerState {
    fn idle() -> Self {
        Self {
            mode: PeerMode::Inactive,
            color: color::OFF,
            updated_ms: 0,
            stale: false,
        }
    }

    fn set(&mut self, mode: PeerMode, color: Option<Rgb>, now_ms: u64) {
        self.mode = mode;
        if let Some(color) = color {
            self.color = color;
        }
        self.updated_ms = now_ms;
        self.stale = false;
    }

    fn effective_mode(&self, now_ms: u64, timeout_ms: u32) -> PeerMode {
        let silent_too_long = self.mode != PeerMode::Inactive
            && now_ms.saturating_sub(self.updated_ms) >= timeout_ms as u64;
        if self.stale || silent_too_long {
            PeerMode::Inactive
        } else {
            self.mode
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Dirty {
    /// The curve epoch must reset (fresh activation).
    restart: bool,
    /// Only the blend inputs changed; the running curve keeps its phase.
    refresh: bool,
}

pub struct ModeMachine {
    mode: LampMode,
    peer: PeerState,
    active_color: Rgb,
    sleep_color: Rgb,
    active_duration_ms: u32,
    sleep_duration_ms: u32,
    peer_timeout_ms: u32,
    dirty: Dirty,
    pending_flash: Option<Rgb>,
}

impl ModeMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: LampMode::Inactive,
            peer: PeerState::idle(),
            active_color: config.active_color,
            sleep_color: config.sleep_color,
            active_duration_ms: config.active_duration_ms,
            sleep_duration_ms: config.sleep_duration_ms,
            peer_timeout_ms: config.peer_timeout_ms,
            dirty: Dirty::default(),
            pending_flash: None,
        }
    }

    pub fn mode(&self) -> LampMode {
        self.mode
    }

    pub fn peer(&self) -> &PeerState {
        &self.peer
    }

    /// A local gesture. Returns the announcement to publish, if any.
    pub fn on_gesture(&mut self, gesture: Gesture, now_ms: u64) -> Option<PeerMessage> {
        match (self.mode, gesture) {
            (LampMode::Holding, Gesture::Removed) => {
                self.mode = LampMode::Active { started_ms: now_ms };
                self.dirty.restart = true;
                Some(PeerMessage::HoldEnd)
            }
            // A hand re-arriving restarts the fade; on a sleeping lamp it
            // wakes it.
            (
                LampMode::Inactive | LampMode::Active { .. } | LampMode::Asleep { .. },
                Gesture::Placed,
            ) => {
                self.mode = LampMode::Active { started_ms: now_ms };
                self.dirty.restart = true;
                Some(PeerMessage::Activate(self.active_color))
            }
            (LampMode::Active { .. }, Gesture::HoldStarted) => {
                self.mode = LampMode::Holding;
                self.dirty.restart = true;
                Some(PeerMessage::HoldStart(self.active_color))
            }
            (
                LampMode::Inactive | LampMode::Active { .. } | LampMode::Asleep { .. },
                Gesture::DoubleTap,
            ) => {
                self.mode = LampMode::Asleep { started_ms: now_ms };
                self.dirty.restart = true;
                Some(PeerMessage::Sleep(self.sleep_color))
            }
            // A release during a plain tap: the fade just keeps running.
            _ => None,
        }
    }

    /// A decoded message from the peer. Never produces a publish.
    pub fn on_peer_message(&mut self, message: PeerMessage, now_ms: u64) {
        let lit_color = match message {
            PeerMessage::Activate(c) | PeerMessage::HoldStart(c) | PeerMessage::Sleep(c) => {
                Some(c)
            }
            PeerMessage::HoldEnd | PeerMessage::Deactivate => None,
        };

        match message {
            PeerMessage::Activate(c) => self.peer.set(PeerMode::Active, Some(c), now_ms),
            PeerMessage::HoldStart(c) => self.peer.set(PeerMode::Holding, Some(c), now_ms),
            PeerMessage::HoldEnd => self.peer.set(PeerMode::Active, None, now_ms),
            PeerMessage::Sleep(c) => self.peer.set(PeerMode::Asleep, Some(c), now_ms),
            PeerMessage::Deactivate => self.peer.set(PeerMode::Inactive, None, now_ms),
        }

        if matches!(self.mode, LampMode::Asleep { .. }) {
            // Asleep suppresses the peer from normal rendering; a lit
            // message becomes a single flash in its color instead.
            if let Some(color) = lit_color {
                self.pending_flash = Some(color);
            }
            return;
        }

        match message {
            PeerMessage::Deactivate => self.dirty.refresh = true,
            _ => self.dirty.restart = true,
        }
    }

    /// Time-driven work: mode expiry and peer staleness. Returns the
    /// announcement to publish, if any.
    pub fn on_tick(&mut self, now_ms: u64) -> Option<PeerMessage> {
        if !self.peer.stale
            && self.peer.mode != PeerMode::Inactive
            && now_ms.saturating_sub(self.peer.updated_ms) >= self.peer_timeout_ms as u64
        {
            self.peer.stale = true;
            self.dirty.refresh = true;
        }

        let expired = match self.mode {
            LampMode::Active { started_ms } => {
                now_ms.saturating_sub(started_ms) >= self.active_duration_ms as u64
            }
            LampMode::Asleep { started_ms } => {
                now_ms.saturating_sub(started_ms) >= self.sleep_duration_ms as u64
            }
            LampMode::Inactive | LampMode::Holding => false,
        };
        if expired {
            self.mode = LampMode::Inactive;
            self.dirty.refresh = true;
            return Some(PeerMessage::Deactivate);
        }
        None
    }

    /// The render update owed to the animation engine, if anything changed
    /// since the last drain.
    pub fn take_render_update(&mut self, now_ms: u64) -> Option<RenderUpdate> {
        if !self.dirty.restart && !self.dirty.refresh {
            return None;
        }
        let restart = self.dirty.restart;
        self.dirty = Dirty::default();
        Some(RenderUpdate {
            target: self.target(now_ms),
            restart,
        })
    }

    /// The pending suppressed-message flash, if one was triggered.
    pub fn take_flash(&mut self) -> Option<Rgb> {
        self.pending_flash.take()
    }

    /// Derive the render target from the current mode pair. Pure; safe to
    /// re-evaluate at any time.
    pub fn target(&self, now_ms: u64) -> RenderTarget {
        let peer_mode = self.peer.effective_mode(now_ms, self.peer_timeout_ms);
        match self.mode {
            LampMode::Asleep { .. } => RenderTarget {
                kind: AnimKind::SleepFade,
                color: self.sleep_color,
                duration_ms: self.sleep_duration_ms,
            },
            LampMode::Holding => RenderTarget {
                kind: AnimKind::Heartbeat,
                color: self.lit_color(peer_mode),
                duration_ms: 0,
            },
            LampMode::Active { .. } => RenderTarget {
                kind: if peer_mode == PeerMode::Holding {
                    AnimKind::Heartbeat
                } else {
                    AnimKind::ActiveFade
                },
                color: self.lit_color(peer_mode),
                duration_ms: self.active_duration_ms,
            },
            LampMode::Inactive => match peer_mode {
                PeerMode::Inactive => RenderTarget::idle(),
                PeerMode::Holding => RenderTarget {
                    kind: AnimKind::Heartbeat,
                    color: self.peer.color,
                    duration_ms: 0,
                },
                // A lone sleeping peer renders here as a plain fade in its
                // color.
                PeerMode::Active | PeerMode::Asleep => RenderTarget {
                    kind: AnimKind::ActiveFade,
                    color: self.peer.color,
                    duration_ms: self.active_duration_ms,
                },
            },
        }
    }

    /// Our own lit color, blended with the peer's when both sides
    /// contribute.
    fn lit_color(&self, peer_mode: PeerMode) -> Rgb {
        if peer_mode == PeerMode::Inactive {
            self.active_color
        } else {
            color::mix(self.active_color, self.peer.color)
        }
    }
}
