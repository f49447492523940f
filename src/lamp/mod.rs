//! The lighting mode machine.
//!
//! Owns the local [`LampMode`], fuses it with the peer lamp's last reported
//! state, and derives the render target the animation engine draws. Local
//! gestures change the mode and are announced to the peer; remote messages
//! only ever change rendering, never get re-published, so the pair cannot
//! loop.

mod core;

pub use self::core::{LampMode, ModeMachine, PeerMode, PeerState};
