//! Topic layout and payload codec.
//!
//! The two lamps meet in a "room" named after both of them: the lexically
//! smaller name first, joined with `-`. Each lamp publishes state onto the
//! topic bearing its peer's name and listens on the one bearing its own.
//! Payloads are short ASCII: a verb, optionally a `:(r, g, b)` color.
//!
//! Anything that does not decode is dropped by the caller; a malformed
//! payload must never take the state machine down.

use core::fmt::Write as _;

use crate::color::{self, Rgb};
use crate::ports::{InboundFrame, TOPIC_MAX};

pub const PAYLOAD_TEXT_MAX: usize = 48;
pub const KEY_MAX: usize = 32;
pub const VALUE_MAX: usize = 64;

pub type Topic = heapless::String<TOPIC_MAX>;
pub type PayloadText = heapless::String<PAYLOAD_TEXT_MAX>;

/// State traffic between the paired lamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerMessage {
    Activate(Rgb),
    HoldStart(Rgb),
    HoldEnd,
    Sleep(Rgb),
    Deactivate,
}

/// Commands from the remote control tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    Reboot,
    ConfigUpdate {
        key: heapless::String<KEY_MAX>,
        value: heapless::String<VALUE_MAX>,
    },
}

/// A decoded, classified inbound publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Peer(PeerMessage),
    Control(ControlMessage),
    /// Our own liveness probe echoed back by the broker.
    PingEcho,
}

pub fn encode(message: &PeerMessage) -> PayloadText {
    let mut out = PayloadText::new();
    let result = match message {
        PeerMessage::Activate(c) => write!(out, "active:({}, {}, {})", c.r, c.g, c.b),
        PeerMessage::HoldStart(c) => write!(out, "holding:({}, {}, {})", c.r, c.g, c.b),
        PeerMessage::HoldEnd => write!(out, "holdend"),
        PeerMessage::Sleep(c) => write!(out, "sleep:({}, {}, {})", c.r, c.g, c.b),
        // Carries an explicit off color so it doubles as the last will.
        PeerMessage::Deactivate => write!(out, "inactive:(0, 0, 0)"),
    };
    debug_assert!(result.is_ok());
    out
}

pub fn decode_state(payload: &[u8]) -> Option<PeerMessage> {
    let text = core::str::from_utf8(payload).ok()?.trim();
    let (verb, color_part) = match text.split_once(':') {
        Some((verb, rest)) => (verb.trim(), Some(rest.trim())),
        None => (text, None),
    };
    match verb {
        "active" => Some(PeerMessage::Activate(color::parse_triplet(color_part?)?)),
        "holding" => Some(PeerMessage::HoldStart(color::parse_triplet(color_part?)?)),
        "sleep" => Some(PeerMessage::Sleep(color::parse_triplet(color_part?)?)),
        "holdend" => Some(PeerMessage::HoldEnd),
        // The color on a deactivation (and on the last will) is ignored.
        "inactive" => Some(PeerMessage::Deactivate),
        _ => None,
    }
}

pub fn decode_control(payload: &[u8]) -> Option<ControlMessage> {
    let text = core::str::from_utf8(payload).ok()?.trim();
    if text == "reboot" {
        return Some(ControlMessage::Reboot);
    }
    let (key, value) = text.split_once(':')?;
    let key = key.trim();
    let value = value.trim();
    // `=` and `#` are reserved by the line-based config format; a value
    // carrying them could corrupt the stored file.
    if key.is_empty() || value.contains(['=', '#']) {
        return None;
    }
    Some(ControlMessage::ConfigUpdate {
        key: heapless::String::try_from(key).ok()?,
        value: heapless::String::try_from(value).ok()?,
    })
}

/// Every topic this lamp publishes or subscribes to, precomputed at boot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Peer state addressed to us: `room/<own-name>`.
    pub inbound_state: Topic,
    /// Our state addressed to the peer: `room/<peer-name>`.
    pub outbound_state: Topic,
    /// Liveness probes, echoed back to us: `room/<own-name>-ping`.
    pub ping: Topic,
    /// Remote commands: `<own-name>/control`.
    pub control: Topic,
    /// Diagnostic feed: `<own-name>/debug`.
    pub debug: Topic,
}

impl Topics {
    pub fn new(name: &str, friend_name: &str) -> Self {
        let (first, second) = if name < friend_name {
            (name, friend_name)
        } else {
            (friend_name, name)
        };
        let mut room = Topic::new();
        let _ = write!(room, "{first}-{second}");

        let joined = |a: &str, b: &str| {
            let mut topic = Topic::new();
            let _ = write!(topic, "{a}/{b}");
            topic
        };
        let mut ping = Topic::new();
        let _ = write!(ping, "{room}/{name}-ping");

        Self {
            inbound_state: joined(&room, name),
            outbound_state: joined(&room, friend_name),
            ping,
            control: joined(name, "control"),
            debug: joined(name, "debug"),
        }
    }

    /// Classify and decode one inbound frame. `None` for foreign topics and
    /// malformed payloads alike.
    pub fn decode(&self, frame: &InboundFrame) -> Option<Inbound> {
        if frame.topic == self.ping {
            Some(Inbound::PingEcho)
        } else if frame.topic == self.inbound_state {
            decode_state(&frame.payload).map(Inbound::Peer)
        } else if frame.topic == self.control {
            decode_control(&frame.payload).map(Inbound::Control)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(topic: &str, payload: &[u8]) -> InboundFrame {
        InboundFrame {
            topic: heapless::String::try_from(topic).unwrap(),
            payload: heapless::Vec::from_slice(payload).unwrap(),
        }
    }

    #[test]
    fn room_naming_is_order_independent() {
        let ours = Topics::new("alva", "birk");
        let theirs = Topics::new("birk", "alva");
        assert_eq!(ours.inbound_state.as_str(), "alva-birk/alva");
        assert_eq!(ours.outbound_state.as_str(), "alva-birk/birk");
        assert_eq!(ours.ping.as_str(), "alva-birk/alva-ping");
        assert_eq!(ours.control.as_str(), "alva/control");
        // One lamp's outbound is the other's inbound.
        assert_eq!(ours.outbound_state, theirs.inbound_state);
        assert_eq!(theirs.outbound_state, ours.inbound_state);
    }

    #[test]
    fn encode_forms() {
        let c = Rgb::new(255, 50, 0);
        assert_eq!(
            encode(&PeerMessage::Activate(c)).as_str(),
            "active:(255, 50, 0)"
        );
        assert_eq!(
            encode(&PeerMessage::HoldStart(c)).as_str(),
            "holding:(255, 50, 0)"
        );
        assert_eq!(encode(&PeerMessage::HoldEnd).as_str(), "holdend");
        assert_eq!(
            encode(&PeerMessage::Deactivate).as_str(),
            "inactive:(0, 0, 0)"
        );
    }

    #[test]
    fn decode_accepts_spaced_and_compact_colors() {
        assert_eq!(
            decode_state(b"active:(255, 50, 0)"),
            Some(PeerMessage::Activate(Rgb::new(255, 50, 0)))
        );
        assert_eq!(
            decode_state(b"sleep:(10,0,60)"),
            Some(PeerMessage::Sleep(Rgb::new(10, 0, 60)))
        );
    }

    #[test]
    fn decode_inactive_with_or_without_color() {
        assert_eq!(decode_state(b"inactive"), Some(PeerMessage::Deactivate));
        assert_eq!(
            decode_state(b"inactive:(0, 0, 0)"),
            Some(PeerMessage::Deactivate)
        );
    }

    #[test]
    fn decode_round_trips_every_verb() {
        for message in [
            PeerMessage::Activate(Rgb::new(1, 2, 3)),
            PeerMessage::HoldStart(Rgb::new(255, 50, 0)),
            PeerMessage::HoldEnd,
            PeerMessage::Sleep(Rgb::new(10, 0, 60)),
            PeerMessage::Deactivate,
        ] {
            assert_eq!(decode_state(encode(&message).as_bytes()), Some(message));
        }
    }

    #[test]
    fn malformed_state_payloads_are_dropped() {
        assert_eq!(decode_state(b"active"), None); // color required
        assert_eq!(decode_state(b"active:(300, 0, 0)"), None);
        assert_eq!(decode_state(b"active:(1, 2)"), None);
        assert_eq!(decode_state(b"glowing:(1, 2, 3)"), None);
        assert_eq!(decode_state(&[0xFF, 0xFE]), None);
    }

    #[test]
    fn control_decoding() {
        assert_eq!(decode_control(b"reboot"), Some(ControlMessage::Reboot));
        let update = decode_control(b"active_color:CYAN").unwrap();
        assert!(matches!(
            update,
            ControlMessage::ConfigUpdate { ref key, ref value }
                if key.as_str() == "active_color" && value.as_str() == "CYAN"
        ));
        // Reserved characters cannot be smuggled into the config file.
        assert_eq!(decode_control(b"active_color:a=b"), None);
        assert_eq!(decode_control(b"active_color:a#b"), None);
        assert_eq!(decode_control(b"justtext"), None);
    }

    #[test]
    fn frames_classify_by_topic() {
        let topics = Topics::new("alva", "birk");
        assert_eq!(
            topics.decode(&frame("alva-birk/alva-ping", b"ping")),
            Some(Inbound::PingEcho)
        );
        assert_eq!(
            topics.decode(&frame("alva-birk/alva", b"holdend")),
            Some(Inbound::Peer(PeerMessage::HoldEnd))
        );
        assert_eq!(
            topics.decode(&frame("alva/control", b"reboot")),
            Some(Inbound::Control(ControlMessage::Reboot))
        );
        // Our own outbound topic is not subscribed, but be safe anyway.
        assert_eq!(topics.decode(&frame("alva-birk/birk", b"holdend")), None);
        assert_eq!(topics.decode(&frame("alva-birk/alva", b"nonsense")), None);
    }
}
