//! Seams to the outside world.
//!
//! The runtime core never talks to hardware or sockets directly; it drives
//! these traits. The firmware shell implements them on esp-hal / esp-radio,
//! and the test suites implement them as mocks.

use core::fmt;

use crate::color::Rgb;

pub const TOPIC_MAX: usize = 96;
pub const PAYLOAD_MAX: usize = 96;

/// Raw analog touch sensor. One reading per sensor tick, full u16 range.
pub trait TouchProbe {
    fn read_raw(&mut self) -> u16;
}

/// The addressable light source. The runtime renders one uniform color per
/// frame; the adapter fans it out to the individual pixels and latches.
pub trait LampStrip {
    fn fill(&mut self, color: Rgb);
}

/// One decoded publish received from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: heapless::String<TOPIC_MAX>,
    pub payload: heapless::Vec<u8, PAYLOAD_MAX>,
}

/// Broker session parameters handed to the transport when a session opens.
pub struct SessionOptions<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: Option<&'a str>,
    pub host: &'a str,
    pub port: u16,
    pub use_tls: bool,
    pub timeout_ms: u32,
    /// Published by the broker on our behalf if the session dies abruptly.
    pub last_will_topic: &'a str,
    pub last_will_payload: &'a [u8],
}

/// What went wrong inside the transport. The link layer maps these onto the
/// numbered fault codes shown on the strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Association with the access point failed or timed out.
    Wifi,
    /// The reachability probe beyond the access point failed.
    Internet,
    /// Broker connect/auth/subscribe failed.
    Broker,
    /// Send or receive on an established session failed.
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi => f.write_str("wifi association failed"),
            Self::Internet => f.write_str("internet probe failed"),
            Self::Broker => f.write_str("broker session failed"),
            Self::Io => f.write_str("session i/o failed"),
        }
    }
}

/// Raw publish/subscribe primitives plus network association.
///
/// Every call must be bounded: a stalled network returns an error after the
/// given timeout instead of blocking the scheduler loop.
pub trait LinkTransport {
    fn join_network(
        &mut self,
        ssid: &str,
        password: &str,
        timeout_ms: u32,
    ) -> Result<(), TransportError>;

    fn check_internet(&mut self, timeout_ms: u32) -> Result<(), TransportError>;

    fn open_session(&mut self, options: &SessionOptions<'_>) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Hand over the next pending inbound publish, if any.
    fn poll_inbound(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    Unreadable,
    Corrupt,
    UnknownKey,
    Full,
    WriteFailed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable => f.write_str("config storage unreadable"),
            Self::Corrupt => f.write_str("config storage corrupt"),
            Self::UnknownKey => f.write_str("unknown configuration key"),
            Self::Full => f.write_str("config storage full"),
            Self::WriteFailed => f.write_str("config storage write failed"),
        }
    }
}

/// Persisted configuration text. Loaded once at boot; updates rewrite one
/// `key = value` line and take effect on the next boot.
pub trait ConfigStore {
    fn load<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a str, StoreError>;

    fn apply_update(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}
