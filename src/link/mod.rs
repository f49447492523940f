//! The network-resilience layer.
//!
//! Owns the session lifecycle over the raw transport: Wi-Fi association
//! with a sticky primary/backup choice, the optional internet probe, the
//! broker session with its last will and subscriptions, liveness probing by
//! self-echoed pings, and the fixed reconnect pacing after a loss. Outgoing
//! state updates are encoded and published here; inbound frames are decoded
//! and handed up as [`wire::Inbound`].

pub mod wire;

use core::fmt;
use core::fmt::Write as _;

use crate::config::{Config, Host, Name, Password, Ssid};
use crate::ports::{InboundFrame, LinkTransport, SessionOptions, TransportError};
use wire::{Inbound, PeerMessage, Topics};

/// Pause between reconnect cycles after a steady-state loss. Attempting
/// more often than this hammers the access point for nothing.
pub const RECONNECT_PAUSE_MS: u64 = 300_000;

pub const INBOX_MAX: usize = 8;
pub type Inbox = heapless::Vec<Inbound, INBOX_MAX>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    WifiConnecting,
    BrokerConnecting,
    Connected,
    ConnectedOnBackup,
}

/// Numbered connectivity faults, matching the counted orange flash codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkFault {
    Unspecified = 1,
    Wifi = 2,
    Internet = 3,
    Broker = 4,
}

impl LinkFault {
    pub fn code(self) -> u8 {
        self as u8
    }

    fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::Wifi => Self::Wifi,
            TransportError::Internet => Self::Internet,
            TransportError::Broker => Self::Broker,
            TransportError::Io => Self::Unspecified,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkError {
    pub fault: LinkFault,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fault {
            LinkFault::Unspecified => f.write_str("network link lost"),
            LinkFault::Wifi => f.write_str("wifi association failed"),
            LinkFault::Internet => f.write_str("internet unreachable"),
            LinkFault::Broker => f.write_str("broker connection failed"),
        }
    }
}

struct LinkSettings {
    name: Name,
    wifi_ssid: Ssid,
    wifi_pass: Password,
    backup_wifi_ssid: Option<Ssid>,
    backup_wifi_pass: Option<Password>,
    connect_to_internet: bool,
    server_addr: Host,
    server_port: u16,
    server_pass: Option<Password>,
    use_tls: bool,
    timeout_ms: u32,
    ping_interval: u16,
    dropped_ping_limit: u16,
    debug_feed: bool,
}

pub struct NetworkLink<T: LinkTransport> {
    transport: T,
    settings: LinkSettings,
    topics: Topics,
    client_id: heapless::String<32>,
    state: SessionState,
    /// Which Wi-Fi the boot settled on; sticky until the next reboot.
    on_backup: bool,
    boot_choice_made: bool,
    check_cycles: u32,
    unanswered_pings: u16,
    next_retry_ms: Option<u64>,
}

impl<T: LinkTransport> NetworkLink<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        let topics = Topics::new(&config.name, &config.friend_name);
        let mut client_id = heapless::String::new();
        let _ = write!(client_id, "{}_lamp", config.name);
        Self {
            transport,
            settings: LinkSettings {
                name: config.name.clone(),
                wifi_ssid: config.wifi_ssid.clone(),
                wifi_pass: config.wifi_pass.clone(),
                backup_wifi_ssid: config.backup_wifi_ssid.clone(),
                backup_wifi_pass: config.backup_wifi_pass.clone(),
                connect_to_internet: config.connect_to_internet,
                server_addr: config.server_addr.clone(),
                server_port: config.server_port,
                server_pass: config.server_pass.clone(),
                use_tls: config.use_tls,
                timeout_ms: config.timeout_ms,
                ping_interval: config.ping_interval,
                dropped_ping_limit: config.dropped_ping_limit,
                debug_feed: config.debug_feed,
            },
            topics,
            client_id,
            state: SessionState::Disconnected,
            on_backup: false,
            boot_choice_made: false,
            check_cycles: 0,
            unanswered_pings: 0,
            next_retry_ms: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::ConnectedOnBackup
        )
    }

    pub fn debug_feed_enabled(&self) -> bool {
        self.settings.debug_feed
    }

    /// Run the full connect sequence: Wi-Fi, optional internet probe,
    /// broker session, subscriptions.
    pub fn connect(&mut self, now_ms: u64) -> Result<(), LinkError> {
        self.state = SessionState::WifiConnecting;
        if let Err(error) = self.join_wifi() {
            return self.fail(now_ms, error);
        }

        if self.settings.connect_to_internet {
            if let Err(error) = self.transport.check_internet(self.settings.timeout_ms) {
                return self.fail(now_ms, LinkFault::from_transport(error));
            }
        }

        self.state = SessionState::BrokerConnecting;
        let will = wire::encode(&PeerMessage::Deactivate);
        let options = SessionOptions {
            client_id: &self.client_id,
            username: &self.settings.name,
            password: self.settings.server_pass.as_deref(),
            host: &self.settings.server_addr,
            port: self.settings.server_port,
            use_tls: self.settings.use_tls,
            timeout_ms: self.settings.timeout_ms,
            last_will_topic: &self.topics.outbound_state,
            last_will_payload: will.as_bytes(),
        };
        if let Err(error) = self.transport.open_session(&options) {
            return self.fail(now_ms, LinkFault::from_transport(error));
        }
        let mut subscribe_error = None;
        for topic in [
            &self.topics.inbound_state,
            &self.topics.control,
            &self.topics.ping,
        ] {
            if let Err(error) = self.transport.subscribe(topic) {
                subscribe_error = Some(error);
                break;
            }
        }
        if let Some(error) = subscribe_error {
            return self.fail(now_ms, LinkFault::from_transport(error));
        }

        self.check_cycles = 0;
        self.unanswered_pings = 0;
        self.next_retry_ms = None;
        self.state = if self.on_backup {
            SessionState::ConnectedOnBackup
        } else {
            SessionState::Connected
        };
        log::info!(
            "broker session up ({})",
            if self.on_backup { "backup wifi" } else { "primary wifi" }
        );
        Ok(())
    }

    /// Associate with the configured network. The very first attempt of a
    /// run may fall back from primary to backup; afterwards the choice is
    /// fixed until reboot.
    fn join_wifi(&mut self) -> Result<(), LinkFault> {
        let timeout = self.settings.timeout_ms;
        if self.on_backup {
            return self
                .join_backup(timeout)
                .map_err(|_| LinkFault::Wifi);
        }

        let primary = self.transport.join_network(
            &self.settings.wifi_ssid,
            &self.settings.wifi_pass,
            timeout,
        );
        match primary {
            Ok(()) => {
                self.boot_choice_made = true;
                Ok(())
            }
            Err(_) if !self.boot_choice_made => {
                log::warn!("primary wifi failed at boot, trying backup");
                self.boot_choice_made = true;
                match self.join_backup(timeout) {
                    Ok(()) => {
                        self.on_backup = true;
                        Ok(())
                    }
                    Err(_) => Err(LinkFault::Wifi),
                }
            }
            Err(_) => Err(LinkFault::Wifi),
        }
    }

    fn join_backup(&mut self, timeout_ms: u32) -> Result<(), TransportError> {
        let Some(ssid) = self.settings.backup_wifi_ssid.as_deref() else {
            return Err(TransportError::Wifi);
        };
        // An absent backup password means an open network.
        let password = self.settings.backup_wifi_pass.as_deref().unwrap_or("");
        self.transport.join_network(ssid, password, timeout_ms)
    }

    /// One message-check cycle: paced reconnects, inbound drain, liveness.
    pub fn poll(&mut self, now_ms: u64, inbox: &mut Inbox) -> Result<(), LinkError> {
        if !self.is_connected() {
            match self.next_retry_ms {
                Some(at) if now_ms >= at => self.connect(now_ms)?,
                _ => return Ok(()),
            }
        }

        loop {
            match self.transport.poll_inbound() {
                Ok(Some(frame)) => self.take_frame(&frame, inbox),
                Ok(None) => break,
                Err(error) => return self.fail(now_ms, LinkFault::from_transport(error)),
            }
        }

        if self.check_cycles % self.settings.ping_interval as u32 == 0 {
            if self.unanswered_pings >= self.settings.dropped_ping_limit {
                self.unanswered_pings = 0;
                log::warn!("liveness probes unanswered, declaring session lost");
                return self.fail(now_ms, LinkFault::Unspecified);
            }
            self.unanswered_pings += 1;
            if let Err(error) = self.transport.publish(&self.topics.ping, b"ping") {
                return self.fail(now_ms, LinkFault::from_transport(error));
            }
        }
        self.check_cycles = self.check_cycles.wrapping_add(1);
        Ok(())
    }

    fn take_frame(&mut self, frame: &InboundFrame, inbox: &mut Inbox) {
        match self.topics.decode(frame) {
            Some(Inbound::PingEcho) => self.unanswered_pings = 0,
            Some(message) => {
                if inbox.push(message).is_err() {
                    log::warn!("inbox full, dropping inbound message");
                }
            }
            None => log::debug!("dropping undecodable frame on {}", frame.topic),
        }
    }

    /// Announce a state change to the peer. Quietly skipped while the link
    /// is down; the peer's staleness timeout covers the gap.
    pub fn publish_update(
        &mut self,
        message: &PeerMessage,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        if !self.is_connected() {
            log::debug!("link down, not publishing state update");
            return Ok(());
        }
        let payload = wire::encode(message);
        match self
            .transport
            .publish(&self.topics.outbound_state, payload.as_bytes())
        {
            Ok(()) => Ok(()),
            Err(error) => self.fail(now_ms, LinkFault::from_transport(error)),
        }
    }

    /// Mirror an internal event onto the debug topic. Best effort only;
    /// diagnostics never disturb the session.
    pub fn publish_debug(&mut self, text: &str) {
        if !self.settings.debug_feed || !self.is_connected() {
            return;
        }
        if self
            .transport
            .publish(&self.topics.debug, text.as_bytes())
            .is_err()
        {
            log::debug!("debug feed publish failed");
        }
    }

    fn fail(&mut self, now_ms: u64, fault: LinkFault) -> Result<(), LinkError> {
        self.state = SessionState::Disconnected;
        self.next_retry_ms = Some(now_ms + RECONNECT_PAUSE_MS);
        log::warn!("connectivity fault {}", fault.code());
        Err(LinkError { fault })
    }
}
