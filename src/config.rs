//! Typed configuration.
//!
//! The persisted form is a flat, line-based `key = value` text (`#` starts a
//! comment, blank lines are ignored). It is parsed exactly once at boot into
//! [`Config`]; any missing or out-of-range required field is a fatal setup
//! error before the scheduler starts. `=` and `#` are reserved and may not
//! appear inside values.

use core::fmt;

use crate::color::Rgb;

pub const NAME_MAX: usize = 24;
pub const SSID_MAX: usize = 32;
pub const PASSWORD_MAX: usize = 64;
pub const HOST_MAX: usize = 64;

pub type Name = heapless::String<NAME_MAX>;
pub type Ssid = heapless::String<SSID_MAX>;
pub type Password = heapless::String<PASSWORD_MAX>;
pub type Host = heapless::String<HOST_MAX>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    // Hardware.
    pub sensor_pin: u8,
    pub led_pin: u8,
    pub num_leds: u16,

    // Identity.
    pub name: Name,
    pub friend_name: Name,

    // Wi-Fi, primary plus optional backup.
    pub wifi_ssid: Ssid,
    pub wifi_pass: Password,
    pub backup_wifi_ssid: Option<Ssid>,
    pub backup_wifi_pass: Option<Password>,
    pub connect_to_internet: bool,

    // Broker.
    pub server_addr: Host,
    pub server_port: u16,
    pub server_pass: Option<Password>,
    pub use_tls: bool,
    pub timeout_ms: u32,
    /// Liveness probe cadence, in message-check cycles.
    pub ping_interval: u16,
    pub dropped_ping_limit: u16,

    // Cadences and windows, milliseconds.
    pub sensor_tick_ms: u32,
    pub led_fast_tick_ms: u32,
    pub led_slow_tick_ms: u32,
    pub message_check_ms: u32,
    pub active_duration_ms: u32,
    pub sleep_duration_ms: u32,
    pub hold_threshold_ms: u32,
    pub double_tap_window_ms: u32,
    pub peer_timeout_ms: u32,

    // Sensor thresholds, deltas between consecutive samples.
    pub placed_sensitivity: u16,
    pub removed_sensitivity: i32,

    // Palette.
    pub active_color: Rgb,
    pub sleep_color: Rgb,

    /// Mirror internal transitions to the debug topic.
    pub debug_feed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is absent or has an empty value.
    Missing(&'static str),
    /// A key is present but its value failed to parse or is out of range.
    Invalid(&'static str),
    /// A non-comment line has no `=` separator or a reserved character in
    /// its value.
    Malformed { line: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required setting `{key}`"),
            Self::Invalid(key) => write!(f, "invalid value for setting `{key}`"),
            Self::Malformed { line } => write!(f, "malformed config line {line}"),
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::default();

        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, rest) = trimmed
                .split_once('=')
                .ok_or(ConfigError::Malformed { line: index + 1 })?;
            let key = key.trim();
            let value = rest.split('#').next().unwrap_or("").trim();
            if value.contains('=') {
                return Err(ConfigError::Malformed { line: index + 1 });
            }
            if value.is_empty() {
                continue;
            }
            raw.set(key, value)?;
        }

        raw.finish()
    }
}

/// All keys the parser recognizes, in persisted spelling.
pub const KNOWN_KEYS: &[&str] = &[
    "sensor_pin",
    "led_pin",
    "num_leds",
    "name",
    "friend_name",
    "wifi_ssid",
    "wifi_pass",
    "backup_wifi_ssid",
    "backup_wifi_pass",
    "connect_to_internet",
    "server_addr",
    "server_port",
    "server_pass",
    "ssl",
    "timeout",
    "ping_interval",
    "dropped_ping_limit",
    "sensor_tick_length",
    "led_fast_tick_length",
    "led_slow_tick_length",
    "message_check_interval",
    "active_duration",
    "sleep_duration",
    "hold_command_threshold",
    "sleep_command_window",
    "peer_timeout",
    "sensor_placed_sensitivity",
    "sensor_removed_sensitivity",
    "active_color",
    "sleep_color",
    "debug_feed",
];

#[derive(Default)]
struct RawConfig {
    sensor_pin: Option<u8>,
    led_pin: Option<u8>,
    num_leds: Option<u16>,
    name: Option<Name>,
    friend_name: Option<Name>,
    wifi_ssid: Option<Ssid>,
    wifi_pass: Option<Password>,
    backup_wifi_ssid: Option<Ssid>,
    backup_wifi_pass: Option<Password>,
    connect_to_internet: Option<bool>,
    server_addr: Option<Host>,
    server_port: Option<u16>,
    server_pass: Option<Password>,
    use_tls: Option<bool>,
    timeout_ms: Option<u32>,
    ping_interval: Option<u16>,
    dropped_ping_limit: Option<u16>,
    sensor_tick_ms: Option<u32>,
    led_fast_tick_ms: Option<u32>,
    led_slow_tick_ms: Option<u32>,
    message_check_ms: Option<u32>,
    active_duration_ms: Option<u32>,
    sleep_duration_ms: Option<u32>,
    hold_threshold_ms: Option<u32>,
    double_tap_window_ms: Option<u32>,
    peer_timeout_ms: Option<u32>,
    placed_sensitivity: Option<u16>,
    removed_sensitivity: Option<i32>,
    active_color: Option<Rgb>,
    sleep_color: Option<Rgb>,
    debug_feed: Option<bool>,
}

impl RawConfig {
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "sensor_pin" => self.sensor_pin = Some(parse_num(value, "sensor_pin")?),
            "led_pin" => self.led_pin = Some(parse_num(value, "led_pin")?),
            "num_leds" => self.num_leds = Some(parse_num(value, "num_leds")?),
            "name" => self.name = Some(parse_identity(value, "name")?),
            "friend_name" => self.friend_name = Some(parse_identity(value, "friend_name")?),
            "wifi_ssid" => self.wifi_ssid = Some(parse_string(value, "wifi_ssid")?),
            "wifi_pass" => self.wifi_pass = Some(parse_string(value, "wifi_pass")?),
            "backup_wifi_ssid" => {
                self.backup_wifi_ssid = Some(parse_string(value, "backup_wifi_ssid")?)
            }
            "backup_wifi_pass" => {
                self.backup_wifi_pass = Some(parse_string(value, "backup_wifi_pass")?)
            }
            "connect_to_internet" => {
                self.connect_to_internet = Some(parse_bool(value, "connect_to_internet")?)
            }
            "server_addr" => self.server_addr = Some(parse_string(value, "server_addr")?),
            "server_port" => self.server_port = Some(parse_num(value, "server_port")?),
            "server_pass" => self.server_pass = Some(parse_string(value, "server_pass")?),
            "ssl" => self.use_tls = Some(parse_bool(value, "ssl")?),
            "timeout" => {
                let seconds: u32 = parse_num(value, "timeout")?;
                self.timeout_ms = Some(seconds.saturating_mul(1_000));
            }
            "ping_interval" => self.ping_interval = Some(parse_num(value, "ping_interval")?),
            "dropped_ping_limit" => {
                self.dropped_ping_limit = Some(parse_num(value, "dropped_ping_limit")?)
            }
            "sensor_tick_length" => {
                self.sensor_tick_ms = Some(parse_seconds_ms(value, "sensor_tick_length")?)
            }
            "led_fast_tick_length" => {
                self.led_fast_tick_ms = Some(parse_seconds_ms(value, "led_fast_tick_length")?)
            }
            "led_slow_tick_length" => {
                self.led_slow_tick_ms = Some(parse_seconds_ms(value, "led_slow_tick_length")?)
            }
            "message_check_interval" => {
                self.message_check_ms = Some(parse_seconds_ms(value, "message_check_interval")?)
            }
            "active_duration" => {
                self.active_duration_ms = Some(parse_seconds_ms(value, "active_duration")?)
            }
            "sleep_duration" => {
                self.sleep_duration_ms = Some(parse_seconds_ms(value, "sleep_duration")?)
            }
            "hold_command_threshold" => {
                self.hold_threshold_ms = Some(parse_seconds_ms(value, "hold_command_threshold")?)
            }
            "sleep_command_window" => {
                self.double_tap_window_ms = Some(parse_seconds_ms(value, "sleep_command_window")?)
            }
            "peer_timeout" => {
                self.peer_timeout_ms = Some(parse_seconds_ms(value, "peer_timeout")?)
            }
            "sensor_placed_sensitivity" => {
                self.placed_sensitivity = Some(parse_num(value, "sensor_placed_sensitivity")?)
            }
            "sensor_removed_sensitivity" => {
                self.removed_sensitivity = Some(parse_num(value, "sensor_removed_sensitivity")?)
            }
            "active_color" => self.active_color = Some(parse_color(value, "active_color")?),
            "sleep_color" => self.sleep_color = Some(parse_color(value, "sleep_color")?),
            "debug_feed" => self.debug_feed = Some(parse_bool(value, "debug_feed")?),
            // Unknown keys are ignored so a newer config survives an older
            // firmware.
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Config, ConfigError> {
        let name = self.name.ok_or(ConfigError::Missing("name"))?;
        let friend_name = self.friend_name.ok_or(ConfigError::Missing("friend_name"))?;
        if name == friend_name {
            return Err(ConfigError::Invalid("friend_name"));
        }

        let use_tls = self.use_tls.unwrap_or(false);
        let server_port = match self.server_port.unwrap_or(0) {
            // Port 0 selects the protocol default.
            0 if use_tls => 8883,
            0 => 1883,
            explicit => explicit,
        };

        let backup_wifi_ssid = self.backup_wifi_ssid;
        let backup_wifi_pass = self.backup_wifi_pass;
        if backup_wifi_ssid.is_none() && backup_wifi_pass.is_some() {
            return Err(ConfigError::Invalid("backup_wifi_pass"));
        }

        let config = Config {
            sensor_pin: self.sensor_pin.ok_or(ConfigError::Missing("sensor_pin"))?,
            led_pin: self.led_pin.ok_or(ConfigError::Missing("led_pin"))?,
            num_leds: self.num_leds.ok_or(ConfigError::Missing("num_leds"))?,
            name,
            friend_name,
            wifi_ssid: self.wifi_ssid.ok_or(ConfigError::Missing("wifi_ssid"))?,
            wifi_pass: self.wifi_pass.ok_or(ConfigError::Missing("wifi_pass"))?,
            backup_wifi_ssid,
            backup_wifi_pass,
            connect_to_internet: self.connect_to_internet.unwrap_or(false),
            server_addr: self.server_addr.ok_or(ConfigError::Missing("server_addr"))?,
            server_port,
            server_pass: self.server_pass,
            use_tls,
            timeout_ms: self.timeout_ms.ok_or(ConfigError::Missing("timeout"))?,
            ping_interval: self
                .ping_interval
                .ok_or(ConfigError::Missing("ping_interval"))?,
            dropped_ping_limit: self
                .dropped_ping_limit
                .ok_or(ConfigError::Missing("dropped_ping_limit"))?,
            sensor_tick_ms: self
                .sensor_tick_ms
                .ok_or(ConfigError::Missing("sensor_tick_length"))?,
            led_fast_tick_ms: self
                .led_fast_tick_ms
                .ok_or(ConfigError::Missing("led_fast_tick_length"))?,
            led_slow_tick_ms: self
                .led_slow_tick_ms
                .ok_or(ConfigError::Missing("led_slow_tick_length"))?,
            message_check_ms: self
                .message_check_ms
                .ok_or(ConfigError::Missing("message_check_interval"))?,
            active_duration_ms: self
                .active_duration_ms
                .ok_or(ConfigError::Missing("active_duration"))?,
            sleep_duration_ms: self
                .sleep_duration_ms
                .ok_or(ConfigError::Missing("sleep_duration"))?,
            hold_threshold_ms: self
                .hold_threshold_ms
                .ok_or(ConfigError::Missing("hold_command_threshold"))?,
            double_tap_window_ms: self
                .double_tap_window_ms
                .ok_or(ConfigError::Missing("sleep_command_window"))?,
            peer_timeout_ms: self.peer_timeout_ms.unwrap_or(120_000),
            placed_sensitivity: self
                .placed_sensitivity
                .ok_or(ConfigError::Missing("sensor_placed_sensitivity"))?,
            removed_sensitivity: self
                .removed_sensitivity
                .ok_or(ConfigError::Missing("sensor_removed_sensitivity"))?,
            active_color: self
                .active_color
                .ok_or(ConfigError::Missing("active_color"))?,
            sleep_color: self
                .sleep_color
                .ok_or(ConfigError::Missing("sleep_color"))?,
            debug_feed: self.debug_feed.unwrap_or(false),
        };

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.num_leds == 0 {
        return Err(ConfigError::Invalid("num_leds"));
    }
    if config.placed_sensitivity == 0 {
        return Err(ConfigError::Invalid("sensor_placed_sensitivity"));
    }
    if !(-65_535..=-1).contains(&config.removed_sensitivity) {
        return Err(ConfigError::Invalid("sensor_removed_sensitivity"));
    }
    if config.timeout_ms == 0 {
        return Err(ConfigError::Invalid("timeout"));
    }
    if config.ping_interval == 0 {
        return Err(ConfigError::Invalid("ping_interval"));
    }
    if config.dropped_ping_limit == 0 {
        return Err(ConfigError::Invalid("dropped_ping_limit"));
    }
    for (value, key) in [
        (config.sensor_tick_ms, "sensor_tick_length"),
        (config.led_fast_tick_ms, "led_fast_tick_length"),
        (config.led_slow_tick_ms, "led_slow_tick_length"),
        (config.message_check_ms, "message_check_interval"),
        (config.active_duration_ms, "active_duration"),
        (config.sleep_duration_ms, "sleep_duration"),
        (config.hold_threshold_ms, "hold_command_threshold"),
        (config.double_tap_window_ms, "sleep_command_window"),
        (config.peer_timeout_ms, "peer_timeout"),
    ] {
        if value == 0 {
            return Err(ConfigError::Invalid(key));
        }
    }
    Ok(())
}

fn parse_num<T: core::str::FromStr>(value: &str, key: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid(key))
}

fn parse_bool(value: &str, key: &'static str) -> Result<bool, ConfigError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::Invalid(key))
    }
}

fn parse_string<const N: usize>(
    value: &str,
    key: &'static str,
) -> Result<heapless::String<N>, ConfigError> {
    heapless::String::try_from(value).map_err(|_| ConfigError::Invalid(key))
}

/// Lamp names end up inside topic paths, so they are restricted to
/// characters that are inert there.
fn parse_identity(value: &str, key: &'static str) -> Result<Name, ConfigError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(ConfigError::Invalid(key));
    }
    parse_string(value, key)
}

/// Seconds with up to millisecond resolution (`7`, `0.05`, `1.5`) → ms.
fn parse_seconds_ms(value: &str, key: &'static str) -> Result<u32, ConfigError> {
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(ConfigError::Invalid(key));
    }
    let whole: u32 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| ConfigError::Invalid(key))?
    };
    if frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::Invalid(key));
    }
    let mut frac_ms = 0u32;
    for (i, b) in frac.bytes().enumerate() {
        frac_ms += (b - b'0') as u32 * [100, 10, 1][i];
    }
    whole
        .checked_mul(1_000)
        .and_then(|ms| ms.checked_add(frac_ms))
        .ok_or(ConfigError::Invalid(key))
}

/// Either a palette name (`ORANGE`) or an explicit triplet (`(255, 50, 0)`).
fn parse_color(value: &str, key: &'static str) -> Result<Rgb, ConfigError> {
    Rgb::from_name(value)
        .or_else(|| crate::color::parse_triplet(value))
        .ok_or(ConfigError::Invalid(key))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Config, ConfigError};

    pub(crate) const SAMPLE: &str = "\
# lamp identity
name = alva            # this lamp
friend_name = birk

sensor_pin = 32
led_pin = 27
num_leds = 16

wifi_ssid = homenet
wifi_pass = hunter2hunter2
backup_wifi_ssid = phone-hotspot
backup_wifi_pass = 12345678
connect_to_internet = true

server_addr = broker.example.org
server_port = 0
ssl = true
server_pass = brokerpw
timeout = 10
ping_interval = 4
dropped_ping_limit = 3

sensor_tick_length = 0.05
led_fast_tick_length = 0.02
led_slow_tick_length = 0.5
message_check_interval = 0.5
active_duration = 900
sleep_duration = 28800
hold_command_threshold = 5
sleep_command_window = 7
sensor_placed_sensitivity = 5000
sensor_removed_sensitivity = -4000

active_color = ORANGE
sleep_color = (10, 0, 60)
debug_feed = false
";

    pub(crate) fn sample() -> Config {
        Config::parse(SAMPLE).expect("sample config")
    }

    /// One-line variation of the sample, re-validated.
    pub(crate) fn sample_replaced(from: &str, to: &str) -> Result<Config, ConfigError> {
        Config::parse(&SAMPLE.replace(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::SAMPLE;
    use super::*;
    use crate::color;

    #[test]
    fn parses_full_sample() {
        let config = Config::parse(SAMPLE).expect("sample config");
        assert_eq!(config.name.as_str(), "alva");
        assert_eq!(config.friend_name.as_str(), "birk");
        assert_eq!(config.sensor_tick_ms, 50);
        assert_eq!(config.led_fast_tick_ms, 20);
        assert_eq!(config.led_slow_tick_ms, 500);
        assert_eq!(config.active_duration_ms, 900_000);
        assert_eq!(config.hold_threshold_ms, 5_000);
        assert_eq!(config.double_tap_window_ms, 7_000);
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.active_color, color::ORANGE);
        assert_eq!(config.sleep_color, Rgb::new(10, 0, 60));
        assert_eq!(config.removed_sensitivity, -4_000);
        // ssl=true with port 0 resolves to the encrypted default.
        assert_eq!(config.server_port, 8883);
        // Unset peer_timeout falls back to the documented default.
        assert_eq!(config.peer_timeout_ms, 120_000);
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let text = SAMPLE.replace("wifi_ssid = homenet", "");
        assert_eq!(
            Config::parse(&text),
            Err(ConfigError::Missing("wifi_ssid"))
        );
    }

    #[test]
    fn empty_value_counts_as_unset() {
        let text = SAMPLE.replace("server_addr = broker.example.org", "server_addr =");
        assert_eq!(
            Config::parse(&text),
            Err(ConfigError::Missing("server_addr"))
        );
    }

    #[test]
    fn rejects_equals_inside_value() {
        let text = SAMPLE.replace("wifi_pass = hunter2hunter2", "wifi_pass = a=b");
        assert!(matches!(
            Config::parse(&text),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_positive_removed_sensitivity() {
        let text = SAMPLE.replace(
            "sensor_removed_sensitivity = -4000",
            "sensor_removed_sensitivity = 4000",
        );
        assert_eq!(
            Config::parse(&text),
            Err(ConfigError::Invalid("sensor_removed_sensitivity"))
        );
    }

    #[test]
    fn rejects_identity_unsafe_for_topics() {
        let text = SAMPLE.replace("name = alva", "name = alva/lamp");
        assert_eq!(Config::parse(&text), Err(ConfigError::Invalid("name")));
    }

    #[test]
    fn rejects_same_name_for_both_lamps() {
        let text = SAMPLE.replace("friend_name = birk", "friend_name = alva");
        assert_eq!(
            Config::parse(&text),
            Err(ConfigError::Invalid("friend_name"))
        );
    }

    #[test]
    fn plain_port_default_without_tls() {
        let text = SAMPLE.replace("ssl = true", "ssl = false");
        let config = Config::parse(&text).expect("config");
        assert_eq!(config.server_port, 1883);
    }

    #[test]
    fn subsecond_parsing() {
        assert_eq!(parse_seconds_ms("0.05", "k"), Ok(50));
        assert_eq!(parse_seconds_ms("1.5", "k"), Ok(1_500));
        assert_eq!(parse_seconds_ms("900", "k"), Ok(900_000));
        assert_eq!(parse_seconds_ms(".25", "k"), Ok(250));
        assert!(parse_seconds_ms("0.0005", "k").is_err());
        assert!(parse_seconds_ms("fast", "k").is_err());
    }

    #[test]
    fn color_forms() {
        assert_eq!(parse_color("CYAN", "k"), Ok(color::CYAN));
        assert_eq!(parse_color("(1,2,3)", "k"), Ok(Rgb::new(1, 2, 3)));
        assert_eq!(parse_color("( 255, 0, 50 )", "k"), Ok(Rgb::new(255, 0, 50)));
        assert!(parse_color("(1,2)", "k").is_err());
        assert!(parse_color("(1,2,3,4)", "k").is_err());
        assert!(parse_color("blueish", "k").is_err());
    }
}
