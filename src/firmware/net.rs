//! Wi-Fi + broker transport adapter.
//!
//! Implements the raw [`LinkTransport`] primitives on esp-radio (station
//! association), embassy-net (DHCP, TCP, DNS) and rust-mqtt (the broker
//! client, standing where the original firmware used a vendored MQTT
//! library). The scheduler core is synchronous, so every async operation
//! here is wrapped in `block_on` + `with_timeout`: bounded, never parked
//! forever on a dead network.

use embassy_futures::block_on;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{with_timeout, Duration};
use esp_radio::wifi::{ClientConfiguration, Configuration, WifiController};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::utils::rng_generator::CountingRng;
use static_cell::StaticCell;

use crate::ports::{InboundFrame, LinkTransport, SessionOptions, TransportError};

const SOCKET_BUF: usize = 1_600;
const MQTT_BUF: usize = 512;
const MQTT_PROPERTIES: usize = 5;
const MQTT_KEEP_ALIVE_S: u16 = 60;

/// How long one inbound poll may wait on the socket. The scheduler calls
/// this once per message-check cycle; anything pending is usually already
/// buffered.
const RECEIVE_POLL_MS: u64 = 10;

/// Reachability probe target, mirroring the original's "can we reach the
/// internet at all" check.
const PROBE_HOST: &str = "www.google.com";
const PROBE_PORT: u16 = 80;

struct SessionBuffers {
    sock_rx: [u8; SOCKET_BUF],
    sock_tx: [u8; SOCKET_BUF],
    mqtt_tx: [u8; MQTT_BUF],
    mqtt_rx: [u8; MQTT_BUF],
}

static SESSION_BUFFERS: StaticCell<SessionBuffers> = StaticCell::new();

type Session = MqttClient<'static, TcpSocket<'static>, MQTT_PROPERTIES, CountingRng>;

pub struct EspTransport {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    started: bool,
    buffers: &'static mut SessionBuffers,
    session: Option<Session>,
}

impl EspTransport {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self {
            controller,
            stack,
            started: false,
            buffers: SESSION_BUFFERS.init(SessionBuffers {
                sock_rx: [0; SOCKET_BUF],
                sock_tx: [0; SOCKET_BUF],
                mqtt_tx: [0; MQTT_BUF],
                mqtt_rx: [0; MQTT_BUF],
            }),
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        self.session.as_mut().ok_or(TransportError::Io)
    }

    fn resolve(&self, host: &str, timeout_ms: u32) -> Result<IpEndpoint, TransportError> {
        // Literal addresses short-circuit the resolver.
        if let Ok(address) = host.parse() {
            return Ok(IpEndpoint::new(address, 0));
        }
        let addresses = bounded(timeout_ms, self.stack.dns_query(host, DnsQueryType::A))?
            .map_err(|_| TransportError::Io)?;
        let address = addresses.first().ok_or(TransportError::Io)?;
        Ok(IpEndpoint::new(*address, 0))
    }
}

impl LinkTransport for EspTransport {
    fn join_network(
        &mut self,
        ssid: &str,
        password: &str,
        timeout_ms: u32,
    ) -> Result<(), TransportError> {
        let client_config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| TransportError::Wifi)?,
            password: password.try_into().map_err(|_| TransportError::Wifi)?,
            ..Default::default()
        });
        self.controller
            .set_configuration(&client_config)
            .map_err(|_| TransportError::Wifi)?;

        if !self.started {
            block_on(self.controller.start_async()).map_err(|_| TransportError::Wifi)?;
            self.started = true;
        } else {
            // Dropping an old association before a re-join; failures here
            // just mean there was nothing to drop.
            let _ = block_on(self.controller.disconnect_async());
        }

        bounded(timeout_ms, async {
            self.controller
                .connect_async()
                .await
                .map_err(|_| TransportError::Wifi)?;
            // Associated is not enough: wait for the DHCP lease too.
            self.stack.wait_config_up().await;
            Ok(())
        })?
    }

    fn check_internet(&mut self, timeout_ms: u32) -> Result<(), TransportError> {
        let mut endpoint = self
            .resolve(PROBE_HOST, timeout_ms)
            .map_err(|_| TransportError::Internet)?;
        endpoint.port = PROBE_PORT;

        let mut rx = [0u8; 128];
        let mut tx = [0u8; 128];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        let connected = bounded(timeout_ms, socket.connect(endpoint));
        socket.abort();
        match connected {
            Ok(Ok(())) => Ok(()),
            _ => Err(TransportError::Internet),
        }
    }

    fn open_session(&mut self, options: &SessionOptions<'_>) -> Result<(), TransportError> {
        // Tear down any previous client before re-borrowing the buffer
        // block; exactly one session is ever alive.
        self.session = None;
        let buffers = unsafe { &mut *(self.buffers as *mut SessionBuffers) };

        if options.use_tls {
            // No TLS stack is wired into this shell yet.
            // TODO: route the session through esp-mbedtls once it supports
            // esp-radio 0.17.
            log::warn!("ssl requested but unavailable, connecting in the clear");
        }

        let mut endpoint = self.resolve(options.host, options.timeout_ms)?;
        endpoint.port = options.port;

        let mut socket = TcpSocket::new(self.stack, &mut buffers.sock_rx, &mut buffers.sock_tx);
        socket.set_timeout(Some(Duration::from_millis(options.timeout_ms as u64)));
        match bounded(options.timeout_ms, socket.connect(endpoint)) {
            Ok(Ok(())) => {}
            _ => return Err(TransportError::Broker),
        }

        let mut config: ClientConfig<'_, MQTT_PROPERTIES, CountingRng> =
            ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        config.add_client_id(options.client_id);
        config.add_username(options.username);
        if let Some(password) = options.password {
            config.add_password(password);
        }
        config.add_will(options.last_will_topic, options.last_will_payload, false);
        config.keep_alive = MQTT_KEEP_ALIVE_S;
        config.max_packet_size = MQTT_BUF as u32;

        let mut client = MqttClient::new(
            socket,
            &mut buffers.mqtt_tx,
            MQTT_BUF,
            &mut buffers.mqtt_rx,
            MQTT_BUF,
            config,
        );
        match bounded(options.timeout_ms, client.connect_to_broker()) {
            Ok(Ok(())) => {
                self.session = Some(client);
                Ok(())
            }
            _ => Err(TransportError::Broker),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.session()?;
        match bounded(5_000, client.subscribe_to_topic(topic)) {
            Ok(Ok(())) => Ok(()),
            _ => Err(TransportError::Broker),
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let client = self.session()?;
        match bounded(
            5_000,
            client.send_message(topic, payload, QualityOfService::QoS0, false),
        ) {
            Ok(Ok(())) => Ok(()),
            _ => Err(TransportError::Io),
        }
    }

    fn poll_inbound(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        let client = self.session()?;
        match bounded(RECEIVE_POLL_MS as u32, client.receive_message()) {
            Ok(Ok((topic, payload))) => {
                let topic = heapless::String::try_from(topic).map_err(|_| TransportError::Io)?;
                let payload =
                    heapless::Vec::from_slice(payload).map_err(|_| TransportError::Io)?;
                Ok(Some(InboundFrame { topic, payload }))
            }
            // Nothing pending within the poll window.
            Err(TransportError::Io) => Ok(None),
            _ => Err(TransportError::Io),
        }
    }
}

/// Run an async transport step with a hard deadline, so a stalled network
/// costs at most one scheduler iteration.
fn bounded<F: core::future::Future>(
    timeout_ms: u32,
    future: F,
) -> Result<F::Output, TransportError> {
    block_on(with_timeout(
        Duration::from_millis(timeout_ms as u64),
        future,
    ))
    .map_err(|_| TransportError::Io)
}
