//! ESP32 shell.
//!
//! Adapts the port traits onto real peripherals (ADC touch probe, smartled
//! strip, flash-backed config store, Wi-Fi + broker transport) and runs
//! the scheduler inside an embassy executor. Everything interesting lives
//! in the core; this module is bring-up and glue.

pub mod leds;
pub mod net;
pub mod sensor;
pub mod store;

use embassy_time::{Duration, Instant, Timer};
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;

use crate::color;
use crate::config::{Config, ConfigError};
use crate::ports::{ConfigStore as _, LampStrip as _};
use crate::scheduler::Scheduler;
use crate::status::StatusPattern;

// This board revision routes the sensor to GPIO32 (ADC1) and the strip data
// line to GPIO27; the config pin fields are validated against these.
const BOARD_SENSOR_PIN: u8 = 32;
const BOARD_LED_PIN: u8 = 27;

/// Pixels lit for fault patterns when no valid config names a count.
const FALLBACK_PIXELS: usize = 16;

/// Granularity of the fault-pattern render loop.
const FAULT_TICK_MS: u64 = 50;

type LampScheduler = Scheduler<
    sensor::AdcTouchProbe<'static>,
    leds::SmartStrip<'static>,
    net::EspTransport,
    store::FlashConfigStore<'static>,
>;

pub fn run() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    esp_println::logger::init_logger_from_env();

    // The radio blob needs a heap; steady-state lamp code does not allocate.
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Strip first: the solid boot color has to be visible before anything
    // slow happens.
    let mut strip = leds::SmartStrip::new(peripherals.RMT, peripherals.GPIO27, FALLBACK_PIXELS);
    strip.fill(color::BLUE);

    let mut config_store = store::FlashConfigStore::new(peripherals.FLASH);
    let mut config_text = [0u8; store::CONFIG_TEXT_MAX];
    let config = load_config(&mut config_store, &mut config_text);

    let mut executor = esp_rtos::embassy::Executor::new();
    let executor = unsafe { make_static(&mut executor) };

    let config = match config {
        Ok(config) => config,
        Err(error) => {
            log::error!("configuration rejected: {error}");
            executor.run(move |spawner| {
                spawner.must_spawn(fault_task(strip, StatusPattern::fatal_config()));
            });
        }
    };

    if config.sensor_pin != BOARD_SENSOR_PIN || config.led_pin != BOARD_LED_PIN {
        log::warn!(
            "config pins ({}, {}) differ from this board's routing ({}, {})",
            config.sensor_pin,
            config.led_pin,
            BOARD_SENSOR_PIN,
            BOARD_LED_PIN,
        );
    }
    strip.set_pixel_count(config.num_leds as usize);

    let probe = sensor::AdcTouchProbe::new(peripherals.ADC1, peripherals.GPIO32);

    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio = RADIO.init(esp_radio::init().expect("radio init failed"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .expect("wifi init failed");

    static STACK_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STACK_RESOURCES.init(embassy_net::StackResources::new()),
        seed,
    );

    let transport = net::EspTransport::new(wifi_controller, stack);
    let scheduler = Scheduler::new(&config, probe, strip, transport, config_store);

    executor.run(move |spawner| {
        spawner.must_spawn(net_task(runner));
        spawner.must_spawn(lamp_task(scheduler));
    });
}

fn load_config(
    store: &mut store::FlashConfigStore<'_>,
    buf: &mut [u8],
) -> Result<Config, ConfigError> {
    let text = store.load(buf).map_err(|error| {
        log::error!("config storage unusable: {error}");
        ConfigError::Missing("config")
    })?;
    Config::parse(text)
}

#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_radio::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn lamp_task(mut scheduler: LampScheduler) -> ! {
    let boot_instant = Instant::now();
    let now_ms = |boot: Instant| Instant::now().saturating_duration_since(boot).as_millis();

    scheduler.boot(now_ms(boot_instant));

    loop {
        let now = now_ms(boot_instant);
        scheduler.poll(now);

        if scheduler.reboot_requested() {
            log::info!("rebooting on remote command");
            esp_hal::system::software_reset();
        }

        let wake_at = scheduler.next_deadline();
        let delay = wake_at.saturating_sub(now_ms(boot_instant)).max(1);
        Timer::after(Duration::from_millis(delay)).await;
    }
}

/// Fatal setup error: render the pattern forever, never retry.
#[embassy_executor::task]
async fn fault_task(mut strip: leds::SmartStrip<'static>, pattern: StatusPattern) -> ! {
    let started = Instant::now();
    loop {
        let phase = Instant::now().saturating_duration_since(started).as_millis();
        strip.fill(pattern.color_at(phase));
        Timer::after(Duration::from_millis(FAULT_TICK_MS)).await;
    }
}

unsafe fn make_static<T>(value: &mut T) -> &'static mut T {
    unsafe { core::mem::transmute(value) }
}
