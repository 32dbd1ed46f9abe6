// Sensor node
// 1. Run the collector (anything serving POST /api/measurements and
//    GET /api/firmwareupdate on port 8080)
// 2. Run the app, optionally with factory credentials
// BASE_URL="http://<IP>:8080" WIFI_SSID="<SSID>" WIFI_PASSWORD="<PASSWORD>" cargo r -r --features firmware
// 3. Without stored credentials, join the `TibSense` AP and navigate to http://192.168.2.1/
// The node uploads one measurement, applies any firmware update and sleeps for an hour.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;
use core::net::Ipv4Addr;
use core::str::FromStr;
use core::time::Duration;

use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::ram;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::Controller;
use esp_storage::FlashStorage;
use log::{error, info, warn};
use static_cell::StaticCell;

use sensor_node::alert;
use sensor_node::config::{self, ControllerConfig};
use sensor_node::connectivity::{ConnectivityController, CredentialSubmissions, LinkEvents};
use sensor_node::firmware::alert_led::AlertLed;
use sensor_node::firmware::ota::EspOta;
use sensor_node::firmware::portal::PortalService;
use sensor_node::firmware::radio::{RadioCommands, RadioLink, radio_task};
use sensor_node::firmware::sensors::Sensors;
use sensor_node::firmware::transport::HttpClient;
use sensor_node::firmware::{SharedFlash, locate_store, net};
use sensor_node::model::ConnectivityOutcome;
use sensor_node::provisioning::CredentialIntake;
use sensor_node::store::{FlashStore, seed_credential};
use sensor_node::traits::CredentialStore;
use sensor_node::update::UpdateDispatcher;
use sensor_node::uplink::UplinkSession;

esp_bootloader_esp_idf::esp_app_desc!();

static LINK_EVENTS: LinkEvents = LinkEvents::new();
static SUBMISSIONS: CredentialSubmissions = CredentialSubmissions::new();
static RADIO_COMMANDS: RadioCommands = RadioCommands::new();
static INTAKE: CredentialIntake<'static> = CredentialIntake::new(&SUBMISSIONS);

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 36 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    let mut rtc = Rtc::new(peripherals.LPWR);
    let mut led = AlertLed::new(peripherals.GPIO3);

    // Storage
    let mut flash = FlashStorage::new(peripherals.FLASH);
    let store_base = locate_store(&mut flash).expect("No usable nvs partition");
    static FLASH_CELL: StaticCell<SharedFlash> = StaticCell::new();
    let flash: &'static SharedFlash = FLASH_CELL.init(Mutex::new(flash));
    let mut store = FlashStore::new(flash, store_base);
    if let Some(credential) = config::factory_credential() {
        match seed_credential(&mut store, &credential).await {
            Ok(true) => info!("Store: seeded factory credential for {}", credential.network_id),
            Ok(false) => {}
            Err(e) => warn!("Store: failed to seed factory credential: {e}"),
        }
    }

    // Sensors
    let i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(100)),
    )
    .expect("Failed to create I2C bus")
    .with_sda(peripherals.GPIO6)
    .with_scl(peripherals.GPIO7);
    static I2C_BUS: StaticCell<RefCell<I2c<'static, Blocking>>> = StaticCell::new();
    let i2c_bus = I2C_BUS.init(RefCell::new(i2c));

    let mut adc_config = AdcConfig::new();
    let moisture_pin = adc_config.enable_pin(peripherals.GPIO0, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);
    let mut sensors = Sensors::new(i2c_bus, adc, moisture_pin);

    // Radio
    static ESP_RADIO_CTRL_CELL: StaticCell<Controller<'static>> = StaticCell::new();
    let esp_radio_ctrl = &*ESP_RADIO_CTRL_CELL
        .init(esp_radio::init().expect("Failed to initialize radio controller"));
    let (controller, interfaces) =
        esp_radio::wifi::new(esp_radio_ctrl, peripherals.WIFI, Default::default())
            .expect("Failed to create WiFi controller");

    let gateway = Ipv4Addr::from_str(config::gateway_ip()).expect("failed to parse gateway ip");
    let net = net::bring_up(spawner, interfaces.ap, interfaces.sta, gateway);

    spawner
        .spawn(radio_task(controller, net.station, &RADIO_COMMANDS, &LINK_EVENTS))
        .ok();

    // Connectivity
    let mut link = RadioLink::new(&RADIO_COMMANDS);
    let mut portal = PortalService::new(
        spawner,
        net.access_point,
        gateway,
        &RADIO_COMMANDS,
        &INTAKE,
    );
    let outcome = ConnectivityController::new(
        ControllerConfig::default(),
        &mut store,
        &mut link,
        &mut portal,
        &LINK_EVENTS,
        &SUBMISSIONS,
    )
    .run()
    .await;

    let measurement = sensors.read();

    // Uplink and update
    let connected = outcome == ConnectivityOutcome::Connected;
    match (
        config::endpoint(config::base_url(), config::MEASUREMENTS_PATH),
        config::endpoint(config::base_url(), config::FIRMWARE_PATH),
    ) {
        (Some(measurements_url), Some(firmware_url)) => {
            let mut client = HttpClient::new(net.station);
            let response = UplinkSession::new(&mut client, &mut store, &measurements_url)
                .upload(&measurement, connected)
                .await;
            match response {
                Ok(response) => {
                    let mut ota = EspOta::new(net.station, flash);
                    // Returns only if no update was offered or it failed.
                    let _ = UpdateDispatcher::new(&mut ota, &firmware_url)
                        .maybe_update(response.update_available)
                        .await;
                }
                Err(e) => error!("Uplink: {e}"),
            }
        }
        _ => error!("Uplink: base url `{}` too long", config::base_url()),
    }

    // Alert and sleep
    let limits = store
        .get_limits()
        .await
        .inspect_err(|e| warn!("Store: failed to read limits: {e}"))
        .ok()
        .flatten();
    alert::evaluate(limits.as_ref(), &measurement, &mut led);

    info!("Sleeping for {} s", config::SLEEP_INTERVAL_SECS);
    let wakeup = TimerWakeupSource::new(Duration::from_secs(config::SLEEP_INTERVAL_SECS));
    rtc.sleep_deep(&[&wakeup])
}
