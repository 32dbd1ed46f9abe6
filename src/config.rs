//! Build-time settings and runtime knobs of the connectivity controller.
//!
//! Everything a deployment changes is read from the environment at build time,
//! e.g. `BASE_URL=http://10.0.0.2:8080 WIFI_SSID=Net WIFI_PASSWORD=pass1234 cargo r -r`.

use core::fmt::Write;

use embassy_time::Duration;
use heapless::String;

use crate::model::Credential;

const BASE_URL_ENV: Option<&'static str> = option_env!("BASE_URL");
const WIFI_SSID: Option<&'static str> = option_env!("WIFI_SSID");
const WIFI_PASSWORD: Option<&'static str> = option_env!("WIFI_PASSWORD");
const AP_SSID_ENV: Option<&'static str> = option_env!("AP_SSID");
const GATEWAY_IP_ENV: Option<&'static str> = option_env!("GATEWAY_IP");

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const MEASUREMENTS_PATH: &str = "/api/measurements";
pub const FIRMWARE_PATH: &str = "/api/firmwareupdate";

pub const RETRY_BUDGET: u8 = 5;
pub const LINK_WINDOW: Duration = Duration::from_secs(15);
pub const SLEEP_INTERVAL_SECS: u64 = 3600;

pub const URL_MAX: usize = 128;

/// The provisioning access point serves one phone at a time.
pub const AP_MAX_CONNECTIONS: u16 = 1;
/// Port the captive DNS responder answers on; clients only query port 53.
pub const CAPTIVE_DNS_PORT: u16 = 53;

pub fn base_url() -> &'static str {
    BASE_URL_ENV.unwrap_or("http://192.168.1.10:8080")
}

/// SSID of the open provisioning access point.
pub fn ap_ssid() -> &'static str {
    AP_SSID_ENV.unwrap_or("TibSense")
}

pub fn gateway_ip() -> &'static str {
    GATEWAY_IP_ENV.unwrap_or("192.168.2.1")
}

/// Credential baked into the image, used to seed an empty store.
pub fn factory_credential() -> Option<Credential> {
    Credential::new(WIFI_SSID?, WIFI_PASSWORD?).ok()
}

/// Joins `base` and `path`, dropping a trailing slash on `base`.
pub fn endpoint(base: &str, path: &str) -> Option<String<URL_MAX>> {
    let mut url = String::new();
    write!(url, "{}{}", base.trim_end_matches('/'), path).ok()?;
    Some(url)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Total association attempts with the stored credential.
    pub retry_budget: u8,
    /// Time allowed for one attempt to report an outcome.
    pub link_window: Duration,
    /// Bound on the wait for a provisioned credential; `None` waits forever.
    pub credential_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            retry_budget: RETRY_BUDGET,
            link_window: LINK_WINDOW,
            credential_timeout: None,
        }
    }
}
