use serde::{Deserialize, Serialize};

use crate::types::Orientation;

pub const PORTAL_AP_SSID: &str = "WiFi_Clock";
pub const PORTAL_AP_PSK: &str = "WiFi_Clock";
pub const PORTAL_TITLE: &str = "WiFi Clock";
pub const HOME_URI: &str = "/home";
pub const CONFIG_URI: &str = "/clock_config";
pub const APPLY_URI: &str = "/apply";

// The hourly GET runs on the watchdog-fed loop; its timeout must expire first.
pub const LOOP_WATCHDOG_TIMEOUT_SECS: u32 = 30;
pub const MAX_HTTP_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClockConfig {
    pub time_api_url: String,
    pub http_timeout_ms: u64,
    pub boot_retry_delay_ms: u64,
    pub loop_period_ms: u64,
    pub page_refresh_secs: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_api_url: "http://worldtimeapi.org/api/ip".to_string(),
            http_timeout_ms: 10_000,
            boot_retry_delay_ms: 1_000,
            loop_period_ms: 1_000,
            page_refresh_secs: 1,
        }
    }
}

impl ClockConfig {
    pub fn sanitize(&mut self) {
        if self.time_api_url.trim().is_empty() {
            self.time_api_url = Self::default().time_api_url;
        }
        self.http_timeout_ms = self.http_timeout_ms.clamp(1_000, MAX_HTTP_TIMEOUT_MS);
        self.boot_retry_delay_ms = self.boot_retry_delay_ms.clamp(1_000, 2_000);
        self.loop_period_ms = self.loop_period_ms.clamp(100, 1_000);
        self.page_refresh_secs = self.page_refresh_secs.clamp(1, 60);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayHardwareConfig {
    pub clk_pin: i32,
    pub dio_pin: i32,
    pub brightness: u8,
}

impl Default for DisplayHardwareConfig {
    fn default() -> Self {
        Self {
            clk_pin: 22,
            dio_pin: 21,
            brightness: 3,
        }
    }
}

impl DisplayHardwareConfig {
    pub const MAX_BRIGHTNESS: u8 = 7;

    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.clk_pin < 0 {
            self.clk_pin = defaults.clk_pin;
        }
        if self.dio_pin < 0 {
            self.dio_pin = defaults.dio_pin;
        }
        if self.dio_pin == self.clk_pin {
            self.clk_pin = defaults.clk_pin;
            self.dio_pin = defaults.dio_pin;
        }
        self.brightness = self.brightness.min(Self::MAX_BRIGHTNESS);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub display: DisplayHardwareConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.clock.sanitize();
        self.display.sanitize();
    }
}
