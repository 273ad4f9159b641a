use serde::{Deserialize, Serialize};

use crate::types::TemperatureUnit;

pub const HOSTNAME_PREFIX: &str = "HVAC_";
pub const DEFAULT_COLLECTOR_URL: &str = "http://192.168.1.1:81/";

/// Hostname the device falls back to before credentials exist, or after a
/// failed join when the stored name must not leak onto an open setup network.
pub fn default_hostname(device_id: &str) -> String {
    format!("{HOSTNAME_PREFIX}{device_id}")
}

/// Stored operational-network credentials. An empty ssid is the valid
/// "unconfigured" state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub passphrase: String,
    pub hostname: String,
    #[serde(rename = "updatePassword")]
    pub update_password: String,
}

impl NetworkCredentials {
    pub fn is_configured(&self) -> bool {
        !self.ssid.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    #[serde(rename = "temperatureUnit")]
    pub temperature_unit: TemperatureUnit,
    /// Stored in Celsius regardless of the display unit.
    #[serde(rename = "minTemp")]
    pub min_temp: f32,
    #[serde(rename = "maxTemp")]
    pub max_temp: f32,
    #[serde(rename = "tempStep")]
    pub temp_step: f32,
    #[serde(rename = "supportHeatMode")]
    pub support_heat_mode: bool,
    #[serde(rename = "sessionPassword")]
    pub session_password: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            temperature_unit: TemperatureUnit::Celsius,
            min_temp: 16.0,
            max_temp: 31.0,
            temp_step: 1.0,
            support_heat_mode: true,
            session_password: String::new(),
        }
    }
}

impl UnitConfig {
    pub fn sanitize(&mut self) {
        if !self.min_temp.is_finite() || self.min_temp < 10.0 {
            self.min_temp = 16.0;
        }
        if !self.max_temp.is_finite() || self.max_temp > 35.0 {
            self.max_temp = 31.0;
        }
        if self.min_temp > self.max_temp {
            self.min_temp = 16.0;
            self.max_temp = 31.0;
        }
        if !self.temp_step.is_finite() || !(0.5..=2.0).contains(&self.temp_step) {
            self.temp_step = 1.0;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub url: String,
}

impl CollectorConfig {
    pub fn sanitize(&mut self) {
        if self.url.trim().is_empty() {
            self.url = DEFAULT_COLLECTOR_URL.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    #[serde(rename = "packetTrace")]
    pub packet_trace: bool,
    #[serde(rename = "logTrace")]
    pub log_trace: bool,
}
