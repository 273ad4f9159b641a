//! Host stand-ins for the hardware seams. The real serial protocol, radio,
//! and flash partition only exist on the device; these adapters let the whole
//! supervisor stack run and be exercised on a development machine.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use heatpump_common::{
    config::NetworkCredentials,
    connectivity::{NetworkInterface, Restarter, RestartReason},
    link::{LinkEvent, ProtocolLink},
    types::{FanSpeed, HeatPumpSettings, HeatPumpStatus, Mode, Power, Vane, WideVane},
    upload::FirmwareTarget,
};

/// In-process heat pump. Connects on demand (or never, when the link is
/// forced down via `HEATPUMP_SIM_LINK_DOWN`), echoes setters into its
/// settings, and reports changes on sync the way the wire protocol would.
pub struct SimulatedHeatPump {
    connected: bool,
    link_down: bool,
    settings: HeatPumpSettings,
    status: HeatPumpStatus,
    remote_temperature_c: f32,
    settings_dirty: bool,
    sync_count: u64,
}

impl SimulatedHeatPump {
    pub fn new() -> Self {
        Self {
            connected: false,
            link_down: std::env::var("HEATPUMP_SIM_LINK_DOWN").is_ok(),
            settings: HeatPumpSettings::default(),
            status: HeatPumpStatus::default(),
            remote_temperature_c: 0.0,
            settings_dirty: false,
            sync_count: 0,
        }
    }

    fn room_temperature(&self) -> f32 {
        if self.remote_temperature_c > 0.0 {
            return self.remote_temperature_c;
        }
        // Slow half-degree wobble around a fixed baseline so status actually
        // changes over a long run.
        if (self.sync_count / 3_000) % 2 == 0 {
            21.0
        } else {
            21.5
        }
    }
}

impl ProtocolLink for SimulatedHeatPump {
    fn connect(&mut self) -> bool {
        if self.link_down {
            return false;
        }
        self.connected = true;
        true
    }

    fn sync(&mut self) -> Vec<LinkEvent> {
        if !self.connected {
            return Vec::new();
        }
        self.sync_count += 1;

        let mut events = Vec::new();
        if self.settings_dirty {
            self.settings_dirty = false;
            events.push(LinkEvent::PacketTrace {
                direction: "packetSent".to_string(),
                bytes: vec![0xfc, 0x41, 0x01, 0x30, 0x10, 0x01, 0x00],
            });
            events.push(LinkEvent::SettingsChanged);
        }

        self.status.room_temperature_c = self.room_temperature();
        self.status.operating = self.settings.power == Power::On;
        self.status.compressor_frequency = if self.status.operating { 40 } else { 0 };
        events.push(LinkEvent::StatusChanged);
        events
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn settings(&self) -> HeatPumpSettings {
        self.settings
    }

    fn status(&self) -> HeatPumpStatus {
        self.status
    }

    fn set_power(&mut self, power: Power) {
        self.settings.power = power;
        self.settings_dirty = true;
    }

    fn set_mode(&mut self, mode: Mode) {
        self.settings.mode = mode;
        self.settings_dirty = true;
    }

    fn set_fan(&mut self, fan: FanSpeed) {
        self.settings.fan = fan;
        self.settings_dirty = true;
    }

    fn set_temperature_c(&mut self, celsius: f32) {
        self.settings.temperature_c = celsius;
        self.settings_dirty = true;
    }

    fn set_vane(&mut self, vane: Vane) {
        self.settings.vane = vane;
        self.settings_dirty = true;
    }

    fn set_wide_vane(&mut self, wide_vane: WideVane) {
        self.settings.wide_vane = wide_vane;
        self.settings_dirty = true;
    }

    fn set_remote_temperature_c(&mut self, celsius: f32) {
        self.remote_temperature_c = celsius;
    }
}

/// Station "joins" instantly when credentials exist; `HEATPUMP_FORCE_SETUP`
/// simulates an unreachable network for exercising the setup fallback.
pub struct HostNetwork {
    station_up: bool,
    force_setup: bool,
}

impl HostNetwork {
    pub fn new() -> Self {
        Self {
            station_up: false,
            force_setup: std::env::var("HEATPUMP_FORCE_SETUP").is_ok(),
        }
    }
}

impl NetworkInterface for HostNetwork {
    fn connect_station(&mut self, credentials: &NetworkCredentials, timeout_ms: u64) -> bool {
        if self.force_setup || !credentials.is_configured() {
            return false;
        }
        info!(
            "station joined '{}' (timeout budget {timeout_ms}ms)",
            credentials.ssid
        );
        self.station_up = true;
        true
    }

    fn start_access_point(&mut self, ssid: &str, passphrase: Option<&str>) -> bool {
        info!(
            "setup access point '{ssid}' up ({})",
            if passphrase.is_some() {
                "protected"
            } else {
                "open"
            }
        );
        true
    }

    fn station_connected(&self) -> bool {
        self.station_up
    }
}

/// Logs the reason and exits shortly after, so in-flight responses get out.
pub struct HostRestarter {
    pending: bool,
}

impl HostRestarter {
    pub fn new() -> Self {
        Self { pending: false }
    }
}

impl Restarter for HostRestarter {
    fn request_restart(&mut self, reason: RestartReason) {
        if self.pending {
            return;
        }
        self.pending = true;
        info!("restarting: {}", reason.as_str());
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::process::exit(0);
        });
    }
}

/// Firmware write region backed by a staging file. The size and write mode
/// mirror the 4MiB DIO module the firmware normally runs on.
pub struct FileFirmwareTarget {
    path: PathBuf,
    staged: Vec<u8>,
    active: bool,
}

impl FileFirmwareTarget {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            staged: Vec::new(),
            active: false,
        }
    }
}

impl FirmwareTarget for FileFirmwareTarget {
    fn begin(&mut self) -> bool {
        self.staged.clear();
        self.active = true;
        true
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        if !self.active {
            return 0;
        }
        self.staged.extend_from_slice(chunk);
        chunk.len()
    }

    fn finalize(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("firmware staging dir create failed: {err}");
                return false;
            }
        }
        match std::fs::write(&self.path, &self.staged) {
            Ok(()) => true,
            Err(err) => {
                warn!("firmware staging write failed: {err}");
                false
            }
        }
    }

    fn abort(&mut self) {
        self.staged.clear();
        self.active = false;
    }

    fn flash_size(&self) -> u32 {
        4 * 1024 * 1024
    }

    fn flash_mode_byte(&self) -> u8 {
        2
    }
}
