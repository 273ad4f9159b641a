use crate::link::ProtocolLink;
use crate::temps::celsius_to_local;
use crate::types::{
    hex_byte_string, HeatPumpSettings, HeatPumpStatus, OutboundDocument, SettingsSnapshot,
    StatusSnapshot,
};

#[derive(Debug, Clone, Copy)]
pub struct PublishConfig {
    /// Settings reported this soon after a locally issued command are still
    /// the transitional pre-change values and get dropped.
    pub suppression_window_ms: u64,
    pub periodic_interval_ms: u64,
    /// A remote temperature override older than this is considered stale and
    /// auto-reverts to the unit's internal sensor.
    pub override_watchdog_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            suppression_window_ms: 3_000,
            periodic_interval_ms: 300_000,
            override_watchdog_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishThrottle {
    pub last_local_command_ms: Option<u64>,
    pub last_periodic_publish_ms: Option<u64>,
    pub last_remote_override_ms: Option<u64>,
    pub remote_override_active: bool,
}

/// Turns link change events into outbound documents, applying the
/// suppression and cadence rules. Delivery (and delivery failure) is the
/// caller's problem: documents are best-effort, at-most-once.
#[derive(Debug)]
pub struct StatePublisher {
    config: PublishConfig,
    throttle: PublishThrottle,
}

impl StatePublisher {
    pub fn new(config: PublishConfig) -> Self {
        Self {
            config,
            throttle: PublishThrottle::default(),
        }
    }

    /// Record that a command was just issued locally (web/json surface).
    pub fn note_local_command(&mut self, now_ms: u64) {
        self.throttle.last_local_command_ms = Some(now_ms);
    }

    /// Record that a remote temperature override was pushed to the unit.
    pub fn note_remote_override(&mut self, now_ms: u64) {
        self.throttle.remote_override_active = true;
        self.throttle.last_remote_override_ms = Some(now_ms);
    }

    pub fn remote_override_active(&self) -> bool {
        self.throttle.remote_override_active
    }

    pub fn on_settings_changed(
        &mut self,
        now_ms: u64,
        settings: &HeatPumpSettings,
        use_fahrenheit: bool,
    ) -> Option<OutboundDocument> {
        if let Some(last) = self.throttle.last_local_command_ms {
            let since = now_ms.saturating_sub(last);
            // The echo at the command moment itself goes out; only the
            // stale follow-ups inside the window are dropped.
            if since > 0 && since < self.config.suppression_window_ms {
                return None;
            }
        }

        Some(OutboundDocument::Settings(SettingsSnapshot {
            temperature: celsius_to_local(settings.temperature_c, use_fahrenheit),
            fan: settings.fan.as_str(),
            vane: settings.vane.as_str(),
            wide_vane: settings.wide_vane.as_str(),
            mode: settings.mode.as_str(),
            power: settings.power.as_str(),
        }))
    }

    pub fn on_status_changed(
        &mut self,
        now_ms: u64,
        status: &HeatPumpStatus,
        link: &mut dyn ProtocolLink,
        use_fahrenheit: bool,
    ) -> Option<OutboundDocument> {
        let override_cleared = self.check_remote_override(now_ms, link);

        let periodic_due = match self.throttle.last_periodic_publish_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.config.periodic_interval_ms,
        };
        // Clearing a stale override publishes immediately so the reversion
        // to the internal sensor is visible.
        if !(periodic_due || override_cleared) {
            return None;
        }
        // A zero reading means the unit has not reported yet.
        if status.room_temperature_c == 0.0 {
            return None;
        }

        self.throttle.last_periodic_publish_ms = Some(now_ms);
        Some(OutboundDocument::Status(StatusSnapshot {
            room_temperature: celsius_to_local(status.room_temperature_c, use_fahrenheit),
            compressor_frequency: status.compressor_frequency,
            action: status.operating,
        }))
    }

    /// Raw packet trace document; the caller gates this on the packet-trace
    /// debug flag.
    pub fn packet_trace(&self, direction: &str, bytes: &[u8]) -> OutboundDocument {
        OutboundDocument::Trace {
            direction: direction.to_string(),
            bytes_hex: hex_byte_string(bytes),
        }
    }

    /// Returns true when an active override just went stale and was cleared.
    fn check_remote_override(&mut self, now_ms: u64, link: &mut dyn ProtocolLink) -> bool {
        if !self.throttle.remote_override_active {
            return false;
        }
        let stale = match self.throttle.last_remote_override_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.config.override_watchdog_ms,
        };
        if !stale {
            return false;
        }
        self.throttle.remote_override_active = false;
        link.set_remote_temperature_c(0.0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkEvent;
    use crate::types::{FanSpeed, Mode, Power, Vane, WideVane};

    #[derive(Default)]
    struct FakeLink {
        connected: bool,
        remote_temps: Vec<f32>,
        settings: HeatPumpSettings,
        status: HeatPumpStatus,
    }

    impl ProtocolLink for FakeLink {
        fn connect(&mut self) -> bool {
            self.connected
        }

        fn sync(&mut self) -> Vec<LinkEvent> {
            Vec::new()
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
        }

        fn set_mode(&mut self, mode: Mode) {
            self.settings.mode = mode;
        }

        fn set_fan(&mut self, fan: FanSpeed) {
            self.settings.fan = fan;
        }

        fn set_temperature_c(&mut self, celsius: f32) {
            self.settings.temperature_c = celsius;
        }

        fn set_vane(&mut self, vane: Vane) {
            self.settings.vane = vane;
        }

        fn set_wide_vane(&mut self, wide_vane: WideVane) {
            self.settings.wide_vane = wide_vane;
        }

        fn set_remote_temperature_c(&mut self, celsius: f32) {
            self.remote_temps.push(celsius);
        }
    }

    fn status_at(room_c: f32) -> HeatPumpStatus {
        HeatPumpStatus {
            room_temperature_c: room_c,
            operating: true,
            compressor_frequency: 42,
        }
    }

    #[test]
    fn settings_inside_suppression_window_are_dropped() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let settings = HeatPumpSettings::default();

        publisher.note_local_command(10_000);

        // The command moment itself publishes.
        assert!(publisher
            .on_settings_changed(10_000, &settings, false)
            .is_some());
        // Anything inside the window is transitional state.
        assert!(publisher
            .on_settings_changed(11_500, &settings, false)
            .is_none());
        assert!(publisher
            .on_settings_changed(12_999, &settings, false)
            .is_none());
        // The window is over.
        assert!(publisher
            .on_settings_changed(13_000, &settings, false)
            .is_some());
    }

    #[test]
    fn settings_snapshot_uses_display_scale() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let settings = HeatPumpSettings {
            temperature_c: 21.0,
            ..HeatPumpSettings::default()
        };

        let doc = publisher
            .on_settings_changed(0, &settings, true)
            .expect("no suppression recorded");
        match doc {
            OutboundDocument::Settings(snapshot) => assert_eq!(snapshot.temperature, 69.0),
            other => panic!("expected settings snapshot, got {other:?}"),
        }
    }

    #[test]
    fn status_publishes_at_most_once_per_interval() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let mut link = FakeLink::default();
        let status = status_at(22.0);

        assert!(publisher
            .on_status_changed(1_000, &status, &mut link, false)
            .is_some());

        // Continuous status events inside the interval publish nothing.
        for now in (2_000..300_000).step_by(10_000) {
            assert!(publisher
                .on_status_changed(now, &status, &mut link, false)
                .is_none());
        }

        assert!(publisher
            .on_status_changed(301_001, &status, &mut link, false)
            .is_some());
    }

    #[test]
    fn zero_room_temperature_is_never_published() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let mut link = FakeLink::default();

        assert!(publisher
            .on_status_changed(1_000, &status_at(0.0), &mut link, false)
            .is_none());
        // The periodic slot was not consumed by the dropped publish.
        assert!(publisher
            .on_status_changed(1_001, &status_at(21.0), &mut link, false)
            .is_some());
    }

    #[test]
    fn stale_override_reverts_to_internal_sensor_and_publishes() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let mut link = FakeLink::default();
        let status = status_at(23.0);

        // Consume the initial periodic slot, then activate the override.
        assert!(publisher
            .on_status_changed(1_000, &status, &mut link, false)
            .is_some());
        publisher.note_remote_override(2_000);

        // Fresh override: nothing cleared, nothing published off-cadence.
        assert!(publisher
            .on_status_changed(100_000, &status, &mut link, false)
            .is_none());
        assert!(publisher.remote_override_active());
        assert!(link.remote_temps.is_empty());

        // 300s with no override refresh: cleared without any external
        // trigger, zero pushed to the link, and a publish fires immediately.
        let doc = publisher.on_status_changed(302_001, &status, &mut link, false);
        assert!(doc.is_some());
        assert!(!publisher.remote_override_active());
        assert_eq!(link.remote_temps, vec![0.0]);
    }

    #[test]
    fn refreshed_override_stays_active() {
        let mut publisher = StatePublisher::new(PublishConfig::default());
        let mut link = FakeLink::default();
        let status = status_at(23.0);

        publisher.note_remote_override(0);
        publisher.note_remote_override(200_000);

        let _ = publisher.on_status_changed(400_000, &status, &mut link, false);
        assert!(publisher.remote_override_active());
        assert!(link.remote_temps.is_empty());
    }
}
