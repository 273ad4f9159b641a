use crate::types::{FanSpeed, HeatPumpSettings, HeatPumpStatus, Mode, Power, Vane, WideVane};

/// Change notification produced by the protocol handler during `sync()`.
/// Events are delivered synchronously inside the tick that produced them,
/// which is what the publisher's suppression logic depends on.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    SettingsChanged,
    StatusChanged,
    PacketTrace { direction: String, bytes: Vec<u8> },
}

/// Seam to the external protocol handler that owns the wire connection to
/// the heat-pump unit. The byte-level protocol is out of scope here.
pub trait ProtocolLink {
    /// Attempt to (re)establish the serial link. A failed attempt is not an
    /// error; the supervisor just reschedules.
    fn connect(&mut self) -> bool;
    /// Exchange pending frames with the unit and report what changed.
    fn sync(&mut self) -> Vec<LinkEvent>;
    fn is_connected(&self) -> bool;
    fn settings(&self) -> HeatPumpSettings;
    fn status(&self) -> HeatPumpStatus;
    fn set_power(&mut self, power: Power);
    fn set_mode(&mut self, mode: Mode);
    fn set_fan(&mut self, fan: FanSpeed);
    fn set_temperature_c(&mut self, celsius: f32);
    fn set_vane(&mut self, vane: Vane);
    fn set_wide_vane(&mut self, wide_vane: WideVane);
    /// Zero reverts the unit to its internal sensor.
    fn set_remote_temperature_c(&mut self, celsius: f32);
}

#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub base_retry_interval_ms: u64,
    /// Exponent cap: past this many failures the retry interval stops
    /// growing (base << cap, about 17 minutes at the defaults) but the
    /// supervisor keeps retrying forever.
    pub max_retry_exponent: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_retry_interval_ms: 1_000,
            max_retry_exponent: 10,
        }
    }
}

/// Drives the protocol link from the main tick: capped exponential backoff
/// while disconnected, continuous sync while connected.
#[derive(Debug)]
pub struct LinkSupervisor {
    config: LinkConfig,
    retry_count: u32,
    last_attempt_ms: Option<u64>,
    total_retries: u64,
}

impl LinkSupervisor {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            retry_count: 0,
            last_attempt_ms: None,
            total_retries: 0,
        }
    }

    /// Interval before the next attempt given the current failure streak.
    pub fn retry_interval_ms(&self) -> u64 {
        let exponent = self.retry_count.min(self.config.max_retry_exponent);
        self.config.base_retry_interval_ms << exponent
    }

    pub fn tick(&mut self, now_ms: u64, link: &mut dyn ProtocolLink) -> Vec<LinkEvent> {
        if !link.is_connected() {
            let due = match self.last_attempt_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= self.retry_interval_ms(),
            };
            if due {
                self.last_attempt_ms = Some(now_ms);
                self.retry_count = (self.retry_count + 1).min(self.config.max_retry_exponent);
                self.total_retries += 1;
                // Outcome is intentionally ignored: connect failures only
                // reschedule, they are never surfaced.
                let _ = link.connect();
            }
            return Vec::new();
        }

        self.retry_count = 0;
        link.sync()
    }

    /// Diagnostics-only counter, shown on the status page.
    pub fn total_retries(&self) -> u64 {
        self.total_retries
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeLink {
        connected: bool,
        connect_calls: u32,
        sync_calls: u32,
        remote_temp: Option<f32>,
        settings: HeatPumpSettings,
        status: HeatPumpStatus,
    }

    impl ProtocolLink for FakeLink {
        fn connect(&mut self) -> bool {
            self.connect_calls += 1;
            self.connected
        }

        fn sync(&mut self) -> Vec<LinkEvent> {
            self.sync_calls += 1;
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
            self.remote_temp = Some(celsius);
        }
    }

    #[test]
    fn backoff_interval_doubles_then_saturates() {
        let mut supervisor = LinkSupervisor::new(LinkConfig::default());
        let mut link = FakeLink::default();

        // First attempt happens immediately.
        supervisor.tick(0, &mut link);
        assert_eq!(link.connect_calls, 1);

        for n in 1..10u32 {
            assert_eq!(supervisor.retry_interval_ms(), 1_000u64 << n);
            let due_at = supervisor.last_attempt_ms.unwrap() + supervisor.retry_interval_ms();
            supervisor.tick(due_at, &mut link);
        }

        // Exponent is capped: the interval at 10 failures equals the
        // interval at 11 and beyond.
        supervisor.tick(u64::MAX / 2, &mut link);
        let at_cap = supervisor.retry_interval_ms();
        supervisor.tick(u64::MAX / 2 + at_cap, &mut link);
        assert_eq!(supervisor.retry_interval_ms(), at_cap);
        assert_eq!(at_cap, 1_000u64 << 10);
    }

    #[test]
    fn early_tick_does_not_attempt() {
        let mut supervisor = LinkSupervisor::new(LinkConfig::default());
        let mut link = FakeLink::default();

        supervisor.tick(0, &mut link);
        assert_eq!(link.connect_calls, 1);

        // interval after one failure is 2000ms
        supervisor.tick(1_999, &mut link);
        assert_eq!(link.connect_calls, 1);

        supervisor.tick(2_000, &mut link);
        assert_eq!(link.connect_calls, 2);
    }

    #[test]
    fn retry_count_resets_on_connect_and_total_does_not() {
        let mut supervisor = LinkSupervisor::new(LinkConfig::default());
        let mut link = FakeLink::default();

        supervisor.tick(0, &mut link);
        supervisor.tick(2_000, &mut link);
        supervisor.tick(10_000, &mut link);
        assert_eq!(supervisor.total_retries(), 3);
        assert!(supervisor.retry_count() > 0);

        link.connected = true;
        supervisor.tick(11_000, &mut link);
        assert_eq!(supervisor.retry_count(), 0);
        assert_eq!(link.sync_calls, 1);
        assert_eq!(supervisor.total_retries(), 3);

        // Connected ticks sync every time with no added delay.
        supervisor.tick(11_001, &mut link);
        supervisor.tick(11_002, &mut link);
        assert_eq!(link.sync_calls, 3);
    }
}
