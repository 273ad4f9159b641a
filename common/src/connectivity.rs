//! Network mode selection at boot plus the runtime network watchdog.
//!
//! The device is either joined to the operational network or serving its own
//! setup access point; it never runs both. Recovery from a lost network is a
//! full restart, which re-runs the boot-time mode decision.

use crate::config::{default_hostname, NetworkCredentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    SetupMode,
    ConnectingOperational,
    Operational,
    /// Watchdog fired; a restart has been requested and the device is on its
    /// way down.
    RecoveryPending,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::SetupMode => "setup",
            Self::ConnectingOperational => "connecting",
            Self::Operational => "operational",
            Self::RecoveryPending => "recovery pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    NetworkWatchdog,
    FirmwareUpdated,
    UserRequested,
    ConfigSaved,
    FactoryReset,
}

impl RestartReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkWatchdog => "network watchdog",
            Self::FirmwareUpdated => "firmware updated",
            Self::UserRequested => "user requested",
            Self::ConfigSaved => "configuration saved",
            Self::FactoryReset => "factory reset",
        }
    }
}

/// Seam to whatever actually reboots the platform. The request is
/// best-effort and may return before the restart happens.
pub trait Restarter {
    fn request_restart(&mut self, reason: RestartReason);
}

/// Seam to the platform network stack (Wi-Fi on hardware, simulated on the
/// host).
pub trait NetworkInterface {
    /// Join the operational network, blocking up to the timeout. False on
    /// timeout or rejection.
    fn connect_station(&mut self, credentials: &NetworkCredentials, timeout_ms: u64) -> bool;
    /// Serve a local access point. No passphrase means an open network.
    fn start_access_point(&mut self, ssid: &str, passphrase: Option<&str>) -> bool;
    fn station_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectivityConfig {
    pub connect_timeout_ms: u64,
    /// The device restarts after this long without station connectivity.
    pub watchdog_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            watchdog_interval_ms: 300_000,
        }
    }
}

#[derive(Debug)]
pub struct ConnectivityManager {
    config: ConnectivityConfig,
    state: ConnectionState,
    hostname: String,
    configured: bool,
    watchdog_deadline_ms: Option<u64>,
}

impl ConnectivityManager {
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Unconfigured,
            hostname: String::new(),
            configured: false,
            watchdog_deadline_ms: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Hostname decided at boot, advertised on both network modes.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Boot-time mode decision. With no stored ssid the device goes straight
    /// to an open setup access point and never attempts to join anything.
    /// With credentials it makes exactly one bounded join attempt and falls
    /// back to setup mode on failure.
    pub fn decide_mode(
        &mut self,
        now_ms: u64,
        credentials: &NetworkCredentials,
        session_password: &str,
        device_id: &str,
        network: &mut dyn NetworkInterface,
    ) -> ConnectionState {
        self.configured = credentials.is_configured();

        if !self.configured {
            self.hostname = default_hostname(device_id);
            let _ = network.start_access_point(&self.hostname, None);
            self.state = ConnectionState::SetupMode;
            return self.state;
        }

        self.hostname = if credentials.hostname.trim().is_empty() {
            default_hostname(device_id)
        } else {
            credentials.hostname.clone()
        };

        self.state = ConnectionState::ConnectingOperational;
        if network.connect_station(credentials, self.config.connect_timeout_ms) {
            self.state = ConnectionState::Operational;
            self.watchdog_deadline_ms = Some(now_ms + self.config.watchdog_interval_ms);
            return self.state;
        }

        // The stored hostname may identify the household; the fallback AP
        // advertises the generic name instead.
        self.hostname = default_hostname(device_id);
        let passphrase = if session_password.is_empty() {
            None
        } else {
            Some(session_password)
        };
        let _ = network.start_access_point(&self.hostname, passphrase);
        self.state = ConnectionState::SetupMode;
        self.state
    }

    /// Runtime watchdog. Connectivity pushes the deadline out; a configured
    /// device that stays disconnected past the deadline requests a restart.
    /// Setup mode is exempt so a device being provisioned never reboots
    /// under the user.
    pub fn tick(&mut self, now_ms: u64, network: &dyn NetworkInterface, restarter: &mut dyn Restarter) {
        if self.state == ConnectionState::SetupMode
            || self.state == ConnectionState::Unconfigured
            || self.state == ConnectionState::RecoveryPending
        {
            return;
        }

        if network.station_connected() {
            self.state = ConnectionState::Operational;
            self.watchdog_deadline_ms = Some(now_ms + self.config.watchdog_interval_ms);
            return;
        }

        if self.configured {
            if let Some(deadline) = self.watchdog_deadline_ms {
                if now_ms >= deadline {
                    self.state = ConnectionState::RecoveryPending;
                    restarter.request_restart(RestartReason::NetworkWatchdog);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeNetwork {
        station_up: bool,
        join_succeeds: bool,
        join_attempts: u32,
        ap_started: Option<(String, Option<String>)>,
    }

    impl NetworkInterface for FakeNetwork {
        fn connect_station(
            &mut self,
            _credentials: &NetworkCredentials,
            _timeout_ms: u64,
        ) -> bool {
            self.join_attempts += 1;
            self.station_up = self.join_succeeds;
            self.join_succeeds
        }

        fn start_access_point(&mut self, ssid: &str, passphrase: Option<&str>) -> bool {
            self.ap_started = Some((ssid.to_string(), passphrase.map(str::to_string)));
            true
        }

        fn station_connected(&self) -> bool {
            self.station_up
        }
    }

    #[derive(Default)]
    struct FakeRestarter {
        requests: Vec<RestartReason>,
    }

    impl Restarter for FakeRestarter {
        fn request_restart(&mut self, reason: RestartReason) {
            self.requests.push(reason);
        }
    }

    fn configured_creds() -> NetworkCredentials {
        NetworkCredentials {
            ssid: "home".to_string(),
            passphrase: "secret".to_string(),
            hostname: "HVAC_livingroom".to_string(),
            update_password: String::new(),
        }
    }

    #[test]
    fn blank_ssid_goes_to_open_setup_without_join_attempt() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork::default();

        let state = manager.decide_mode(
            0,
            &NetworkCredentials::default(),
            "",
            "a1b2c3",
            &mut network,
        );

        assert_eq!(state, ConnectionState::SetupMode);
        assert_eq!(network.join_attempts, 0);
        assert_eq!(
            network.ap_started,
            Some(("HVAC_a1b2c3".to_string(), None))
        );
        assert_eq!(manager.hostname(), "HVAC_a1b2c3");
    }

    #[test]
    fn unreachable_network_falls_back_after_single_attempt() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork::default();

        let state = manager.decide_mode(0, &configured_creds(), "hunter2", "a1b2c3", &mut network);

        assert_eq!(state, ConnectionState::SetupMode);
        assert_eq!(network.join_attempts, 1);
        // The fallback AP carries the generic name, not the stored hostname,
        // and is protected with the session password.
        assert_eq!(
            network.ap_started,
            Some(("HVAC_a1b2c3".to_string(), Some("hunter2".to_string())))
        );
    }

    #[test]
    fn successful_join_keeps_stored_hostname() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork {
            join_succeeds: true,
            ..FakeNetwork::default()
        };

        let state = manager.decide_mode(0, &configured_creds(), "", "a1b2c3", &mut network);

        assert_eq!(state, ConnectionState::Operational);
        assert_eq!(manager.hostname(), "HVAC_livingroom");
        assert!(network.ap_started.is_none());
    }

    #[test]
    fn watchdog_restarts_after_interval_without_connectivity() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork {
            join_succeeds: true,
            ..FakeNetwork::default()
        };
        let mut restarter = FakeRestarter::default();

        manager.decide_mode(0, &configured_creds(), "", "a1b2c3", &mut network);
        network.station_up = false;

        // Disconnected but still inside the window.
        manager.tick(299_999, &network, &mut restarter);
        assert!(restarter.requests.is_empty());

        manager.tick(300_000, &network, &mut restarter);
        assert_eq!(restarter.requests, vec![RestartReason::NetworkWatchdog]);
        assert_eq!(manager.state(), ConnectionState::RecoveryPending);

        // One restart request only; later ticks are no-ops.
        manager.tick(400_000, &network, &mut restarter);
        assert_eq!(restarter.requests.len(), 1);
    }

    #[test]
    fn reconnect_pushes_the_deadline_out() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork {
            join_succeeds: true,
            ..FakeNetwork::default()
        };
        let mut restarter = FakeRestarter::default();

        manager.decide_mode(0, &configured_creds(), "", "a1b2c3", &mut network);

        // Connected ticks keep refreshing the deadline.
        manager.tick(250_000, &network, &mut restarter);
        network.station_up = false;
        manager.tick(500_000, &network, &mut restarter);
        assert!(restarter.requests.is_empty());

        manager.tick(550_000, &network, &mut restarter);
        assert_eq!(restarter.requests, vec![RestartReason::NetworkWatchdog]);
    }

    #[test]
    fn setup_mode_never_restarts() {
        let mut manager = ConnectivityManager::new(ConnectivityConfig::default());
        let mut network = FakeNetwork::default();
        let mut restarter = FakeRestarter::default();

        manager.decide_mode(0, &NetworkCredentials::default(), "", "a1b2c3", &mut network);
        manager.tick(1_000_000, &network, &mut restarter);
        assert!(restarter.requests.is_empty());
    }
}
