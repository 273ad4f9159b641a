pub mod config;
pub mod connectivity;
pub mod link;
pub mod metrics;
pub mod publisher;
pub mod session;
pub mod temps;
pub mod types;
pub mod upload;

pub use config::{
    default_hostname, CollectorConfig, DebugFlags, NetworkCredentials, UnitConfig,
    DEFAULT_COLLECTOR_URL, HOSTNAME_PREFIX,
};
pub use connectivity::{
    ConnectionState, ConnectivityConfig, ConnectivityManager, NetworkInterface, RestartReason,
    Restarter,
};
pub use link::{LinkConfig, LinkEvent, LinkSupervisor, ProtocolLink};
pub use publisher::{PublishConfig, StatePublisher};
pub use session::{AccessDecision, LoginOutcome, SessionGate, SESSION_COOKIE_NAME, SESSION_USER};
pub use types::{
    FanSpeed, HeatPumpSettings, HeatPumpStatus, Mode, OutboundDocument, Power, TemperatureUnit,
    Vane, WideVane,
};
pub use upload::{FirmwareTarget, UploadError, UploadPhase, UploadStateMachine};
