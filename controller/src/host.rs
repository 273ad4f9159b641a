use std::{
    collections::{HashMap, VecDeque},
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use heatpump_common::{
    config::{CollectorConfig, DebugFlags, NetworkCredentials, UnitConfig},
    connectivity::{
        ConnectionState, ConnectivityConfig, ConnectivityManager, RestartReason, Restarter,
    },
    link::{LinkConfig, LinkEvent, LinkSupervisor, ProtocolLink},
    metrics,
    publisher::{PublishConfig, StatePublisher},
    session::{AccessDecision, LoginOutcome, SessionGate},
    temps::{celsius_to_local, local_to_celsius},
    types::{FanSpeed, Mode, OutboundDocument, Power, TemperatureUnit, Vane, WideVane},
    upload::{UploadError, UploadStateMachine},
};

use crate::collector::Collector;
use crate::sim::{FileFirmwareTarget, HostNetwork, HostRestarter, SimulatedHeatPump};

const VERSION: &str = "2024.0.0";
const LOG_RING_CAPACITY: usize = 200;

/// Everything mutable, behind one lock. The tick loop and the web handlers
/// are the only two mutating paths, both with short critical sections; the
/// collector POST always happens after the lock is released.
struct Core {
    credentials: NetworkCredentials,
    unit: UnitConfig,
    collector: CollectorConfig,
    debug: DebugFlags,
    connectivity: ConnectivityManager,
    supervisor: LinkSupervisor,
    publisher: StatePublisher,
    session: SessionGate,
    upload: UploadStateMachine,
    upload_target: FileFirmwareTarget,
    link: SimulatedHeatPump,
    network: HostNetwork,
    restarter: HostRestarter,
    logs: LogRing,
}

#[derive(Clone)]
struct AppState {
    core: Arc<Mutex<Core>>,
    store: JsonStore,
    collector: Collector,
}

#[derive(Clone)]
struct JsonStore {
    data_dir: Arc<PathBuf>,
    wifi_path: Arc<PathBuf>,
    unit_path: Arc<PathBuf>,
    server_path: Arc<PathBuf>,
    others_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

struct LogRing {
    entries: VecDeque<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct RootView {
    hostname: String,
    version: &'static str,
    #[serde(rename = "showControl")]
    show_control: bool,
    #[serde(rename = "showLogout")]
    show_logout: bool,
}

#[derive(Debug, Serialize)]
struct ControlView {
    power: &'static str,
    mode: &'static str,
    fan: &'static str,
    vane: &'static str,
    #[serde(rename = "wideVane")]
    wide_vane: &'static str,
    temperature: f32,
    #[serde(rename = "roomTemperature")]
    room_temperature: f32,
    #[serde(rename = "temperatureScale")]
    temperature_scale: &'static str,
    #[serde(rename = "minTemp")]
    min_temp: f32,
    #[serde(rename = "maxTemp")]
    max_temp: f32,
    #[serde(rename = "tempStep")]
    temp_step: f32,
    #[serde(rename = "supportHeatMode")]
    support_heat_mode: bool,
}

#[derive(Debug, Deserialize)]
struct ControlUpdate {
    #[serde(default)]
    power: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fan: Option<String>,
    #[serde(default)]
    vane: Option<String>,
    #[serde(rename = "wideVane", default)]
    wide_vane: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WifiView {
    ssid: String,
    hostname: String,
    #[serde(rename = "passphraseSet")]
    passphrase_set: bool,
    #[serde(rename = "updatePasswordSet")]
    update_password_set: bool,
}

#[derive(Debug, Deserialize)]
struct WifiUpdate {
    ssid: String,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default)]
    hostname: String,
    #[serde(rename = "updatePassword", default)]
    update_password: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnitView {
    #[serde(rename = "temperatureUnit")]
    temperature_unit: TemperatureUnit,
    #[serde(rename = "minTemp")]
    min_temp: f32,
    #[serde(rename = "maxTemp")]
    max_temp: f32,
    #[serde(rename = "tempStep")]
    temp_step: f32,
    #[serde(rename = "supportHeatMode")]
    support_heat_mode: bool,
    #[serde(rename = "sessionPasswordSet")]
    session_password_set: bool,
}

#[derive(Debug, Deserialize)]
struct UnitUpdate {
    #[serde(rename = "temperatureUnit")]
    temperature_unit: TemperatureUnit,
    #[serde(rename = "minTemp")]
    min_temp: f32,
    #[serde(rename = "maxTemp")]
    max_temp: f32,
    #[serde(rename = "tempStep")]
    temp_step: f32,
    #[serde(rename = "supportHeatMode")]
    support_heat_mode: bool,
    #[serde(rename = "sessionPassword", default)]
    session_password: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    hostname: String,
    version: &'static str,
    #[serde(rename = "connectionState")]
    connection_state: &'static str,
    #[serde(rename = "heatpumpConnected")]
    heatpump_connected: bool,
    #[serde(rename = "heatpumpRetries")]
    heatpump_retries: u64,
    #[serde(rename = "uptimeMs")]
    uptime_ms: u64,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    user: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct UploadResult {
    success: bool,
    code: u8,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonCommand {
    #[serde(default)]
    pass: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    power: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fan: Option<String>,
    #[serde(default)]
    vane: Option<String>,
    #[serde(rename = "widevane", default)]
    wide_vane: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(rename = "remoteTemp", default)]
    remote_temp: Option<f32>,
}

#[derive(Debug, Serialize)]
struct RestartResponse {
    #[serde(rename = "restartRequired")]
    restart_required: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = JsonStore::new();
    let credentials = store.load_credentials().await.unwrap_or_else(|err| {
        warn!("failed to load network credentials: {err:#}");
        NetworkCredentials::default()
    });
    let mut unit = store.load_unit().await.unwrap_or_else(|err| {
        warn!("failed to load unit config: {err:#}");
        UnitConfig::default()
    });
    unit.sanitize();
    let mut collector_config = store.load_collector().await.unwrap_or_else(|err| {
        warn!("failed to load collector config: {err:#}");
        CollectorConfig::default()
    });
    collector_config.sanitize();
    let debug = store.load_debug().await.unwrap_or_else(|err| {
        warn!("failed to load debug flags: {err:#}");
        DebugFlags::default()
    });

    let device_id = std::env::var("HEATPUMP_DEVICE_ID").unwrap_or_else(|_| "000001".to_string());

    let mut network = HostNetwork::new();
    let mut connectivity = ConnectivityManager::new(ConnectivityConfig::default());
    let mode = connectivity.decide_mode(
        monotonic_ms(),
        &credentials,
        &unit.session_password,
        &device_id,
        &mut network,
    );
    info!(
        "hostname {} starting in {} mode",
        connectivity.hostname(),
        mode.as_str()
    );

    let session = SessionGate::new(unit.session_password.clone());
    let core = Core {
        credentials,
        unit,
        collector: collector_config,
        debug,
        connectivity,
        supervisor: LinkSupervisor::new(LinkConfig::default()),
        publisher: StatePublisher::new(PublishConfig::default()),
        session,
        upload: UploadStateMachine::new(),
        upload_target: FileFirmwareTarget::new(store.firmware_path()),
        link: SimulatedHeatPump::new(),
        network,
        restarter: HostRestarter::new(),
        logs: LogRing::new(),
    };

    let app_state = AppState {
        core: Arc::new(Mutex::new(core)),
        store,
        collector: Collector::new()?,
    };

    let setup_mode = mode == ConnectionState::SetupMode;
    if !setup_mode {
        spawn_tick_loop(app_state.clone());
    }

    let app = if setup_mode {
        setup_router()
    } else {
        operational_router()
    }
    .with_state(app_state);

    let port = std::env::var("HEATPUMP_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web surface at {addr}"))?;

    info!("web surface listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn operational_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_root).post(handle_post_root))
        .route("/control", get(handle_get_control).post(handle_post_control))
        .route("/wifi", get(handle_get_wifi).post(handle_post_wifi))
        .route("/unit", get(handle_get_unit).post(handle_post_unit))
        .route("/others", get(handle_get_others).post(handle_post_others))
        .route("/server", get(handle_get_server).post(handle_post_server))
        .route("/status", get(handle_get_status))
        .route("/metrics", get(handle_get_metrics))
        .route("/logs", get(handle_get_logs))
        .route("/login", get(handle_get_login).post(handle_post_login))
        .route("/logout", post(handle_post_logout))
        .route("/upgrade", get(handle_get_upgrade))
        .route("/upload", post(handle_post_upload))
        .route("/json", post(handle_post_json))
        .route("/setup/reset", post(handle_post_factory_reset))
}

/// Minimal captive surface served while on the setup access point. Every
/// unknown path lands back on the setup record.
fn setup_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_setup_root))
        .route("/save", post(handle_setup_save))
        .route("/reboot", post(handle_setup_reboot))
        .fallback(handle_setup_fallback)
}

fn spawn_tick_loop(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let (documents, url) = {
                let mut guard = state.core.lock().await;
                let core = &mut *guard;

                core.connectivity
                    .tick(now_ms, &core.network, &mut core.restarter);
                if core.connectivity.state() != ConnectionState::Operational {
                    continue;
                }

                let events = core.supervisor.tick(now_ms, &mut core.link);
                let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
                let mut documents = Vec::new();
                for event in events {
                    match event {
                        LinkEvent::SettingsChanged => {
                            let settings = core.link.settings();
                            if let Some(doc) =
                                core.publisher
                                    .on_settings_changed(now_ms, &settings, use_fahrenheit)
                            {
                                documents.push(doc);
                            }
                        }
                        LinkEvent::StatusChanged => {
                            let status = core.link.status();
                            if let Some(doc) = core.publisher.on_status_changed(
                                now_ms,
                                &status,
                                &mut core.link,
                                use_fahrenheit,
                            ) {
                                documents.push(doc);
                            }
                        }
                        LinkEvent::PacketTrace { direction, bytes } => {
                            if core.debug.packet_trace {
                                documents.push(core.publisher.packet_trace(&direction, &bytes));
                            }
                        }
                    }
                }
                (documents, core.collector.url.clone())
            };

            for document in documents {
                state.collector.publish(&url, &document).await;
            }
        }
    });
}

/// Gate shared by every handler that shows or changes device state. Denial
/// has zero side effects.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let core = state.core.lock().await;
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    match core.session.require_authenticated(cookie) {
        AccessDecision::Allowed => Ok(()),
        AccessDecision::RedirectToLogin => Err(Redirect::to("/login").into_response()),
    }
}

async fn handle_root(State(state): State<AppState>) -> Response {
    let core = state.core.lock().await;
    Json(RootView {
        hostname: core.connectivity.hostname().to_string(),
        version: VERSION,
        show_control: core.link.is_connected(),
        show_logout: core.session.password_configured(),
    })
    .into_response()
}

async fn handle_post_root(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    if !params.contains_key("reboot") {
        return error_response(StatusCode::BAD_REQUEST, "Unknown action");
    }

    let mut core = state.core.lock().await;
    core.logs.push(monotonic_ms(), "reboot requested from menu");
    core.restarter.request_restart(RestartReason::UserRequested);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_get_control(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    control_view(&state).await
}

async fn control_view(state: &AppState) -> Response {
    let core = state.core.lock().await;
    // With the link down there is nothing live to control.
    if !core.link.is_connected() {
        return Redirect::to("/status").into_response();
    }

    let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
    let settings = core.link.settings();
    let status = core.link.status();
    Json(ControlView {
        power: settings.power.as_str(),
        mode: settings.mode.as_str(),
        fan: settings.fan.as_str(),
        vane: settings.vane.as_str(),
        wide_vane: settings.wide_vane.as_str(),
        temperature: celsius_to_local(settings.temperature_c, use_fahrenheit),
        room_temperature: celsius_to_local(status.room_temperature_c, use_fahrenheit),
        temperature_scale: core.unit.temperature_unit.scale_str(),
        min_temp: celsius_to_local(core.unit.min_temp, use_fahrenheit),
        max_temp: celsius_to_local(core.unit.max_temp, use_fahrenheit),
        temp_step: core.unit.temp_step,
        support_heat_mode: core.unit.support_heat_mode,
    })
    .into_response()
}

async fn handle_post_control(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ControlUpdate>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    let now_ms = monotonic_ms();
    let (document, url) = {
        let mut guard = state.core.lock().await;
        let core = &mut *guard;
        if !core.link.is_connected() {
            return Redirect::to("/status").into_response();
        }

        if let Some(err) = apply_setting_updates(
            core,
            update.power.as_deref(),
            update.mode.as_deref(),
            update.fan.as_deref(),
            update.vane.as_deref(),
            update.wide_vane.as_deref(),
            update.temperature,
        ) {
            return err;
        }

        core.publisher.note_local_command(now_ms);
        core.logs.push(now_ms, "settings changed from control");
        let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
        let settings = core.link.settings();
        (
            core.publisher
                .on_settings_changed(now_ms, &settings, use_fahrenheit),
            core.collector.url.clone(),
        )
    };

    if let Some(document) = document {
        publish_in_background(&state, url, document);
    }
    control_view(&state).await
}

/// Shared by /control and /json. Any unrecognized value rejects the whole
/// request before touching the link.
fn apply_setting_updates(
    core: &mut Core,
    power: Option<&str>,
    mode: Option<&str>,
    fan: Option<&str>,
    vane: Option<&str>,
    wide_vane: Option<&str>,
    temperature: Option<f32>,
) -> Option<Response> {
    let parsed_power = match power {
        Some(value) => match Power::parse(value) {
            Some(parsed) => Some(parsed),
            None => return Some(error_response(StatusCode::BAD_REQUEST, "Invalid power value")),
        },
        None => None,
    };
    let parsed_mode = match mode {
        Some(value) => match Mode::parse(value) {
            Some(parsed) => Some(parsed),
            None => return Some(error_response(StatusCode::BAD_REQUEST, "Invalid mode value")),
        },
        None => None,
    };
    let parsed_fan = match fan {
        Some(value) => match FanSpeed::parse(value) {
            Some(parsed) => Some(parsed),
            None => return Some(error_response(StatusCode::BAD_REQUEST, "Invalid fan value")),
        },
        None => None,
    };
    let parsed_vane = match vane {
        Some(value) => match Vane::parse(value) {
            Some(parsed) => Some(parsed),
            None => return Some(error_response(StatusCode::BAD_REQUEST, "Invalid vane value")),
        },
        None => None,
    };
    let parsed_wide_vane = match wide_vane {
        Some(value) => match WideVane::parse(value) {
            Some(parsed) => Some(parsed),
            None => {
                return Some(error_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid wideVane value",
                ))
            }
        },
        None => None,
    };
    if parsed_mode == Some(Mode::Heat) && !core.unit.support_heat_mode {
        return Some(error_response(
            StatusCode::BAD_REQUEST,
            "Heat mode is disabled for this unit",
        ));
    }

    if let Some(power) = parsed_power {
        core.link.set_power(power);
    }
    if let Some(mode) = parsed_mode {
        core.link.set_mode(mode);
    }
    if let Some(fan) = parsed_fan {
        core.link.set_fan(fan);
    }
    if let Some(vane) = parsed_vane {
        core.link.set_vane(vane);
    }
    if let Some(wide_vane) = parsed_wide_vane {
        core.link.set_wide_vane(wide_vane);
    }
    if let Some(local) = temperature {
        if !local.is_finite() {
            return Some(error_response(
                StatusCode::BAD_REQUEST,
                "Invalid temperature value",
            ));
        }
        let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
        let celsius = local_to_celsius(local, use_fahrenheit)
            .clamp(core.unit.min_temp, core.unit.max_temp);
        core.link.set_temperature_c(celsius);
    }
    None
}

async fn handle_get_wifi(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    Json(WifiView {
        ssid: core.credentials.ssid.clone(),
        hostname: core.credentials.hostname.clone(),
        passphrase_set: !core.credentials.passphrase.is_empty(),
        update_password_set: !core.credentials.update_password.is_empty(),
    })
    .into_response()
}

async fn handle_post_wifi(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<WifiUpdate>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    let mut core = state.core.lock().await;
    let previous = core.credentials.clone();
    core.credentials = NetworkCredentials {
        ssid: update.ssid,
        passphrase: update.passphrase.unwrap_or(previous.passphrase),
        hostname: update.hostname,
        update_password: update.update_password.unwrap_or(previous.update_password),
    };

    if let Err(err) = state.store.save_credentials(&core.credentials).await {
        warn!("failed to persist network credentials: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist network settings",
        );
    }

    core.logs.push(monotonic_ms(), "network credentials saved");
    core.restarter.request_restart(RestartReason::ConfigSaved);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_get_unit(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
    Json(UnitView {
        temperature_unit: core.unit.temperature_unit,
        min_temp: celsius_to_local(core.unit.min_temp, use_fahrenheit),
        max_temp: celsius_to_local(core.unit.max_temp, use_fahrenheit),
        temp_step: core.unit.temp_step,
        support_heat_mode: core.unit.support_heat_mode,
        session_password_set: !core.unit.session_password.is_empty(),
    })
    .into_response()
}

async fn handle_post_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<UnitUpdate>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    let mut core = state.core.lock().await;
    let use_fahrenheit = update.temperature_unit.is_fahrenheit();
    let previous_password = core.unit.session_password.clone();
    core.unit = UnitConfig {
        temperature_unit: update.temperature_unit,
        min_temp: local_to_celsius(update.min_temp, use_fahrenheit),
        max_temp: local_to_celsius(update.max_temp, use_fahrenheit),
        temp_step: update.temp_step,
        support_heat_mode: update.support_heat_mode,
        session_password: update.session_password.unwrap_or(previous_password),
    };
    core.unit.sanitize();

    if let Err(err) = state.store.save_unit(&core.unit).await {
        warn!("failed to persist unit config: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist unit settings",
        );
    }

    core.logs.push(monotonic_ms(), "unit config saved");
    core.restarter.request_restart(RestartReason::ConfigSaved);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_get_others(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    Json(core.debug).into_response()
}

async fn handle_post_others(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<DebugFlags>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    let mut core = state.core.lock().await;
    core.debug = update;
    if let Err(err) = state.store.save_debug(&core.debug).await {
        warn!("failed to persist debug flags: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist debug settings",
        );
    }

    core.logs.push(monotonic_ms(), "debug flags saved");
    core.restarter.request_restart(RestartReason::ConfigSaved);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_get_server(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    Json(core.collector.clone()).into_response()
}

async fn handle_post_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut update): Json<CollectorConfig>,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    update.sanitize();
    let mut core = state.core.lock().await;
    core.collector = update;
    if let Err(err) = state.store.save_collector(&core.collector).await {
        warn!("failed to persist collector config: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist server settings",
        );
    }

    core.logs.push(monotonic_ms(), "collector endpoint saved");
    core.restarter.request_restart(RestartReason::ConfigSaved);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

/// Diagnostics from last-known state only; never waits on a retry in flight.
async fn handle_get_status(State(state): State<AppState>) -> Response {
    let core = state.core.lock().await;
    Json(StatusView {
        hostname: core.connectivity.hostname().to_string(),
        version: VERSION,
        connection_state: core.connectivity.state().as_str(),
        heatpump_connected: core.link.is_connected(),
        heatpump_retries: core.supervisor.total_retries(),
        uptime_ms: monotonic_ms(),
    })
    .into_response()
}

async fn handle_get_metrics(State(state): State<AppState>) -> Response {
    let core = state.core.lock().await;
    let body = metrics::render(
        core.connectivity.hostname(),
        VERSION,
        &core.link.settings(),
        &core.link.status(),
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

async fn handle_get_logs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    ([(header::CONTENT_TYPE, "text/plain")], core.logs.render()).into_response()
}

async fn handle_get_login(State(state): State<AppState>) -> Response {
    let core = state.core.lock().await;
    Json(serde_json::json!({
        "loginEnabled": core.session.password_configured(),
    }))
    .into_response()
}

async fn handle_post_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let mut core = state.core.lock().await;
    match core.session.login(&request.user, &request.password) {
        LoginOutcome::Granted { set_cookie } => {
            core.logs.push(monotonic_ms(), "login granted");
            let mut response = Json(serde_json::json!({"result": "ok"})).into_response();
            response
                .headers_mut()
                .insert(header::SET_COOKIE, HeaderValue::from_static(set_cookie));
            response
        }
        LoginOutcome::Rejected { message } => {
            core.logs.push(monotonic_ms(), "login rejected");
            error_response(StatusCode::UNAUTHORIZED, message)
        }
    }
}

async fn handle_post_logout(State(state): State<AppState>) -> Response {
    let mut core = state.core.lock().await;
    let cleared = core.session.logout();
    let mut response = Redirect::to("/login").into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, HeaderValue::from_static(cleared));
    response
}

async fn handle_get_upgrade(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }
    let core = state.core.lock().await;
    Json(serde_json::json!({
        "hostname": core.connectivity.hostname(),
        "version": VERSION,
    }))
    .into_response()
}

async fn handle_post_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    // The lock is held for the whole upload; nothing else should drive the
    // device while its firmware is being replaced.
    let mut guard = state.core.lock().await;
    let core = &mut *guard;
    let now_ms = monotonic_ms();

    let mut saw_file = false;
    let mut outcome: Result<(), UploadError> = Ok(());

    'fields: loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!("upload stream error: {err}");
                outcome = Err(core.upload.abort(&mut core.upload_target));
                break;
            }
        };
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        saw_file = true;

        if let Err(err) = core.upload.start(&filename, &mut core.upload_target) {
            outcome = Err(err);
            break;
        }

        let mut field = field;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    let mut buf = chunk.to_vec();
                    if let Err(err) = core.upload.chunk(&mut buf, &mut core.upload_target) {
                        outcome = Err(err);
                        break 'fields;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("upload stream error: {err}");
                    outcome = Err(core.upload.abort(&mut core.upload_target));
                    break 'fields;
                }
            }
        }

        if let Err(err) = core.upload.end(&mut core.upload_target) {
            outcome = Err(err);
        }
        break;
    }

    if !saw_file && outcome.is_ok() {
        outcome = core.upload.start("", &mut core.upload_target);
    }

    match outcome {
        Ok(()) => {
            core.logs.push(
                now_ms,
                format!(
                    "firmware upload complete ({} bytes)",
                    core.upload.bytes_written()
                ),
            );
            core.restarter.request_restart(RestartReason::FirmwareUpdated);
            Json(UploadResult {
                success: true,
                code: 0,
                message: "Upload successful, restarting".to_string(),
            })
            .into_response()
        }
        Err(err) => {
            core.logs.push(now_ms, format!("firmware upload failed: {err}"));
            Json(UploadResult {
                success: false,
                code: err.code(),
                message: err.to_string(),
            })
            .into_response()
        }
    }
}

/// Machine-facing command endpoint. Authenticates by password in the body
/// rather than the session cookie.
async fn handle_post_json(
    State(state): State<AppState>,
    Json(command): Json<JsonCommand>,
) -> Response {
    let now_ms = monotonic_ms();
    let (document, url) = {
        let mut guard = state.core.lock().await;
        let core = &mut *guard;

        if !core.unit.session_password.is_empty()
            && command.pass.as_deref() != Some(core.unit.session_password.as_str())
        {
            return Json(serde_json::json!({"return": "Bad password"})).into_response();
        }

        let has_setters = command.power.is_some()
            || command.mode.is_some()
            || command.fan.is_some()
            || command.vane.is_some()
            || command.wide_vane.is_some()
            || command.temperature.is_some();

        if let Some(err) = apply_setting_updates(
            core,
            command.power.as_deref(),
            command.mode.as_deref(),
            command.fan.as_deref(),
            command.vane.as_deref(),
            command.wide_vane.as_deref(),
            command.temperature,
        ) {
            return err;
        }

        let use_fahrenheit = core.unit.temperature_unit.is_fahrenheit();
        if let Some(local) = command.remote_temp {
            let celsius = if local == 0.0 {
                // Zero reverts the unit to its internal sensor.
                0.0
            } else {
                local_to_celsius(local, use_fahrenheit)
            };
            core.link.set_remote_temperature_c(celsius);
            if celsius > 0.0 {
                core.publisher.note_remote_override(now_ms);
            }
        }

        let mut document = None;
        if has_setters {
            core.publisher.note_local_command(now_ms);
            let settings = core.link.settings();
            document = core
                .publisher
                .on_settings_changed(now_ms, &settings, use_fahrenheit);
        } else if command.command.as_deref() == Some("update") {
            let settings = core.link.settings();
            document = core
                .publisher
                .on_settings_changed(now_ms, &settings, use_fahrenheit);
        }
        // "reboot" and other commands are acknowledged without effect.

        (document, core.collector.url.clone())
    };

    if let Some(document) = document {
        publish_in_background(&state, url, document);
    }
    Json(serde_json::json!({"return": "ok"})).into_response()
}

async fn handle_post_factory_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_session(&state, &headers).await {
        return denied;
    }

    if let Err(err) = state.store.wipe().await {
        warn!("failed to wipe config store: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to reset configuration",
        );
    }

    let mut core = state.core.lock().await;
    core.logs.push(monotonic_ms(), "factory reset");
    core.restarter.request_restart(RestartReason::FactoryReset);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_setup_root(State(state): State<AppState>) -> Response {
    let core = state.core.lock().await;
    Json(serde_json::json!({
        "hostname": core.connectivity.hostname(),
        "version": VERSION,
        "setupMode": true,
        "ssid": core.credentials.ssid,
    }))
    .into_response()
}

async fn handle_setup_save(
    State(state): State<AppState>,
    Json(update): Json<WifiUpdate>,
) -> Response {
    if update.ssid.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "ssid cannot be empty");
    }

    let mut core = state.core.lock().await;
    core.credentials = NetworkCredentials {
        ssid: update.ssid,
        passphrase: update.passphrase.unwrap_or_default(),
        hostname: update.hostname,
        update_password: update.update_password.unwrap_or_default(),
    };

    if let Err(err) = state.store.save_credentials(&core.credentials).await {
        warn!("failed to persist setup credentials: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist network settings",
        );
    }

    core.logs.push(monotonic_ms(), "setup complete");
    core.restarter.request_restart(RestartReason::ConfigSaved);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_setup_reboot(State(state): State<AppState>) -> Response {
    let mut core = state.core.lock().await;
    core.restarter.request_restart(RestartReason::UserRequested);
    Json(RestartResponse {
        restart_required: true,
    })
    .into_response()
}

async fn handle_setup_fallback() -> Response {
    Redirect::to("/").into_response()
}

fn publish_in_background(state: &AppState, url: String, document: OutboundDocument) {
    let collector = state.collector.clone();
    tokio::spawn(async move {
        collector.publish(&url, &document).await;
    });
}

impl JsonStore {
    fn new() -> Self {
        let data_dir = std::env::var("HEATPUMP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.heatpump"));

        Self {
            wifi_path: Arc::new(data_dir.join("wifi.json")),
            unit_path: Arc::new(data_dir.join("unit.json")),
            server_path: Arc::new(data_dir.join("server.json")),
            others_path: Arc::new(data_dir.join("others.json")),
            data_dir: Arc::new(data_dir),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn firmware_path(&self) -> PathBuf {
        self.data_dir.join("firmware.staged")
    }

    async fn load<T: DeserializeOwned + Default>(&self, path: &Path) -> anyhow::Result<T> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(serde_json::from_slice::<T>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save<T: Serialize>(&self, path: &Path, record: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn load_credentials(&self) -> anyhow::Result<NetworkCredentials> {
        self.load(self.wifi_path.as_ref()).await
    }

    async fn save_credentials(&self, credentials: &NetworkCredentials) -> anyhow::Result<()> {
        self.save(self.wifi_path.as_ref(), credentials).await
    }

    async fn load_unit(&self) -> anyhow::Result<UnitConfig> {
        self.load(self.unit_path.as_ref()).await
    }

    async fn save_unit(&self, unit: &UnitConfig) -> anyhow::Result<()> {
        self.save(self.unit_path.as_ref(), unit).await
    }

    async fn load_collector(&self) -> anyhow::Result<CollectorConfig> {
        self.load(self.server_path.as_ref()).await
    }

    async fn save_collector(&self, collector: &CollectorConfig) -> anyhow::Result<()> {
        self.save(self.server_path.as_ref(), collector).await
    }

    async fn load_debug(&self) -> anyhow::Result<DebugFlags> {
        self.load(self.others_path.as_ref()).await
    }

    async fn save_debug(&self, debug: &DebugFlags) -> anyhow::Result<()> {
        self.save(self.others_path.as_ref(), debug).await
    }

    async fn wipe(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        for path in [
            self.wifi_path.as_ref(),
            self.unit_path.as_ref(),
            self.server_path.as_ref(),
            self.others_path.as_ref(),
        ] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl LogRing {
    fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(LOG_RING_CAPACITY),
        }
    }

    fn push(&mut self, now_ms: u64, line: impl Into<String>) {
        if self.entries.len() == LOG_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(format!("[{now_ms:>10}] {}", line.into()));
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
