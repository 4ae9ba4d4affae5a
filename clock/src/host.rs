use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use chrono_tz::{OffsetComponents, Tz};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use wifi_clock_common::{
    apply,
    config::{APPLY_URI, CONFIG_URI, HOME_URI},
    offset::HTTP_CODE_OK,
    pages, ApplyOutcome, ClockEngine, DigitSegments, OffsetError, Orientation, RuntimeConfig,
    SegmentDisplay, TimeApiClient, TimeApiResponse, TimeOffsetResolver,
};

const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<ClockEngine>>,
    store: AppStore,
}

/// Runtime config file plus the copy loaded at startup; saves edit the copy.
#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    runtime: Arc<Mutex<RuntimeConfig>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ApplyParams {
    orientation: Option<String>,
}

/// Simulated time API: answers with the current offsets of one IANA zone in
/// the same JSON shape the real endpoint returns.
struct ZoneTimeApi {
    timezone: Tz,
}

impl TimeApiClient for ZoneTimeApi {
    fn get(&mut self, url: &str, _timeout: Duration) -> Result<TimeApiResponse, OffsetError> {
        let now = Utc::now().with_timezone(&self.timezone);
        let offset = now.offset();
        let payload = serde_json::json!({
            "timezone": self.timezone.name(),
            "raw_offset": offset.base_utc_offset().num_seconds(),
            "dst_offset": offset.dst_offset().num_seconds(),
        });
        let body = serde_json::to_vec(&payload).map_err(|err| OffsetError::Parse(err.to_string()))?;

        debug!("simulated GET {url} answered for {}", self.timezone.name());
        Ok(TimeApiResponse {
            status: HTTP_CODE_OK,
            body,
        })
    }
}

#[derive(Default)]
struct ConsoleDisplay {
    last_frame: Option<DigitSegments>,
}

impl SegmentDisplay for ConsoleDisplay {
    fn set_brightness(&mut self, level: u8) {
        info!("display brightness set to {level}");
    }

    fn write_segments(&mut self, segments: &DigitSegments) {
        if self.last_frame.as_ref() == Some(segments) {
            return;
        }
        info!("display frame: {segments:02x?}");
        self.last_frame = Some(*segments);
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::open().await;
    let runtime = store.runtime().await;

    let timezone = simulated_timezone();
    info!("simulating time API for timezone {}", timezone.name());

    let resolver = TimeOffsetResolver::from_config(ZoneTimeApi { timezone }, &runtime.clock);
    let engine = ClockEngine::new(runtime.clock.clone(), runtime.orientation);

    let (engine, resolver) = tokio::task::spawn_blocking(move || boot_engine(engine, resolver))
        .await
        .context("offset boot task panicked")?;

    let mut display = ConsoleDisplay::default();
    display.set_brightness(runtime.display.brightness);

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        store,
    };

    spawn_control_loop(
        app_state.clone(),
        resolver,
        display,
        Duration::from_millis(runtime.clock.loop_period_ms),
    );

    let app = Router::new()
        .route("/", get(handle_home))
        .route(HOME_URI, get(handle_home))
        .route(CONFIG_URI, get(handle_config))
        .route(APPLY_URI, get(handle_apply))
        .route("/api/status", get(handle_get_status))
        .with_state(app_state);

    let port = std::env::var("CLOCK_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind clock server at {addr}"))?;

    info!("clock listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn simulated_timezone() -> Tz {
    match std::env::var("CLOCK_TIMEZONE") {
        Ok(value) => value.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                "unknown CLOCK_TIMEZONE `{value}`, using {}",
                DEFAULT_TIMEZONE.name()
            );
            DEFAULT_TIMEZONE
        }),
        Err(_) => DEFAULT_TIMEZONE,
    }
}

fn boot_engine(
    mut engine: ClockEngine,
    mut resolver: TimeOffsetResolver<ZoneTimeApi>,
) -> (ClockEngine, TimeOffsetResolver<ZoneTimeApi>) {
    info!("resolving UTC offset via {}", resolver.url());
    let attempts = engine.boot(&mut resolver, |attempt, err, delay| {
        warn!(
            "offset lookup attempt {attempt} failed: {err}; retrying in {}ms",
            delay.as_millis()
        );
        std::thread::sleep(delay);
    });
    info!(
        "UTC offset {} applied after {attempts} attempt(s)",
        engine.offset().unwrap_or_default()
    );
    (engine, resolver)
}

fn spawn_control_loop(
    app_state: AppState,
    mut resolver: TimeOffsetResolver<ZoneTimeApi>,
    mut display: ConsoleDisplay,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            let outcome = {
                let mut engine = app_state.engine.lock().await;
                engine.tick(Utc::now(), &mut resolver)
            };

            let Some(outcome) = outcome else {
                warn!("no UTC offset available; display not updated");
                continue;
            };

            match &outcome.refresh {
                Some(Ok(offset)) => info!("hourly offset refresh applied: {offset}"),
                Some(Err(err)) => warn!("hourly offset refresh failed: {err}"),
                None => {}
            }

            display.write_segments(&outcome.segments);
            debug!("tick {}", outcome.time.format_hms());
        }
    });
}

async fn handle_home(State(state): State<AppState>) -> impl IntoResponse {
    let (time, orientation, refresh_secs) = {
        let engine = state.engine.lock().await;
        (
            engine.local_time(Utc::now()).map(|time| time.format_hms()),
            engine.orientation(),
            engine.config.page_refresh_secs,
        )
    };

    Html(pages::home_page(time.as_deref(), orientation, refresh_secs))
}

async fn handle_config(State(state): State<AppState>) -> impl IntoResponse {
    let orientation = state.engine.lock().await.orientation();
    Html(pages::config_page(orientation))
}

async fn handle_apply(
    State(state): State<AppState>,
    Query(params): Query<ApplyParams>,
) -> axum::response::Response {
    let outcome = match apply::requested_orientation(params.orientation.as_deref()) {
        Ok(orientation) => {
            let persisted = state.store.save_orientation(orientation).await;
            if let Err(err) = &persisted {
                warn!("failed to persist orientation update: {err:#}");
            }
            apply::commit(&mut *state.engine.lock().await, orientation, &persisted)
        }
        Err(outcome) => outcome,
    };

    if let ApplyOutcome::Applied {
        orientation,
        changed: true,
    } = outcome
    {
        info!("display orientation set to {}", orientation.as_str());
    }

    match (outcome.location(), outcome.error_message()) {
        (Some(location), _) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        (None, message) => error_response(
            StatusCode::from_u16(outcome.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message.unwrap_or_default(),
        ),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.lock().await.status(Utc::now());
    Json(status)
}

impl AppStore {
    async fn open() -> Self {
        let data_dir = std::env::var("CLOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.wifi-clock"));
        let runtime_path = data_dir.join("runtime.json");

        let mut runtime = read_runtime_config(&runtime_path).await.unwrap_or_else(|err| {
            warn!(
                "failed to load runtime config from {}: {err:#}",
                runtime_path.display()
            );
            RuntimeConfig::default()
        });
        runtime.sanitize();

        Self {
            runtime_path: Arc::new(runtime_path),
            runtime: Arc::new(Mutex::new(runtime)),
        }
    }

    async fn runtime(&self) -> RuntimeConfig {
        self.runtime.lock().await.clone()
    }

    async fn save_orientation(&self, orientation: Orientation) -> anyhow::Result<()> {
        let mut current = self.runtime.lock().await;
        let mut updated = current.clone();
        updated.orientation = orientation;

        let path = self.runtime_path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(&updated)?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        *current = updated;
        Ok(())
    }
}

async fn read_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
