use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{
        Configuration as HttpConfiguration, EspHttpConnection as ServerConnection, EspHttpServer,
        Request,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use wifi_clock_common::{
    apply,
    config::{
        APPLY_URI, CONFIG_URI, HOME_URI, LOOP_WATCHDOG_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_MS,
        PORTAL_AP_PSK, PORTAL_AP_SSID,
    },
    form, pages, ApplyOutcome, ClockEngine, NetworkConfig, OffsetError, RuntimeConfig,
    SegmentDisplay, TimeApiClient, TimeApiResponse, TimeOffsetResolver,
};

use crate::tm1637::Tm1637;

const NVS_NAMESPACE: &str = "wifi_clock";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_READ_BUFFER: usize = 2048;
const MAX_FORM_BODY: usize = 512;
const MAX_TIME_API_BODY: usize = 4096;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY: Duration = Duration::from_secs(3);
const SNTP_SYNC_TIMEOUT: Duration = Duration::from_secs(20);
const SNTP_POLL_INTERVAL: Duration = Duration::from_millis(250);
// Anything earlier means SNTP has not set the system clock yet.
const MIN_VALID_EPOCH: i64 = 1_700_000_000;

const CONTENT_HTML: &str = "text/html; charset=utf-8";
const CONTENT_JSON: &str = "application/json; charset=utf-8";

const CAPTIVE_PORTAL_PATHS: [&str; 7] = [
    "/",
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

const _: () = assert!(MAX_HTTP_TIMEOUT_MS < LOOP_WATCHDOG_TIMEOUT_SECS as u64 * 1_000);

type SharedEngine = Arc<Mutex<ClockEngine>>;
type HttpRequest<'a, 'b> = Request<&'a mut ServerConnection<'b>>;

enum WifiStartup {
    Station(EspWifi<'static>),
    Portal(EspWifi<'static>),
}

/// NVS-backed runtime config. Saves edit the copy loaded at boot, so an
/// unreadable stored value is replaced instead of blocking later writes.
#[derive(Clone)]
struct DeviceStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    nvs: EspNvs<NvsDefault>,
    runtime: RuntimeConfig,
}

/// Time API transport over the ESP-IDF HTTP client; one session per request.
struct EspTimeApi;

impl TimeApiClient for EspTimeApi {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<TimeApiResponse, OffsetError> {
        let conf = HttpClientConfiguration {
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf).map_err(|err| {
            OffsetError::NetworkUnavailable(format!("unable to open HTTP session: {err}"))
        })?;
        let mut client = HttpClient::wrap(connection);

        let request = client
            .request(Method::Get, url, &[("Accept", "application/json")])
            .map_err(network_error)?;
        let mut response = request.submit().map_err(network_error)?;
        let status = response.status();

        let body = read_capped(&mut response, MAX_TIME_API_BODY)
            .map_err(|err| OffsetError::Parse(format!("{err:#}")))?;

        Ok(TimeApiResponse { status, body })
    }
}

fn network_error(err: impl core::fmt::Debug) -> OffsetError {
    OffsetError::NetworkUnavailable(format!("{err:?}"))
}

/// Task watchdog registration for the clock loop.
struct LoopWatchdog;

impl LoopWatchdog {
    fn register(timeout_secs: u32) -> anyhow::Result<Self> {
        let config = esp_idf_svc::sys::esp_task_wdt_config_t {
            timeout_ms: timeout_secs.saturating_mul(1000),
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // ESP_ERR_INVALID_STATE: already initialised by the bootloader config.
        esp_result(
            unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) },
            "esp_task_wdt_init",
        )?;
        esp_result(
            unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) },
            "esp_task_wdt_add",
        )?;
        Ok(Self)
    }

    fn feed(&self) {
        let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
    }
}

fn esp_result(rc: esp_idf_svc::sys::esp_err_t, call: &str) -> anyhow::Result<()> {
    match rc {
        esp_idf_svc::sys::ESP_OK | esp_idf_svc::sys::ESP_ERR_INVALID_STATE => Ok(()),
        rc => Err(anyhow!("{call} failed with code {rc}")),
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = DeviceStore::open(nvs_partition.clone())?;
    let runtime = store.runtime();

    info!(
        "NVS config loaded: ssid=`{}`, orientation={}, time_api=`{}`",
        runtime.network.wifi_ssid,
        runtime.orientation.as_str(),
        runtime.clock.time_api_url,
    );

    let Peripherals { modem, .. } = Peripherals::take()?;
    let mut display = Tm1637::new(&runtime.display).unwrap_or_else(|err| {
        warn!("failed to initialize display, running without it: {err:#}");
        Tm1637::disabled()
    });
    display.set_brightness(runtime.display.brightness);

    let wifi = match start_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?
    {
        WifiStartup::Station(wifi) => wifi,
        WifiStartup::Portal(wifi) => run_portal(wifi, store)?,
    };

    let sntp = start_sntp()?;

    let mut resolver = TimeOffsetResolver::from_config(EspTimeApi, &runtime.clock);
    let mut engine = ClockEngine::new(runtime.clock.clone(), runtime.orientation);

    info!("resolving UTC offset via {}", resolver.url());
    let attempts = engine.boot(&mut resolver, |attempt, err, delay| {
        log_offset_failure(Some(attempt), err);
        thread::sleep(delay);
    });
    info!(
        "UTC offset {} applied after {attempts} attempt(s)",
        engine.offset().unwrap_or_default()
    );

    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let server = create_http_server(engine.clone(), store)?;

    let watchdog = LoopWatchdog::register(LOOP_WATCHDOG_TIMEOUT_SECS)
        .map_err(|err| warn!("clock loop runs without watchdog: {err:#}"))
        .ok();

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;
    let _sntp = sntp;

    let period = Duration::from_millis(runtime.clock.loop_period_ms);
    let mut waiting_for_time = false;

    loop {
        if let Some(watchdog) = &watchdog {
            watchdog.feed();
        }
        let now = Utc::now();

        if !system_time_valid(now) {
            if !waiting_for_time {
                warn!("system time not set by SNTP yet; display paused");
                waiting_for_time = true;
            }
            thread::sleep(period);
            continue;
        }
        waiting_for_time = false;

        let outcome = lock_engine(&engine).tick(now, &mut resolver);

        if let Some(outcome) = outcome {
            match &outcome.refresh {
                Some(Ok(offset)) => info!("hourly offset refresh applied: {offset}"),
                Some(Err(err)) => log_offset_failure(None, err),
                None => {}
            }
            display.write_segments(&outcome.segments);
            debug!("tick {}", outcome.time.format_hms());
        }

        thread::sleep(period);
    }
}

/// Serves the setup portal until `POST /wifi` restarts the device.
fn run_portal(wifi: EspWifi<'static>, store: DeviceStore) -> anyhow::Result<EspWifi<'static>> {
    warn!("wifi station connection unavailable; config portal on `{PORTAL_AP_SSID}`");
    let _server = create_portal_server(store)?;
    let _wifi = wifi;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn log_offset_failure(boot_attempt: Option<u32>, err: &OffsetError) {
    let context = match boot_attempt {
        Some(attempt) => format!("boot attempt {attempt}"),
        None => "hourly refresh".to_string(),
    };

    match err {
        OffsetError::HttpStatus(code) => warn!("[HTTP] GET... code: {code} ({context})"),
        OffsetError::NetworkUnavailable(reason) => {
            warn!("[HTTP] unable to connect: {reason} ({context})")
        }
        OffsetError::Parse(reason) => warn!("time api payload rejected: {reason} ({context})"),
    }
}

fn start_sntp() -> anyhow::Result<EspSntp<'static>> {
    let sntp = EspSntp::new_default().context("failed to start SNTP")?;

    let mut waited = Duration::ZERO;
    while waited < SNTP_SYNC_TIMEOUT {
        if sntp.get_sync_status() == SyncStatus::Completed {
            info!("SNTP time synchronized after {}ms", waited.as_millis());
            return Ok(sntp);
        }
        thread::sleep(SNTP_POLL_INTERVAL);
        waited += SNTP_POLL_INTERVAL;
    }

    warn!(
        "SNTP sync not completed within {}s; display waits for valid time",
        SNTP_SYNC_TIMEOUT.as_secs()
    );
    Ok(sntp)
}

fn system_time_valid(now: DateTime<Utc>) -> bool {
    now.timestamp() >= MIN_VALID_EPOCH
}

fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, ClockEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_http_server(
    engine: SharedEngine,
    store: DeviceStore,
) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    })?;

    for path in ["/", HOME_URI] {
        let engine = engine.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            let now = Utc::now();
            let html = {
                let engine = lock_engine(&engine);
                let time = engine
                    .local_time(now)
                    .filter(|_| system_time_valid(now))
                    .map(|time| time.format_hms());
                pages::home_page(
                    time.as_deref(),
                    engine.orientation(),
                    engine.config.page_refresh_secs,
                )
            };
            respond(req, 200, CONTENT_HTML, html.as_bytes())
        })?;
    }

    {
        let engine = engine.clone();
        server.fn_handler::<anyhow::Error, _>(CONFIG_URI, Method::Get, move |req| {
            let html = pages::config_page(lock_engine(&engine).orientation());
            respond(req, 200, CONTENT_HTML, html.as_bytes())
        })?;
    }

    {
        let engine = engine.clone();
        server.fn_handler::<anyhow::Error, _>(APPLY_URI, Method::Get, move |req| {
            let value = form::query_value(req.uri(), "orientation");
            let outcome = match apply::requested_orientation(value.as_deref()) {
                Ok(orientation) => {
                    let persisted = store.update(|runtime| runtime.orientation = orientation);
                    if let Err(err) = &persisted {
                        warn!("failed to persist orientation update: {err:#}");
                    }
                    apply::commit(&mut lock_engine(&engine), orientation, &persisted)
                }
                Err(outcome) => outcome,
            };
            respond_apply(req, outcome)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
        let status = lock_engine(&engine).status(Utc::now());
        respond(req, 200, CONTENT_JSON, &serde_json::to_vec(&status)?)
    })?;

    Ok(server)
}

fn create_portal_server(store: DeviceStore) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    })?;

    for path in CAPTIVE_PORTAL_PATHS {
        let store = store.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            let html = pages::provisioning_page(&store.runtime().network.wifi_ssid);
            respond(req, 200, CONTENT_HTML, html.as_bytes())
        })?;
    }

    {
        let store = store.clone();
        server.fn_handler::<anyhow::Error, _>("/wifi", Method::Post, move |mut req| {
            let body = read_capped(&mut req, MAX_FORM_BODY)?;
            let body = String::from_utf8_lossy(&body);
            let ssid = form::form_value(&body, "ssid").unwrap_or_default();
            let pass = form::form_value(&body, "pass").unwrap_or_default();

            let network = match validate_network_update(ssid.trim(), &pass) {
                Ok(network) => network,
                Err(message) => return respond_error(req, 400, message),
            };

            store.update(|runtime| runtime.network = network)?;
            info!("wifi credentials stored; restarting");
            schedule_restart(Duration::from_secs(3));
            let html = pages::saved_page();
            respond(req, 200, CONTENT_HTML, html.as_bytes())
        })?;
    }

    {
        let store = store.clone();
        server.fn_handler::<anyhow::Error, _>(CONFIG_URI, Method::Get, move |req| {
            let html = pages::config_page(store.runtime().orientation);
            respond(req, 200, CONTENT_HTML, html.as_bytes())
        })?;
    }

    server.fn_handler::<anyhow::Error, _>(APPLY_URI, Method::Get, move |req| {
        let value = form::query_value(req.uri(), "orientation");
        let outcome = match apply::requested_orientation(value.as_deref()) {
            Ok(orientation) => {
                let previous = store.runtime().orientation;
                match store.update(|runtime| runtime.orientation = orientation) {
                    Ok(()) => ApplyOutcome::Applied {
                        orientation,
                        changed: previous != orientation,
                    },
                    Err(err) => {
                        warn!("failed to persist orientation update: {err:#}");
                        ApplyOutcome::PersistFailed
                    }
                }
            }
            Err(outcome) => outcome,
        };
        respond_apply(req, outcome)
    })?;

    Ok(server)
}

fn validate_network_update(ssid: &str, pass: &str) -> Result<NetworkConfig, &'static str> {
    if ssid.is_empty() {
        return Err("ssid cannot be empty");
    }
    if ssid.len() > 32 {
        return Err("ssid must be at most 32 bytes");
    }
    if !pass.is_empty() && !(8..=64).contains(&pass.len()) {
        return Err("password must be empty or 8-64 characters");
    }

    Ok(NetworkConfig {
        wifi_ssid: ssid.to_string(),
        wifi_pass: pass.to_string(),
    })
}

fn schedule_restart(delay: Duration) {
    let spawned = thread::Builder::new()
        .name("restart-request".into())
        .spawn(move || {
            thread::sleep(delay);
            unsafe { esp_idf_svc::sys::esp_restart() };
        });

    if let Err(err) = spawned {
        warn!("failed to spawn restart thread: {err}");
    }
}

/// Reads `reader` to the end, failing once more than `limit` bytes arrive.
fn read_capped<R>(reader: &mut R, limit: usize) -> anyhow::Result<Vec<u8>>
where
    R: Read,
    R::Error: core::fmt::Debug,
{
    let mut body = Vec::new();
    let mut chunk = [0_u8; 256];
    loop {
        let read = reader
            .read(&mut chunk)
            .map_err(|err| anyhow!("read failed: {err:?}"))?;
        if read == 0 {
            return Ok(body);
        }
        if body.len() + read > limit {
            return Err(anyhow!("body larger than {limit} bytes"));
        }
        body.extend_from_slice(&chunk[..read]);
    }
}

fn respond(
    req: HttpRequest<'_, '_>,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> anyhow::Result<()> {
    req.into_response(status, None, &[("Content-Type", content_type)])?
        .write_all(body)?;
    Ok(())
}

fn respond_error(req: HttpRequest<'_, '_>, status: u16, message: &str) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    respond(req, status, CONTENT_JSON, &body)
}

fn respond_apply(req: HttpRequest<'_, '_>, outcome: ApplyOutcome) -> anyhow::Result<()> {
    if let ApplyOutcome::Applied {
        orientation,
        changed: true,
    } = outcome
    {
        info!("display orientation set to {}", orientation.as_str());
    }

    match (outcome.location(), outcome.error_message()) {
        (Some(location), _) => {
            req.into_response(outcome.status_code(), None, &[("Location", location)])?;
            Ok(())
        }
        (None, message) => {
            respond_error(req, outcome.status_code(), message.unwrap_or_default())
        }
    }
}

fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<WifiStartup> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if network.wifi_ssid.trim().is_empty() {
        warn!("wifi credentials missing");
    } else {
        match join_station(&mut wifi, network) {
            Ok(()) => {
                drop(wifi);
                return Ok(WifiStartup::Station(esp_wifi));
            }
            Err(err) => {
                warn!("station join failed: {err:#}");
                let _ = wifi.stop();
            }
        }
    }

    open_portal_ap(&mut wifi)?;
    drop(wifi);
    Ok(WifiStartup::Portal(esp_wifi))
}

fn join_station(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    network: &NetworkConfig,
) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        },
        ..Default::default()
    }))?;
    wifi.start()?;

    let mut attempt = 1;
    loop {
        info!(
            "joining `{}` ({attempt}/{WIFI_CONNECT_ATTEMPTS})",
            network.wifi_ssid
        );
        let joined = wifi.connect().and_then(|()| wifi.wait_netif_up());
        match joined {
            Ok(()) => {
                info!("wifi connected to `{}`", network.wifi_ssid);
                return Ok(());
            }
            Err(err) if attempt >= WIFI_CONNECT_ATTEMPTS => {
                let _ = wifi.disconnect();
                return Err(anyhow!("gave up after {attempt} attempts: {err}"));
            }
            Err(err) => {
                warn!("wifi join attempt {attempt} failed: {err}");
                let _ = wifi.disconnect();
                thread::sleep(WIFI_RETRY_DELAY);
                attempt += 1;
            }
        }
    }
}

fn open_portal_ap(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: PORTAL_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("portal AP SSID too long"))?,
        password: PORTAL_AP_PSK
            .try_into()
            .map_err(|_| anyhow!("portal AP password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("config portal AP `{PORTAL_AP_SSID}` is up");
    Ok(())
}

impl DeviceStore {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .context("failed to open NVS namespace")?;

        let mut runtime = read_runtime_config(&nvs).unwrap_or_else(|err| {
            warn!("failed to load runtime config from NVS: {err:#}");
            RuntimeConfig::default()
        });
        runtime.sanitize();
        apply_build_time_wifi(&mut runtime.network);

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner { nvs, runtime })),
        })
    }

    fn runtime(&self) -> RuntimeConfig {
        self.lock().runtime.clone()
    }

    /// Applies `edit` to the loaded config and writes it; the loaded copy only
    /// changes once the write succeeded.
    fn update(&self, edit: impl FnOnce(&mut RuntimeConfig)) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let mut updated = inner.runtime.clone();
        edit(&mut updated);

        let payload = serde_json::to_string(&updated)?;
        inner
            .nvs
            .set_str(NVS_RUNTIME_KEY, &payload)
            .context("failed to write runtime config to NVS")?;
        inner.runtime = updated;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_runtime_config(nvs: &EspNvs<NvsDefault>) -> anyhow::Result<RuntimeConfig> {
    let mut buffer = vec![0_u8; NVS_READ_BUFFER];
    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn apply_build_time_wifi(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            network.wifi_ssid = ssid.to_string();
        }
    }
    if network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            network.wifi_pass = pass.to_string();
        }
    }
}
