//! In-memory stand-in for the healthchecks v3 API.
//!
//! Serves the check, ping and flip endpoints under `/api/v3` and accepts
//! pings on `/ping/{uuid}[/start|/fail]`. State lives in memory and is lost
//! when the router is dropped. `app_with_faults` makes the first `n` API
//! requests answer 503 so clients can exercise their retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Check {
    pub uuid: Uuid,
    pub name: String,
    pub slug: String,
    pub tags: String,
    pub desc: String,
    pub grace: u64,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    pub n_pings: u64,
    pub status: String,
    pub started: bool,
    pub last_ping: Option<DateTime<Utc>>,
    pub next_ping: Option<DateTime<Utc>>,
    pub manual_resume: bool,
    pub methods: String,
    pub channels: String,
    pub subject: String,
    pub subject_fail: String,
    pub start_kw: String,
    pub success_kw: String,
    pub failure_kw: String,
    pub filter_subject: bool,
    pub filter_body: bool,
    pub filter_http_body: bool,
    pub filter_default_fail: bool,
    pub badge_url: String,
    pub ping_url: String,
    pub update_url: String,
    pub pause_url: String,
    pub resume_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ping {
    #[serde(rename = "type")]
    pub kind: String,
    pub date: DateTime<Utc>,
    pub n: u64,
    pub scheme: String,
    pub remote_addr: String,
    pub method: String,
    pub ua: String,
    pub rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub body_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flip {
    pub timestamp: DateTime<Utc>,
    pub up: u8,
}

/// Fields accepted on create and update. `unique` only matters on create.
#[derive(Debug, Default, Deserialize)]
pub struct CheckInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub tags: Option<String>,
    pub desc: Option<String>,
    pub timeout: Option<u64>,
    pub grace: Option<u64>,
    pub schedule: Option<String>,
    pub tz: Option<String>,
    pub manual_resume: Option<bool>,
    pub methods: Option<String>,
    pub channels: Option<String>,
    #[serde(default)]
    pub unique: Vec<String>,
    pub start_kw: Option<String>,
    pub success_kw: Option<String>,
    pub failure_kw: Option<String>,
    pub filter_subject: Option<bool>,
    pub filter_body: Option<bool>,
    pub filter_http_body: Option<bool>,
    pub filter_default_fail: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListChecksQuery {
    pub slug: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlipsQuery {
    pub seconds: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

struct Record {
    check: Check,
    pings: Vec<Ping>,
    bodies: HashMap<u64, String>,
    flips: Vec<Flip>,
    last_start: Option<DateTime<Utc>>,
}

pub struct AppState {
    checks: RwLock<Vec<Record>>,
    public_url: String,
    faults: AtomicU32,
}

pub type Db = Arc<AppState>;

/// An `{"error": "..."}` response.
#[derive(Debug)]
pub struct ApiFailure(StatusCode, String);

impl ApiFailure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }

    fn not_found() -> Self {
        Self(StatusCode::NOT_FOUND, "not found".to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

const MIN_PERIOD: u64 = 60;
const MAX_PERIOD: u64 = 31_536_000;

pub fn app(public_url: &str) -> Router {
    app_with_faults(public_url, 0)
}

/// Like `app`, but the first `faults` API requests answer 503.
pub fn app_with_faults(public_url: &str, faults: u32) -> Router {
    let db: Db = Arc::new(AppState {
        checks: RwLock::new(Vec::new()),
        public_url: public_url.trim_end_matches('/').to_string(),
        faults: AtomicU32::new(faults),
    });

    let api = Router::new()
        .route("/checks/", get(list_checks).post(create_check))
        .route(
            "/checks/{id}",
            get(get_check).post(update_check).delete(delete_check),
        )
        .route("/checks/{id}/pause", post(pause_check))
        .route("/checks/{id}/resume", post(resume_check))
        .route("/checks/{id}/pings/", get(list_pings))
        .route("/checks/{id}/pings/{n}/body", get(get_ping_body))
        .route("/checks/{id}/flips/", get(list_flips))
        .route_layer(middleware::from_fn(require_api_key))
        .route_layer(middleware::from_fn_with_state(db.clone(), inject_faults));

    Router::new()
        .nest("/api/v3", api)
        .route("/ping/{id}", get(ping_success).post(ping_success))
        .route("/ping/{id}/start", get(ping_start).post(ping_start))
        .route("/ping/{id}/fail", get(ping_fail).post(ping_fail))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    let public_url = format!("http://{}", listener.local_addr()?);
    run_with(listener, app(&public_url)).await
}

pub async fn run_with(listener: TcpListener, app: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, app).await
}

async fn require_api_key(request: Request, next: Next) -> Response {
    let present = request
        .headers()
        .get(API_KEY_HEADER)
        .is_some_and(|v| !v.is_empty());
    if !present {
        return ApiFailure(StatusCode::UNAUTHORIZED, "missing api key".to_string()).into_response();
    }
    next.run(request).await
}

async fn inject_faults(State(db): State<Db>, request: Request, next: Next) -> Response {
    let tripped = db
        .faults
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if tripped {
        tracing::debug!("Injecting 503 for {}", request.uri());
        return ApiFailure(StatusCode::SERVICE_UNAVAILABLE, "service unavailable".to_string())
            .into_response();
    }
    next.run(request).await
}

fn parse_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiFailure> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiFailure::bad_request(format!("could not parse request body: {e}")))
}

fn check_period(field: &str, value: Option<u64>) -> Result<(), ApiFailure> {
    match value {
        Some(v) if v < MIN_PERIOD => Err(ApiFailure::bad_request(format!(
            "json validation error: {field} is too small"
        ))),
        Some(v) if v > MAX_PERIOD => Err(ApiFailure::bad_request(format!(
            "json validation error: {field} is too large"
        ))),
        _ => Ok(()),
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn apply(check: &mut Check, input: CheckInput) {
    if let Some(name) = input.name {
        check.name = name;
    }
    if let Some(slug) = input.slug {
        check.slug = slug;
    }
    if let Some(tags) = input.tags {
        check.tags = tags;
    }
    if let Some(desc) = input.desc {
        check.desc = desc;
    }
    if let Some(timeout) = input.timeout {
        check.timeout = timeout;
    }
    if let Some(grace) = input.grace {
        check.grace = grace;
    }
    if input.schedule.is_some() {
        check.schedule = input.schedule;
    }
    if input.tz.is_some() {
        check.tz = input.tz;
    }
    if let Some(manual_resume) = input.manual_resume {
        check.manual_resume = manual_resume;
    }
    if let Some(methods) = input.methods {
        check.methods = methods;
    }
    if let Some(channels) = input.channels {
        check.channels = channels;
    }
    if let Some(kw) = input.start_kw {
        check.start_kw = kw;
    }
    if let Some(kw) = input.success_kw {
        check.success_kw = kw;
    }
    if let Some(kw) = input.failure_kw {
        check.failure_kw = kw;
    }
    if let Some(v) = input.filter_subject {
        check.filter_subject = v;
    }
    if let Some(v) = input.filter_body {
        check.filter_body = v;
    }
    if let Some(v) = input.filter_http_body {
        check.filter_http_body = v;
    }
    if let Some(v) = input.filter_default_fail {
        check.filter_default_fail = v;
    }
}

fn new_check(db: &AppState) -> Check {
    let uuid = Uuid::new_v4();
    let api = format!("{}/api/v3/checks/{uuid}", db.public_url);
    Check {
        uuid,
        name: String::new(),
        slug: String::new(),
        tags: String::new(),
        desc: String::new(),
        grace: 3600,
        timeout: 86400,
        schedule: None,
        tz: None,
        n_pings: 0,
        status: "new".to_string(),
        started: false,
        last_ping: None,
        next_ping: None,
        manual_resume: false,
        methods: String::new(),
        channels: String::new(),
        subject: String::new(),
        subject_fail: String::new(),
        start_kw: String::new(),
        success_kw: String::new(),
        failure_kw: String::new(),
        filter_subject: false,
        filter_body: false,
        filter_http_body: false,
        filter_default_fail: false,
        badge_url: format!("{}/badge/{uuid}.svg", db.public_url),
        ping_url: format!("{}/ping/{uuid}", db.public_url),
        update_url: api.clone(),
        pause_url: format!("{api}/pause"),
        resume_url: format!("{api}/resume"),
    }
}

/// Whether `existing` matches `input` on every field named in `unique`.
fn matches_unique(existing: &Check, input: &CheckInput) -> bool {
    input.unique.iter().all(|field| match field.as_str() {
        "name" => input.name.as_deref() == Some(existing.name.as_str()),
        "slug" => input.slug.as_deref() == Some(existing.slug.as_str()),
        "tags" => input.tags.as_deref() == Some(existing.tags.as_str()),
        "timeout" => input.timeout == Some(existing.timeout),
        "grace" => input.grace == Some(existing.grace),
        _ => false,
    })
}

/// Find by UUID, falling back to slug.
fn find<'a>(records: &'a mut [Record], identifier: &str) -> Option<&'a mut Record> {
    match identifier.parse::<Uuid>() {
        Ok(uuid) => records.iter_mut().find(|r| r.check.uuid == uuid),
        Err(_) => records.iter_mut().find(|r| r.check.slug == identifier),
    }
}

fn find_by_uuid<'a>(records: &'a mut [Record], id: &str) -> Result<&'a mut Record, ApiFailure> {
    let uuid: Uuid = id.parse().map_err(|_| ApiFailure::not_found())?;
    records
        .iter_mut()
        .find(|r| r.check.uuid == uuid)
        .ok_or_else(ApiFailure::not_found)
}

async fn list_checks(
    State(db): State<Db>,
    Query(query): Query<ListChecksQuery>,
) -> Json<serde_json::Value> {
    let records = db.checks.read().await;
    let wanted_tags: Vec<&str> = query
        .tags
        .as_deref()
        .map(|t| t.split_whitespace().collect())
        .unwrap_or_default();
    let checks: Vec<&Check> = records
        .iter()
        .map(|r| &r.check)
        .filter(|c| query.slug.as_deref().map_or(true, |slug| c.slug == slug))
        .filter(|c| {
            let tags: Vec<&str> = c.tags.split_whitespace().collect();
            wanted_tags.iter().all(|t| tags.contains(t))
        })
        .collect();
    Json(serde_json::json!({ "checks": checks }))
}

async fn create_check(
    State(db): State<Db>,
    body: Bytes,
) -> Result<(StatusCode, Json<Check>), ApiFailure> {
    let input: CheckInput = parse_json(&body)?;
    check_period("timeout", input.timeout)?;
    check_period("grace", input.grace)?;

    let mut records = db.checks.write().await;
    if !input.unique.is_empty() {
        if let Some(existing) = records.iter().find(|r| matches_unique(&r.check, &input)) {
            return Ok((StatusCode::OK, Json(existing.check.clone())));
        }
    }

    let mut check = new_check(&db);
    apply(&mut check, input);
    if check.slug.is_empty() {
        check.slug = slugify(&check.name);
    }
    tracing::debug!("Created check {} ({})", check.uuid, check.slug);
    records.push(Record {
        check: check.clone(),
        pings: Vec::new(),
        bodies: HashMap::new(),
        flips: Vec::new(),
        last_start: None,
    });
    Ok((StatusCode::CREATED, Json(check)))
}

async fn get_check(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<Check>, ApiFailure> {
    let mut records = db.checks.write().await;
    let record = find(&mut records, &id).ok_or_else(ApiFailure::not_found)?;
    Ok(Json(record.check.clone()))
}

async fn update_check(
    State(db): State<Db>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Check>, ApiFailure> {
    let input: CheckInput = parse_json(&body)?;
    check_period("timeout", input.timeout)?;
    check_period("grace", input.grace)?;

    let mut records = db.checks.write().await;
    let record = find_by_uuid(&mut records, &id)?;
    apply(&mut record.check, input);
    Ok(Json(record.check.clone()))
}

async fn delete_check(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<Check>, ApiFailure> {
    let mut records = db.checks.write().await;
    let uuid = find_by_uuid(&mut records, &id)?.check.uuid;
    let index = records
        .iter()
        .position(|r| r.check.uuid == uuid)
        .ok_or_else(ApiFailure::not_found)?;
    Ok(Json(records.remove(index).check))
}

async fn pause_check(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<Check>, ApiFailure> {
    let mut records = db.checks.write().await;
    let record = find_by_uuid(&mut records, &id)?;
    record.check.status = "paused".to_string();
    record.check.started = false;
    record.check.next_ping = None;
    Ok(Json(record.check.clone()))
}

async fn resume_check(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<Check>, ApiFailure> {
    let mut records = db.checks.write().await;
    let record = find_by_uuid(&mut records, &id)?;
    if record.check.status != "paused" {
        return Err(ApiFailure(
            StatusCode::CONFLICT,
            "check is not paused".to_string(),
        ));
    }
    record.check.status = "new".to_string();
    Ok(Json(record.check.clone()))
}

async fn list_pings(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let mut records = db.checks.write().await;
    let record = find(&mut records, &id).ok_or_else(ApiFailure::not_found)?;
    let pings: Vec<&Ping> = record.pings.iter().rev().collect();
    Ok(Json(serde_json::json!({ "pings": pings })))
}

async fn get_ping_body(
    State(db): State<Db>,
    Path((id, n)): Path<(String, u64)>,
) -> Result<Response, ApiFailure> {
    let mut records = db.checks.write().await;
    let record = find_by_uuid(&mut records, &id)?;
    if !record.pings.iter().any(|p| p.n == n) {
        return Err(ApiFailure(
            StatusCode::NOT_FOUND,
            "ping does not exist".to_string(),
        ));
    }
    let body = record.bodies.get(&n).ok_or_else(|| {
        ApiFailure(StatusCode::NOT_FOUND, "ping has no body".to_string())
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.clone(),
    )
        .into_response())
}

async fn list_flips(
    State(db): State<Db>,
    Path(id): Path<String>,
    Query(query): Query<FlipsQuery>,
) -> Result<Json<Vec<Flip>>, ApiFailure> {
    let cutoff = query
        .seconds
        .map(|s| {
            Duration::try_seconds(s)
                .and_then(|window| Utc::now().checked_sub_signed(window))
                .ok_or_else(|| ApiFailure::bad_request("seconds is out of range"))
        })
        .transpose()?;
    let mut records = db.checks.write().await;
    let record = find(&mut records, &id).ok_or_else(ApiFailure::not_found)?;
    let flips = record
        .flips
        .iter()
        .filter(|f| cutoff.map_or(true, |c| f.timestamp >= c))
        .filter(|f| query.start.map_or(true, |s| f.timestamp.timestamp() >= s))
        .filter(|f| query.end.map_or(true, |e| f.timestamp.timestamp() < e))
        .rev()
        .cloned()
        .collect();
    Ok(Json(flips))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PingKind {
    Success,
    Start,
    Fail,
}

async fn ping_success(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record_ping(&db, &id, PingKind::Success, &headers, &body).await
}

async fn ping_start(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record_ping(&db, &id, PingKind::Start, &headers, &body).await
}

async fn ping_fail(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record_ping(&db, &id, PingKind::Fail, &headers, &body).await
}

async fn record_ping(
    db: &AppState,
    id: &str,
    kind: PingKind,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    let Ok(uuid) = id.parse::<Uuid>() else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    let mut records = db.checks.write().await;
    let Some(record) = records.iter_mut().find(|r| r.check.uuid == uuid) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let now = Utc::now();
    let check = &mut record.check;
    check.n_pings += 1;
    let n = check.n_pings;

    let mut duration = None;
    let previous = check.status.clone();
    let held = previous == "paused" && check.manual_resume;
    match kind {
        PingKind::Start => {
            check.started = true;
            record.last_start = Some(now);
        }
        PingKind::Success | PingKind::Fail => {
            duration = record
                .last_start
                .take()
                .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
            check.started = false;
            check.last_ping = Some(now);
            if !held {
                let up = kind == PingKind::Success;
                check.status = if up { "up" } else { "down" }.to_string();
                let timeout = Duration::seconds(check.timeout as i64);
                check.next_ping = up.then(|| now + timeout);
                if previous != check.status {
                    record.flips.push(Flip {
                        timestamp: now,
                        up: u8::from(up),
                    });
                }
            }
        }
    }

    let body_url = (!body.is_empty()).then(|| {
        record
            .bodies
            .insert(n, String::from_utf8_lossy(body).into_owned());
        format!("{}/api/v3/checks/{uuid}/pings/{n}/body", db.public_url)
    });
    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    record.pings.push(Ping {
        kind: match kind {
            PingKind::Success => "success",
            PingKind::Start => "start",
            PingKind::Fail => "fail",
        }
        .to_string(),
        date: now,
        n,
        scheme: "http".to_string(),
        remote_addr: "127.0.0.1".to_string(),
        method: "POST".to_string(),
        ua,
        rid: None,
        duration,
        body_url,
    });
    tracing::debug!("Recorded ping #{} for {}", n, uuid);

    (StatusCode::OK, "OK").into_response()
}
