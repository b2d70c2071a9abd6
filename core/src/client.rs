//! Request pipeline for the healthchecks v3 API.
//!
//! # Design
//! Every operation is a `build_*` step that produces an `HttpRequest`, an
//! `execute` step that runs it through the `Transport` under the retry
//! policy, and a `parse_*` step that classifies the `HttpResponse`. The
//! build and parse steps are pure and public, so a host can drive the I/O
//! itself. `HealthchecksApi` (see `api.rs`) stitches the three together.
//!
//! The client holds only immutable configuration and an `Arc` to the
//! transport; clones share the transport's connection pool.

use std::sync::Arc;
use std::time::Instant;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::address::{ping_address, BaseAddress, QueryParams};
use crate::config::{ApiKey, ClientConfig};
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::retry::{is_retryable_status, RetryPolicy};
use crate::types::{
    Check, CreateCheck, Flip, ListChecks, ListFlips, Ping, PingKind, RemoteError, UpdateCheck,
};

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Name and success status of one API operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub expected_status: u16,
}

impl Endpoint {
    const fn new(name: &'static str, expected_status: u16) -> Self {
        Self {
            name,
            expected_status,
        }
    }
}

pub const CREATE_CHECK: Endpoint = Endpoint::new("create check", 201);
pub const LIST_CHECKS: Endpoint = Endpoint::new("list checks", 200);
pub const GET_CHECK: Endpoint = Endpoint::new("get check", 200);
pub const UPDATE_CHECK: Endpoint = Endpoint::new("update check", 200);
pub const DELETE_CHECK: Endpoint = Endpoint::new("delete check", 200);
pub const PAUSE_CHECK: Endpoint = Endpoint::new("pause check", 200);
pub const RESUME_CHECK: Endpoint = Endpoint::new("resume check", 200);
pub const LIST_PINGS: Endpoint = Endpoint::new("list pings", 200);
pub const GET_PING_BODY: Endpoint = Endpoint::new("get ping body", 200);
pub const LIST_FLIPS: Endpoint = Endpoint::new("list flips", 200);
pub const PING: Endpoint = Endpoint::new("ping", 200);

#[derive(Deserialize)]
struct CheckList {
    checks: Vec<Check>,
}

#[derive(Deserialize)]
struct PingList {
    pings: Vec<Ping>,
}

// The v3 docs show a bare array; some deployments wrap it.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlipList {
    Bare(Vec<Flip>),
    Wrapped { flips: Vec<Flip> },
}

enum Body {
    Json(String),
    Text(String),
}

/// Client for the healthchecks v3 API.
pub struct HealthchecksClient<T = ReqwestTransport> {
    api_key: ApiKey,
    base: BaseAddress,
    retry: RetryPolicy,
    user_agent: String,
    log_retries: bool,
    transport: Arc<T>,
}

impl<T> Clone for HealthchecksClient<T> {
    fn clone(&self) -> Self {
        Self {
            api_key: self.api_key.clone(),
            base: self.base.clone(),
            retry: self.retry,
            user_agent: self.user_agent.clone(),
            log_retries: self.log_retries,
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> std::fmt::Debug for HealthchecksClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthchecksClient")
            .field("base", &self.base.to_string())
            .field("retry", &self.retry)
            .finish()
    }
}

impl HealthchecksClient<ReqwestTransport> {
    /// Build a client backed by reqwest.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> HealthchecksClient<T> {
    pub fn with_transport(config: &ClientConfig, transport: T) -> Result<Self> {
        let base = BaseAddress::parse(&config.base_url)?;
        tracing::debug!("Created HealthchecksClient for {}", base);
        Ok(Self {
            api_key: config.api_key.clone(),
            base,
            retry: config.retry,
            user_agent: config.user_agent.clone(),
            log_retries: config.log_retries,
            transport: Arc::new(transport),
        })
    }

    pub fn base_address(&self) -> &BaseAddress {
        &self.base
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `request` under the retry policy.
    ///
    /// Transient failures (retryable transport errors, 429, most 5xx) are
    /// retried with backoff until attempts run out; the last outcome is then
    /// returned as is. Any other response comes back untouched for the
    /// caller to classify. Cancellation aborts both the in-flight attempt
    /// and a pending backoff sleep.
    pub async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                outcome = self.transport.execute(request.clone()) => outcome,
            };

            let exhausted = attempt + 1 >= attempts;
            let delay = match outcome {
                Ok(response) if exhausted || !is_retryable_status(response.status) => {
                    return Ok(response)
                }
                Ok(response) => {
                    let delay = self.retry.backoff_for(attempt, &response);
                    if self.log_retries {
                        tracing::warn!(
                            "{} {} returned {}, retrying in {:?} ({}/{})",
                            request.method,
                            request.url,
                            response.status,
                            delay,
                            attempt + 1,
                            attempts
                        );
                    }
                    delay
                }
                Err(err) if exhausted || !err.retryable => return Err(err.into()),
                Err(err) => {
                    let delay = self.retry.backoff(attempt);
                    if self.log_retries {
                        tracing::warn!(
                            "{}, retrying in {:?} ({}/{})",
                            err,
                            delay,
                            attempt + 1,
                            attempts
                        );
                    }
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// `execute` with start/end events for `endpoint`.
    pub(crate) async fn send(
        &self,
        endpoint: Endpoint,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        tracing::debug!("{} started: {} {}", endpoint.name, request.method, request.url);
        let started = Instant::now();
        let result = self.execute(request, cancel).await;
        match &result {
            Ok(response) => tracing::debug!(
                "{} finished with {} in {:?}",
                endpoint.name,
                response.status,
                started.elapsed()
            ),
            Err(e) => tracing::debug!(
                "{} failed after {:?}: {}",
                endpoint.name,
                started.elapsed(),
                e
            ),
        }
        result
    }
}

impl<T> HealthchecksClient<T> {
    fn request(&self, method: HttpMethod, url: Url, body: Option<Body>) -> HttpRequest {
        let mut headers = vec![
            (API_KEY_HEADER.to_string(), self.api_key.expose().to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ];
        let body = body.map(|body| {
            let (content_type, body) = match body {
                Body::Json(body) => ("application/json", body),
                Body::Text(body) => ("text/plain; charset=utf-8", body),
            };
            headers.push(("Content-Type".to_string(), content_type.to_string()));
            body
        });
        HttpRequest {
            method,
            url: url.into(),
            headers,
            body,
        }
    }

    pub fn build_create_check(&self, input: &CreateCheck) -> Result<HttpRequest> {
        let body = to_json(input)?;
        let url = self.base.join_dir(&["checks"]);
        Ok(self.request(HttpMethod::Post, url, Some(Body::Json(body))))
    }

    pub fn build_list_checks(&self, filter: &ListChecks) -> HttpRequest {
        let url = QueryParams::new()
            .text("slug", &filter.slug)
            .text("tags", &filter.tags)
            .apply(self.base.join_dir(&["checks"]));
        self.request(HttpMethod::Get, url, None)
    }

    /// `identifier` is a UUID or a unique slug.
    pub fn build_get_check(&self, identifier: &str) -> HttpRequest {
        let url = self.base.join(&["checks", identifier]);
        self.request(HttpMethod::Get, url, None)
    }

    pub fn build_update_check(&self, uuid: Uuid, input: &UpdateCheck) -> Result<HttpRequest> {
        let body = to_json(input)?;
        let url = self.base.join(&["checks", &uuid.to_string()]);
        Ok(self.request(HttpMethod::Post, url, Some(Body::Json(body))))
    }

    pub fn build_delete_check(&self, uuid: Uuid) -> HttpRequest {
        let url = self.base.join(&["checks", &uuid.to_string()]);
        self.request(HttpMethod::Delete, url, None)
    }

    pub fn build_pause_check(&self, uuid: Uuid) -> HttpRequest {
        let url = self.base.join(&["checks", &uuid.to_string(), "pause"]);
        self.request(HttpMethod::Post, url, None)
    }

    pub fn build_resume_check(&self, uuid: Uuid) -> HttpRequest {
        let url = self.base.join(&["checks", &uuid.to_string(), "resume"]);
        self.request(HttpMethod::Post, url, None)
    }

    pub fn build_list_pings(&self, identifier: &str) -> HttpRequest {
        let url = self.base.join_dir(&["checks", identifier, "pings"]);
        self.request(HttpMethod::Get, url, None)
    }

    pub fn build_get_ping_body(&self, uuid: Uuid, n: u64) -> HttpRequest {
        let url = self
            .base
            .join(&["checks", &uuid.to_string(), "pings", &n.to_string(), "body"]);
        self.request(HttpMethod::Get, url, None)
    }

    pub fn build_list_flips(&self, identifier: &str, window: &ListFlips) -> HttpRequest {
        let url = QueryParams::new()
            .positive("seconds", window.seconds)
            .positive("start", window.start)
            .positive("end", window.end)
            .apply(self.base.join_dir(&["checks", identifier, "flips"]));
        self.request(HttpMethod::Get, url, None)
    }

    /// Ping addresses authenticate by their own UUID, so the API key is only
    /// attached when the ping goes to the API's own origin.
    pub fn build_ping(&self, ping_url: &str, body: &str, kind: PingKind) -> Result<HttpRequest> {
        let url = ping_address(ping_url, kind)?;
        let same_origin = self.base.same_origin(&url);
        let body = (!body.is_empty()).then(|| Body::Text(body.to_string()));
        let mut request = self.request(HttpMethod::Post, url, body);
        if !same_origin {
            request.headers.retain(|(name, _)| name != API_KEY_HEADER);
        }
        Ok(request)
    }

    pub fn parse_create_check(&self, response: HttpResponse) -> Result<Check> {
        decode(CREATE_CHECK, response)
    }

    pub fn parse_list_checks(&self, response: HttpResponse) -> Result<Vec<Check>> {
        decode::<CheckList>(LIST_CHECKS, response).map(|list| list.checks)
    }

    pub fn parse_get_check(&self, response: HttpResponse) -> Result<Check> {
        decode(GET_CHECK, response)
    }

    pub fn parse_update_check(&self, response: HttpResponse) -> Result<Check> {
        decode(UPDATE_CHECK, response)
    }

    pub fn parse_delete_check(&self, response: HttpResponse) -> Result<Check> {
        decode(DELETE_CHECK, response)
    }

    pub fn parse_pause_check(&self, response: HttpResponse) -> Result<Check> {
        decode(PAUSE_CHECK, response)
    }

    pub fn parse_resume_check(&self, response: HttpResponse) -> Result<Check> {
        decode(RESUME_CHECK, response)
    }

    pub fn parse_list_pings(&self, response: HttpResponse) -> Result<Vec<Ping>> {
        decode::<PingList>(LIST_PINGS, response).map(|list| list.pings)
    }

    /// The ping body is returned verbatim.
    pub fn parse_get_ping_body(&self, response: HttpResponse) -> Result<String> {
        check_status(GET_PING_BODY, &response)?;
        Ok(response.body)
    }

    pub fn parse_list_flips(&self, response: HttpResponse) -> Result<Vec<Flip>> {
        decode::<FlipList>(LIST_FLIPS, response).map(|list| match list {
            FlipList::Bare(flips) | FlipList::Wrapped { flips } => flips,
        })
    }

    /// Ping endpoints answer in plain text, so a non-JSON error body is used
    /// as the message as is.
    pub fn parse_ping(&self, response: HttpResponse) -> Result<()> {
        if response.status == PING.expected_status {
            return Ok(());
        }
        let message = remote_message(&response.body)
            .unwrap_or_else(|| response.body.trim().to_string());
        Err(ApiError::Status {
            operation: PING.name,
            status: response.status,
            message,
        })
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<String> {
    serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))
}

fn remote_message(body: &str) -> Option<String> {
    serde_json::from_str::<RemoteError>(body)
        .ok()
        .map(|e| e.error)
}

/// Map any status other than the endpoint's expected one to `ApiError::Status`.
fn check_status(endpoint: Endpoint, response: &HttpResponse) -> Result<()> {
    if response.status == endpoint.expected_status {
        return Ok(());
    }
    Err(ApiError::Status {
        operation: endpoint.name,
        status: response.status,
        message: remote_message(&response.body).unwrap_or_default(),
    })
}

fn decode<R: DeserializeOwned>(endpoint: Endpoint, response: HttpResponse) -> Result<R> {
    check_status(endpoint, &response)?;
    serde_json::from_str(&response.body).map_err(|e| ApiError::Decode {
        operation: endpoint.name,
        reason: e.to_string(),
    })
}
