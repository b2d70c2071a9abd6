//! Async client for the healthchecks.io v3 REST API.
//!
//! # Overview
//! Create, query, update, pause, resume and delete checks, read their ping
//! and flip history, and send pings on their behalf.
//!
//! # Design
//! - `HealthchecksClient` holds only immutable configuration (base address,
//!   API key, retry policy) and is safe to share across tasks.
//! - Each operation is split into `build_*` (produces an `HttpRequest`) and
//!   `parse_*` (consumes an `HttpResponse`); `HealthchecksApi` runs the two
//!   around a retrying `Transport`.
//! - Transient failures (connection errors, 429, 5xx) are retried with
//!   bounded exponential backoff. Status mismatches and malformed bodies are
//!   surfaced immediately as distinct `ApiError` variants.
//! - Every operation honours a `CancellationToken`.
//!
//! ```no_run
//! use healthchecks_core::{ClientConfig, CreateCheck, HealthchecksApi, HealthchecksClient, PingKind};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> healthchecks_core::Result<()> {
//! let client = HealthchecksClient::new(&ClientConfig::from_env()?)?;
//! let cancel = CancellationToken::new();
//! let check = client
//!     .create_check(
//!         &CreateCheck { name: Some("backups".into()), grace: Some(60), ..Default::default() },
//!         &cancel,
//!     )
//!     .await?;
//! client.ping(&check.ping_url, "", PingKind::Success, &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod retry;
pub mod types;

pub use address::{BaseAddress, QueryParams, DEFAULT_BASE_URL};
pub use api::HealthchecksApi;
pub use client::HealthchecksClient;
pub use config::{ApiKey, ClientConfig, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ApiError, ErrorKind, Result, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use retry::RetryPolicy;
pub use types::{
    Check, CheckStatus, CreateCheck, Flip, ListChecks, ListFlips, Ping, PingKind, PingType,
    RemoteError, UpdateCheck,
};
