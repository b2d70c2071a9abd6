//! The operations offered by the healthchecks v3 API.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::client::{
    HealthchecksClient, CREATE_CHECK, DELETE_CHECK, GET_CHECK, GET_PING_BODY, LIST_CHECKS,
    LIST_FLIPS, LIST_PINGS, PAUSE_CHECK, PING, RESUME_CHECK, UPDATE_CHECK,
};
use crate::error::Result;
use crate::http::Transport;
use crate::types::{Check, CreateCheck, Flip, ListChecks, ListFlips, Ping, PingKind, UpdateCheck};

/// Every call takes a `CancellationToken`; cancelling it aborts the
/// in-flight attempt and any pending retry. A write the service already
/// accepted stays applied.
#[async_trait]
pub trait HealthchecksApi: Send + Sync {
    async fn create_check(&self, input: &CreateCheck, cancel: &CancellationToken)
        -> Result<Check>;

    async fn list_checks(&self, filter: &ListChecks, cancel: &CancellationToken)
        -> Result<Vec<Check>>;

    /// Look a check up by UUID or unique slug.
    async fn get_check(&self, identifier: &str, cancel: &CancellationToken) -> Result<Check>;

    async fn update_check(
        &self,
        uuid: Uuid,
        input: &UpdateCheck,
        cancel: &CancellationToken,
    ) -> Result<Check>;

    /// Returns the check as it was before deletion.
    async fn delete_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check>;

    async fn pause_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check>;

    async fn resume_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check>;

    async fn list_pings(&self, identifier: &str, cancel: &CancellationToken)
        -> Result<Vec<Ping>>;

    async fn get_ping_body(&self, uuid: Uuid, n: u64, cancel: &CancellationToken)
        -> Result<String>;

    async fn list_flips(
        &self,
        identifier: &str,
        window: &ListFlips,
        cancel: &CancellationToken,
    ) -> Result<Vec<Flip>>;

    /// Report `kind` to a check's ping address (`Check::ping_url`).
    async fn ping(
        &self,
        ping_url: &str,
        body: &str,
        kind: PingKind,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

#[async_trait]
impl<T: Transport> HealthchecksApi for HealthchecksClient<T> {
    async fn create_check(
        &self,
        input: &CreateCheck,
        cancel: &CancellationToken,
    ) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = CREATE_CHECK.name,
            check.name = input.name.as_deref().unwrap_or_default(),
            check.slug = input.slug.as_deref().unwrap_or_default(),
        );
        async {
            let request = self.build_create_check(input)?;
            let response = self.send(CREATE_CHECK, request, cancel).await?;
            self.parse_create_check(response)
        }
        .instrument(span)
        .await
    }

    async fn list_checks(
        &self,
        filter: &ListChecks,
        cancel: &CancellationToken,
    ) -> Result<Vec<Check>> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = LIST_CHECKS.name,
            check.slug = filter.slug.as_str(),
            check.tags = filter.tags.as_str(),
        );
        async {
            let request = self.build_list_checks(filter);
            let response = self.send(LIST_CHECKS, request, cancel).await?;
            self.parse_list_checks(response)
        }
        .instrument(span)
        .await
    }

    async fn get_check(&self, identifier: &str, cancel: &CancellationToken) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = GET_CHECK.name,
            check.identifier = identifier,
        );
        async {
            let request = self.build_get_check(identifier);
            let response = self.send(GET_CHECK, request, cancel).await?;
            self.parse_get_check(response)
        }
        .instrument(span)
        .await
    }

    async fn update_check(
        &self,
        uuid: Uuid,
        input: &UpdateCheck,
        cancel: &CancellationToken,
    ) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = UPDATE_CHECK.name,
            check.uuid = %uuid,
            check.name = input.name.as_deref().unwrap_or_default(),
            check.slug = input.slug.as_deref().unwrap_or_default(),
        );
        async {
            let request = self.build_update_check(uuid, input)?;
            let response = self.send(UPDATE_CHECK, request, cancel).await?;
            self.parse_update_check(response)
        }
        .instrument(span)
        .await
    }

    async fn delete_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = DELETE_CHECK.name,
            check.uuid = %uuid,
        );
        async {
            let request = self.build_delete_check(uuid);
            let response = self.send(DELETE_CHECK, request, cancel).await?;
            self.parse_delete_check(response)
        }
        .instrument(span)
        .await
    }

    async fn pause_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = PAUSE_CHECK.name,
            check.uuid = %uuid,
        );
        async {
            let request = self.build_pause_check(uuid);
            let response = self.send(PAUSE_CHECK, request, cancel).await?;
            self.parse_pause_check(response)
        }
        .instrument(span)
        .await
    }

    async fn resume_check(&self, uuid: Uuid, cancel: &CancellationToken) -> Result<Check> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = RESUME_CHECK.name,
            check.uuid = %uuid,
        );
        async {
            let request = self.build_resume_check(uuid);
            let response = self.send(RESUME_CHECK, request, cancel).await?;
            self.parse_resume_check(response)
        }
        .instrument(span)
        .await
    }

    async fn list_pings(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Ping>> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = LIST_PINGS.name,
            check.identifier = identifier,
        );
        async {
            let request = self.build_list_pings(identifier);
            let response = self.send(LIST_PINGS, request, cancel).await?;
            self.parse_list_pings(response)
        }
        .instrument(span)
        .await
    }

    async fn get_ping_body(
        &self,
        uuid: Uuid,
        n: u64,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = GET_PING_BODY.name,
            check.uuid = %uuid,
            ping.n = n,
        );
        async {
            let request = self.build_get_ping_body(uuid, n);
            let response = self.send(GET_PING_BODY, request, cancel).await?;
            self.parse_get_ping_body(response)
        }
        .instrument(span)
        .await
    }

    async fn list_flips(
        &self,
        identifier: &str,
        window: &ListFlips,
        cancel: &CancellationToken,
    ) -> Result<Vec<Flip>> {
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = LIST_FLIPS.name,
            check.identifier = identifier,
        );
        async {
            let request = self.build_list_flips(identifier, window);
            let response = self.send(LIST_FLIPS, request, cancel).await?;
            self.parse_list_flips(response)
        }
        .instrument(span)
        .await
    }

    async fn ping(
        &self,
        ping_url: &str,
        body: &str,
        kind: PingKind,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // The body can carry job output, so only its size is recorded.
        let span = tracing::info_span!(
            "healthchecks.request",
            endpoint = PING.name,
            check.ping_url = ping_url,
            ping.kind = kind.as_str(),
            ping.body_len = body.len(),
        );
        async {
            let request = self.build_ping(ping_url, body, kind)?;
            let response = self.send(PING, request, cancel).await?;
            self.parse_ping(response)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::{ApiError, TransportError};
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use crate::retry::RetryPolicy;
    use crate::types::{CheckStatus, PingType};
    use std::time::Duration;

    const CHECK_UUID: &str = "5bf66975-d4c7-4bf5-bcc8-b8d8a82ea278";
    const CHECK_JSON: &str = r#"{
        "name": "n", "slug": "s", "grace": 60, "n_pings": 0, "status": "new",
        "last_ping": null, "next_ping": null,
        "uuid": "5bf66975-d4c7-4bf5-bcc8-b8d8a82ea278",
        "ping_url": "https://hc-ping.com/5bf66975-d4c7-4bf5-bcc8-b8d8a82ea278"
    }"#;

    fn api(mock: MockTransport) -> Box<dyn HealthchecksApi> {
        let config = ClientConfig::new("test-key").with_retry(RetryPolicy {
            max_attempts: 3,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        });
        Box::new(HealthchecksClient::with_transport(&config, mock).unwrap())
    }

    fn uuid() -> Uuid {
        CHECK_UUID.parse().unwrap()
    }

    fn respond(status: u16, body: &'static str) -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(1)
            .returning(move |_| Box::pin(async move { Ok(HttpResponse::new(status, body)) }));
        mock
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn requests_log_under_a_span_without_secrets() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(2)
            .returning(|req| {
                let body = if req.url.contains("hc-ping.com") { "OK" } else { CHECK_JSON };
                Box::pin(async move { Ok(HttpResponse::new(200, body)) })
            });
        let api = api(mock);
        let cancel = CancellationToken::new();

        api.get_check("backups", &cancel).await.unwrap();
        let ping_url = format!("https://hc-ping.com/{CHECK_UUID}");
        api.ping(&ping_url, "secret job output", PingKind::Fail, &cancel)
            .await
            .unwrap();

        let output = logs.text();
        assert!(output.contains("healthchecks.request"), "{output}");
        assert!(output.contains("get check"), "{output}");
        assert!(output.contains("check.identifier"), "{output}");
        assert!(output.contains("backups"), "{output}");
        assert!(output.contains("check.ping_url"), "{output}");
        assert!(output.contains(CHECK_UUID), "{output}");
        assert!(output.contains("ping.body_len=17"), "{output}");
        assert!(!output.contains("test-key"), "{output}");
        assert!(!output.contains("secret job output"), "{output}");
    }

    #[tokio::test]
    async fn create_check_returns_decoded_body() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .withf(|req| {
                req.method == HttpMethod::Post
                    && req.url == "https://healthchecks.io/api/v3/checks/"
                    && req.header("X-Api-Key") == Some("test-key")
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(HttpResponse::new(201, CHECK_JSON)) }));

        let input = CreateCheck {
            name: Some("n".to_string()),
            slug: Some("s".to_string()),
            grace: Some(60),
            ..Default::default()
        };
        let check = api(mock)
            .create_check(&input, &CancellationToken::new())
            .await
            .unwrap();
        let expected: crate::types::Check = serde_json::from_str(CHECK_JSON).unwrap();
        assert_eq!(check, expected);
        assert_eq!(check.status, CheckStatus::New);
    }

    #[tokio::test]
    async fn get_check_surfaces_remote_error() {
        let api = api(respond(404, r#"{"error": "check not found"}"#));
        let err = api
            .get_check("missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("check not found"));
    }

    #[tokio::test]
    async fn check_mutations_return_fresh_snapshot() {
        let c = CancellationToken::new();
        let paused = api(respond(200, r#"{"status": "paused"}"#))
            .pause_check(uuid(), &c)
            .await
            .unwrap();
        assert_eq!(paused.status, CheckStatus::Paused);

        let resumed = api(respond(200, r#"{"status": "new"}"#))
            .resume_check(uuid(), &c)
            .await
            .unwrap();
        assert_eq!(resumed.status, CheckStatus::New);

        let updated = api(respond(200, r#"{"name": "Updated Name", "grace": 3600}"#))
            .update_check(
                uuid(),
                &UpdateCheck {
                    name: Some("Updated Name".to_string()),
                    grace: Some(3600),
                    ..Default::default()
                },
                &c,
            )
            .await
            .unwrap();
        assert_eq!(updated.grace, 3600);

        let deleted = api(respond(200, CHECK_JSON))
            .delete_check(uuid(), &c)
            .await
            .unwrap();
        assert_eq!(deleted.uuid, Some(uuid()));
    }

    #[tokio::test]
    async fn list_pings_and_body() {
        let c = CancellationToken::new();
        let pings = api(respond(
            200,
            r#"{"pings": [{"type": "fail", "date": "2020-06-09T14:51:06+00:00", "n": 2,
                "scheme": "https", "remote_addr": "192.0.2.0", "method": "POST", "ua": "",
                "body_url": "https://healthchecks.io/api/v3/checks/x/pings/2/body"}]}"#,
        ))
        .list_pings(CHECK_UUID, &c)
        .await
        .unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].kind, PingType::Fail);
        assert!(pings[0].body_url.is_some());

        let body = api(respond(200, "example body"))
            .get_ping_body(uuid(), 2, &c)
            .await
            .unwrap();
        assert_eq!(body, "example body");
    }

    #[tokio::test]
    async fn list_flips_sends_window() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .withf(|req| req.url.ends_with("/checks/s/flips/?start=100&end=200"))
            .times(1)
            .returning(|_| Box::pin(async { Ok(HttpResponse::new(200, "[]")) }));
        let window = ListFlips {
            seconds: 0,
            start: 100,
            end: 200,
        };
        let flips = api(mock)
            .list_flips("s", &window, &CancellationToken::new())
            .await
            .unwrap();
        assert!(flips.is_empty());
    }

    #[tokio::test]
    async fn ping_posts_body_to_suffixed_address() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .withf(|req| {
                req.url == format!("https://hc-ping.com/{CHECK_UUID}/start")
                    && req.body.as_deref() == Some("starting")
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(HttpResponse::new(200, "OK")) }));
        api(mock)
            .ping(
                &format!("https://hc-ping.com/{CHECK_UUID}"),
                "starting",
                PingKind::Start,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn operations_retry_through_the_transport() {
        let mut mock = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Box::pin(async { Err(TransportError::retryable("reset")) }));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Box::pin(async { Ok(HttpResponse::new(200, r#"{"checks": []}"#)) }));

        let checks = api(mock)
            .list_checks(&ListChecks::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(checks.is_empty());
    }

    #[tokio::test]
    async fn malformed_success_body_is_decode_error() {
        let err = api(respond(200, r#"{"pings": "nope"}"#))
            .list_pings("s", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
