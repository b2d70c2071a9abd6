//! Wire types for the healthchecks v3 API.
//!
//! # Design
//! Write shapes (`CreateCheck`, `UpdateCheck`) and the read shape (`Check`)
//! are separate types: the service accepts a subset of what it returns, and
//! several read fields (status, counters, generated URLs) are never
//! writable. Write shapes serialize only the fields that are set, so an
//! `UpdateCheck` with `None` leaves the remote value alone.
//!
//! Read shapes default every field the service may omit (read-only API keys
//! get no `uuid`, cron checks get no `timeout`) instead of failing to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload for creating a check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Space-separated tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Expected period in seconds. Ignored by the service when `schedule` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Grace period in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace: Option<u64>,
    /// Cron expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_resume: Option<bool>,
    /// `""` accepts HEAD/GET/POST/PUT pings, `"POST"` accepts POST only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<String>,
    /// Comma-separated channel identifiers, or `"*"` for all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<String>,
    /// Field names that make the create idempotent: when an existing check
    /// matches on all of them, the service returns it instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_body: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_http_body: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_default_fail: Option<bool>,
}

/// Payload for updating a check. Only the fields that are `Some` are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_resume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_body: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_http_body: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_default_fail: Option<bool>,
}

/// Current state of a check as reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    New,
    Up,
    Grace,
    Down,
    Paused,
    Started,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A check as returned by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Check {
    /// Absent when the client uses a read-only key; see `unique_key`.
    pub uuid: Option<Uuid>,
    /// Stable identifier handed out to read-only keys instead of `uuid`.
    pub unique_key: Option<String>,
    pub name: String,
    pub slug: String,
    pub tags: String,
    pub desc: String,
    pub grace: u64,
    pub timeout: Option<u64>,
    pub schedule: Option<String>,
    pub tz: Option<String>,
    pub n_pings: u64,
    pub status: CheckStatus,
    pub started: bool,
    /// `None` until the first ping arrives.
    pub last_ping: Option<DateTime<Utc>>,
    /// `None` while the check is new or paused.
    pub next_ping: Option<DateTime<Utc>>,
    pub last_duration: Option<f64>,
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

/// What a recorded ping reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingType {
    Success,
    Fail,
    Start,
    Log,
    /// Ignored: the ping matched none of the check's keyword filters.
    Ign,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One recorded heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(rename = "type")]
    pub kind: PingType,
    pub date: DateTime<Utc>,
    /// Sequence number within the check, starting at 1.
    pub n: u64,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub remote_addr: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub ua: String,
    #[serde(default)]
    pub rid: Option<String>,
    /// Seconds since the matching start ping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Where the request body can be fetched, when one was stored.
    #[serde(default)]
    pub body_url: Option<String>,
}

/// One up/down transition of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flip {
    pub timestamp: DateTime<Utc>,
    /// 1 when the check went up, 0 when it went down.
    pub up: u8,
}

impl Flip {
    pub fn is_up(&self) -> bool {
        self.up != 0
    }
}

/// Error body returned with non-success statuses: `{"error": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub error: String,
}

/// Filters for listing checks. Empty values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChecks {
    pub slug: String,
    pub tags: String,
}

/// Window for listing flips. Zero or negative values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFlips {
    /// Only flips from the last `seconds` seconds.
    pub seconds: i64,
    /// Unix timestamp lower bound.
    pub start: i64,
    /// Unix timestamp upper bound.
    pub end: i64,
}

/// The report a ping sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PingKind {
    #[default]
    Success,
    Start,
    Fail,
}

impl PingKind {
    /// Path segment appended to the ping address.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            PingKind::Success => None,
            PingKind::Start => Some("start"),
            PingKind::Fail => Some("fail"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PingKind::Success => "success",
            PingKind::Start => "start",
            PingKind::Fail => "fail",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_check_omits_unset_fields() {
        let input = CreateCheck {
            name: Some("backup".to_string()),
            grace: Some(60),
            manual_resume: Some(false),
            ..Default::default()
        };
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "backup", "grace": 60, "manual_resume": false})
        );
    }

    #[test]
    fn update_check_serializes_desc_under_wire_name() {
        let input = UpdateCheck {
            desc: Some("nightly".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&input).unwrap(),
            r#"{"desc":"nightly"}"#
        );
    }

    #[test]
    fn check_decodes_null_timestamps_as_none() {
        let check: Check = serde_json::from_str(
            r#"{
                "name": "db", "slug": "db", "grace": 60, "n_pings": 0,
                "status": "new", "last_ping": null, "next_ping": null,
                "uuid": "5bf66975-d4c7-4bf5-bcc8-b8d8a82ea278"
            }"#,
        )
        .unwrap();
        assert_eq!(check.status, CheckStatus::New);
        assert!(check.last_ping.is_none());
        assert!(check.next_ping.is_none());
        assert_eq!(
            check.uuid.unwrap().to_string(),
            "5bf66975-d4c7-4bf5-bcc8-b8d8a82ea278"
        );
    }

    #[test]
    fn check_decodes_timestamps_with_offsets() {
        let check: Check = serde_json::from_str(
            r#"{"status": "up", "last_ping": "2020-03-24T14:02:03+00:00", "next_ping": "2020-03-24T15:02:03+00:00"}"#,
        )
        .unwrap();
        assert_eq!(
            check.last_ping.unwrap().to_rfc3339(),
            "2020-03-24T14:02:03+00:00"
        );
        assert!(check.next_ping.unwrap() > check.last_ping.unwrap());
    }

    #[test]
    fn unknown_status_is_preserved_as_unknown() {
        let check: Check = serde_json::from_str(r#"{"status": "hibernating"}"#).unwrap();
        assert_eq!(check.status, CheckStatus::Unknown);
    }

    #[test]
    fn ping_type_comes_from_type_field() {
        let ping: Ping = serde_json::from_str(
            r#"{"type": "ign", "date": "2020-06-09T14:51:06.113073+00:00", "n": 4,
                "scheme": "http", "remote_addr": "192.0.2.0", "method": "POST",
                "ua": "curl/7.68.0", "rid": null, "duration": 2.896736,
                "body_url": null}"#,
        )
        .unwrap();
        assert_eq!(ping.kind, PingType::Ign);
        assert_eq!(ping.n, 4);
        assert_eq!(ping.duration, Some(2.896736));
        assert!(ping.body_url.is_none());
    }

    #[test]
    fn flip_up_flag() {
        let flip: Flip =
            serde_json::from_str(r#"{"timestamp": "2020-03-23T10:18:23+00:00", "up": 1}"#)
                .unwrap();
        assert!(flip.is_up());
    }

    #[test]
    fn ping_kind_suffixes() {
        assert_eq!(PingKind::default(), PingKind::Success);
        assert_eq!(PingKind::Success.suffix(), None);
        assert_eq!(PingKind::Start.suffix(), Some("start"));
        assert_eq!(PingKind::Fail.suffix(), Some("fail"));
    }
}
