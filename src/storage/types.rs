//! Event log record types.
//!
//! [`Event`] is the in-memory form: one variant per record type, each carrying exactly the
//! fields that type owns. [`EventRecord`] is the flat on-disk line. Conversion between the
//! two dispatches explicitly on the `type` tag, so a line with a known tag but a missing
//! field is rejected instead of silently defaulted.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Best-effort location metadata. Every field is optional and an all-empty value is a
/// valid result meaning "no enrichment available"; it serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl GeoInfo {
    /// Fixed descriptor for loopback and private addresses.
    pub fn local() -> Self {
        Self {
            country: Some(String::from("Localhost")),
            city: Some(String::from("Local Machine")),
            org: Some(String::from("Local Network")),
            lat: Some(0.0),
            lon: Some(0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.city.is_none()
            && self.org.is_none()
            && self.lat.is_none()
            && self.lon.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoginAttempt,
    Command,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoginAttempt => "login_attempt",
            EventKind::Command => "command",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login_attempt" => Ok(EventKind::LoginAttempt),
            "command" => Ok(EventKind::Command),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

/// One observed attacker action. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EventRecord", try_from = "EventRecord")]
pub enum Event {
    LoginAttempt {
        timestamp: DateTime<Utc>,
        username: String,
        password: String,
        client_ip: String,
        geo: GeoInfo,
    },
    Command {
        timestamp: DateTime<Utc>,
        username: String,
        client_ip: String,
        command: String,
        geo: GeoInfo,
    },
}

impl Event {
    pub fn login_attempt(
        username: impl Into<String>,
        password: impl Into<String>,
        client_ip: impl ToString,
        geo: GeoInfo,
    ) -> Self {
        Event::LoginAttempt {
            timestamp: now(),
            username: username.into(),
            password: password.into(),
            client_ip: client_ip.to_string(),
            geo,
        }
    }

    pub fn command(
        username: impl Into<String>,
        client_ip: impl ToString,
        command: impl Into<String>,
        geo: GeoInfo,
    ) -> Self {
        Event::Command {
            timestamp: now(),
            username: username.into(),
            client_ip: client_ip.to_string(),
            command: command.into(),
            geo,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::LoginAttempt { .. } => EventKind::LoginAttempt,
            Event::Command { .. } => EventKind::Command,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::LoginAttempt { timestamp, .. } | Event::Command { timestamp, .. } => *timestamp,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Event::LoginAttempt { username, .. } | Event::Command { username, .. } => username,
        }
    }

    pub fn client_ip(&self) -> &str {
        match self {
            Event::LoginAttempt { client_ip, .. } | Event::Command { client_ip, .. } => client_ip,
        }
    }

    pub fn geo(&self) -> &GeoInfo {
        match self {
            Event::LoginAttempt { geo, .. } | Event::Command { geo, .. } => geo,
        }
    }

    /// Encodes the event as a single log line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Current time at the precision the log keeps, so a parsed line equals its source event.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Flat wire form of an [`Event`]. Field order matches the log schema:
/// `timestamp`, `type`, then the per-type fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub geo: GeoInfo,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        match event {
            Event::LoginAttempt {
                timestamp,
                username,
                password,
                client_ip,
                geo,
            } => EventRecord {
                timestamp,
                kind: EventKind::LoginAttempt,
                username,
                password: Some(password),
                client_ip,
                command: None,
                geo,
            },
            Event::Command {
                timestamp,
                username,
                client_ip,
                command,
                geo,
            } => EventRecord {
                timestamp,
                kind: EventKind::Command,
                username,
                password: None,
                client_ip,
                command: Some(command),
                geo,
            },
        }
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = String;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        match record.kind {
            EventKind::LoginAttempt => Ok(Event::LoginAttempt {
                timestamp: record.timestamp,
                username: record.username,
                password: record
                    .password
                    .ok_or_else(|| String::from("login_attempt record without password"))?,
                client_ip: record.client_ip,
                geo: record.geo,
            }),
            EventKind::Command => Ok(Event::Command {
                timestamp: record.timestamp,
                username: record.username,
                client_ip: record.client_ip,
                command: record
                    .command
                    .ok_or_else(|| String::from("command record without command"))?,
                geo: record.geo,
            }),
        }
    }
}

/// ISO-8601 UTC with microseconds and a trailing `Z`.
mod utc_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_login_attempt_line_layout() {
        let event = Event::LoginAttempt {
            timestamp: fixed_time(),
            username: "root".into(),
            password: "123456".into(),
            client_ip: "1.2.3.4".into(),
            geo: GeoInfo {
                country: Some("X".into()),
                city: Some("Y".into()),
                org: Some("Z".into()),
                lat: Some(1.0),
                lon: Some(2.0),
            },
        };

        let line = event.to_line().unwrap();
        assert_eq!(
            line,
            r#"{"timestamp":"2024-01-01T00:00:00.000000Z","type":"login_attempt","username":"root","password":"123456","client_ip":"1.2.3.4","geo":{"country":"X","city":"Y","org":"Z","lat":1.0,"lon":2.0}}"#
        );
    }

    #[test]
    fn test_command_line_has_no_password() {
        let event = Event::Command {
            timestamp: fixed_time(),
            username: "root".into(),
            client_ip: "1.2.3.4".into(),
            command: "ls -la".into(),
            geo: GeoInfo::default(),
        };

        let line = event.to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["command"], "ls -la");
        assert!(value.get("password").is_none());
        assert_eq!(value["geo"], serde_json::json!({}));
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_parses_schema_example_without_fraction() {
        let line = r#"{"timestamp":"2024-01-01T00:00:05Z","type":"command","username":"root","client_ip":"1.2.3.4","command":"ls -la","geo":{}}"#;
        let event = Event::from_line(line).unwrap();

        assert_eq!(event.kind(), EventKind::Command);
        assert_eq!(event.timestamp(), fixed_time() + chrono::Duration::seconds(5));
        assert!(event.geo().is_empty());
        match event {
            Event::Command { command, .. } => assert_eq!(command, "ls -la"),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_tag_dispatch_rejects_incomplete_records() {
        let no_password = r#"{"timestamp":"2024-01-01T00:00:00Z","type":"login_attempt","username":"root","client_ip":"1.2.3.4","geo":{}}"#;
        assert!(Event::from_line(no_password).is_err());

        let unknown_type = r#"{"timestamp":"2024-01-01T00:00:00Z","type":"logout","username":"root","client_ip":"1.2.3.4"}"#;
        assert!(Event::from_line(unknown_type).is_err());

        assert!(Event::from_line("not json").is_err());
    }

    #[test]
    fn test_local_geo_descriptor() {
        let local = GeoInfo::local();
        assert!(!local.is_empty());
        assert_eq!(local.country.as_deref(), Some("Localhost"));
        assert!(GeoInfo::default().is_empty());
    }

    #[test]
    fn test_event_kind_from_str() {
        assert_eq!("command".parse::<EventKind>(), Ok(EventKind::Command));
        assert_eq!("login_attempt".parse::<EventKind>(), Ok(EventKind::LoginAttempt));
        assert!("everything".parse::<EventKind>().is_err());
    }
}
