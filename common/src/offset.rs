use std::{fmt, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{clock::OffsetClock, config::ClockConfig};

pub const HTTP_CODE_OK: u16 = 200;
pub const HTTP_CODE_MOVED_PERMANENTLY: u16 = 301;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOffset(i32);

impl TimeOffset {
    pub const fn from_seconds(seconds: i32) -> Self {
        Self(seconds)
    }

    pub const fn seconds(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TimeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetError {
    #[error("unable to connect: {0}")]
    NetworkUnavailable(String),
    #[error("GET failed with HTTP {0}")]
    HttpStatus(u16),
    #[error("invalid time api payload: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking HTTP transport used to reach the time-zone lookup endpoint.
///
/// Implementations must map "cannot open a session" and transport failures to
/// [`OffsetError::NetworkUnavailable`]; status handling is left to the caller.
pub trait TimeApiClient {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<TimeApiResponse, OffsetError>;
}

#[derive(Debug, Deserialize)]
struct TimeApiPayload {
    raw_offset: i32,
    dst_offset: i32,
}

pub fn is_success_status(status: u16) -> bool {
    status == HTTP_CODE_OK || status == HTTP_CODE_MOVED_PERMANENTLY
}

pub fn parse_offset(body: &[u8]) -> Result<TimeOffset, OffsetError> {
    let payload: TimeApiPayload =
        serde_json::from_slice(body).map_err(|err| OffsetError::Parse(err.to_string()))?;

    payload
        .raw_offset
        .checked_add(payload.dst_offset)
        .map(TimeOffset::from_seconds)
        .ok_or_else(|| OffsetError::Parse("raw_offset + dst_offset overflows".to_string()))
}

pub struct TimeOffsetResolver<C> {
    client: C,
    url: String,
    timeout: Duration,
}

impl<C: TimeApiClient> TimeOffsetResolver<C> {
    pub fn new(client: C, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(client: C, config: &ClockConfig) -> Self {
        Self::new(
            client,
            config.time_api_url.clone(),
            Duration::from_millis(config.http_timeout_ms),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolve(&mut self) -> Result<TimeOffset, OffsetError> {
        let response = self.client.get(&self.url, self.timeout)?;
        if !is_success_status(response.status) {
            return Err(OffsetError::HttpStatus(response.status));
        }
        parse_offset(&response.body)
    }

    /// Resolves and, on success only, applies the offset to `clock`.
    pub fn refresh(&mut self, clock: &mut OffsetClock) -> Result<TimeOffset, OffsetError> {
        let offset = self.resolve()?;
        clock.set_offset(offset);
        Ok(offset)
    }

    pub fn attempt_refresh(&mut self, clock: &mut OffsetClock) -> bool {
        self.refresh(clock).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use pretty_assertions::assert_eq;

    /// Replays scripted responses; an exhausted script keeps failing.
    #[derive(Default)]
    pub(crate) struct ScriptedTimeApi {
        pub responses: VecDeque<Result<TimeApiResponse, OffsetError>>,
        pub requests: Vec<(String, Duration)>,
    }

    impl ScriptedTimeApi {
        pub fn push_json(&mut self, status: u16, raw_offset: i32, dst_offset: i32) {
            let body = serde_json::json!({
                "abbreviation": "CEST",
                "raw_offset": raw_offset,
                "dst_offset": dst_offset,
                "timezone": "Europe/Berlin",
            });
            self.responses.push_back(Ok(TimeApiResponse {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            }));
        }

        pub fn push_status(&mut self, status: u16) {
            self.responses.push_back(Ok(TimeApiResponse {
                status,
                body: b"<html>error</html>".to_vec(),
            }));
        }

        pub fn push_unreachable(&mut self) {
            self.responses.push_back(Err(OffsetError::NetworkUnavailable(
                "connection refused".to_string(),
            )));
        }
    }

    impl TimeApiClient for ScriptedTimeApi {
        fn get(&mut self, url: &str, timeout: Duration) -> Result<TimeApiResponse, OffsetError> {
            self.requests.push((url.to_string(), timeout));
            self.responses.pop_front().unwrap_or_else(|| {
                Err(OffsetError::NetworkUnavailable("script exhausted".to_string()))
            })
        }
    }

    fn resolver(api: ScriptedTimeApi) -> TimeOffsetResolver<ScriptedTimeApi> {
        TimeOffsetResolver::from_config(api, &ClockConfig::default())
    }

    #[test]
    fn applies_raw_plus_dst_offset() {
        for (raw, dst) in [(3600, 3600), (-18_000, 3600), (19_800, 0), (0, 0), (-36_000, 0)] {
            let mut api = ScriptedTimeApi::default();
            api.push_json(HTTP_CODE_OK, raw, dst);
            let mut resolver = resolver(api);
            let mut clock = OffsetClock::new();

            assert!(resolver.attempt_refresh(&mut clock));
            assert_eq!(clock.offset(), Some(TimeOffset::from_seconds(raw + dst)));
        }
    }

    #[test]
    fn moved_permanently_counts_as_success() {
        let mut api = ScriptedTimeApi::default();
        api.push_json(HTTP_CODE_MOVED_PERMANENTLY, 3600, 0);
        let mut resolver = resolver(api);
        let mut clock = OffsetClock::new();

        assert!(resolver.attempt_refresh(&mut clock));
        assert_eq!(clock.offset(), Some(TimeOffset::from_seconds(3600)));
    }

    #[test]
    fn other_statuses_leave_offset_unchanged() {
        for status in [204, 302, 400, 404, 429, 500, 503] {
            let mut api = ScriptedTimeApi::default();
            api.push_status(status);
            let mut resolver = resolver(api);
            let mut clock = OffsetClock::new();
            clock.set_offset(TimeOffset::from_seconds(7_200));

            assert_eq!(
                resolver.refresh(&mut clock),
                Err(OffsetError::HttpStatus(status))
            );
            assert_eq!(clock.offset(), Some(TimeOffset::from_seconds(7_200)));
        }
    }

    #[test]
    fn unreachable_endpoint_is_reported_without_mutation() {
        let mut api = ScriptedTimeApi::default();
        api.push_unreachable();
        let mut resolver = resolver(api);
        let mut clock = OffsetClock::new();

        assert!(!resolver.attempt_refresh(&mut clock));
        assert_eq!(clock.offset(), None);
    }

    #[test]
    fn missing_fields_are_a_parse_error() {
        let mut api = ScriptedTimeApi::default();
        api.responses.push_back(Ok(TimeApiResponse {
            status: HTTP_CODE_OK,
            body: br#"{"raw_offset":3600}"#.to_vec(),
        }));
        let mut resolver = resolver(api);
        let mut clock = OffsetClock::new();
        clock.set_offset(TimeOffset::from_seconds(-3_600));

        assert!(matches!(
            resolver.refresh(&mut clock),
            Err(OffsetError::Parse(_))
        ));
        assert_eq!(clock.offset(), Some(TimeOffset::from_seconds(-3_600)));
    }

    #[test]
    fn rejects_non_integer_and_overflowing_offsets() {
        assert!(matches!(
            parse_offset(br#"{"raw_offset":"3600","dst_offset":0}"#),
            Err(OffsetError::Parse(_))
        ));
        assert!(matches!(
            parse_offset(br#"{"raw_offset":2147483647,"dst_offset":1}"#),
            Err(OffsetError::Parse(_))
        ));
        assert!(matches!(parse_offset(b"not json"), Err(OffsetError::Parse(_))));
    }

    #[test]
    fn requests_configured_url_with_timeout() {
        let mut api = ScriptedTimeApi::default();
        api.push_json(HTTP_CODE_OK, 0, 0);
        let mut resolver = TimeOffsetResolver::new(
            api,
            "http://example.test/api/ip",
            Duration::from_secs(3),
        );

        resolver.resolve().unwrap();

        assert_eq!(
            resolver.client().requests,
            vec![(
                "http://example.test/api/ip".to_string(),
                Duration::from_secs(3)
            )]
        );
    }
}
