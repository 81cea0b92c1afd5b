//! Per-request helpers available on every served endpoint.
//!
//! `?_hl=curl|echo|ip|time|conf` answers with a helper instead of the
//! endpoint's response (append `.json` to force JSON output), and
//! `?_sleep=<duration>` delays the response.

use std::net::UdpSocket;
use std::time::Duration;

use axum::http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use axum::http::StatusCode;
use chrono::Local;
use rand::Rng;
use serde_json::json;

use super::echo::{self, ECHO_TIME_FORMAT};
use super::request::{EndpointResponse, RequestContext};
use crate::json::detect_content_type;
use crate::template::datefmt::parse_duration;

/// A fixed delay or a `min-max` range sampled per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    /// `"500ms"` or `"1s-3s"`. Empty or unparsable values give `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (min, max) = match raw.split_once('-') {
            Some((a, b)) if !a.is_empty() => (positive(a)?, positive(b)?),
            _ => {
                let d = positive(raw)?;
                (d, d)
            }
        };
        Some(Self {
            min: min.min(max),
            max: min.max(max),
        })
    }

    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        }
    }

    pub async fn sleep(&self) {
        tokio::time::sleep(self.sample()).await;
    }
}

fn positive(raw: &str) -> Option<Duration> {
    parse_duration(raw.trim())?.to_std().ok()
}

/// The `_sleep` query delay, if any.
#[must_use]
pub fn requested_sleep(req: &RequestContext) -> Option<ThinkTime> {
    req.query_value("_sleep").and_then(|s| ThinkTime::parse(&s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helper {
    Curl,
    Echo,
    Ip,
    Time,
    Conf,
}

impl Helper {
    /// The helper named by `_hl`, and whether JSON output was forced.
    #[must_use]
    pub fn from_request(req: &RequestContext) -> Option<(Self, bool)> {
        let hl = req.query_value("_hl")?.to_lowercase();
        let (name, force_json) = match hl.strip_suffix(".json") {
            Some(name) => (name.to_string(), true),
            None => (hl, false),
        };
        let helper = match name.as_str() {
            "curl" => Self::Curl,
            "echo" => Self::Echo,
            "ip" => Self::Ip,
            "time" => Self::Time,
            "conf" => Self::Conf,
            _ => return None,
        };
        Some((helper, force_json || wants_json(req)))
    }

    /// `body` is the endpoint's stored body, used by `conf`.
    #[must_use]
    pub fn respond(self, req: &RequestContext, body: &str, use_json: bool) -> EndpointResponse {
        match self {
            Self::Curl => EndpointResponse::text(StatusCode::OK, curl_command(req)),
            Self::Echo if use_json => echo::EchoMode::Json.respond(req),
            Self::Echo => echo::EchoMode::Dump.respond(req),
            Self::Ip => {
                let info = ip_info(req);
                if use_json {
                    EndpointResponse::json(StatusCode::OK, &info)
                } else {
                    let text = serde_json::to_string_pretty(&info).unwrap_or_default();
                    EndpointResponse::text(StatusCode::OK, text)
                }
            }
            Self::Time => {
                let now = Local::now().format(ECHO_TIME_FORMAT).to_string();
                if use_json {
                    EndpointResponse::json(StatusCode::OK, &json!({ "time": now }))
                } else {
                    EndpointResponse::text(StatusCode::OK, now)
                }
            }
            Self::Conf => EndpointResponse::new(StatusCode::OK)
                .with_body(body.to_string(), detect_content_type(body.as_bytes())),
        }
    }
}

/// JSON for API clients: a JSON request, or a non-browser user agent.
fn wants_json(req: &RequestContext) -> bool {
    let json_typed = [CONTENT_TYPE, ACCEPT].iter().any(|h| {
        req.header(h.as_str())
            .is_some_and(|v| v.contains("application/json"))
    });
    let browser = req
        .header(USER_AGENT.as_str())
        .is_some_and(|ua| ua.contains("Mozilla"));
    json_typed || !browser
}

fn bash_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A curl command line reproducing the request, without the `_hl` parameter.
#[must_use]
pub fn curl_command(req: &RequestContext) -> String {
    let mut parts = vec![format!("curl -X {}", req.method)];
    if !req.body.is_empty() {
        parts.push(format!("-d {}", bash_escape(&String::from_utf8_lossy(&req.body))));
    }

    let mut names: Vec<&str> = req.headers.keys().map(|k| k.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    for name in names {
        let values: Vec<&str> = req
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        parts.push(format!("-H {}", bash_escape(&format!("{name}: {}", values.join(" ")))));
    }

    let query: Vec<(String, String)> = req.query().into_iter().filter(|(k, _)| k != "_hl").collect();
    let mut url = format!("http://{}{}", req.host(), req.path());
    if !query.is_empty() {
        url.push('?');
        url.push_str(
            &url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish(),
        );
    }
    parts.push(bash_escape(&url));
    parts.join(" ")
}

fn ip_info(req: &RequestContext) -> serde_json::Value {
    json!({
        "clientIp": req.client_ip(),
        "remoteAddr": req.remote_addr.to_string(),
        "mainIP": outbound_ip(),
    })
}

/// The local address used for outbound traffic. No packet is sent.
fn outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;

    #[test]
    fn think_time_parsing() {
        let fixed = ThinkTime::parse("150ms").unwrap();
        assert_eq!(fixed.sample(), Duration::from_millis(150));

        let range = ThinkTime::parse("2s-1s").unwrap();
        let sampled = range.sample();
        assert!(sampled >= Duration::from_secs(1) && sampled <= Duration::from_secs(2));

        assert!(ThinkTime::parse("").is_none());
        assert!(ThinkTime::parse("soon").is_none());
        assert!(ThinkTime::parse("-1s").is_none());
    }

    #[test]
    fn helper_selection() {
        let req = request("GET", "/a?_hl=TIME.json", "");
        assert_eq!(Helper::from_request(&req), Some((Helper::Time, true)));
        assert!(Helper::from_request(&request("GET", "/a?_hl=nope", "")).is_none());
        assert!(Helper::from_request(&request("GET", "/a", "")).is_none());
    }

    #[test]
    fn curl_reproduction_drops_helper_param() {
        let mut req = request("POST", "/a?x=1&_hl=curl", "it's");
        req.headers.insert("host", "localhost:5003".parse().unwrap());
        req.headers.insert("x-b", "2".parse().unwrap());
        assert_eq!(
            curl_command(&req),
            r"curl -X POST -d 'it'\''s' -H 'host: localhost:5003' -H 'x-b: 2' 'http://localhost:5003/a?x=1'"
        );
    }

    #[test]
    fn conf_returns_stored_body() {
        let req = request("GET", "/a?_hl=conf", "");
        let resp = Helper::Conf.respond(&req, r#"{"a":1}"#, true);
        assert_eq!(&resp.body[..], br#"{"a":1}"#);
        assert_eq!(resp.content_type(), Some("application/json; charset=utf-8"));
    }
}
