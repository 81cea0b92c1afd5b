//! Built-in utility routes.
//!
//! Served when no endpoint matches, and for definitions under
//! `/_internal/<name>`.

use axum::http::StatusCode;
use chrono::Local;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use crate::endpoint::echo::{EchoMode, ECHO_TIME_FORMAT};
use crate::endpoint::helpers::{curl_command, Helper};
use crate::endpoint::{EndpointResponse, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Version,
    Time,
    Ip,
    Echo,
    Curl,
    Counter,
}

impl Diagnostic {
    pub const ALL: [Self; 6] = [
        Self::Version,
        Self::Time,
        Self::Ip,
        Self::Echo,
        Self::Curl,
        Self::Counter,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Time => "time",
            Self::Ip => "ip",
            Self::Echo => "echo",
            Self::Curl => "curl",
            Self::Counter => "counter",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_matches('/');
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// The diagnostic a bare path such as `/time` names.
    #[must_use]
    pub fn for_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix('/')?;
        if name.contains('/') {
            return None;
        }
        Self::from_name(name)
    }
}

/// Distinct keys `/counter` will track; further new keys read as 0.
pub const MAX_COUNTERS: usize = 1024;

/// Named counters behind `/counter`.
#[derive(Debug, Default)]
pub struct Counters {
    values: DashMap<String, i64>,
}

impl Counters {
    /// Adds `delta` to `key` and returns the new value, saturating at the
    /// `i64` bounds.
    pub fn add(&self, key: &str, delta: i64) -> i64 {
        if let Some(mut entry) = self.values.get_mut(key) {
            *entry = entry.saturating_add(delta);
            return *entry;
        }
        if self.values.len() >= MAX_COUNTERS {
            tracing::warn!(key, limit = MAX_COUNTERS, "counter limit reached, key not tracked");
            return 0;
        }
        let mut entry = self.values.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(delta);
        *entry
    }

    #[must_use]
    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).map_or(0, |v| *v)
    }
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub branch: &'static str,
    pub build_time: &'static str,
    pub profile: &'static str,
    pub target: &'static str,
    pub rustc: &'static str,
    pub features: Vec<&'static str>,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            commit: env!("LIVEMOCK_GIT_SHORT"),
            branch: env!("LIVEMOCK_GIT_BRANCH"),
            build_time: env!("LIVEMOCK_BUILD_TIME"),
            profile: env!("LIVEMOCK_BUILD_PROFILE"),
            target: env!("LIVEMOCK_TARGET"),
            rustc: env!("LIVEMOCK_RUSTC_VERSION"),
            features: enabled_features(),
        }
    }
}

fn enabled_features() -> Vec<&'static str> {
    let features: &[&str] = &[
        #[cfg(feature = "sqlite")]
        "sqlite",
        #[cfg(feature = "postgres")]
        "postgres",
        #[cfg(feature = "redis")]
        "redis",
    ];
    features.to_vec()
}

#[must_use]
pub fn respond(diagnostic: Diagnostic, req: &RequestContext, counters: &Counters) -> EndpointResponse {
    match diagnostic {
        Diagnostic::Version => {
            let info = serde_json::to_value(VersionInfo::current()).unwrap_or_default();
            EndpointResponse::json(StatusCode::OK, &info)
        }
        Diagnostic::Time => EndpointResponse::json(
            StatusCode::OK,
            &json!({ "time": Local::now().format(ECHO_TIME_FORMAT).to_string() }),
        ),
        Diagnostic::Ip => Helper::Ip.respond(req, "", true),
        Diagnostic::Echo => {
            let mode = req.query_value("mode").unwrap_or_else(|| "json".into());
            EchoMode::parse(&mode).respond(req)
        }
        Diagnostic::Curl => EndpointResponse::text(StatusCode::OK, curl_command(req)),
        Diagnostic::Counter => {
            let key = req.query_value("key").unwrap_or_default();
            let add = req
                .query_value("add")
                .and_then(|a| a.trim().parse::<i64>().ok())
                .unwrap_or(0);
            let value = counters.add(&key, add);
            EndpointResponse::json(StatusCode::OK, &json!({ "key": key, "value": value }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;
    use serde_json::Value;

    #[test]
    fn names_and_paths() {
        assert_eq!(Diagnostic::for_path("/version"), Some(Diagnostic::Version));
        assert_eq!(Diagnostic::for_path("/counter/x"), None);
        assert_eq!(Diagnostic::from_name("curl"), Some(Diagnostic::Curl));
        assert_eq!(Diagnostic::for_path("/nope"), None);
    }

    #[test]
    fn counters_accumulate() {
        let counters = Counters::default();
        let resp = respond(Diagnostic::Counter, &request("GET", "/counter?key=hits&add=2", ""), &counters);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["value"], 2);
        counters.add("hits", 3);
        assert_eq!(counters.get("hits"), 5);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let counters = Counters::default();
        counters.add("big", i64::MAX);
        assert_eq!(counters.add("big", 1), i64::MAX);
        counters.add("small", i64::MIN);
        assert_eq!(counters.add("small", -1), i64::MIN);
    }

    #[test]
    fn counter_keys_are_capped() {
        let counters = Counters::default();
        for i in 0..MAX_COUNTERS {
            counters.add(&format!("k{i}"), 1);
        }
        assert_eq!(counters.add("one-too-many", 5), 0);
        assert_eq!(counters.get("one-too-many"), 0);
        // Existing keys keep counting.
        assert_eq!(counters.add("k0", 1), 2);
    }

    #[test]
    fn version_reports_package() {
        let resp = respond(Diagnostic::Version, &request("GET", "/version", ""), &Counters::default());
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["name"], "livemock");
        for field in ["commit", "branch", "build_time", "profile", "target", "rustc"] {
            assert!(body[field].as_str().is_some_and(|v| !v.is_empty()), "{field}");
        }
    }
}
