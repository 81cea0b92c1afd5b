use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde_json::Value;

use super::time::TimeStepper;
use crate::expr::Bindings;

/// Source of "now" for date directives.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// A value held in the render context.
pub enum Var {
    Value(Value),
    /// Serialized JSON that is injected verbatim when substituted.
    Raw(String),
    Stepper(TimeStepper),
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    Db(super::db::DbHandle),
    #[cfg(feature = "redis")]
    Redis(super::redis::RedisHandle),
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
            Self::Stepper(_) => f.write_str("Stepper"),
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            Self::Db(_) => f.write_str("Db"),
            #[cfg(feature = "redis")]
            Self::Redis(_) => f.write_str("Redis"),
        }
    }
}

/// Variable bag shared by the directives of a single render.
///
/// Created per render and consumed by [`RenderContext::close`], which
/// releases any connection handles that directives opened.
#[derive(Debug)]
pub struct RenderContext {
    now: DateTime<Local>,
    vars: HashMap<String, Var>,
}

impl RenderContext {
    #[must_use]
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now,
            vars: HashMap::new(),
        }
    }

    /// The instant this render started; every date directive sees the same value.
    #[must_use]
    pub const fn now(&self) -> DateTime<Local> {
        self.now
    }

    pub fn set(&mut self, key: impl Into<String>, var: Var) {
        self.vars.insert(key.into(), var);
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.set(key, Var::Value(value));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Var> {
        self.vars.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Var> {
        self.vars.get_mut(key)
    }

    /// A JSON view of a variable. Raw JSON is parsed, resource handles have none.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        match self.vars.get(key)? {
            Var::Value(v) => Some(v.clone()),
            Var::Raw(raw) => {
                Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            }
            _ => None,
        }
    }

    /// Data variables as expression bindings.
    #[must_use]
    pub fn bindings(&self) -> Bindings {
        self.vars
            .keys()
            .filter_map(|k| self.value(k).map(|v| (k.clone(), v)))
            .collect()
    }

    pub async fn close(self) {
        for (name, var) in self.vars {
            match var {
                #[cfg(any(feature = "sqlite", feature = "postgres"))]
                Var::Db(handle) => {
                    tracing::debug!(var = %name, "closing template database handle");
                    handle.close().await;
                }
                #[cfg(feature = "redis")]
                Var::Redis(handle) => {
                    tracing::debug!(var = %name, "dropping template redis connection");
                    drop(handle);
                }
                other => {
                    let _ = (name, other);
                }
            }
        }
    }
}
