//! `@redis-instance` and `@redis` directives.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::Value;

use super::context::{RenderContext, Var};
use super::{Directive, DirectiveError, DirectiveOutput, DirectiveParam};

/// A connection opened by `@redis-instance`.
pub struct RedisHandle(MultiplexedConnection);

#[derive(Debug, Deserialize)]
struct InstanceParam {
    addr: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    db: u32,
}

impl InstanceParam {
    fn url(&self) -> String {
        let addr = self.addr.trim().trim_start_matches("redis://");
        if self.password.is_empty() {
            format!("redis://{addr}/{}", self.db)
        } else {
            format!("redis://:{}@{addr}/{}", self.password, self.db)
        }
    }
}

pub struct RedisInstance;

#[async_trait]
impl Directive for RedisInstance {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: InstanceParam = param.parse()?;
        let client = redis::Client::open(param.url())?;
        let conn = client.get_multiplexed_async_connection().await?;
        ctx.set(key, Var::Redis(RedisHandle(conn)));
        Ok(DirectiveOutput::Delete)
    }
}

/// `instance key [field]`: `GET key`, or `HGET key field` when a field is given.
///
/// Results that parse as JSON are injected raw.
pub struct RedisGet;

#[async_trait]
impl Directive for RedisGet {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        _key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let text = param.text();
        let args: Vec<&str> = text.split_whitespace().collect();
        let (instance, redis_key, field) = match args.as_slice() {
            [instance, key] => (*instance, *key, None),
            [instance, key, field] => (*instance, *key, Some(*field)),
            _ => {
                return Err(DirectiveError::InvalidParam(format!(
                    "expected 'instance key [field]', got '{text}'"
                )))
            }
        };

        let Some(Var::Redis(RedisHandle(conn))) = ctx.get_mut(instance) else {
            return Err(DirectiveError::MissingVar(instance.to_string()));
        };
        let result: Option<String> = match field {
            Some(field) => conn.hget(redis_key, field).await?,
            None => conn.get(redis_key).await?,
        };

        Ok(match result {
            None => DirectiveOutput::Set(Value::Null),
            Some(s) if serde_json::from_str::<Value>(&s).is_ok() => DirectiveOutput::SetRaw(s),
            Some(s) => DirectiveOutput::Set(Value::String(s)),
        })
    }
}
