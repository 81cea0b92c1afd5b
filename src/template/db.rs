//! `@db-instance` and `@db-query` directives backed by the `sqlx` any-driver.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row};

use super::context::{RenderContext, Var};
use super::{Directive, DirectiveError, DirectiveOutput, DirectiveParam};

static TEXT_VAR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").ok());
static BIND_VAR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"#(\w+)#").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placeholder {
    Question,
    Dollar,
}

impl Placeholder {
    fn for_dsn(dsn: &str) -> Self {
        if dsn.starts_with("postgres") {
            Self::Dollar
        } else {
            Self::Question
        }
    }

    fn render(self, index: usize) -> String {
        match self {
            Self::Question => "?".into(),
            Self::Dollar => format!("${index}"),
        }
    }
}

/// A pool opened by `@db-instance`.
pub struct DbHandle {
    pool: AnyPool,
    placeholder: Placeholder,
    global: bool,
}

impl DbHandle {
    /// Closes the pool unless it is shared across renders.
    pub(crate) async fn close(self) {
        if !self.global {
            self.pool.close().await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceParam {
    dsn: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    global: bool,
}

/// Opens a connection pool bound to the key. `global: true` pools live
/// for the process and are shared between renders with the same DSN.
#[derive(Default)]
pub struct DbInstance {
    globals: Mutex<HashMap<String, AnyPool>>,
}

#[async_trait]
impl Directive for DbInstance {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: InstanceParam = param.parse()?;
        let dsn = normalize_dsn(&param.driver, &param.dsn);

        let pool = if param.global {
            let mut globals = self.globals.lock();
            if let Some(pool) = globals.get(&dsn) {
                pool.clone()
            } else {
                let pool = connect(&dsn)?;
                globals.insert(dsn.clone(), pool.clone());
                pool
            }
        } else {
            connect(&dsn)?
        };

        ctx.set(
            key,
            Var::Db(DbHandle {
                pool,
                placeholder: Placeholder::for_dsn(&dsn),
                global: param.global,
            }),
        );
        Ok(DirectiveOutput::Delete)
    }
}

fn connect(dsn: &str) -> Result<AnyPool, sqlx::Error> {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(dsn)
}

fn normalize_dsn(driver: &str, dsn: &str) -> String {
    let dsn = dsn.trim();
    if dsn.contains("://") || dsn.starts_with("sqlite:") {
        return dsn.to_string();
    }
    match driver.trim() {
        "sqlite" | "sqlite3" => format!("sqlite:{dsn}"),
        "postgres" | "pgx" => format!("postgres://{dsn}"),
        _ => dsn.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParam {
    #[serde(default = "default_instance")]
    instance: String,
    query: Value,
    #[serde(default)]
    result_type: String,
    #[serde(default)]
    max_rows: usize,
}

fn default_instance() -> String {
    "default".into()
}

/// Runs a query against an instance and stores the result under the key.
///
/// `{name}` is replaced textually with a context variable; `#name#`
/// becomes a bound parameter. `resultType` is `map` (default) or
/// `json-object` for the first row, or `json-array` for all rows.
pub struct DbQuery;

#[async_trait]
impl Directive for DbQuery {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: QueryParam = param.parse()?;
        let (pool, placeholder) = match ctx.get(&param.instance) {
            Some(Var::Db(handle)) => (handle.pool.clone(), handle.placeholder),
            _ => return Err(DirectiveError::MissingVar(param.instance)),
        };

        let sql = match &param.query {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => {
                return Err(DirectiveError::InvalidParam(
                    "query must be a string or an array of strings".into(),
                ))
            }
        };
        let (sql, binds) = prepare(ctx, &sql, placeholder)?;
        tracing::debug!(sql = %sql, binds = binds.len(), "template query");

        let mut query = sqlx::query::<Any>(&sql);
        for value in binds {
            query = bind(query, value);
        }
        let mut rows: Vec<AnyRow> = query.fetch_all(&pool).await?;
        if param.max_rows > 0 {
            rows.truncate(param.max_rows);
        }
        let mut rows = rows.iter().map(row_to_map);

        let var = match param.result_type.as_str() {
            "" | "map" => Var::Value(Value::Object(rows.next().unwrap_or_default())),
            "json-object" => Var::Raw(Value::Object(rows.next().unwrap_or_default()).to_string()),
            "json-array" => Var::Raw(Value::Array(rows.map(Value::Object).collect()).to_string()),
            other => {
                return Err(DirectiveError::InvalidParam(format!(
                    "unknown resultType '{other}'"
                )))
            }
        };
        ctx.set(key, var);
        Ok(DirectiveOutput::Delete)
    }
}

/// Expands `{var}` text and turns `#var#` markers into bind parameters.
pub(crate) fn prepare(
    ctx: &RenderContext,
    sql: &str,
    placeholder: Placeholder,
) -> Result<(String, Vec<Value>), DirectiveError> {
    let (Some(text_re), Some(bind_re)) = (TEXT_VAR.as_ref(), BIND_VAR.as_ref()) else {
        return Ok((sql.to_string(), Vec::new()));
    };

    let expanded = text_re.replace_all(sql, |caps: &Captures<'_>| match ctx.value(&caps[1]) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });

    let mut binds = Vec::new();
    let mut missing = None;
    let prepared = bind_re.replace_all(&expanded, |caps: &Captures<'_>| {
        if let Some(v) = ctx.value(&caps[1]) {
            binds.push(v);
        } else {
            missing.get_or_insert_with(|| caps[1].to_string());
        }
        placeholder.render(binds.len())
    });
    if let Some(name) = missing {
        return Err(DirectiveError::MissingVar(name));
    }
    Ok((prepared.into_owned(), binds))
}

fn bind<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

fn row_to_map(row: &AnyRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| (purify_column_name(column.name()), column_value(row, i)))
        .collect()
}

fn column_value(row: &AnyRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map_or(Value::Null, |s| match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => crate::expr::number_value(n),
            _ => Value::String(s),
        });
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map_or(Value::Null, crate::expr::number_value);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map_or(Value::Null, Value::Bool);
    }
    Value::Null
}

/// `max(score)` becomes `score`.
pub(crate) fn purify_column_name(name: &str) -> String {
    match (name.rfind('('), name.rfind(')')) {
        (Some(open), Some(close)) if open < close => name[open + 1..close].trim().to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use serde_json::json;

    #[test]
    fn purifies_aggregate_columns() {
        assert_eq!(purify_column_name("max(score)"), "score");
        assert_eq!(purify_column_name("count( id )"), "id");
        assert_eq!(purify_column_name("name"), "name");
    }

    #[test]
    fn prepares_text_and_bind_variables() {
        let mut ctx = RenderContext::new(Local::now());
        ctx.set_value("table", json!("users"));
        ctx.set_value("id", json!(7));
        ctx.set_value("name", json!("bob"));

        let (sql, binds) = prepare(
            &ctx,
            "SELECT * FROM {table} WHERE id = #id# AND name = #name#",
            Placeholder::Question,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE id = ? AND name = ?");
        assert_eq!(binds, vec![json!(7), json!("bob")]);

        let (sql, _) = prepare(&ctx, "WHERE a = #id# OR b = #id#", Placeholder::Dollar).unwrap();
        assert_eq!(sql, "WHERE a = $1 OR b = $2");
    }

    #[test]
    fn missing_bind_variable_fails() {
        let ctx = RenderContext::new(Local::now());
        let result = prepare(&ctx, "WHERE id = #id#", Placeholder::Question);
        assert!(matches!(result, Err(DirectiveError::MissingVar(ref n)) if n == "id"));
    }

    #[test]
    fn dsn_normalization() {
        assert_eq!(normalize_dsn("sqlite3", "demo.db"), "sqlite:demo.db");
        assert_eq!(normalize_dsn("", "sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_dsn("postgres", "u:p@h/db"), "postgres://u:p@h/db");
    }

    #[tokio::test]
    async fn query_without_instance_fails() {
        let mut ctx = RenderContext::new(Local::now());
        let result = DbQuery
            .evaluate(&mut ctx, "rows", DirectiveParam::Json(json!({"query": "SELECT 1"})))
            .await;
        assert!(matches!(result, Err(DirectiveError::MissingVar(ref n)) if n == "default"));
    }
}
