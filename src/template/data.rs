//! Directives over accumulated context data: `@val-eval`, `@merge-json`, `@group-json`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::context::{RenderContext, Var};
use super::{Directive, DirectiveError, DirectiveOutput, DirectiveParam};
use crate::expr::Expression;

/// Evaluates an expression over the context variables.
///
/// The result is stored under the key for later directives. When the
/// expression is just the name of a raw JSON variable, the JSON is
/// injected as is.
pub struct ValEval;

#[async_trait]
impl Directive for ValEval {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let mut source = param.text();
        if source.is_empty() {
            source = key.to_string();
        }
        let expr = Expression::compile(&source)?;

        if let Some(Var::Raw(raw)) = expr.as_variable().and_then(|name| ctx.get(name)) {
            let raw = raw.clone();
            ctx.set(key, Var::Raw(raw.clone()));
            return Ok(DirectiveOutput::SetRaw(raw));
        }

        let result = expr.evaluate(&ctx.bindings())?;
        ctx.set_value(key, result.clone());
        Ok(DirectiveOutput::Set(result))
    }
}

#[derive(Debug, Deserialize)]
struct MergeParam {
    objects: Vec<String>,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    default: Option<Map<String, Value>>,
}

/// Left-joins arrays held in context variables.
///
/// With `by`, rows of later arrays are matched to rows of the first
/// array on that field. Without it, rows are merged by position.
/// Fields still missing afterwards are taken from `default`.
pub struct MergeJson;

#[async_trait]
impl Directive for MergeJson {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: MergeParam = param.parse()?;
        let mut arrays = Vec::with_capacity(param.objects.len());
        for name in &param.objects {
            arrays.push(rows_of(ctx, name)?);
        }

        let mut merged = merge_rows(arrays, param.by.as_deref());
        if let Some(defaults) = &param.default {
            for row in &mut merged {
                for (field, value) in defaults {
                    row.entry(field.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        let raw = serde_json::to_string(&merged)
            .map_err(|e| DirectiveError::InvalidParam(e.to_string()))?;
        ctx.set(key, Var::Raw(raw.clone()));
        Ok(DirectiveOutput::SetRaw(raw))
    }
}

fn rows_of(ctx: &RenderContext, name: &str) -> Result<Vec<Map<String, Value>>, DirectiveError> {
    match ctx.value(name) {
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        Some(Value::Object(row)) => Ok(vec![row]),
        Some(_) => Err(DirectiveError::InvalidParam(format!(
            "context variable '{name}' is not a JSON array"
        ))),
        None => Err(DirectiveError::MissingVar(name.to_string())),
    }
}

fn join_key(row: &Map<String, Value>, by: &str) -> Option<String> {
    match row.get(by)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn merge_rows(arrays: Vec<Vec<Map<String, Value>>>, by: Option<&str>) -> Vec<Map<String, Value>> {
    let mut arrays = arrays.into_iter();
    let Some(mut base) = arrays.next() else {
        return Vec::new();
    };

    for other in arrays {
        match by {
            Some(by) => {
                for row in other {
                    let Some(k) = join_key(&row, by) else {
                        continue;
                    };
                    if let Some(target) = base
                        .iter_mut()
                        .find(|b| join_key(b, by).as_deref() == Some(k.as_str()))
                    {
                        target.extend(row);
                    }
                }
            }
            None => {
                for (i, row) in other.into_iter().enumerate() {
                    if let Some(target) = base.get_mut(i) {
                        target.extend(row);
                    } else {
                        base.push(row);
                    }
                }
            }
        }
    }
    base
}

#[derive(Debug, Deserialize)]
struct GroupParam {
    #[serde(rename = "group-by")]
    group_by: String,
    #[serde(rename = "flatten-key")]
    flatten_key: String,
    #[serde(rename = "flatten-values")]
    flatten_values: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    stepper: Option<String>,
    #[serde(default)]
    fill: Option<Value>,
    #[serde(rename = "fill-start", default)]
    fill_start: Option<f64>,
    #[serde(rename = "fill-end", default)]
    fill_end: Option<f64>,
    #[serde(rename = "fill-step", default)]
    fill_step: Option<f64>,
}

/// Groups rows by one field and flattens another into a per-group array.
///
/// The output is `[{<group-by>: g, <flatten-key>: [values...]}]`. When a
/// stepper (or a numeric `fill-start`/`fill-end`/`fill-step` range) is
/// given, each group gets exactly one value per bucket: the row whose
/// `flatten-key` equals the bucket label, or the fill value. The result
/// replaces the source variable.
pub struct GroupJson;

#[async_trait]
impl Directive for GroupJson {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: GroupParam = param.parse()?;
        let source = param.source.clone().unwrap_or_else(|| key.to_string());
        let rows = rows_of(ctx, &source)?;

        let (buckets, stepper_fill) = buckets(ctx, &param)?;
        let fill = param.fill.clone().or(stepper_fill).unwrap_or(Value::Null);

        let mut groups: Vec<(Value, Vec<&Map<String, Value>>)> = Vec::new();
        for row in &rows {
            let g = row.get(&param.group_by).cloned().unwrap_or(Value::Null);
            match groups.iter_mut().find(|(existing, _)| *existing == g) {
                Some((_, members)) => members.push(row),
                None => groups.push((g, vec![row])),
            }
        }

        let flattened: Vec<Value> = groups
            .into_iter()
            .map(|(g, members)| {
                let values: Vec<Value> = match &buckets {
                    Some(labels) => labels
                        .iter()
                        .map(|label| {
                            members
                                .iter()
                                .find(|row| {
                                    row.get(&param.flatten_key)
                                        .is_some_and(|v| same_label(v, label))
                                })
                                .and_then(|row| row.get(&param.flatten_values).cloned())
                                .unwrap_or_else(|| fill.clone())
                        })
                        .collect(),
                    None => members
                        .iter()
                        .map(|row| row.get(&param.flatten_values).cloned().unwrap_or(Value::Null))
                        .collect(),
                };
                let mut out = Map::new();
                out.insert(param.group_by.clone(), g);
                out.insert(param.flatten_key.clone(), Value::Array(values));
                Value::Object(out)
            })
            .collect();

        let raw = serde_json::to_string(&flattened)
            .map_err(|e| DirectiveError::InvalidParam(e.to_string()))?;
        ctx.set(key, Var::Raw(raw));
        Ok(DirectiveOutput::Delete)
    }
}

fn buckets(
    ctx: &mut RenderContext,
    param: &GroupParam,
) -> Result<(Option<Vec<Value>>, Option<Value>), DirectiveError> {
    if let Some(name) = &param.stepper {
        let Some(Var::Stepper(stepper)) = ctx.get_mut(name) else {
            return Err(DirectiveError::MissingVar(name.clone()));
        };
        stepper.reset();
        let labels = std::iter::from_fn(|| stepper.step())
            .map(|s| Value::String(s.label))
            .collect();
        return Ok((Some(labels), Some(stepper.fill().clone())));
    }

    match (param.fill_start, param.fill_end, param.fill_step) {
        (Some(start), Some(end), Some(step)) if step > 0.0 => {
            let mut labels = Vec::new();
            let mut current = start;
            while current < end && labels.len() < 100_000 {
                labels.push(crate::expr::number_value(current));
                current += step;
            }
            Ok((Some(labels), None))
        }
        (Some(_), Some(_), Some(_)) => Err(DirectiveError::InvalidParam(
            "fill-step must be positive".into(),
        )),
        _ => Ok((None, None)),
    }
}

fn same_label(value: &Value, label: &Value) -> bool {
    match (value, label) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => {
            b.parse::<f64>().ok() == a.as_f64()
        }
        _ => false,
    }
}
