//! A small expression language for rule conditions and computed values.
//!
//! Expressions are compiled once with [`Expression::compile`] and then
//! evaluated any number of times against a set of variable bindings.
//! Values are [`serde_json::Value`]s, so request data flows in without
//! conversion.
//!
//! Supported syntax:
//!
//! | Kind | Forms |
//! |------|-------|
//! | literals | `12`, `1.5`, `'text'`, `"text"`, `true`, `false`, `null` |
//! | variables | `json_user.name`, `query_page`, `total` |
//! | logic | `&&` / `and`, `\|\|` / `or`, `!` / `not` |
//! | comparison | `==`, `!=`, `<`, `<=`, `>`, `>=` |
//! | arithmetic | `+`, `-`, `*`, `/`, `%` (`+` concatenates when either side is a string) |
//! | functions | `toInt`, `toFloat`, `string`, `len`, `contains`, `startsWith`, `endsWith`, `lower`, `upper` |
//!
//! A variable that is absent from the bindings is always an
//! [`ExprError::Eval`]; a variable bound to `null` is a regular value.

mod eval;
mod lexer;
mod parser;

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

pub use parser::Function;
use parser::Node;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("evaluation error: {0}")]
    Eval(String),
}

impl ExprError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

/// Converts a float into a JSON number, as integer when it has no fraction.
#[must_use]
pub fn number_value(n: f64) -> Value {
    eval::number(n).unwrap_or(Value::Null)
}

/// Variable bindings handed to [`Expression::evaluate`].
pub type Bindings = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
    vars: BTreeSet<String>,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = lexer::tokenize(source)?;
        let root = parser::parse(&tokens, source.len())?;
        let mut vars = BTreeSet::new();
        root.collect_vars(&mut vars);
        Ok(Self {
            source: source.to_string(),
            root,
            vars,
        })
    }

    /// Free variable names referenced by the expression.
    #[must_use]
    pub const fn vars(&self) -> &BTreeSet<String> {
        &self.vars
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The variable name when the whole expression is a bare identifier.
    #[must_use]
    pub fn as_variable(&self) -> Option<&str> {
        match &self.root {
            Node::Var(name) => Some(name),
            _ => None,
        }
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, ExprError> {
        eval::evaluate(&self.root, bindings)
    }

    /// Evaluates and requires a boolean result.
    pub fn evaluate_bool(&self, bindings: &Bindings) -> Result<bool, ExprError> {
        match self.evaluate(bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::eval(format!(
                "condition must evaluate to a boolean, got {}",
                eval::type_name(&other)
            ))),
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn eval(src: &str, pairs: &[(&str, Value)]) -> Result<Value, ExprError> {
        Expression::compile(src)?.evaluate(&bindings(pairs))
    }

    #[test]
    fn string_equality() {
        let result = eval("json_name == 'bingoo'", &[("json_name", json!("bingoo"))]);
        assert_eq!(result, Ok(json!(true)));
    }

    #[test]
    fn vars_lists_free_variables_only() {
        let expr = Expression::compile("toInt(query_a) > 3 && json_b.c != null || x").unwrap();
        let vars: Vec<&str> = expr.vars().iter().map(String::as_str).collect();
        assert_eq!(vars, vec!["json_b.c", "query_a", "x"]);
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), Ok(json!(7)));
        assert_eq!(eval("(1 + 2) * 3", &[]), Ok(json!(9)));
        assert_eq!(eval("10 - 4 - 3", &[]), Ok(json!(3)));
        assert_eq!(eval("true || false && false", &[]), Ok(json!(true)));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            eval("'id-' + n", &[("n", json!(42))]),
            Ok(json!("id-42"))
        );
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        assert_eq!(eval("query_page >= 2", &[("query_page", json!("10"))]), Ok(json!(true)));
        assert_eq!(eval("'10' == 10", &[]), Ok(json!(true)));
    }

    #[test]
    fn missing_variable_is_eval_error() {
        let err = eval("missing == 1", &[]).unwrap_err();
        assert!(matches!(err, ExprError::Eval(ref m) if m.contains("missing")));
    }

    #[test]
    fn null_binding_is_a_value() {
        assert_eq!(eval("x == null", &[("x", Value::Null)]), Ok(json!(true)));
        assert_eq!(eval("x == 'a'", &[("x", Value::Null)]), Ok(json!(false)));
    }

    #[test]
    fn incompatible_types_fail() {
        assert!(matches!(eval("true + 1", &[]), Err(ExprError::Eval(_))));
        assert!(matches!(eval("'a' < 1", &[]), Err(ExprError::Eval(_))));
        assert!(matches!(eval("1 && true", &[]), Err(ExprError::Eval(_))));
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(matches!(eval("1 / 0", &[]), Err(ExprError::Eval(_))));
        assert!(matches!(eval("1 % 0", &[]), Err(ExprError::Eval(_))));
    }

    #[test]
    fn logic_short_circuits() {
        assert_eq!(eval("false && missing", &[]), Ok(json!(false)));
        assert_eq!(eval("true || missing", &[]), Ok(json!(true)));
    }

    #[test]
    fn functions() {
        assert_eq!(eval("toInt('12.7')", &[]), Ok(json!(12)));
        assert_eq!(eval("len('abc') + len(xs)", &[("xs", json!([1, 2]))]), Ok(json!(5)));
        assert_eq!(eval("contains('bingoo', 'go')", &[]), Ok(json!(true)));
        assert_eq!(eval("upper('a') + lower('B')", &[]), Ok(json!("Ab")));
        assert_eq!(eval("startsWith('/api/x', '/api')", &[]), Ok(json!(true)));
    }

    #[test]
    fn keyword_operators() {
        assert_eq!(eval("not (1 > 2) and 1 < 2", &[]), Ok(json!(true)));
        assert_eq!(eval("false or 1 == 1", &[]), Ok(json!(true)));
    }

    #[test]
    fn float_results_keep_fraction() {
        assert_eq!(eval("7 / 2", &[]), Ok(json!(3.5)));
        assert_eq!(eval("6 / 2", &[]), Ok(json!(3)));
    }

    #[test]
    fn parse_errors() {
        for src in ["1 +", "(1 + 2", "1 2", "a = b", "a & b", "'open", "foo(1)", "len()", "#"] {
            assert!(
                matches!(Expression::compile(src), Err(ExprError::Parse { .. })),
                "expected parse error for {src:?}"
            );
        }
    }

    #[test]
    fn evaluate_bool_rejects_non_boolean() {
        let expr = Expression::compile("1 + 1").unwrap();
        assert!(expr.evaluate_bool(&Bindings::new()).is_err());
    }

    #[test]
    fn bare_variable_is_detected() {
        assert_eq!(Expression::compile("total").unwrap().as_variable(), Some("total"));
        assert_eq!(Expression::compile("total + 1").unwrap().as_variable(), None);
    }
}
