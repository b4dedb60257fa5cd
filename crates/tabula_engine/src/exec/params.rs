//! Query arguments: positional `?` and named `$name` values.

use std::collections::HashMap;

use tabula_core::{FieldBuffer, Value};

use super::executor::ValueExt;
use super::planner::Plan;
use crate::types::EngineError;

/// One query argument, in call-site order.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Positional(Value),
    Named(String, Value),
}

/// Builds a `$name` argument.
pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Param {
    Param::Named(name.into(), value.into())
}

macro_rules! positional_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Param {
                fn from(v: $t) -> Self {
                    Param::Positional(Value::from(v))
                }
            }
        )*
    };
}

positional_from!(Value, bool, i32, i64, f64, &str, String, Vec<u8>, FieldBuffer);

/// Builds a `Vec<Param>`; plain values become positional arguments.
///
/// ```ignore
/// let args = params![18, named("city", "Lyon")];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Param>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Param::from($arg)),+]
    };
}

/// Arguments resolved against a plan's placeholders.
#[derive(Debug, Clone, Default)]
pub struct BoundParams {
    positional: Vec<Value>,
    named: HashMap<String, Value>,
}

impl BoundParams {
    pub fn positional(&self, idx: usize) -> Option<&Value> {
        self.positional.get(idx)
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }
}

/// Checks `params` against the plan's placeholders.
///
/// Positional arguments must match the `?` count exactly. Named arguments not
/// referenced by the plan are ignored; a referenced one that is missing fails.
pub fn bind(plan: &Plan, params: &[Param]) -> Result<BoundParams, EngineError> {
    let mut bound = BoundParams::default();
    for p in params {
        match p {
            Param::Positional(v) => bound.positional.push(v.clone()),
            Param::Named(name, v) => {
                bound.named.insert(name.clone(), v.clone());
            }
        }
    }

    if bound.positional.len() != plan.positional_params {
        return Err(EngineError::ParamCount {
            expected: plan.positional_params,
            got: bound.positional.len(),
        });
    }
    if let Some(missing) = plan.named_params.iter().find(|n| !bound.named.contains_key(*n)) {
        return Err(EngineError::Exec(format!(
            "parameter ${} not bound - pass it in params argument",
            missing
        )));
    }
    Ok(bound)
}

/// Converts a JSON array (positional) or object (named) into query arguments.
pub fn params_from_json(json: &serde_json::Value) -> Result<Vec<Param>, EngineError> {
    let convert = |v: &serde_json::Value| {
        Value::from_json(v).ok_or_else(|| EngineError::InvalidArgument(format!("unsupported JSON value: {v}")))
    };
    match json {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| convert(v).map(Param::Positional))
            .collect(),
        serde_json::Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| convert(v).map(|v| Param::Named(k.clone(), v)))
            .collect(),
        other => Err(EngineError::InvalidArgument(format!(
            "params must be a JSON array or object, got {other}"
        ))),
    }
}
