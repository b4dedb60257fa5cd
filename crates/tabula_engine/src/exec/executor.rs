//! Executor: runs a plan against an engine transaction through row iterators

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use tabula_core::{DocId, Document, EngineTransaction, FieldBuffer, Value};

use super::ast::{BinOp, Expr, FieldPath, InsertSource, Literal, OrderByItem, Projection, UnOp};
use super::params::{bind, BoundParams, Param};
use super::planner::{Plan, PlanNode};
use crate::result::{Cursor, RowStream};
use crate::types::EngineError;

/// JSON conversions for query arguments and results. Lives here so that
/// tabula_core stays free of serde_json.
pub trait ValueExt {
    fn to_json(&self) -> serde_json::Value;
    fn from_json(v: &serde_json::Value) -> Option<Value>;
}

impl ValueExt for Value {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Null => serde_json::Value::Null,
            Value::Bytes(b) => serde_json::Value::String(base64_encode(b)),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(|v| v.to_json()).collect()),
            Value::Document(doc) => serde_json::Value::Object(
                doc.fields().map(|(k, v)| (k.to_string(), v.to_json())).collect(),
            ),
        }
    }

    fn from_json(v: &serde_json::Value) -> Option<Value> {
        match v {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() { Some(Value::Int(i)) }
                else { n.as_f64().map(Value::Float) }
            }
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Array(arr) => {
                let values: Option<Vec<Value>> = arr.iter().map(Value::from_json).collect();
                values.map(Value::Array)
            }
            serde_json::Value::Object(obj) => {
                let mut doc = FieldBuffer::new();
                for (k, v) in obj {
                    doc.add(k.clone(), Value::from_json(v)?);
                }
                Some(Value::Document(doc))
            }
        }
    }
}

/// Base64 for the Bytes variant
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as usize;
        let b1 = chunk.get(1).copied().unwrap_or(0) as usize;
        let b2 = chunk.get(2).copied().unwrap_or(0) as usize;
        result.push(ALPHABET[b0 >> 2] as char);
        result.push(ALPHABET[((b0 & 0x03) << 4) | (b1 >> 4)] as char);
        result.push(if chunk.len() > 1 { ALPHABET[((b1 & 0x0f) << 2) | (b2 >> 6)] as char } else { '=' });
        result.push(if chunk.len() > 2 { ALPHABET[b2 & 0x3f] as char } else { '=' });
    }
    result
}

/// Runs `plan` inside `tx`.
///
/// Mutations are applied before returning and yield an empty cursor. A SELECT
/// yields a cursor that pulls rows from the engine on demand, unless
/// `materialize_eagerly` is set: then every row is produced up front and any
/// evaluation error is returned here instead of from the cursor.
pub fn execute(
    plan: &Plan,
    tx: &mut dyn EngineTransaction,
    params: &[Param],
    materialize_eagerly: bool,
) -> Result<Cursor, EngineError> {
    let eval = Evaluator { params: Arc::new(bind(plan, params)?) };

    match &plan.root {
        PlanNode::CreateTable { name, if_not_exists } => {
            if *if_not_exists && tx.table_exists(name)? {
                return Ok(Cursor::empty());
            }
            tx.create_table(name)?;
            tracing::debug!(table = %name, "table created");
            Ok(Cursor::empty())
        }
        PlanNode::DropTable { name, if_exists } => {
            if *if_exists && !tx.table_exists(name)? {
                return Ok(Cursor::empty());
            }
            tx.drop_table(name)?;
            tracing::debug!(table = %name, "table dropped");
            Ok(Cursor::empty())
        }
        PlanNode::Insert { table, source } => {
            let n = execute_insert(&eval, tx, table, source)?;
            tracing::debug!(table = %table, inserted = n, "insert");
            Ok(Cursor::empty())
        }
        PlanNode::Update { input, table, assignments } => {
            let targets = collect_targets(&eval, &*tx, input)?;
            let n = targets.len();
            // build every new row before the first write so a failing row leaves the table untouched
            let mut rewritten = Vec::with_capacity(n);
            for (id, mut doc) in targets {
                // every assignment sees the row as it was before the update
                let mut updates = Vec::with_capacity(assignments.len());
                for (path, expr) in assignments {
                    updates.push((path, eval.eval(expr, &doc)?));
                }
                for (path, value) in updates {
                    doc.set_path(path, value)?;
                }
                rewritten.push((id, doc));
            }
            for (id, doc) in rewritten {
                tx.replace(table, id, doc)?;
            }
            tracing::debug!(table = %table, updated = n, "update");
            Ok(Cursor::empty())
        }
        PlanNode::Delete { input, table } => {
            let targets = collect_targets(&eval, &*tx, input)?;
            let n = targets.len();
            for (id, _) in targets {
                tx.delete(table, id)?;
            }
            tracing::debug!(table = %table, deleted = n, "delete");
            Ok(Cursor::empty())
        }
        root => {
            let rows = build_rows(&eval, &*tx, root)?;
            if materialize_eagerly {
                let rows = rows.collect::<Result<VecDeque<_>, _>>()?;
                Ok(Cursor::materialized(rows))
            } else {
                Ok(Cursor::lazy(rows))
            }
        }
    }
}

fn execute_insert(
    eval: &Evaluator,
    tx: &mut dyn EngineTransaction,
    table: &str,
    source: &InsertSource,
) -> Result<usize, EngineError> {
    let empty = FieldBuffer::new();
    let mut docs = Vec::new();
    match source {
        InsertSource::Tuples { fields, rows } => {
            for row in rows {
                if row.len() != fields.len() {
                    return Err(EngineError::Exec(format!(
                        "{} values for {} fields",
                        row.len(),
                        fields.len()
                    )));
                }
                let mut doc = FieldBuffer::new();
                for (field, expr) in fields.iter().zip(row) {
                    if doc.get(field).is_some() {
                        return Err(EngineError::Exec(format!("duplicate field: {field}")));
                    }
                    doc.add(field.clone(), eval.eval(expr, &empty)?);
                }
                docs.push(doc);
            }
        }
        InsertSource::Documents(exprs) => {
            for expr in exprs {
                match eval.eval(expr, &empty)? {
                    Value::Document(doc) => docs.push(doc),
                    other => {
                        return Err(EngineError::Exec(format!(
                            "INSERT expects a document, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
    }
    let n = docs.len();
    for doc in docs {
        tx.insert(table, doc)?;
    }
    Ok(n)
}

/// Rows targeted by UPDATE/DELETE, read completely before any write.
fn collect_targets(
    eval: &Evaluator,
    tx: &dyn EngineTransaction,
    node: &PlanNode,
) -> Result<Vec<(DocId, FieldBuffer)>, EngineError> {
    match node {
        PlanNode::TableScan { table } => tx.scan(table)?.collect(),
        PlanNode::Filter { input, predicate } => {
            let mut out = Vec::new();
            for (id, doc) in collect_targets(eval, tx, input)? {
                if eval.matches(predicate, &doc)? {
                    out.push((id, doc));
                }
            }
            Ok(out)
        }
        other => Err(EngineError::Exec(format!("unsupported mutation input: {:?}", other))),
    }
}

/// Builds the row pipeline for a SELECT plan node.
fn build_rows(eval: &Evaluator, tx: &dyn EngineTransaction, node: &PlanNode) -> Result<RowStream, EngineError> {
    match node {
        PlanNode::TableScan { table } => {
            Ok(Box::new(tx.scan(table)?.map(|r| r.map(|(_, doc)| doc))))
        }
        PlanNode::Filter { input, predicate } => {
            let rows = build_rows(eval, tx, input)?;
            let eval = eval.clone();
            let predicate = predicate.clone();
            Ok(Box::new(rows.filter_map(move |r| match r {
                Ok(doc) => match eval.matches(&predicate, &doc) {
                    Ok(true) => Some(Ok(doc)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            })))
        }
        PlanNode::OrderBy { input, item } => {
            // sorting needs every row
            let mut rows = build_rows(eval, tx, input)?.collect::<Result<Vec<_>, _>>()?;
            sort_rows(&mut rows, item);
            Ok(Box::new(rows.into_iter().map(Ok::<FieldBuffer, EngineError>)))
        }
        PlanNode::Offset { input, count } => {
            let mut remaining = *count;
            let rows = build_rows(eval, tx, input)?;
            Ok(Box::new(rows.filter(move |r| {
                if r.is_ok() && remaining > 0 {
                    remaining -= 1;
                    false
                } else {
                    true
                }
            })))
        }
        PlanNode::Limit { input, count } => {
            let count = usize::try_from(*count).unwrap_or(usize::MAX);
            Ok(Box::new(build_rows(eval, tx, input)?.take(count)))
        }
        PlanNode::Project { input, projection } => {
            let rows = build_rows(eval, tx, input)?;
            match projection {
                Projection::Wildcard => Ok(rows),
                Projection::Items(items) => {
                    let eval = eval.clone();
                    let items: Vec<(String, Expr)> =
                        items.iter().map(|i| (i.column_name(), i.expr.clone())).collect();
                    Ok(Box::new(rows.map(move |r| -> Result<FieldBuffer, EngineError> {
                        let doc = r?;
                        let mut out = FieldBuffer::new();
                        for (name, expr) in &items {
                            out.set(name.clone(), eval.eval(expr, &doc)?);
                        }
                        Ok(out)
                    })))
                }
            }
        }
        other => Err(EngineError::Exec(format!("not a row-producing plan node: {:?}", other))),
    }
}

fn sort_rows(rows: &mut [FieldBuffer], item: &OrderByItem) {
    rows.sort_by(|a, b| {
        let null = Value::Null;
        let av = a.get_path(&item.path).unwrap_or(&null);
        let bv = b.get_path(&item.path).unwrap_or(&null);
        let ord = compare_values(av, bv);
        if item.descending { ord.reverse() } else { ord }
    });
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Array(_) => 5,
        Value::Document(_) => 6,
    }
}

/// Total order used by ORDER BY: values of different types order by type,
/// numbers compare across Int and Float.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Int(l), Value::Float(r)) => cmp_int_float(*l, *r).unwrap_or_else(|| (*l as f64).total_cmp(r)),
        (Value::Float(l), Value::Int(r)) => cmp_int_float(*r, *l)
            .map(Ordering::reverse)
            .unwrap_or_else(|| l.total_cmp(&(*r as f64))),
        (Value::Float(l), Value::Float(r)) => l.total_cmp(r),
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Bytes(l), Value::Bytes(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => {
            for (x, y) in l.iter().zip(r) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        (Value::Document(l), Value::Document(r)) => {
            for ((lk, lv), (rk, rv)) in l.fields().zip(r.fields()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Expression evaluation against one row. Cloned into lazy row closures.
#[derive(Clone)]
pub(crate) struct Evaluator {
    params: Arc<BoundParams>,
}

impl Evaluator {
    /// A row passes a predicate only when it evaluates to true; NULL rejects.
    fn matches(&self, predicate: &Expr, doc: &dyn Document) -> Result<bool, EngineError> {
        Ok(matches!(self.eval(predicate, doc)?, Value::Bool(true)))
    }

    pub(crate) fn eval(&self, expr: &Expr, doc: &dyn Document) -> Result<Value, EngineError> {
        match expr {
            Expr::Literal(lit) => Ok(eval_literal(lit)),
            Expr::Field(path) => Ok(lookup(doc, path).cloned().unwrap_or(Value::Null)),
            Expr::Positional(idx) => self
                .params
                .positional(*idx)
                .cloned()
                .ok_or_else(|| EngineError::Exec(format!("positional parameter {} not bound", idx + 1))),
            Expr::Named(param_name) => self.params.named(param_name).cloned().ok_or_else(|| {
                EngineError::Exec(format!(
                    "parameter ${} not bound - pass it in params argument",
                    param_name
                ))
            }),
            Expr::Document(fields) => {
                let mut out = FieldBuffer::new();
                for (k, e) in fields {
                    out.add(k.clone(), self.eval(e, doc)?);
                }
                Ok(Value::Document(out))
            }
            Expr::Array(items) => items
                .iter()
                .map(|e| self.eval(e, doc))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::BinaryOp(left, BinOp::And, right) => {
                let l = truth(&self.eval(left, doc)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                Ok(match (l, truth(&self.eval(right, doc)?)?) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }
            Expr::BinaryOp(left, BinOp::Or, right) => {
                let l = truth(&self.eval(left, doc)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                Ok(match (l, truth(&self.eval(right, doc)?)?) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            Expr::BinaryOp(left, op, right) => {
                let l = self.eval(left, doc)?;
                let r = self.eval(right, doc)?;
                eval_binary_op(&l, *op, &r)
            }
            Expr::UnaryOp(UnOp::Not, operand) => {
                Ok(match truth(&self.eval(operand, doc)?)? {
                    Some(b) => Value::Bool(!b),
                    None => Value::Null,
                })
            }
            Expr::UnaryOp(UnOp::Neg, operand) => match self.eval(operand, doc)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EngineError::Exec("integer overflow".into())),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Null => Ok(Value::Null),
                other => Err(EngineError::Exec(format!("cannot negate {}", other.type_name()))),
            },
            Expr::IsNull(operand) => Ok(Value::Bool(self.eval(operand, doc)?.is_null())),
            Expr::IsNotNull(operand) => Ok(Value::Bool(!self.eval(operand, doc)?.is_null())),
        }
    }
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Resolves a dotted path; array elements are addressed by index segments.
fn lookup<'a>(doc: &'a dyn Document, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut cur = doc.get_by_field(first)?;
    for seg in rest {
        cur = match cur {
            Value::Document(d) => d.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn truth(v: &Value) -> Result<Option<bool>, EngineError> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(EngineError::Exec(format!("expected a boolean, got {}", other.type_name()))),
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

/// Exact ordering of an integer against a float; `None` for NaN.
/// Casting the integer to f64 would round above 2^53.
fn cmp_int_float(i: i64, f: f64) -> Option<Ordering> {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return None;
    }
    if f >= TWO_POW_63 {
        return Some(Ordering::Less);
    }
    if f < -TWO_POW_63 {
        return Some(Ordering::Greater);
    }
    // in range, the integral part converts without loss
    let whole = f.trunc();
    Some(i.cmp(&(whole as i64)).then_with(|| {
        if f > whole {
            Ordering::Less
        } else if f < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }))
}

fn eval_binary_op(left: &Value, op: BinOp, right: &Value) -> Result<Value, EngineError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match op {
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let comparable = (is_numeric(left) && is_numeric(right)) || type_rank(left) == type_rank(right);
            if !comparable {
                // values of different types are never equal and never ordered
                return Ok(Value::Bool(op == BinOp::Ne));
            }
            let ord = match (left, right) {
                (Value::Int(l), Value::Float(r)) => cmp_int_float(*l, *r),
                (Value::Float(l), Value::Int(r)) => cmp_int_float(*r, *l).map(Ordering::reverse),
                (Value::Float(l), Value::Float(r)) => l.partial_cmp(r),
                _ => Some(compare_values(left, right)),
            };
            let Some(ord) = ord else {
                // NaN: only != holds
                return Ok(Value::Bool(op == BinOp::Ne));
            };
            Ok(Value::Bool(match op {
                BinOp::Eq => ord == Ordering::Equal,
                BinOp::Ne => ord != Ordering::Equal,
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => eval_arithmetic(left, op, right),
        BinOp::And | BinOp::Or => Err(EngineError::Exec(format!("invalid logical operand: {}", left.type_name()))),
    }
}

fn eval_arithmetic(left: &Value, op: BinOp, right: &Value) -> Result<Value, EngineError> {
    let overflow = || EngineError::Exec("integer overflow".into());
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => match op {
            BinOp::Add => l.checked_add(*r).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => l.checked_sub(*r).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => l.checked_mul(*r).map(Value::Int).ok_or_else(overflow),
            _ => {
                if *r == 0 {
                    Err(EngineError::Exec("division by zero".into()))
                } else {
                    l.checked_div(*r).map(Value::Int).ok_or_else(overflow)
                }
            }
        },
        (l, r) if is_numeric(l) && is_numeric(r) => {
            let (lf, rf) = (as_f64(l), as_f64(r));
            match op {
                BinOp::Add => Ok(Value::Float(lf + rf)),
                BinOp::Sub => Ok(Value::Float(lf - rf)),
                BinOp::Mul => Ok(Value::Float(lf * rf)),
                _ => {
                    if rf == 0.0 {
                        Err(EngineError::Exec("division by zero".into()))
                    } else {
                        Ok(Value::Float(lf / rf))
                    }
                }
            }
        }
        (Value::String(l), Value::String(r)) if op == BinOp::Add => Ok(Value::String(format!("{l}{r}"))),
        _ => Err(EngineError::Exec(format!(
            "type mismatch in binary op: {} {} {}",
            left.type_name(),
            op,
            right.type_name()
        ))),
    }
}
