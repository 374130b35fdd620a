//! Filter step with simple predicate evaluation.
//!
//! Two predicate forms:
//! - `field`: keep rows whose boolean field is true;
//! - `condition`: "col OP literal" where OP ∈ {==, !=, <, <=, >, >=}.
//!
//! Matching rows go to `send_true_to` (or every output hop when unset);
//! non-matching rows go to `send_false_to` or are dropped. A value that
//! cannot be evaluated (e.g. a string in a boolean field) is a row-level error.

use std::cmp::Ordering;
use std::sync::Arc;

use rowflow_core::prelude::{Row, RowSchema, Value};
use rowflow_core::types::value_cmp;
use serde::Deserialize;

use crate::registry::parse_config;
use crate::traits::{Pass, RowIo, StepBehavior, StepError, StepMeta};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub field: Option<String>,
    pub condition: Option<String>,
    pub send_true_to: Option<String>,
    pub send_false_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Flag(String),
    Compare {
        field: String,
        op: CmpOp,
        literal: String,
    },
}

impl Predicate {
    fn field(&self) -> &str {
        match self {
            Predicate::Flag(f) => f,
            Predicate::Compare { field, .. } => field,
        }
    }
}

pub struct Filter {
    predicate: Predicate,
    send_true_to: Option<String>,
    send_false_to: Option<String>,
}

pub fn factory(config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    let cfg: FilterConfig = parse_config("filter", config)?;
    let predicate = match (cfg.field, cfg.condition) {
        (Some(field), None) => Predicate::Flag(field),
        (None, Some(cond)) => {
            let (field, op, literal) = parse_simple_predicate(&cond)?;
            Predicate::Compare { field, op, literal }
        }
        _ => {
            return Err(StepError::Config(
                "filter: exactly one of 'field' or 'condition' is required".into(),
            ))
        }
    };
    Ok(Arc::new(Filter {
        predicate,
        send_true_to: cfg.send_true_to,
        send_false_to: cfg.send_false_to,
    }))
}

impl StepMeta for Filter {
    fn kind(&self) -> &'static str {
        "filter"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(FilterStep {
            predicate: self.predicate.clone(),
            send_true_to: self.send_true_to.clone(),
            send_false_to: self.send_false_to.clone(),
            bound: None,
        })
    }

    fn target_steps(&self) -> Vec<String> {
        self.send_true_to
            .iter()
            .chain(self.send_false_to.iter())
            .cloned()
            .collect()
    }
}

/// Predicate resolved against one input schema.
struct Bound {
    schema: Arc<RowSchema>,
    index: usize,
    literal: Option<Value>,
}

struct FilterStep {
    predicate: Predicate,
    send_true_to: Option<String>,
    send_false_to: Option<String>,
    bound: Option<Bound>,
}

impl FilterStep {
    fn bind(&mut self, schema: &Arc<RowSchema>) -> Result<(), StepError> {
        if matches!(&self.bound, Some(b) if Arc::ptr_eq(&b.schema, schema)) {
            return Ok(());
        }
        let name = self.predicate.field();
        let index = schema
            .index_of(name)
            .ok_or_else(|| StepError::Config(format!("filter: field '{name}' not found")))?;
        let literal = match &self.predicate {
            Predicate::Flag(_) => None,
            Predicate::Compare { literal, .. } => {
                let ty = schema.fields()[index].value_type;
                Some(Value::parse_as(ty, literal).ok_or_else(|| {
                    StepError::Config(format!("filter: cannot parse '{literal}' as {ty}"))
                })?)
            }
        };
        self.bound = Some(Bound {
            schema: Arc::clone(schema),
            index,
            literal,
        });
        Ok(())
    }

    /// `Err` is a row-level failure message.
    fn evaluate(&self, row: &Row) -> Result<bool, String> {
        let Some(bound) = &self.bound else {
            return Err("filter not bound to a schema".into());
        };
        let value = row.get(bound.index).unwrap_or(&Value::Null);
        match (&self.predicate, &bound.literal) {
            (Predicate::Flag(name), _) => match value {
                Value::Boolean(b) => Ok(*b),
                Value::Null => Ok(false),
                other => Err(format!(
                    "field '{name}' is not a boolean (got {})",
                    other.type_name()
                )),
            },
            (Predicate::Compare { op, .. }, Some(lit)) => eval_predicate(value, *op, lit),
            (Predicate::Compare { .. }, None) => Err("comparison without literal".into()),
        }
    }
}

impl StepBehavior for FilterStep {
    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        let row = match io.get_row().into_row() {
            Ok(row) => row,
            Err(pass) => return Ok(pass),
        };
        let schema = io
            .input_schema()
            .ok_or_else(|| StepError::Schema("row without schema".into()))?;
        self.bind(&schema)?;

        match self.evaluate(&row) {
            Ok(true) => match &self.send_true_to {
                Some(target) => io.put_row_to(target, &schema, row)?,
                None => io.put_row(&schema, row)?,
            },
            Ok(false) => {
                if let Some(target) = &self.send_false_to {
                    io.put_row_to(target, &schema, row)?;
                }
            }
            Err(cause) => io.put_error(&schema, row, &cause)?,
        }
        Ok(Pass::MoreWork)
    }
}

/// Parse a simple predicate like "age > 18" or "name == Alice"
fn parse_simple_predicate(expr: &str) -> Result<(String, CmpOp, String), StepError> {
    let ops = [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];

    for (token, op) in ops {
        if let Some(pos) = expr.find(token) {
            let col = expr[..pos].trim().to_string();
            let lit = expr[pos + token.len()..].trim().to_string();
            if col.is_empty() {
                break;
            }
            return Ok((col, op, lit));
        }
    }

    Err(StepError::Config(format!("unparseable predicate: {expr}")))
}

/// Null comparisons are false.
fn eval_predicate(value: &Value, op: CmpOp, literal: &Value) -> Result<bool, String> {
    match value {
        Value::Null => Ok(false),
        Value::Binary(_) | Value::Serializable(_) => {
            Err(format!("cannot compare {} values", value.type_name()))
        }
        Value::Boolean(_) if !matches!(op, CmpOp::Eq | CmpOp::Ne) => {
            Err("only == and != apply to booleans".into())
        }
        v if v.value_type() != literal.value_type() => Err(format!(
            "cannot compare {} with {}",
            v.type_name(),
            literal.type_name()
        )),
        v => Ok(op.holds(value_cmp(v, literal))),
    }
}
