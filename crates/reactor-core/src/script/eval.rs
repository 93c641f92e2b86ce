//! Interpreter for the script language.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde_json::{Number, Value};
use syn::{BinOp, Expr, Lit, UnOp};

use super::parse::{Arith, Line, Statement, parse_cell};
use crate::context::ExecutionContext;
use crate::error::CellFailure;
use crate::registry::NameSet;
use crate::runtime::CellRuntime;

type EvalResult<T> = std::result::Result<T, CellFailure>;

/// Slice length used by `sleep` between interrupt checks.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Runs script cells against one global namespace shared by all cells.
#[derive(Debug, Default)]
pub struct ScriptRuntime {
    globals: FxHashMap<String, Value>,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a global.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn run_line(&mut self, line: &Line, ctx: &ExecutionContext) -> EvalResult<()> {
        ctx.check_interrupted()?;
        match &line.statement {
            Statement::Assign { name, value } => {
                let value = self.eval(value, ctx)?;
                self.globals.insert(name.clone(), value);
            }
            Statement::Update { name, op, value } => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value, ctx)?;
                let updated = arith(*op, &current, &rhs)?;
                self.globals.insert(name.clone(), updated);
            }
            Statement::Eval(expr) => {
                self.eval(expr, ctx)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| CellFailure::runtime(format!("name `{name}` is not defined")))
    }

    fn eval(&mut self, expr: &Expr, ctx: &ExecutionContext) -> EvalResult<Value> {
        match expr {
            Expr::Lit(lit) => literal(&lit.lit),
            Expr::Path(path) => match path.path.get_ident() {
                Some(ident) => self.lookup(&ident.to_string()),
                None => Err(CellFailure::runtime("only plain names can be read")),
            },
            Expr::Paren(inner) => self.eval(&inner.expr, ctx),
            Expr::Group(inner) => self.eval(&inner.expr, ctx),
            Expr::Array(array) => array
                .elems
                .iter()
                .map(|elem| self.eval(elem, ctx))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::Array),
            Expr::Unary(unary) => {
                let operand = self.eval(&unary.expr, ctx)?;
                match (&unary.op, operand) {
                    (UnOp::Not(_), Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnOp::Neg(_), Value::Number(n)) => negate(&n),
                    (_, other) => Err(CellFailure::runtime(format!(
                        "unsupported operand for unary operator: {}",
                        type_name(&other)
                    ))),
                }
            }
            Expr::Binary(binary) => self.binary(&binary.op, &binary.left, &binary.right, ctx),
            Expr::Call(call) => {
                let name = match &*call.func {
                    Expr::Path(path) => path.path.get_ident().map(ToString::to_string),
                    _ => None,
                }
                .ok_or_else(|| CellFailure::runtime("only builtin functions can be called"))?;
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.eval(arg, ctx))
                    .collect::<EvalResult<Vec<_>>>()?;
                builtin(&name, args, ctx)
            }
            _ => Err(CellFailure::runtime("unsupported expression")),
        }
    }

    fn binary(&mut self, op: &BinOp, left: &Expr, right: &Expr, ctx: &ExecutionContext) -> EvalResult<Value> {
        // Logical operators short-circuit.
        match op {
            BinOp::And(_) => {
                return if truthy(&self.eval(left, ctx)?)? {
                    Ok(Value::Bool(truthy(&self.eval(right, ctx)?)?))
                } else {
                    Ok(Value::Bool(false))
                };
            }
            BinOp::Or(_) => {
                return if truthy(&self.eval(left, ctx)?)? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(truthy(&self.eval(right, ctx)?)?))
                };
            }
            _ => {}
        }

        let lhs = self.eval(left, ctx)?;
        let rhs = self.eval(right, ctx)?;
        if let Some(op) = Arith::binary(op) {
            return arith(op, &lhs, &rhs);
        }
        match op {
            BinOp::Eq(_) => Ok(Value::Bool(lhs == rhs)),
            BinOp::Ne(_) => Ok(Value::Bool(lhs != rhs)),
            BinOp::Lt(_) => compare(&lhs, &rhs).map(|o| Value::Bool(o.is_lt())),
            BinOp::Le(_) => compare(&lhs, &rhs).map(|o| Value::Bool(o.is_le())),
            BinOp::Gt(_) => compare(&lhs, &rhs).map(|o| Value::Bool(o.is_gt())),
            BinOp::Ge(_) => compare(&lhs, &rhs).map(|o| Value::Bool(o.is_ge())),
            _ => Err(CellFailure::runtime("unsupported operator")),
        }
    }
}

impl CellRuntime for ScriptRuntime {
    fn execute(&mut self, code: &str, ctx: &ExecutionContext) -> EvalResult<()> {
        let lines = parse_cell(code).map_err(CellFailure::runtime)?;
        for line in &lines {
            self.run_line(line, ctx).map_err(|failure| {
                failure.with_frame(format!(
                    "cell {}, line {}: {}",
                    ctx.cell_id(),
                    line.number,
                    line.text
                ))
            })?;
        }
        Ok(())
    }

    fn retract(&mut self, names: &NameSet) {
        for name in names {
            self.globals.remove(name);
        }
    }
}

fn builtin(name: &str, args: Vec<Value>, ctx: &ExecutionContext) -> EvalResult<Value> {
    match name {
        "print" | "eprint" => {
            let mut text = args.iter().map(display).collect::<Vec<_>>().join(" ");
            text.push('\n');
            if name == "print" {
                ctx.write_stdout(&text);
            } else {
                ctx.write_stderr(&text);
            }
            Ok(Value::Null)
        }
        "input" => {
            let prompt = args.first().map(display).unwrap_or_default();
            Ok(Value::String(ctx.read_input(&prompt)?))
        }
        "raise" => {
            let message = args.first().map(display).unwrap_or_else(|| "raised".to_string());
            Err(CellFailure::runtime(message))
        }
        "sleep" => {
            let millis = args
                .first()
                .and_then(Value::as_u64)
                .ok_or_else(|| CellFailure::runtime("sleep expects milliseconds"))?;
            let deadline = Instant::now() + Duration::from_millis(millis);
            loop {
                ctx.check_interrupted()?;
                let now = Instant::now();
                if now >= deadline {
                    return Ok(Value::Null);
                }
                std::thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }
        "str" => Ok(Value::String(args.first().map(display).unwrap_or_default())),
        "len" => match args.first() {
            Some(Value::String(s)) => Ok(Value::from(s.chars().count())),
            Some(Value::Array(items)) => Ok(Value::from(items.len())),
            Some(other) => Err(CellFailure::runtime(format!(
                "len() of {} is undefined",
                type_name(other)
            ))),
            None => Err(CellFailure::runtime("len expects one argument")),
        },
        other => Err(CellFailure::runtime(format!("unknown function `{other}`"))),
    }
}

fn literal(lit: &Lit) -> EvalResult<Value> {
    match lit {
        Lit::Int(int) => int
            .base10_parse::<i64>()
            .map(Value::from)
            .map_err(|err| CellFailure::runtime(err.to_string())),
        Lit::Float(float) => {
            let value = float
                .base10_parse::<f64>()
                .map_err(|err| CellFailure::runtime(err.to_string()))?;
            float_value(value)
        }
        Lit::Str(s) => Ok(Value::String(s.value())),
        Lit::Bool(b) => Ok(Value::Bool(b.value)),
        _ => Err(CellFailure::runtime("unsupported literal")),
    }
}

fn float_value(value: f64) -> EvalResult<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| CellFailure::runtime("result is not a finite number"))
}

fn negate(n: &Number) -> EvalResult<Value> {
    if let Some(i) = n.as_i64() {
        return i
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| CellFailure::runtime("integer overflow"));
    }
    float_value(-n.as_f64().unwrap_or_default())
}

fn arith(op: Arith, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) if op == Arith::Add => Ok(Value::String(format!("{a}{b}"))),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => int_arith(op, a, b),
            _ => {
                let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                if matches!(op, Arith::Div | Arith::Rem) && b == 0.0 {
                    return Err(CellFailure::runtime("division by zero"));
                }
                float_value(match op {
                    Arith::Add => a + b,
                    Arith::Sub => a - b,
                    Arith::Mul => a * b,
                    Arith::Div => a / b,
                    Arith::Rem => a % b,
                })
            }
        },
        _ => Err(CellFailure::runtime(format!(
            "unsupported operands: {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

fn int_arith(op: Arith, a: i64, b: i64) -> EvalResult<Value> {
    if matches!(op, Arith::Div | Arith::Rem) && b == 0 {
        return Err(CellFailure::runtime("division by zero"));
    }
    let result = match op {
        Arith::Add => a.checked_add(b),
        Arith::Sub => a.checked_sub(b),
        Arith::Mul => a.checked_mul(b),
        Arith::Div => a.checked_div(b),
        Arith::Rem => a.checked_rem(b),
    };
    result
        .map(Value::from)
        .ok_or_else(|| CellFailure::runtime("integer overflow"))
}

fn compare(lhs: &Value, rhs: &Value) -> EvalResult<std::cmp::Ordering> {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        CellFailure::runtime(format!(
            "cannot compare {} with {}",
            type_name(lhs),
            type_name(rhs)
        ))
    })
}

fn truthy(value: &Value) -> EvalResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| CellFailure::runtime(format!("expected bool, found {}", type_name(value))))
}

/// Text form used by `print` and `str`.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
