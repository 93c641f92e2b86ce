//! Line parser for the script language.

use syn::{BinOp, Expr, Pat, Stmt};

/// One executable line.
#[derive(Debug, Clone)]
pub(crate) struct Line {
    /// 1-based line number within the cell
    pub number: usize,
    /// Source text, trimmed
    pub text: String,
    pub statement: Statement,
}

#[derive(Debug, Clone)]
pub(crate) enum Statement {
    /// `let name = expr` or `name = expr`
    Assign { name: String, value: Expr },
    /// `name op= expr`
    Update { name: String, op: Arith, value: Expr },
    /// Any other expression, evaluated for its effects
    Eval(Expr),
}

/// Arithmetic operators shared by binary expressions and compound assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    /// The operator of a plain binary expression, e.g. `+`.
    pub fn binary(op: &BinOp) -> Option<Self> {
        Some(match op {
            BinOp::Add(_) => Arith::Add,
            BinOp::Sub(_) => Arith::Sub,
            BinOp::Mul(_) => Arith::Mul,
            BinOp::Div(_) => Arith::Div,
            BinOp::Rem(_) => Arith::Rem,
            _ => return None,
        })
    }

    /// The operator of a compound assignment, e.g. `+=`.
    pub fn compound(op: &BinOp) -> Option<Self> {
        Some(match op {
            BinOp::AddAssign(_) => Arith::Add,
            BinOp::SubAssign(_) => Arith::Sub,
            BinOp::MulAssign(_) => Arith::Mul,
            BinOp::DivAssign(_) => Arith::Div,
            BinOp::RemAssign(_) => Arith::Rem,
            _ => return None,
        })
    }
}

impl Statement {
    /// The name this statement binds, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Statement::Assign { name, .. } | Statement::Update { name, .. } => Some(name),
            Statement::Eval(_) => None,
        }
    }
}

/// Parse a whole cell. Blank lines and `//` comments are skipped.
pub(crate) fn parse_cell(code: &str) -> Result<Vec<Line>, String> {
    let mut lines = Vec::new();
    for (idx, raw) in code.lines().enumerate() {
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") {
            continue;
        }
        let number = idx + 1;
        let statement = parse_line(text).map_err(|err| format!("line {number}: {err}"))?;
        lines.push(Line {
            number,
            text: text.to_string(),
            statement,
        });
    }
    Ok(lines)
}

fn parse_line(text: &str) -> Result<Statement, String> {
    let body = text.trim_end_matches(';').trim_end();
    let stmt: Stmt = syn::parse_str(&format!("{body};")).map_err(|err| err.to_string())?;

    match stmt {
        Stmt::Local(local) => {
            let name = binding_name(&local.pat)?;
            let init = local
                .init
                .ok_or_else(|| format!("`let {name}` needs a value"))?;
            if init.diverge.is_some() {
                return Err("`let ... else` is not supported".to_string());
            }
            Ok(Statement::Assign {
                name,
                value: *init.expr,
            })
        }
        Stmt::Expr(Expr::Assign(assign), _) => Ok(Statement::Assign {
            name: target_name(&assign.left)?,
            value: *assign.right,
        }),
        Stmt::Expr(Expr::Binary(binary), _) if Arith::compound(&binary.op).is_some() => {
            let name = target_name(&binary.left)?;
            let op = Arith::compound(&binary.op).ok_or("unsupported operator")?;
            Ok(Statement::Update {
                name,
                op,
                value: *binary.right,
            })
        }
        Stmt::Expr(expr, _) => Ok(Statement::Eval(expr)),
        Stmt::Item(_) => Err("items are not supported".to_string()),
        Stmt::Macro(_) => Err("macros are not supported".to_string()),
    }
}

fn binding_name(pat: &Pat) -> Result<String, String> {
    match pat {
        Pat::Ident(ident) if ident.subpat.is_none() => Ok(ident.ident.to_string()),
        Pat::Type(typed) => binding_name(&typed.pat),
        _ => Err("only plain names can be bound".to_string()),
    }
}

fn target_name(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Path(path) if path.qself.is_none() => path
            .path
            .get_ident()
            .map(ToString::to_string)
            .ok_or_else(|| "only plain names can be assigned".to_string()),
        _ => Err("only plain names can be assigned".to_string()),
    }
}
