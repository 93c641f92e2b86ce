//! Static analysis for the script language.

use syn::visit::{self, Visit};
use syn::{Expr, ExprCall, ExprPath};

use super::parse::{Statement, parse_cell};
use super::BUILTINS;
use crate::registry::NameSet;
use crate::runtime::{Analysis, Analyzer};

/// Derives defines/uses from script source.
///
/// A name is *defined* if any line assigns it and *used* if some line reads
/// it before the cell itself assigned it. Builtin function names are never
/// reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptAnalyzer;

impl ScriptAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for ScriptAnalyzer {
    fn analyze(&self, code: &str) -> std::result::Result<Analysis, String> {
        let lines = parse_cell(code)?;
        let mut defines = NameSet::new();
        let mut uses = NameSet::new();

        for line in &lines {
            let mut reads = NameCollector::default();
            match &line.statement {
                Statement::Assign { value, .. } => reads.visit_expr(value),
                Statement::Update { name, value, .. } => {
                    reads.names.push(name.clone());
                    reads.visit_expr(value);
                }
                Statement::Eval(expr) => reads.visit_expr(expr),
            }

            for name in reads.names {
                if !defines.contains(&name) {
                    uses.insert(name);
                }
            }
            if let Some(target) = line.statement.target() {
                defines.insert(target.to_string());
            }
        }

        Ok(Analysis { defines, uses })
    }
}

/// Collects variable names read by an expression.
#[derive(Default)]
struct NameCollector {
    names: Vec<String>,
}

impl<'ast> Visit<'ast> for NameCollector {
    fn visit_expr_path(&mut self, path: &'ast ExprPath) {
        if let Some(ident) = path.path.get_ident() {
            self.names.push(ident.to_string());
        }
    }

    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        let is_builtin = matches!(
            &*call.func,
            Expr::Path(path) if path.path.get_ident().is_some_and(|id| BUILTINS.contains(&id.to_string().as_str()))
        );
        if !is_builtin {
            self.visit_expr(&call.func);
        }
        for arg in &call.args {
            visit::visit_expr(self, arg);
        }
    }
}
