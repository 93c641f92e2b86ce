//! A small line-oriented scripting language for driving the kernel.
//!
//! Each non-blank line is one statement in Rust expression syntax, parsed with
//! `syn`:
//!
//! ```text
//! let x = 1          // bind a global
//! y = x * 2 + 1      // rebind
//! y += 1             // compound assignment
//! print("y is", y)   // builtin call
//! ```
//!
//! Builtins: `print`, `eprint`, `input`, `raise`, `sleep`, `str`, `len`.
//! Values are JSON values. All cells share one global namespace, and the
//! interrupt flag is checked between statements and while sleeping.

mod analyze;
mod eval;
mod parse;

pub use analyze::ScriptAnalyzer;
pub use eval::ScriptRuntime;

/// Builtin function names; never reported as variable uses.
pub const BUILTINS: &[&str] = &["print", "eprint", "input", "raise", "sleep", "str", "len"];
