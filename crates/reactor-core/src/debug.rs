//! Post-mortem debug hook.
//!
//! When a debugger is installed, the scheduler calls it for every uncaught
//! cell failure while the failing cell's [`ExecutionContext`] is still bound,
//! so the session talks to the front end through the same redirected
//! `stdout`/`stderr`/`input-request` messages as the cell itself.

use crate::context::ExecutionContext;
use crate::error::CellFailure;

/// Debugger override invoked on uncaught cell failures.
pub trait Debugger: Send {
    /// Called after the cell body failed and before its status is reported.
    fn on_uncaught(&mut self, failure: &CellFailure, ctx: &ExecutionContext);
}

impl<F> Debugger for F
where
    F: FnMut(&CellFailure, &ExecutionContext) + Send,
{
    fn on_uncaught(&mut self, failure: &CellFailure, ctx: &ExecutionContext) {
        self(failure, ctx)
    }
}

/// Built-in interactive post-mortem session.
///
/// Prints the failure, then reads commands through the cell's context until
/// `continue` is entered, input fails (timeout, interrupt), or
/// `max_commands` is reached.
#[derive(Debug, Clone)]
pub struct PostMortem {
    /// Prompt shown for each command.
    pub prompt: String,
    /// Upper bound on commands read per session.
    pub max_commands: usize,
}

impl Default for PostMortem {
    fn default() -> Self {
        Self {
            prompt: "(debug) ".to_string(),
            max_commands: 64,
        }
    }
}

const HELP: &str = "commands: where (bt), message (m), help (h), continue (c)\n";

impl Debugger for PostMortem {
    fn on_uncaught(&mut self, failure: &CellFailure, ctx: &ExecutionContext) {
        ctx.write_stderr(&format!(
            "post-mortem: cell {} failed with {}\n",
            ctx.cell_id(),
            failure
        ));

        for _ in 0..self.max_commands {
            let command = match ctx.read_input(&self.prompt) {
                Ok(command) => command,
                Err(err) => {
                    tracing::debug!(cell = %ctx.cell_id(), "post-mortem session ended: {}", err);
                    return;
                }
            };

            match command.trim() {
                "where" | "bt" | "w" => {
                    if failure.traceback.is_empty() {
                        ctx.write_stdout("<no traceback>\n");
                    }
                    for (depth, frame) in failure.traceback.iter().enumerate() {
                        ctx.write_stdout(&format!("#{depth} {frame}\n"));
                    }
                }
                "message" | "m" => ctx.write_stdout(&format!("{}\n", failure.message)),
                "help" | "h" | "" => ctx.write_stdout(HELP),
                "continue" | "c" | "quit" | "q" | "exit" => return,
                other => ctx.write_stderr(&format!("unknown command: {other}\n")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::{InputBroker, InterruptHandle};
    use crate::error::ErrorKind;
    use crate::registry::CellId;
    use crate::stream::{self, OutputMessage};

    fn answer_all(broker: InputBroker, answers: Vec<&'static str>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for answer in answers {
                loop {
                    if let Some(&id) = broker.outstanding().first() {
                        broker.respond(id, answer).unwrap();
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        })
    }

    #[test]
    fn test_closure_debugger() {
        let (stream, _rx) = stream::channel();
        let ctx = ExecutionContext::new(
            CellId::new("c"),
            stream,
            InputBroker::new(),
            InterruptHandle::new(),
            None,
        );
        let mut seen = Vec::new();
        {
            let mut hook = |failure: &CellFailure, ctx: &ExecutionContext| {
                seen.push((ctx.cell_id().clone(), failure.kind));
            };
            hook.on_uncaught(&CellFailure::runtime("boom"), &ctx);
        }
        assert_eq!(seen, vec![(CellId::new("c"), ErrorKind::RuntimeError)]);
    }

    #[test]
    fn test_post_mortem_session() {
        let (stream, mut rx) = stream::channel();
        let broker = InputBroker::new();
        let ctx = ExecutionContext::new(
            CellId::new("c"),
            stream,
            broker.clone(),
            InterruptHandle::new(),
            Some(Duration::from_secs(5)),
        );
        let failure = CellFailure::runtime("boom").with_frame("cell c, line 1: raise(\"boom\")");

        let responder = answer_all(broker, vec!["bt", "m", "c"]);
        PostMortem::default().on_uncaught(&failure, &ctx);
        responder.join().unwrap();

        let stdout: Vec<String> = rx
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Stdout { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            stdout,
            vec![
                "#0 cell c, line 1: raise(\"boom\")\n".to_string(),
                "boom\n".to_string(),
            ]
        );
    }

    #[test]
    fn test_post_mortem_ends_on_input_timeout() {
        let (stream, mut rx) = stream::channel();
        let ctx = ExecutionContext::new(
            CellId::new("c"),
            stream,
            InputBroker::new(),
            InterruptHandle::new(),
            Some(Duration::from_millis(20)),
        );
        PostMortem::default().on_uncaught(&CellFailure::runtime("boom"), &ctx);

        let requests = rx
            .drain()
            .into_iter()
            .filter(|m| matches!(m, OutputMessage::InputRequest { .. }))
            .count();
        assert_eq!(requests, 1);
    }
}
