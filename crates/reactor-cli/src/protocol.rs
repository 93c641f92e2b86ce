//! Inbound JSON-lines commands.

use reactor_core::{CellId, ExecutionRequest, KernelConfig};
use serde::{Deserialize, Serialize};

/// One command per stdin line, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Run one cell.
    Run { cell_id: CellId, code: String },
    /// Run several cells as one batch.
    RunBatch { cells: Vec<ExecutionRequest> },
    /// Re-run every runnable stale cell.
    RunStale,
    /// Answer an input request.
    Input { request_id: u64, text: String },
    /// Interrupt the running cell.
    Interrupt,
    /// Replace the kernel configuration.
    Config(KernelConfig),
    /// Stop after queued work drains.
    Shutdown,
}

impl ClientCommand {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::ExecutionMode;

    #[test]
    fn test_parse_run() {
        let command = ClientCommand::parse(r#"{"type":"run","cell_id":"c1","code":"x = 1"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::Run {
                cell_id: CellId::new("c1"),
                code: "x = 1".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_batch_and_unit_commands() {
        let command = ClientCommand::parse(
            r#"{"type":"run_batch","cells":[{"cell_id":"a","code":"x = 1"},{"cell_id":"b","code":"print(x)"}]}"#,
        )
        .unwrap();
        assert!(matches!(command, ClientCommand::RunBatch { ref cells } if cells.len() == 2));

        assert_eq!(ClientCommand::parse(r#"{"type":"run_stale"}"#).unwrap(), ClientCommand::RunStale);
        assert_eq!(ClientCommand::parse(r#"{"type":"interrupt"}"#).unwrap(), ClientCommand::Interrupt);
        assert_eq!(ClientCommand::parse(r#"{"type":"shutdown"}"#).unwrap(), ClientCommand::Shutdown);
    }

    #[test]
    fn test_parse_config_with_defaults() {
        let command = ClientCommand::parse(r#"{"type":"config","mode":"lazy"}"#).unwrap();
        match command {
            ClientCommand::Config(config) => {
                assert_eq!(config.mode, ExecutionMode::Lazy);
                assert!(!config.auto_rerun_stale);
            }
            other => panic!("expected config, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(ClientCommand::parse(r#"{"type":"explode"}"#).is_err());
        assert!(ClientCommand::parse("not json").is_err());
    }
}
