//! The outbound message stream.
//!
//! A single multi-producer, single-consumer queue shared by the execution
//! thread, threads spawned by cells, and kernel handles. Sending never blocks
//! and is safe from any thread; the transport owns the only receiver.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::KernelConfig;
use crate::error::ErrorKind;
use crate::registry::{CellId, CellStatus};

/// A tagged message for the front end, serialized as `{"op": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "kebab-case")]
pub enum OutputMessage {
    /// Text written to a cell's standard output.
    Stdout { cell_id: CellId, text: String },

    /// Text written to a cell's standard error.
    Stderr { cell_id: CellId, text: String },

    /// A cell changed status.
    CellStatus {
        cell_id: CellId,
        status: CellStatus,
        /// Failure classification for `error` and failure-caused `stale`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },

    /// A cell failed.
    Error {
        cell_id: CellId,
        kind: ErrorKind,
        message: String,
        traceback: Vec<String>,
    },

    /// A cell is blocked reading input.
    InputRequest {
        cell_id: CellId,
        request_id: u64,
        prompt: String,
    },

    /// A kernel-level failure not attributable to any cell.
    KernelError { kind: ErrorKind, message: String },

    /// The kernel configuration changed.
    ConfigChanged { config: KernelConfig },

    /// A batch finished; lists the cells it covered in execution order.
    CompletedRun { cells: Vec<CellId> },
}

impl OutputMessage {
    /// The operation tag.
    pub fn op(&self) -> &'static str {
        match self {
            OutputMessage::Stdout { .. } => "stdout",
            OutputMessage::Stderr { .. } => "stderr",
            OutputMessage::CellStatus { .. } => "cell-status",
            OutputMessage::Error { .. } => "error",
            OutputMessage::InputRequest { .. } => "input-request",
            OutputMessage::KernelError { .. } => "kernel-error",
            OutputMessage::ConfigChanged { .. } => "config-changed",
            OutputMessage::CompletedRun { .. } => "completed-run",
        }
    }

    /// The originating cell, for cell-attributed messages.
    pub fn cell_id(&self) -> Option<&CellId> {
        match self {
            OutputMessage::Stdout { cell_id, .. }
            | OutputMessage::Stderr { cell_id, .. }
            | OutputMessage::CellStatus { cell_id, .. }
            | OutputMessage::Error { cell_id, .. }
            | OutputMessage::InputRequest { cell_id, .. } => Some(cell_id),
            OutputMessage::KernelError { .. }
            | OutputMessage::ConfigChanged { .. }
            | OutputMessage::CompletedRun { .. } => None,
        }
    }
}

/// Create a connected stream sender and receiver.
pub fn channel() -> (Stream, StreamReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Stream { tx }, StreamReceiver { rx })
}

/// Sending half of the stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Stream {
    tx: mpsc::UnboundedSender<OutputMessage>,
}

impl Stream {
    /// Append a message. Messages sent after the receiver is gone are dropped.
    pub fn send(&self, message: OutputMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("stream receiver dropped, discarding message");
        }
    }

    /// Whether the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the stream, owned by the transport.
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::UnboundedReceiver<OutputMessage>,
}

impl StreamReceiver {
    /// Take every message currently queued without waiting.
    pub fn drain(&mut self) -> Vec<OutputMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait for the next message. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<OutputMessage> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv). Must not be called from
    /// within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<OutputMessage> {
        self.rx.blocking_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_wire_format() {
        let message = OutputMessage::Stdout {
            cell_id: CellId::new("c2"),
            text: "1\n".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": "stdout", "data": {"cell_id": "c2", "text": "1\n"}})
        );
    }

    #[test]
    fn test_status_kind_omitted_when_absent() {
        let message = OutputMessage::CellStatus {
            cell_id: CellId::new("a"),
            status: CellStatus::Running,
            kind: None,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"op":"cell-status","data":{"cell_id":"a","status":"running"}}"#
        );
    }

    #[test]
    fn test_op_matches_serialized_tag() {
        let messages = vec![
            OutputMessage::Stderr {
                cell_id: CellId::new("a"),
                text: String::new(),
            },
            OutputMessage::Error {
                cell_id: CellId::new("a"),
                kind: ErrorKind::RuntimeError,
                message: "boom".to_string(),
                traceback: vec![],
            },
            OutputMessage::InputRequest {
                cell_id: CellId::new("a"),
                request_id: 1,
                prompt: "> ".to_string(),
            },
            OutputMessage::KernelError {
                kind: ErrorKind::CycleDetected,
                message: "cycle".to_string(),
            },
            OutputMessage::ConfigChanged {
                config: KernelConfig::default(),
            },
            OutputMessage::CompletedRun { cells: vec![] },
        ];

        for message in messages {
            let json = serde_json::to_value(&message).unwrap();
            assert_eq!(json["op"], message.op());
            let parsed: OutputMessage = serde_json::from_value(json).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn test_drain_preserves_order_across_threads() {
        let (stream, mut rx) = channel();
        let writer = stream.clone();
        std::thread::spawn(move || {
            for i in 0..50 {
                writer.send(OutputMessage::Stdout {
                    cell_id: CellId::new("bg"),
                    text: i.to_string(),
                });
            }
        })
        .join()
        .unwrap();

        let texts: Vec<String> = rx
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Stdout { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(texts, expected);
        assert!(!stream.is_closed());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (stream, rx) = channel();
        drop(rx);
        assert!(stream.is_closed());
        stream.send(OutputMessage::CompletedRun { cells: vec![] });
    }
}
