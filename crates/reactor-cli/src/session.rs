//! Stdin/stdout session driving one kernel.
//!
//! Commands arrive as JSON lines on stdin; every stream message is written to
//! stdout as one JSON line. Logs go to stderr.

use reactor_core::{
    ExecutionRequest, Kernel, KernelConfig, KernelHandle, Scheduler, ScriptAnalyzer,
    ScriptRuntime, stream,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::protocol::ClientCommand;

/// Run a session until stdin closes or a `shutdown` command arrives.
pub async fn execute(config: KernelConfig) -> anyhow::Result<()> {
    let (stream, mut rx) = stream::channel();
    let scheduler = Scheduler::new(ScriptAnalyzer, ScriptRuntime::new(), config, stream);
    let kernel = Kernel::spawn(scheduler)?;
    let handle = kernel.handle();

    // Task: Forward stream messages to stdout
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    // Task: Ctrl-C interrupts the running cell
    let interrupter = {
        let handle = handle.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt requested");
                handle.interrupt();
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match ClientCommand::parse(line) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!("ignoring malformed command: {}", err);
                continue;
            }
        };
        if !dispatch(&handle, command)? {
            break;
        }
    }

    tracing::debug!("input closed, draining kernel");
    if handle.shutdown().is_err() {
        tracing::debug!("kernel already stopped");
    }
    drop(handle);
    let scheduler = tokio::task::spawn_blocking(move || kernel.join()).await??;
    drop(scheduler);

    interrupter.abort();
    writer.await??;
    Ok(())
}

/// Forward one command to the kernel. Returns `false` on `shutdown`.
fn dispatch(handle: &KernelHandle, command: ClientCommand) -> anyhow::Result<bool> {
    match command {
        ClientCommand::Run { cell_id, code } => {
            handle.submit(ExecutionRequest { cell_id, code })?;
        }
        ClientCommand::RunBatch { cells } => handle.submit_batch(cells)?,
        ClientCommand::RunStale => handle.run_stale()?,
        ClientCommand::Input { request_id, text } => {
            if let Err(err) = handle.respond_input(request_id, text) {
                tracing::warn!("input response dropped: {}", err);
            }
        }
        ClientCommand::Interrupt => handle.interrupt(),
        ClientCommand::Config(config) => handle.update_config(config)?,
        ClientCommand::Shutdown => return Ok(false),
    }
    Ok(true)
}
