//! Terminal bridge
//!
//! Attaches the process's standard input and output to a console session.
//! Input is read in raw mode and relayed in chunks; a chunk starting with
//! the escape byte (Ctrl+]) disconnects. Output is copied verbatim, status
//! text goes to a separate stream.

mod raw;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use vc_core::{
    ConsoleProvider, ConsoleSession, ConsoleTarget, PipeReader, PipeWriter, Termination,
    BUFFER_SIZE, ESCAPE_SEQUENCE_CODE,
};

pub use raw::{CrosstermRawMode, RawMode, RawModeGuard};

/// Local endpoint of the terminal bridge
pub struct TerminalIo<I, O, E> {
    /// Keystrokes
    pub input: I,
    /// Console output
    pub output: O,
    /// Status messages, kept apart from console output
    pub status: E,
}

/// Banner printed once the console is attached
pub fn connected_message(vmi: &str) -> String {
    format!(
        "Successfully connected to {} console. Press Ctrl+] or Ctrl+5 to exit console.\n",
        vmi
    )
}

/// Open the console of `target` and attach the terminal to it.
///
/// An interrupt during establishment prints a newline and returns
/// [`Termination::UserInterrupt`] without touching the terminal mode.
pub async fn attach<I, O, E>(
    provider: Arc<dyn ConsoleProvider>,
    target: ConsoleTarget,
    timeout: Duration,
    mut io: TerminalIo<I, O, E>,
    raw_mode: &mut dyn RawMode,
    interrupt: &CancellationToken,
) -> Termination
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin,
{
    let vmi = target.name.clone();
    match ConsoleSession::establish(provider, target, timeout, interrupt).await {
        Ok(session) => {
            let message = connected_message(&vmi);
            run_terminal(session, io, raw_mode, &message, interrupt).await
        }
        Err(Termination::UserInterrupt) => {
            let _ = io.output.write_all(b"\n").await;
            let _ = io.output.flush().await;
            Termination::UserInterrupt
        }
        Err(termination) => termination,
    }
}

/// Bridge an established session to the terminal until the first
/// termination signal.
///
/// Raw mode, when enabled, is restored before returning whatever ended the
/// bridge.
pub async fn run_terminal<I, O, E>(
    session: ConsoleSession,
    io: TerminalIo<I, O, E>,
    raw_mode: &mut dyn RawMode,
    message: &str,
    interrupt: &CancellationToken,
) -> Termination
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin,
{
    let target = session.target().clone();
    let (pipes, remote) = session.into_parts();

    let guard = match RawModeGuard::acquire(raw_mode) {
        Ok(guard) => guard,
        Err(e) => {
            pipes.close();
            return Termination::LocalIo(e);
        }
    };

    let TerminalIo {
        input,
        output,
        mut status,
    } = io;
    if let Err(e) = write_status(&mut status, message).await {
        tracing::debug!(vmi = %target, "Failed to write status: {}", e);
    }

    let shutdown = interrupt.child_token();
    let mut outbound = tokio::spawn(copy_outbound(pipes.outbound_reader.clone(), output));
    let mut inbound = tokio::spawn(copy_inbound(
        input,
        pipes.inbound_writer.clone(),
        shutdown.clone(),
    ));

    let termination = tokio::select! {
        biased;
        t = remote.wait() => t,
        _ = interrupt.cancelled() => Termination::UserInterrupt,
        t = &mut outbound => joined(t),
        t = &mut inbound => joined(t),
    };
    tracing::debug!(vmi = %target, "Terminal bridge finished: {}", termination);

    pipes.close();
    shutdown.cancel();
    drop(guard);

    termination
}

async fn write_status<E: AsyncWrite + Unpin>(status: &mut E, message: &str) -> io::Result<()> {
    status.write_all(message.as_bytes()).await?;
    status.flush().await
}

fn joined(result: Result<Termination, JoinError>) -> Termination {
    result.unwrap_or_else(|e| {
        Termination::LocalIo(io::Error::other(format!("bridge task failed: {}", e)))
    })
}

/// Console output to the terminal
async fn copy_outbound<O: AsyncWrite + Unpin>(
    output_pipe: PipeReader,
    mut output: O,
) -> Termination {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = output_pipe.read(&mut buf).await;
        if n == 0 {
            return Termination::RemoteClosed;
        }
        if let Err(e) = output.write_all(&buf[..n]).await {
            return Termination::LocalIo(e);
        }
        if let Err(e) = output.flush().await {
            return Termination::LocalIo(e);
        }
    }
}

/// Keystrokes to the console
async fn copy_inbound<I: AsyncRead + Unpin>(
    mut input: I,
    input_pipe: PipeWriter,
    shutdown: CancellationToken,
) -> Termination {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Termination::UserInterrupt,
            read = input.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => return Termination::LocalIo(e),
            },
        };
        if n == 0 {
            return Termination::LocalInputClosed;
        }

        // Only the first byte of a chunk is checked
        if buf[0] == ESCAPE_SEQUENCE_CODE {
            return Termination::EscapeSequence;
        }

        if input_pipe.write(&buf[..n]).await.is_err() {
            return Termination::RemoteClosed;
        }
    }
}
