//! Raw terminal mode handling

use std::io::{self, IsTerminal};

use crate::output::print_error;

/// Controls the raw mode of the process's terminal
pub trait RawMode: Send {
    /// Whether standard input is an interactive terminal
    fn is_terminal(&self) -> bool;

    /// Switch the terminal to raw mode
    fn enable(&mut self) -> io::Result<()>;

    /// Put the terminal back into the mode it had before [`enable`](RawMode::enable)
    fn restore(&mut self) -> io::Result<()>;
}

/// Raw mode of the real terminal, via crossterm
#[derive(Debug, Default)]
pub struct CrosstermRawMode;

impl RawMode for CrosstermRawMode {
    fn is_terminal(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn enable(&mut self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&mut self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

/// Keeps the terminal in raw mode while alive
///
/// Does nothing when standard input is not a terminal.
pub struct RawModeGuard<'a> {
    mode: &'a mut dyn RawMode,
    active: bool,
}

impl<'a> RawModeGuard<'a> {
    /// Enable raw mode if standard input is a terminal
    pub fn acquire(mode: &'a mut dyn RawMode) -> io::Result<Self> {
        if !mode.is_terminal() {
            return Ok(Self {
                mode,
                active: false,
            });
        }

        mode.enable().map_err(|e| {
            io::Error::new(e.kind(), format!("make raw terminal failed: {}", e))
        })?;
        Ok(Self { mode, active: true })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.mode.restore() {
            print_error(&format!("failed to restore terminal: {}", e));
        }
    }
}
