//! Output formatting utilities for the CLI
//!
//! Colored error output and the user-facing explanation of how a console
//! session ended.

use vc_core::Termination;

/// Explanation printed when the console went away without a closing
/// handshake
pub const ABNORMAL_CLOSURE_EXPLANATION: &str = "\n\
You were disconnected from the console. This could be caused by one of the following:\n \
- the target VM was powered off\n \
- another user connected to the console of the target VM\n \
- network issues\n";

/// What to tell the user about a finished console session, if anything
pub fn termination_report(termination: &Termination) -> Option<String> {
    if termination.is_clean() {
        None
    } else if termination.is_abnormal_closure() {
        Some(ABNORMAL_CLOSURE_EXPLANATION.to_string())
    } else {
        Some(termination.to_string())
    }
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
