//! Module containing terminal utilities

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Determines if the terminal can render ANSI colors.
///
/// Output is treated as plain when stdout is not a TTY, `TERM` is `dumb` or `NO_COLOR` is set.
pub fn is_ansi_interactive_terminal() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    let stdout_is_tty = unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 };
    stdout_is_tty && std::env::var("TERM").map_or(true, |term| term != "dumb")
}
