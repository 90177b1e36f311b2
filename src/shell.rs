//! Quoting for command lines handed to `sh -c`.
//!
//! Collaborator scripts receive paths and the configured hostname as
//! arguments. Both come from the environment, so they are quoted before
//! they reach the shell.

use std::path::Path;

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '%' | '=')
}

/// Quote `s` for a POSIX shell. Plain words pass through unchanged,
/// everything else is single-quoted with embedded quotes as `'\''`.
pub fn escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_plain) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Join a program path and its arguments into one quoted command line.
pub fn command_line(program: &Path, args: &[&str]) -> String {
    let mut line = escape(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&escape(arg));
    }
    line
}
