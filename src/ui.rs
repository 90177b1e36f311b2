use colored::*;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

pub fn print_step(msg: &str) {
    println!("{} {}", "::".blue().bold(), msg.bold());
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✔".green().bold(), msg.green());
}

/// Step skipped because its result is already in place.
pub fn print_skip(msg: &str) {
    println!("{} {}", "↷".yellow().bold(), msg.dimmed());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✖".red().bold(), msg.red());
}

/// Spinner for readiness waits, which poll every couple of seconds for up
/// to several minutes. It shows the elapsed time and redraws rarely. Without
/// a terminal on stderr (the usual case in a container) indicatif draws
/// nothing and the log lines from the wait carry the progress.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(4));
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["-", "\\", "|", "/", " "])
        .template("{spinner:.blue} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(250));
    pb
}
