//! Readiness polling for nginx and the database.

use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Result, bail};
use log::{debug, info};
use wait_timeout::ChildExt;

use crate::ui;

pub trait Probe {
    /// Human readable target, used in log lines and errors.
    fn describe(&self) -> String;

    /// One readiness attempt, bounded by `budget`.
    fn ready(&self, budget: Duration) -> bool;
}

/// Ready once a TCP connection to `host:port` succeeds.
pub struct TcpProbe {
    pub host: String,
    pub port: u16,
}

impl Probe for TcpProbe {
    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    fn ready(&self, budget: Duration) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Cannot resolve {}: {}", self.host, e);
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, budget).is_ok())
    }
}

/// Ready once `sh -c command` exits zero. An attempt that outlives the
/// budget is killed and counts as not ready.
pub struct CommandProbe {
    pub command: String,
}

impl Probe for CommandProbe {
    fn describe(&self) -> String {
        format!("`{}`", self.command)
    }

    fn ready(&self, budget: Duration) -> bool {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to spawn probe {}: {}", self.command, e);
                return false;
            }
        };

        match child.wait_timeout(budget) {
            Ok(Some(status)) => status.success(),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                false
            }
            Err(_) => false,
        }
    }
}

/// Poll `probe` every `interval` until it succeeds or `timeout` elapses.
pub fn wait_for(probe: &dyn Probe, timeout: Duration, interval: Duration) -> Result<()> {
    let target = probe.describe();
    let spinner = ui::create_spinner(&format!("Waiting for {}", target));
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if probe.ready(interval) {
            spinner.finish_and_clear();
            info!("{} is ready", target);
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            spinner.finish_and_clear();
            bail!(
                "Timed out after {}s waiting for {} ({} attempts)",
                timeout.as_secs(),
                target,
                attempt
            );
        }

        if attempt == 1 {
            info!("Waiting for {} (up to {}s)", target, timeout.as_secs());
        } else {
            debug!("Waiting for {} (attempt {})", target, attempt);
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}
