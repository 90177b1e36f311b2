//! Adapter for the Seafile setup scripts shipped in the server directory.
//!
//! `setup-seafile-mysql.py` rejects database hosts it cannot validate from
//! inside the container, and upstream has no switch to turn that off. The
//! script is patched here, and only here, so both validators accept any host.

use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use log::{debug, info};
use uuid::Uuid;

use crate::config::NetworkedDb;
use crate::constants::{MYSQL_USER, MYSQL_USER_HOST, SETUP_SERVER_NAME};
use crate::shell;

pub const SQLITE_SETUP_SCRIPT: &str = "setup-seafile.sh";
pub const MYSQL_SETUP_SCRIPT: &str = "setup-seafile-mysql.sh";
pub const MYSQL_SETUP_PY: &str = "setup-seafile-mysql.py";

const HOST_VALIDATORS: [&str; 2] = [
    "def validate_mysql_user_host(self, host)",
    "def validate_mysql_host(self, host)",
];

/// Insert an early `return host` into each host validator. Validators that
/// already start with it are left alone. Returns whether the file changed.
pub fn patch_host_validation(script: &Path) -> Result<bool> {
    let src = fs::read_to_string(script)
        .with_context(|| format!("Failed to read setup script {:?}", script))?;
    let mut lines: Vec<String> = src.lines().map(str::to_string).collect();
    let mut changed = false;

    for signature in HOST_VALIDATORS {
        let Some(idx) = lines.iter().position(|l| l.contains(signature)) else {
            debug!("{:?} has no `{}`", script, signature);
            continue;
        };

        let already = lines[idx + 1..]
            .iter()
            .find(|l| !l.trim().is_empty())
            .is_some_and(|l| l.trim() == "return host");
        if already {
            continue;
        }

        let def_line = &lines[idx];
        let indent = &def_line[..def_line.len() - def_line.trim_start().len()];
        let body = format!("{}    return host", indent);
        lines.insert(idx + 1, body);
        changed = true;
    }

    if changed {
        let mut out = lines.join("\n");
        if src.ends_with('\n') {
            out.push('\n');
        }
        fs::write(script, out).with_context(|| format!("Failed to write setup script {:?}", script))?;
        info!("Disabled host validation in {:?}", script);
    }
    Ok(changed)
}

pub fn sqlite_setup_command(install_dir: &Path, hostname: &str) -> String {
    shell::command_line(
        &install_dir.join(SQLITE_SETUP_SCRIPT),
        &["auto", "-n", SETUP_SERVER_NAME, "-i", hostname],
    )
}

pub fn mysql_setup_command(install_dir: &Path) -> String {
    shell::command_line(
        &install_dir.join(MYSQL_SETUP_SCRIPT),
        &["auto", "-n", SETUP_SERVER_NAME],
    )
}

/// Password for the database user the setup script creates.
pub fn generate_password() -> String {
    Uuid::new_v4().to_string()
}

/// Environment consumed by `setup-seafile-mysql.sh auto`.
pub fn mysql_setup_env(hostname: &str, db: &NetworkedDb, user_password: &str) -> Vec<(String, String)> {
    [
        ("SERVER_NAME", SETUP_SERVER_NAME),
        ("SERVER_IP", hostname),
        ("MYSQL_USER", MYSQL_USER),
        ("MYSQL_USER_PASSWD", user_password),
        ("MYSQL_USER_HOST", MYSQL_USER_HOST),
        ("MYSQL_HOST", db.host.as_str()),
        ("MYSQL_ROOT_PASSWD", db.root_password.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
