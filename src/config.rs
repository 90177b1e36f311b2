use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

use crate::constants::*;

/// Snapshot of the process environment, taken once at startup.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    pub fn from_process() -> Self {
        // Non-UTF-8 variables are never ours, skip them
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Env { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Env {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Case-insensitive `"true"`; anything else, including unset, is false.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    SelfSigned,
    LetsEncrypt,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::SelfSigned => "selfsigned",
            TlsMode::LetsEncrypt => "letsencrypt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkedDb {
    pub host: String,
    pub port: u16,
    pub root_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Database {
    Sqlite,
    Networked(NetworkedDb),
}

/// Everything the bootstrap reads from the environment, resolved once.
#[derive(Debug, Clone)]
pub struct Settings {
    pub hostname: String,
    pub letsencrypt: bool,
    pub self_signed: bool,
    pub external_port: Option<String>,
    pub database: Database,
    pub version: Option<String>,
    pub server_prefix: String,
    pub time_zone: String,
    pub wait_timeout: Duration,
}

impl Settings {
    pub fn resolve(env: &Env) -> Result<Self> {
        let database = if env.get_or("DB_TYPE", DEFAULT_DB_TYPE) == "sqlite" {
            Database::Sqlite
        } else {
            let port = match env.get("DB_PORT") {
                Some(p) => p
                    .parse::<u16>()
                    .with_context(|| format!("Invalid DB_PORT: {:?}", p))?,
                None => DEFAULT_DB_PORT,
            };
            Database::Networked(NetworkedDb {
                host: env.get_or("DB_HOST", DEFAULT_DB_HOST).to_string(),
                port,
                root_password: env.get_or("DB_ROOT_PASSWD", "").to_string(),
            })
        };

        let wait_timeout = match env.get("BOOTSTRAP_WAIT_TIMEOUT") {
            Some(t) => Duration::from_secs(
                t.parse::<u64>()
                    .with_context(|| format!("Invalid BOOTSTRAP_WAIT_TIMEOUT: {:?}", t))?,
            ),
            None => Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
        };

        Ok(Settings {
            hostname: env.get_or("SEAFILE_SERVER_HOSTNAME", DEFAULT_HOSTNAME).to_string(),
            letsencrypt: env.flag("SEAFILE_SERVER_LETSENCRYPT"),
            self_signed: env.flag("SEAFILE_SERVER_SSL_SELFSIGNED"),
            external_port: env
                .get("SEAFILE_SERVER_EXTERNAL_PORT")
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            database,
            version: env.get("SEAFILE_VERSION").map(str::to_string),
            server_prefix: env.get_or("SEAFILE_SERVER", DEFAULT_SERVER_PREFIX).to_string(),
            time_zone: env.get_or("TIME_ZONE", DEFAULT_TIME_ZONE).to_string(),
            wait_timeout,
        })
    }

    /// Let's Encrypt wins when both TLS flags are set.
    pub fn tls_mode(&self) -> TlsMode {
        if self.letsencrypt {
            TlsMode::LetsEncrypt
        } else if self.self_signed {
            TlsMode::SelfSigned
        } else {
            TlsMode::None
        }
    }

    pub fn https(&self) -> bool {
        self.tls_mode() != TlsMode::None
    }

    pub fn require_version(&self) -> Result<&str> {
        self.version
            .as_deref()
            .ok_or_else(|| anyhow!("Missing required environment variable: SEAFILE_VERSION"))
    }

    /// Host as clients see it, with the external port when one is set.
    pub fn service_host(&self) -> String {
        match &self.external_port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    pub fn service_url(&self) -> String {
        let proto = if self.https() { "https" } else { "http" };
        format!("{}://{}", proto, self.service_host())
    }
}

/// Blocking intervals used during a boot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub reload_settle: Duration,
}

impl Timing {
    pub fn from_settings(settings: &Settings) -> Self {
        Timing {
            wait_timeout: settings.wait_timeout,
            poll_interval: Duration::from_millis(WAIT_POLL_INTERVAL_MS),
            reload_settle: Duration::from_millis(RELOAD_SETTLE_MS),
        }
    }
}

/// Fixed filesystem locations. Defaults match the container image; a YAML
/// file may override any of them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Layout {
    pub shared_seafile_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub install_top: PathBuf,
    pub nginx_local_conf: PathBuf,
    pub nginx_shared_conf: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            shared_seafile_dir: PathBuf::from(SHARED_SEAFILE_DIR),
            ssl_dir: PathBuf::from(SSL_DIR),
            generated_dir: PathBuf::from(GENERATED_DIR),
            templates_dir: PathBuf::from(TEMPLATES_DIR),
            scripts_dir: PathBuf::from(SCRIPTS_DIR),
            install_top: PathBuf::from(INSTALL_TOP),
            nginx_local_conf: PathBuf::from(NGINX_LOCAL_CONF),
            nginx_shared_conf: PathBuf::from(NGINX_SHARED_CONF),
        }
    }
}

impl Layout {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read layout file: {:?}", path.as_ref()))?;
        let layout: Layout = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse YAML layout")?;
        Ok(layout)
    }

    pub fn stamp_file(&self) -> PathBuf {
        self.shared_seafile_dir.join(SEAFILE_DATA).join(VERSION_STAMP_NAME)
    }

    pub fn latest_link(&self) -> PathBuf {
        self.install_top.join(LATEST_LINK_NAME)
    }

    pub fn versioned_dir(&self, prefix: &str, version: &str) -> PathBuf {
        self.install_top.join(format!("{}-{}", prefix, version))
    }

    /// Directory of the server release this container ships.
    pub fn install_dir(&self, settings: &Settings) -> Result<PathBuf> {
        Ok(self.versioned_dir(&settings.server_prefix, settings.require_version()?))
    }

    /// Files under `<install_top>/conf`, written by the setup scripts.
    pub fn conf_file(&self, name: &str) -> PathBuf {
        self.install_top.join("conf").join(name)
    }

    pub fn template(&self, name: &str) -> PathBuf {
        self.templates_dir.join(name)
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(name)
    }

    pub fn cert_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join(format!("{}.crt", domain))
    }
}
