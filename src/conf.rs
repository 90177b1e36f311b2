//! Patching of the configuration files written by the setup scripts.
//!
//! INI files (`ccnet.conf`, `seafevents.conf`, `seafdav.conf`) go through
//! [`IniDocument`], which keeps comments and unknown lines intact and updates
//! keys in place. `seahub_settings.py` is Python, so it gets a managed block
//! that is replaced on every run.

use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use log::{debug, info};

use crate::config::Settings;
use crate::constants::{CCNET_SOCKET_PATH, OFFICE_CONVERTOR_ROOT_LINE};

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Section(String),
    Entry { key: String, value: String },
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IniDocument {
    lines: Vec<Line>,
}

impl IniDocument {
    pub fn parse(src: &str) -> Self {
        let lines = src
            .lines()
            .map(|raw| {
                let trimmed = raw.trim();
                if trimmed.starts_with('[') && trimmed.ends_with(']') {
                    Line::Section(trimmed[1..trimmed.len() - 1].trim().to_string())
                } else if trimmed.starts_with('#') || trimmed.starts_with(';') {
                    Line::Other(raw.to_string())
                } else if let Some((key, value)) = trimmed.split_once('=') {
                    Line::Entry {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    }
                } else {
                    Line::Other(raw.to_string())
                }
            })
            .collect();
        IniDocument { lines }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Self::parse(&src))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string()).with_context(|| format!("Failed to write {:?}", path))
    }

    /// Index of the section header and the end of its body.
    fn section_range(&self, section: &str) -> Option<(usize, usize)> {
        let start = self
            .lines
            .iter()
            .position(|l| matches!(l, Line::Section(name) if name == section))?;
        let end = self.lines[start + 1..]
            .iter()
            .position(|l| matches!(l, Line::Section(_)))
            .map(|i| i + start + 1)
            .unwrap_or(self.lines.len());
        Some((start, end))
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.section_range(section).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let (start, end) = self.section_range(section)?;
        self.lines[start + 1..end].iter().find_map(|l| match l {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key` inside an existing section. New keys go right after the
    /// header. Returns false when the section is missing or the value
    /// already matches.
    pub fn upsert(&mut self, section: &str, key: &str, value: &str) -> bool {
        let Some((start, end)) = self.section_range(section) else {
            return false;
        };

        for line in &mut self.lines[start + 1..end] {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    if v == value {
                        return false;
                    }
                    *v = value.to_string();
                    return true;
                }
            }
        }

        self.lines.insert(
            start + 1,
            Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
        true
    }

    /// Like [`upsert`](Self::upsert) but appends the section when missing.
    pub fn ensure(&mut self, section: &str, key: &str, value: &str) -> bool {
        if !self.has_section(section) {
            if self.lines.last().is_some_and(|l| !matches!(l, Line::Other(s) if s.trim().is_empty())) {
                self.lines.push(Line::Other(String::new()));
            }
            self.lines.push(Line::Section(section.to_string()));
        }
        self.upsert(section, key, value)
    }
}

impl std::fmt::Display for IniDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            match line {
                Line::Section(name) => writeln!(f, "[{}]", name)?,
                Line::Entry { key, value } => writeln!(f, "{} = {}", key, value)?,
                Line::Other(raw) => writeln!(f, "{}", raw)?,
            }
        }
        Ok(())
    }
}

const BLOCK_BEGIN: &str = "# >>> seafile-bootstrap >>>";
const BLOCK_END: &str = "# <<< seafile-bootstrap <<<";

fn seahub_block(settings: &Settings) -> String {
    let url = settings.service_url();
    format!(
        r#"{begin}
CACHES = {{
    'default': {{
        'BACKEND': 'django_pylibmc.memcached.PyLibMCCache',
        'LOCATION': 'localhost:11211',
    }},
    'locmem': {{
        'BACKEND': 'django.core.cache.backends.locmem.LocMemCache',
    }},
}}
COMPRESS_CACHE_BACKEND = 'locmem'
TIME_ZONE = '{tz}'
SERVICE_URL = "{url}"
FILE_SERVER_ROOT = "{url}/seafhttp"
CSRF_TRUSTED_ORIGINS = ["{host}"]
{end}
"#,
        begin = BLOCK_BEGIN,
        end = BLOCK_END,
        tz = settings.time_zone,
        url = url,
        host = settings.service_host(),
    )
}

/// Write the cache, time zone, URL and CSRF settings into
/// `seahub_settings.py`. A block from an earlier run is replaced where it
/// stands, so lines appended after it keep their position.
pub fn patch_seahub_settings(path: &Path, settings: &Settings) -> Result<()> {
    let current = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };
    let block = seahub_block(settings);

    let mut updated = String::with_capacity(current.len() + block.len());
    let mut inside = false;
    let mut placed = false;
    for line in current.lines() {
        match line.trim() {
            BLOCK_BEGIN => {
                inside = true;
                if !placed {
                    updated.push_str(&block);
                    placed = true;
                }
            }
            BLOCK_END => inside = false,
            _ if !inside => {
                updated.push_str(line);
                updated.push('\n');
            }
            _ => {}
        }
    }

    if !placed {
        updated.truncate(updated.trim_end().len());
        if !updated.is_empty() {
            updated.push_str("\n\n");
        }
        updated.push_str(&block);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    fs::write(path, updated).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Updated {:?} with service URL {}", path, settings.service_url());
    Ok(())
}

/// Move the ccnet client socket out of the mounted `ccnet` directory.
pub fn patch_ccnet(path: &Path) -> Result<()> {
    let mut doc = if path.exists() { IniDocument::load(path)? } else { IniDocument::default() };
    if doc.ensure("Client", "UNIX_SOCKET", CCNET_SOCKET_PATH) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }
        doc.save(path)?;
        info!("Set ccnet client socket to {}", CCNET_SOCKET_PATH);
    }
    Ok(())
}

/// Point search at the external Elasticsearch container and the office
/// converter at its local port. Sections absent from the file are left alone.
pub fn patch_seafevents(path: &Path) -> Result<()> {
    let mut doc = IniDocument::load(path)?;
    let mut changed = false;

    for (key, value) in [
        ("es_port", "9200"),
        ("es_host", "elasticsearch"),
        ("external_es_server", "true"),
    ] {
        changed |= doc.upsert("INDEX FILES", key, value);
    }
    for (key, value) in [("host", "127.0.0.1"), ("port", "6000")] {
        changed |= doc.upsert("OFFICE CONVERTER", key, value);
    }

    if changed {
        doc.save(path)?;
        info!("Patched {:?}", path);
    } else {
        debug!("{:?} already patched", path);
    }
    Ok(())
}

/// Append the office converter root to `seahub_settings.py` unless an
/// identical line is already there.
pub fn ensure_office_convertor_root(path: &Path) -> Result<()> {
    let mut content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    if content.lines().any(|l| l == OFFICE_CONVERTOR_ROOT_LINE) {
        return Ok(());
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(OFFICE_CONVERTOR_ROOT_LINE);
    content.push('\n');
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}

/// WebDAV must not share the root path with seahub behind nginx.
pub fn patch_seafdav(path: &Path) -> Result<()> {
    let mut doc = IniDocument::load(path)?;
    if doc.get("WEBDAV", "share_name") == Some("/") {
        doc.upsert("WEBDAV", "share_name", "/seafdav");
        doc.save(path)?;
        info!("Moved WebDAV share to /seafdav");
    }
    Ok(())
}
