//! Version stamp kept in the shared volume.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, bail};
use log::info;

pub struct VersionStamp {
    path: PathBuf,
}

impl VersionStamp {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        VersionStamp { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                bail!("Version stamp not found: {:?}", self.path)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read version stamp {:?}", self.path)),
        }
    }

    /// Writes through a temp file and a rename so a crash never leaves a
    /// truncated stamp behind.
    pub fn write(&self, version: &str) -> Result<()> {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", version))
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move {:?} to {:?}", tmp, self.path))?;

        info!("Version stamp set to {}", version);
        Ok(())
    }
}
