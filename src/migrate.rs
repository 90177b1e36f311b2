use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Moved into the shared volume and replaced by a symlink.
    Moved,
    /// Shared copy existed; only the missing symlink was recreated.
    Relinked,
    /// Shared copy existed and the original path needs nothing.
    AlreadyShared,
    /// Neither copy exists.
    Missing,
}

fn present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).with_context(|| format!("Failed to stat {:?}", src))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src).with_context(|| format!("Failed to read link {:?}", src))?;
        symlink(&target, dst).with_context(|| format!("Failed to create link {:?}", dst))?;
    } else if meta.is_dir() {
        fs::create_dir(dst).with_context(|| format!("Failed to create {:?}", dst))?;
        fs::set_permissions(dst, meta.permissions())?;
        for entry in fs::read_dir(src).with_context(|| format!("Failed to list {:?}", src))? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst).with_context(|| format!("Failed to copy {:?} to {:?}", src, dst))?;
    }
    Ok(())
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Sibling of `dst` that a cross-device copy is staged in.
fn staging_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(OsString::from).unwrap_or_default();
    name.push(".migrating");
    dst.with_file_name(name)
}

/// Copy `src` into `dst` through a staging path, so `dst` only ever appears
/// complete.
fn copy_into_place(src: &Path, dst: &Path) -> Result<()> {
    let staging = staging_path(dst);
    copy_recursive(src, &staging)?;
    fs::rename(&staging, dst).with_context(|| format!("Failed to move {:?} to {:?}", staging, dst))
}

/// Rename `src` to `dst`, falling back to copy and delete when they sit on
/// different filesystems (the shared volume usually is a separate mount).
/// A staging copy left by an interrupted run is discarded first.
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    let staging = staging_path(dst);
    if present(&staging) {
        warn!("Discarding incomplete copy {:?}", staging);
        remove_any(&staging).with_context(|| format!("Failed to remove {:?}", staging))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!("{:?} and {:?} are on different devices, copying", src, dst);
            copy_into_place(src, dst)?;
            remove_any(src).with_context(|| format!("Failed to remove {:?} after copy", src))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to move {:?} to {:?}", src, dst)),
    }
}

/// Point `link` at `target`, replacing a previous symlink at `link`.
pub fn force_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        if !meta.file_type().is_symlink() {
            bail!("Refusing to replace {:?} with a symlink", link);
        }
        fs::remove_file(link).with_context(|| format!("Failed to remove stale link {:?}", link))?;
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    symlink(target, link).with_context(|| format!("Failed to link {:?} -> {:?}", link, target))
}

/// Move `local` to `shared` and leave a symlink behind.
pub fn persist(local: &Path, shared: &Path) -> Result<()> {
    if let Some(parent) = shared.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    move_path(local, shared)?;
    force_symlink(shared, local)
}

/// Migrate one state entry. A shared copy that already exists is never
/// touched.
pub fn migrate(local: &Path, shared: &Path) -> Result<Migration> {
    if present(shared) {
        if !present(local) {
            force_symlink(shared, local)?;
            info!("Relinked {:?} -> {:?}", local, shared);
            return Ok(Migration::Relinked);
        }
        let linked = fs::read_link(local).is_ok_and(|t| t == shared);
        if !linked {
            warn!("{:?} exists both locally and in the shared volume, keeping the shared copy", local);
        }
        return Ok(Migration::AlreadyShared);
    }

    if !present(local) {
        debug!("{:?} does not exist, nothing to migrate", local);
        return Ok(Migration::Missing);
    }

    persist(local, shared)?;
    info!("Moved {:?} to {:?}", local, shared);
    Ok(Migration::Moved)
}
