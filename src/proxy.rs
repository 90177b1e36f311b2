//! nginx site configuration for the Seafile container.

use std::fs;
use anyhow::{Context, Result};
use log::info;
use serde_json::json;

use crate::config::{Layout, Settings};
use crate::constants::{NGINX_RELOAD_COMMAND, NGINX_TEMPLATE};
use crate::migrate;
use crate::runner::CommandRunner;
use crate::template;

fn render_site(layout: &Layout, domain: &str, https: bool) -> Result<()> {
    let local = &layout.nginx_local_conf;
    // A leftover link into the shared volume must not be written through
    if fs::symlink_metadata(local).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(local).with_context(|| format!("Failed to remove {:?}", local))?;
    }
    let context = json!({
        "https": https,
        "domain": domain,
    });
    template::render(&layout.template(NGINX_TEMPLATE), local, &context)
}

fn has_persisted_config(layout: &Layout) -> bool {
    layout.nginx_shared_conf.is_file()
}

/// A replaced container loses the link to the persisted config.
fn relink_persisted(layout: &Layout) -> Result<()> {
    let local = &layout.nginx_local_conf;
    if fs::read_link(local).is_ok_and(|t| t == layout.nginx_shared_conf) {
        return Ok(());
    }
    if fs::symlink_metadata(local).is_ok_and(|m| !m.file_type().is_symlink()) {
        fs::remove_file(local).with_context(|| format!("Failed to remove {:?}", local))?;
    }
    migrate::force_symlink(&layout.nginx_shared_conf, local)?;
    info!("Relinked {:?} -> {:?}", local, layout.nginx_shared_conf);
    Ok(())
}

/// Plain HTTP site used while the ACME HTTP-01 challenge runs. Skipped
/// when a final config was persisted by an earlier boot.
pub fn render_challenge_config(layout: &Layout, domain: &str) -> Result<bool> {
    if has_persisted_config(layout) {
        relink_persisted(layout)?;
        return Ok(false);
    }
    render_site(layout, domain, false)?;
    info!("Rendered temporary HTTP config for {}", domain);
    Ok(true)
}

/// Render the final site config once and keep it in the shared volume,
/// with a symlink at the path nginx reads. A persisted config is only
/// relinked.
pub fn ensure_site_config(layout: &Layout, settings: &Settings) -> Result<bool> {
    if has_persisted_config(layout) {
        relink_persisted(layout)?;
        return Ok(false);
    }

    render_site(layout, &settings.hostname, settings.https())?;
    migrate::persist(&layout.nginx_local_conf, &layout.nginx_shared_conf)
        .with_context(|| format!("Failed to persist {:?}", layout.nginx_local_conf))?;
    info!(
        "Generated nginx config for {} (https: {})",
        settings.hostname,
        settings.https()
    );
    Ok(true)
}

pub fn reload(runner: &dyn CommandRunner) -> Result<()> {
    runner.run(NGINX_RELOAD_COMMAND, &[])
}

/// Where the site config currently lives, for status reporting.
pub fn config_state(layout: &Layout) -> &'static str {
    let local = &layout.nginx_local_conf;
    match fs::symlink_metadata(local) {
        Ok(m) if m.file_type().is_symlink() => {
            if fs::read_link(local).is_ok_and(|t| t == layout.nginx_shared_conf) && has_persisted_config(layout) {
                "persisted"
            } else {
                "dangling link"
            }
        }
        Ok(_) if has_persisted_config(layout) => "local copy shadows persisted config",
        Ok(_) => "local only",
        Err(_) if has_persisted_config(layout) => "persisted, not linked",
        Err(_) => "absent",
    }
}


#[cfg(test)]
mod tests {
    use super::testing::scratch_layout;
    use super::*;
    use crate::config::Env;
    use crate::runner::testing::RecordingRunner;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::resolve(&Env::from_pairs(pairs.iter().copied())).unwrap()
    }

    #[test]
    fn test_site_config_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let s = settings(&[
            ("SEAFILE_SERVER_HOSTNAME", "files.example.org"),
            ("SEAFILE_SERVER_LETSENCRYPT", "true"),
        ]);

        assert_eq!(config_state(&layout), "absent");
        assert!(ensure_site_config(&layout, &s).unwrap());
        assert_eq!(config_state(&layout), "persisted");

        let conf = fs::read_to_string(&layout.nginx_local_conf).unwrap();
        assert!(conf.contains("listen 443 ssl;"));
        assert!(conf.contains("ssl_certificate /shared/ssl/files.example.org.crt;"));
        assert_eq!(fs::read_link(&layout.nginx_local_conf).unwrap(), layout.nginx_shared_conf);

        // Operator edits survive later boots
        fs::write(&layout.nginx_shared_conf, "# custom\n").unwrap();
        assert!(!ensure_site_config(&layout, &s).unwrap());
        assert_eq!(fs::read_to_string(&layout.nginx_local_conf).unwrap(), "# custom\n");
    }

    #[test]
    fn test_plain_http_site() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        ensure_site_config(&layout, &settings(&[])).unwrap();

        let conf = fs::read_to_string(&layout.nginx_shared_conf).unwrap();
        assert!(conf.contains("server_name seafile.example.com;"));
        assert!(!conf.contains("443"));
    }

    #[test]
    fn test_challenge_config_replaced_by_final() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());

        assert!(render_challenge_config(&layout, "files.example.org").unwrap());
        assert_eq!(config_state(&layout), "local only");
        assert!(!fs::read_to_string(&layout.nginx_local_conf).unwrap().contains("443"));

        let s = settings(&[
            ("SEAFILE_SERVER_HOSTNAME", "files.example.org"),
            ("SEAFILE_SERVER_LETSENCRYPT", "true"),
        ]);
        ensure_site_config(&layout, &s).unwrap();
        assert!(fs::read_to_string(&layout.nginx_local_conf).unwrap().contains("443"));

        assert!(!render_challenge_config(&layout, "files.example.org").unwrap());
    }

    #[test]
    fn test_dangling_link_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        fs::create_dir_all(layout.nginx_local_conf.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&layout.nginx_shared_conf, &layout.nginx_local_conf).unwrap();
        assert_eq!(config_state(&layout), "dangling link");

        assert!(ensure_site_config(&layout, &settings(&[])).unwrap());
        assert_eq!(config_state(&layout), "persisted");
    }

    #[test]
    fn test_persisted_config_is_relinked() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let s = settings(&[]);
        ensure_site_config(&layout, &s).unwrap();
        fs::write(&layout.nginx_shared_conf, "# custom\n").unwrap();

        // New container: the local link is gone
        fs::remove_file(&layout.nginx_local_conf).unwrap();
        assert_eq!(config_state(&layout), "persisted, not linked");
        assert!(!ensure_site_config(&layout, &s).unwrap());
        assert_eq!(config_state(&layout), "persisted");
        assert_eq!(fs::read_to_string(&layout.nginx_local_conf).unwrap(), "# custom\n");

        // The image ships its own default file at the same path
        fs::remove_file(&layout.nginx_local_conf).unwrap();
        fs::write(&layout.nginx_local_conf, "# packaged default\n").unwrap();
        assert!(!render_challenge_config(&layout, "seafile.example.com").unwrap());
        assert_eq!(config_state(&layout), "persisted");
        assert_eq!(fs::read_to_string(&layout.nginx_local_conf).unwrap(), "# custom\n");
    }

    #[test]
    fn test_reload_runs_nginx() {
        let runner = RecordingRunner::default();
        reload(&runner).unwrap();
        assert_eq!(runner.commands(), vec!["nginx -s reload".to_string()]);

        let failing = RecordingRunner::failing_on("nginx", 1);
        assert!(reload(&failing).is_err());
    }
}
