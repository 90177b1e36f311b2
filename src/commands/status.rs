use std::fs;
use std::path::Path;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;

use crate::certs;
use crate::config::{Database, Layout, Settings};
use crate::constants::*;
use crate::stamp::VersionStamp;
use crate::{proxy, ui};

#[derive(Debug, Serialize)]
pub struct CertificateStatus {
    pub path: String,
    pub present: bool,
    pub days_left: Option<i64>,
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectoryStatus {
    pub name: String,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub hostname: String,
    pub initialized: bool,
    pub version: Option<String>,
    pub tls_mode: &'static str,
    pub certificate: Option<CertificateStatus>,
    pub proxy_config: &'static str,
    pub directories: Vec<DirectoryStatus>,
}

fn directory_state(local: &Path, shared: &Path) -> &'static str {
    let shared_present = fs::symlink_metadata(shared).is_ok();
    match fs::symlink_metadata(local) {
        Ok(m) if m.file_type().is_symlink() => {
            if fs::read_link(local).is_ok_and(|t| t == shared) && shared_present {
                "migrated"
            } else {
                "dangling link"
            }
        }
        Ok(_) if shared_present => "local copy shadows shared",
        Ok(_) => "local only",
        Err(_) if shared_present => "shared, not linked",
        Err(_) => "missing",
    }
}

fn certificate_status(layout: &Layout, domain: &str, now: DateTime<Utc>) -> CertificateStatus {
    let path = layout.cert_file(domain);
    let mut status = CertificateStatus {
        path: path.display().to_string(),
        present: path.exists(),
        days_left: None,
        fingerprint: None,
        error: None,
    };
    if status.present {
        match certs::read_certificate(&path) {
            Ok(info) => {
                status.days_left = Some(certs::days_left(&info, now));
                status.fingerprint = Some(info.fingerprint);
            }
            Err(e) => status.error = Some(format!("{:#}", e)),
        }
    }
    status
}

/// Inspect the volume without changing anything.
pub fn collect(settings: &Settings, layout: &Layout, now: DateTime<Utc>) -> StatusReport {
    let mode = settings.tls_mode();
    let certificate = settings
        .https()
        .then(|| certificate_status(layout, &settings.hostname, now));

    let mut names = STATE_DIRS.to_vec();
    if settings.database == Database::Sqlite {
        names.push(SQLITE_DB);
    }
    let directories = names
        .into_iter()
        .map(|name| DirectoryStatus {
            name: name.to_string(),
            state: directory_state(&layout.install_top.join(name), &layout.shared_seafile_dir.join(name)),
        })
        .collect();

    StatusReport {
        hostname: settings.hostname.clone(),
        initialized: layout.shared_seafile_dir.join(SEAFILE_DATA).exists(),
        version: VersionStamp::new(layout.stamp_file()).read().ok(),
        tls_mode: mode.as_str(),
        certificate,
        proxy_config: proxy::config_state(layout),
        directories,
    }
}

pub fn run(settings: &Settings, layout: &Layout, json: bool) -> Result<()> {
    let report = collect(settings, layout, Utc::now());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    ui::print_step(&format!("Seafile bootstrap status for {}", report.hostname));
    println!("{}", "─".repeat(60));

    let volume = if report.initialized {
        "initialized".green()
    } else {
        "fresh".yellow()
    };
    println!("  Shared volume:  {}", volume);
    println!("  Version stamp:  {}", report.version.as_deref().unwrap_or("-"));
    println!("  TLS mode:       {}", report.tls_mode);

    if let Some(cert) = &report.certificate {
        println!("  Certificate:    {}", cert.path);
        match (cert.present, cert.days_left, &cert.error) {
            (false, _, _) => println!("                  {}", "not issued yet".yellow()),
            (_, Some(days), _) => {
                let left = format!("{} days left", days);
                let left = if days < RENEWAL_THRESHOLD_DAYS { left.red() } else { left.green() };
                println!("                  {}", left);
                if let Some(fp) = &cert.fingerprint {
                    println!("                  sha256 {}", fp.dimmed());
                }
            }
            (_, None, Some(err)) => println!("                  {}", err.red()),
            _ => {}
        }
    }

    println!("  nginx config:   {}", report.proxy_config);
    println!();
    println!("  State directories:");
    for dir in &report.directories {
        let icon = match dir.state {
            "migrated" => "●".green(),
            "missing" => "○".dimmed(),
            _ => "●".yellow(),
        };
        println!("    {} {:<16} {}", icon, dir.name, dir.state);
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Env;
    use crate::migrate;
    use crate::proxy::testing::scratch_layout;
    use chrono::TimeZone;
    use rcgen::{CertificateParams, KeyPair};

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::resolve(&Env::from_pairs(pairs.iter().copied())).unwrap()
    }

    #[test]
    fn test_fresh_volume() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let report = collect(&settings(&[("DB_TYPE", "sqlite")]), &layout, Utc::now());

        assert!(!report.initialized);
        assert_eq!(report.version, None);
        assert_eq!(report.tls_mode, "none");
        assert!(report.certificate.is_none());
        assert_eq!(report.proxy_config, "absent");
        assert_eq!(report.directories.len(), STATE_DIRS.len() + 1);
        assert!(report.directories.iter().all(|d| d.state == "missing"));
    }

    #[test]
    fn test_initialized_volume() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let local = layout.install_top.join(SEAFILE_DATA);
        fs::create_dir_all(&local).unwrap();
        migrate::migrate(&local, &layout.shared_seafile_dir.join(SEAFILE_DATA)).unwrap();
        fs::create_dir_all(layout.install_top.join("conf")).unwrap();
        VersionStamp::new(layout.stamp_file()).write("9.0.0").unwrap();

        let report = collect(&settings(&[]), &layout, Utc::now());
        assert!(report.initialized);
        assert_eq!(report.version.as_deref(), Some("9.0.0"));

        let state = |name: &str| report.directories.iter().find(|d| d.name == name).unwrap().state;
        assert_eq!(state(SEAFILE_DATA), "migrated");
        assert_eq!(state("conf"), "local only");
        assert!(report.directories.iter().all(|d| d.name != SQLITE_DB));
    }

    #[test]
    fn test_certificate_details() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let s = settings(&[
            ("SEAFILE_SERVER_HOSTNAME", "files.example.org"),
            ("SEAFILE_SERVER_LETSENCRYPT", "true"),
        ]);

        let missing = collect(&s, &layout, Utc::now()).certificate.unwrap();
        assert!(!missing.present);
        assert_eq!(missing.days_left, None);

        let mut params = CertificateParams::new(vec!["files.example.org".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2030, 1, 31);
        let key = KeyPair::generate().unwrap();
        fs::create_dir_all(&layout.ssl_dir).unwrap();
        fs::write(layout.cert_file("files.example.org"), params.self_signed(&key).unwrap().pem()).unwrap();

        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let report = collect(&s, &layout, now);
        assert_eq!(report.tls_mode, "letsencrypt");
        let cert = report.certificate.unwrap();
        assert_eq!(cert.days_left, Some(30));
        assert_eq!(cert.fingerprint.map(|f| f.len()), Some(64));

        let json = serde_json::to_value(collect(&s, &layout, now)).unwrap();
        assert_eq!(json["certificate"]["days_left"], 30);
        assert_eq!(json["proxy_config"], "absent");
    }

    #[test]
    fn test_unreadable_certificate_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        fs::create_dir_all(&layout.ssl_dir).unwrap();
        fs::write(layout.cert_file("seafile.example.com"), "garbage").unwrap();

        let s = settings(&[("SEAFILE_SERVER_SSL_SELFSIGNED", "true")]);
        let cert = collect(&s, &layout, Utc::now()).certificate.unwrap();
        assert!(cert.present);
        assert!(cert.error.is_some());
        assert_eq!(cert.days_left, None);
    }
}
