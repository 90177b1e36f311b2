//! TLS certificate lifecycle: reuse, issue via ACME, or self-sign.

use std::fs;
use std::path::Path;
use std::thread;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::json;
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

use crate::config::{Layout, Timing, TlsMode};
use crate::constants::{ACME_STATE_DIR, CRON_OUTPUT, CRON_TEMPLATE, RENEWAL_THRESHOLD_DAYS};
use crate::runner::CommandRunner;
use crate::waiter::{self, Probe};
use crate::{proxy, shell, template};

pub const SELF_SIGNED_SCRIPT: &str = "ssl.selfsigned.sh";
pub const ACME_SCRIPT: &str = "ssl.sh";
pub const RENEW_SCRIPT: &str = "auto_renew_crt.sh";

#[derive(Debug, Clone, PartialEq)]
pub struct CertInfo {
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
}

/// Parse a PEM certificate for its expiry and SHA-256 fingerprint.
pub fn parse_certificate(pem: &[u8]) -> Result<CertInfo> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| anyhow!("Failed to parse PEM: {}", e))?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| anyhow!("Failed to parse X.509 certificate: {}", e))?;

    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| anyhow!("Invalid notAfter timestamp"))?;

    let mut hasher = Sha256::new();
    hasher.update(&pem.contents);

    Ok(CertInfo {
        not_after,
        fingerprint: hex::encode(hasher.finalize()),
    })
}

pub fn read_certificate(path: &Path) -> Result<CertInfo> {
    let pem = fs::read(path).with_context(|| format!("Failed to read certificate {:?}", path))?;
    parse_certificate(&pem).with_context(|| format!("Invalid certificate {:?}", path))
}

/// Whole days from `now` until expiry, negative once expired.
pub fn days_left(info: &CertInfo, now: DateTime<Utc>) -> i64 {
    (info.not_after - now).num_days()
}

pub trait CertInspector {
    fn remaining_days(&self, cert: &Path) -> Result<i64>;
}

pub struct X509Inspector;

impl CertInspector for X509Inspector {
    fn remaining_days(&self, cert: &Path) -> Result<i64> {
        Ok(days_left(&read_certificate(cert)?, Utc::now()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertOutcome {
    Disabled,
    SelfSigned,
    Reused { days_left: i64 },
    Issued,
}

pub struct CertManager<'a> {
    pub layout: &'a Layout,
    pub runner: &'a dyn CommandRunner,
    pub proxy: &'a dyn Probe,
    pub inspector: &'a dyn CertInspector,
    pub timing: Timing,
}

impl CertManager<'_> {
    pub fn ensure(&self, mode: TlsMode, domain: &str) -> Result<CertOutcome> {
        match mode {
            TlsMode::None => Ok(CertOutcome::Disabled),
            TlsMode::SelfSigned => self.self_signed(domain),
            TlsMode::LetsEncrypt => self.letsencrypt(domain),
        }
    }

    fn script_command(&self, script: &str, domain: &str) -> String {
        let ssl_dir = self.layout.ssl_dir.to_string_lossy();
        shell::command_line(&self.layout.script(script), &[&*ssl_dir, domain])
    }

    fn prepare(&self) -> Result<()> {
        waiter::wait_for(self.proxy, self.timing.wait_timeout, self.timing.poll_interval)?;
        fs::create_dir_all(&self.layout.ssl_dir)
            .with_context(|| format!("Failed to create {:?}", self.layout.ssl_dir))
    }

    fn self_signed(&self, domain: &str) -> Result<CertOutcome> {
        info!("Preparing self-signed certificate for {}", domain);
        self.prepare()?;
        self.runner.run(&self.script_command(SELF_SIGNED_SCRIPT, domain), &[])?;
        Ok(CertOutcome::SelfSigned)
    }

    fn install_renewal(&self, domain: &str) -> Result<()> {
        self.runner.run(&self.script_command(RENEW_SCRIPT, domain), &[])
    }

    fn letsencrypt(&self, domain: &str) -> Result<CertOutcome> {
        info!("Preparing Let's Encrypt certificate for {}", domain);
        self.prepare()?;

        let context = json!({
            "ssl_dir": self.layout.ssl_dir.to_string_lossy(),
            "domain": domain,
        });
        template::render(
            &self.layout.template(CRON_TEMPLATE),
            &self.layout.generated_dir.join(CRON_OUTPUT),
            &context,
        )?;

        let cert = self.layout.cert_file(domain);
        if cert.exists() {
            info!("Found existing certificate {:?}", cert);
            match self.inspector.remaining_days(&cert) {
                Ok(days) if days >= RENEWAL_THRESHOLD_DAYS => {
                    info!("Certificate is valid for {} more days, skipping verification", days);
                    if self.layout.ssl_dir.join(ACME_STATE_DIR).exists() {
                        self.install_renewal(domain)?;
                    }
                    return Ok(CertOutcome::Reused { days_left: days });
                }
                Ok(days) => info!("Certificate expires in {} days, renewing", days),
                Err(e) => warn!("Cannot check {:?}, requesting a new one: {:#}", cert, e),
            }
        }

        info!("Starting Let's Encrypt verification for {}", domain);
        proxy::render_challenge_config(self.layout, domain)?;
        proxy::reload(self.runner)?;
        thread::sleep(self.timing.reload_settle);

        self.runner.run(&self.script_command(ACME_SCRIPT, domain), &[])?;
        self.install_renewal(domain)?;
        Ok(CertOutcome::Issued)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Reports the same remaining validity for every certificate.
    pub struct FixedDays(pub i64);

    impl CertInspector for FixedDays {
        fn remaining_days(&self, _cert: &Path) -> Result<i64> {
            Ok(self.0)
        }
    }

    pub fn quick_timing() -> Timing {
        Timing {
            wait_timeout: std::time::Duration::from_millis(50),
            poll_interval: std::time::Duration::from_millis(1),
            reload_settle: std::time::Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FixedDays, quick_timing};
    use super::*;
    use crate::proxy::testing::scratch_layout;
    use crate::runner::testing::RecordingRunner;
    use crate::waiter::testing::ScriptedProbe;
    use chrono::TimeZone;

    const DOMAIN: &str = "files.example.org";

    fn manager<'a>(
        layout: &'a Layout,
        runner: &'a RecordingRunner,
        probe: &'a ScriptedProbe,
        inspector: &'a dyn CertInspector,
    ) -> CertManager<'a> {
        CertManager {
            layout,
            runner,
            proxy: probe,
            inspector,
            timing: quick_timing(),
        }
    }

    fn install_cert(layout: &Layout) {
        fs::create_dir_all(&layout.ssl_dir).unwrap();
        fs::write(layout.cert_file(DOMAIN), "cert").unwrap();
    }

    fn pem_expiring(year: i32, month: u8, day: u8) -> String {
        let mut params = rcgen::CertificateParams::new(vec![DOMAIN.to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(year, month, day);
        let key = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_disabled_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::never();

        let outcome = manager(&layout, &runner, &probe, &FixedDays(0)).ensure(TlsMode::None, DOMAIN).unwrap();
        assert_eq!(outcome, CertOutcome::Disabled);
        assert!(runner.commands().is_empty());
        assert_eq!(probe.attempts.get(), 0);
        assert!(!layout.ssl_dir.exists());
    }

    #[test]
    fn test_self_signed_always_runs_script() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        install_cert(&layout);
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::ready_after(1);

        let outcome = manager(&layout, &runner, &probe, &FixedDays(365))
            .ensure(TlsMode::SelfSigned, DOMAIN)
            .unwrap();
        assert_eq!(outcome, CertOutcome::SelfSigned);
        assert_eq!(
            runner.commands(),
            vec![format!(
                "{} {} {}",
                layout.script(SELF_SIGNED_SCRIPT).display(),
                layout.ssl_dir.display(),
                DOMAIN
            )]
        );
        assert_eq!(probe.attempts.get(), 2);
    }

    #[test]
    fn test_valid_cert_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        install_cert(&layout);
        fs::create_dir_all(layout.ssl_dir.join(ACME_STATE_DIR)).unwrap();
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::ready_after(0);

        let outcome = manager(&layout, &runner, &probe, &FixedDays(45))
            .ensure(TlsMode::LetsEncrypt, DOMAIN)
            .unwrap();
        assert_eq!(outcome, CertOutcome::Reused { days_left: 45 });
        assert_eq!(runner.count_containing(ACME_SCRIPT), 0);
        assert_eq!(runner.count_containing(RENEW_SCRIPT), 1);
        assert_eq!(runner.count_containing("nginx -s reload"), 0);

        let cron = fs::read_to_string(layout.generated_dir.join(CRON_OUTPUT)).unwrap();
        assert!(cron.contains(&format!("{} {}", layout.ssl_dir.display(), DOMAIN)));
    }

    #[test]
    fn test_valid_cert_without_acme_state_skips_renewal_job() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        install_cert(&layout);
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::ready_after(0);

        let outcome = manager(&layout, &runner, &probe, &FixedDays(30))
            .ensure(TlsMode::LetsEncrypt, DOMAIN)
            .unwrap();
        assert_eq!(outcome, CertOutcome::Reused { days_left: 30 });
        assert!(runner.commands().is_empty());
        assert!(layout.generated_dir.join(CRON_OUTPUT).exists());
    }

    #[test]
    fn test_missing_cert_is_issued() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::ready_after(0);

        let outcome = manager(&layout, &runner, &probe, &FixedDays(90))
            .ensure(TlsMode::LetsEncrypt, DOMAIN)
            .unwrap();
        assert_eq!(outcome, CertOutcome::Issued);

        let reload = runner.position("nginx -s reload").unwrap();
        let issue = runner.position(ACME_SCRIPT).unwrap();
        let renew = runner.position(RENEW_SCRIPT).unwrap();
        assert!(reload < issue && issue < renew);
        assert_eq!(runner.count_containing(ACME_SCRIPT), 1);
        assert!(runner.commands()[issue].ends_with(&format!("{} {}", layout.ssl_dir.display(), DOMAIN)));

        let challenge = fs::read_to_string(&layout.nginx_local_conf).unwrap();
        assert!(challenge.contains("server_name files.example.org;"));
        assert!(!challenge.contains("443"));
    }

    #[test]
    fn test_expiring_cert_is_renewed_without_touching_final_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        install_cert(&layout);
        fs::create_dir_all(layout.nginx_shared_conf.parent().unwrap()).unwrap();
        fs::write(&layout.nginx_shared_conf, "# final\n").unwrap();
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::ready_after(0);

        let outcome = manager(&layout, &runner, &probe, &FixedDays(29))
            .ensure(TlsMode::LetsEncrypt, DOMAIN)
            .unwrap();
        assert_eq!(outcome, CertOutcome::Issued);
        assert_eq!(runner.count_containing(ACME_SCRIPT), 1);
        assert!(!layout.nginx_local_conf.exists());
    }

    #[test]
    fn test_failed_issuance_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let runner = RecordingRunner::failing_on(ACME_SCRIPT, 1);
        let probe = ScriptedProbe::ready_after(0);

        let err = manager(&layout, &runner, &probe, &FixedDays(0))
            .ensure(TlsMode::LetsEncrypt, DOMAIN)
            .unwrap_err();
        assert!(err.to_string().contains(ACME_SCRIPT));
        assert_eq!(runner.count_containing(RENEW_SCRIPT), 0);
    }

    #[test]
    fn test_proxy_timeout_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scratch_layout(dir.path());
        let runner = RecordingRunner::default();
        let probe = ScriptedProbe::never();

        assert!(manager(&layout, &runner, &probe, &FixedDays(0))
            .ensure(TlsMode::SelfSigned, DOMAIN)
            .is_err());
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_x509_inspector_reads_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.crt");

        fs::write(&path, pem_expiring(2000, 1, 1)).unwrap();
        assert!(X509Inspector.remaining_days(&path).unwrap() < 0);

        fs::write(&path, pem_expiring(2200, 6, 1)).unwrap();
        assert!(X509Inspector.remaining_days(&path).unwrap() > RENEWAL_THRESHOLD_DAYS);

        let info = read_certificate(&path).unwrap();
        assert_eq!(info.not_after, Utc.with_ymd_and_hms(2200, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(info.fingerprint.len(), 64);

        fs::write(&path, "not a certificate").unwrap();
        assert!(X509Inspector.remaining_days(&path).is_err());
    }

    #[test]
    fn test_days_left_truncates() {
        let info = CertInfo {
            not_after: Utc.with_ymd_and_hms(2030, 1, 31, 12, 0, 0).unwrap(),
            fingerprint: String::new(),
        };
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 13, 0, 0).unwrap();
        assert_eq!(days_left(&info, now), 29);
    }
}
