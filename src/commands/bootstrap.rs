use anyhow::{Context, Result};
use log::{debug, info};

use crate::certs::{CertInspector, CertManager, CertOutcome, X509Inspector};
use crate::config::{Database, Layout, NetworkedDb, Settings, Timing};
use crate::constants::*;
use crate::runner::{CommandRunner, ShellRunner};
use crate::stamp::VersionStamp;
use crate::waiter::{self, CommandProbe, Probe, TcpProbe};
use crate::{conf, migrate, proxy, setup_script, ui};

/// Setup phases, logged as the boot moves through them. `Stamped` and
/// `SkipSetup` end the setup part of a boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ColdStart,
    SqliteSetup,
    NetworkedDbSetup,
    ConfigPatch,
    DirectoryMigration,
    Stamped,
    SkipSetup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub phase: Phase,
    pub certificate: CertOutcome,
    pub site_config_written: bool,
}

pub struct Bootstrap<'a> {
    pub settings: &'a Settings,
    pub layout: &'a Layout,
    pub runner: &'a dyn CommandRunner,
    pub proxy: &'a dyn Probe,
    pub database: &'a dyn Probe,
    pub inspector: &'a dyn CertInspector,
    pub timing: Timing,
}

pub fn run(settings: &Settings, layout: &Layout) -> Result<()> {
    let proxy = CommandProbe {
        command: NGINX_PROBE_COMMAND.to_string(),
    };
    // Only polled for networked databases
    let database = match &settings.database {
        Database::Networked(db) => TcpProbe {
            host: db.host.clone(),
            port: db.port,
        },
        Database::Sqlite => TcpProbe {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
        },
    };

    let bootstrap = Bootstrap {
        settings,
        layout,
        runner: &ShellRunner,
        proxy: &proxy,
        database: &database,
        inspector: &X509Inspector,
        timing: Timing::from_settings(settings),
    };
    let report = bootstrap.run()?;

    ui::print_success(&format!(
        "Bootstrap finished ({:?}, certificate: {:?})",
        report.phase, report.certificate
    ));
    Ok(())
}

impl Bootstrap<'_> {
    pub fn run(&self) -> Result<Report> {
        let phase = self.init_server()?;

        let certificate = CertManager {
            layout: self.layout,
            runner: self.runner,
            proxy: self.proxy,
            inspector: self.inspector,
            timing: self.timing,
        }
        .ensure(self.settings.tls_mode(), &self.settings.hostname)?;

        let site_config_written = proxy::ensure_site_config(self.layout, self.settings)?;
        if !site_config_written {
            ui::print_skip("nginx config already present in the shared volume");
        }

        Ok(Report {
            phase,
            certificate,
            site_config_written,
        })
    }

    fn enter(&self, phase: Phase, msg: &str) {
        debug!("Bootstrap phase: {:?}", phase);
        ui::print_step(msg);
    }

    fn init_server(&self) -> Result<Phase> {
        let stamp = VersionStamp::new(self.layout.stamp_file());

        if self.layout.shared_seafile_dir.join(SEAFILE_DATA).exists() {
            if !stamp.exists() {
                stamp.write(self.settings.require_version()?)?;
            }
            self.ensure_latest_link(&stamp)?;
            ui::print_skip("Skip running setup script because there is existing seafile-data folder");
            return Ok(Phase::SkipSetup);
        }

        self.enter(Phase::ColdStart, "No existing seafile-data, running first-time setup");
        let version = self.settings.require_version()?;
        let install_dir = self.layout.install_dir(self.settings)?;

        match &self.settings.database {
            Database::Sqlite => {
                self.enter(Phase::SqliteSetup, "Running setup-seafile.sh");
                let cmd = setup_script::sqlite_setup_command(&install_dir, &self.settings.hostname);
                self.runner.run(&cmd, &[])?;
            }
            Database::Networked(db) => {
                self.enter(Phase::NetworkedDbSetup, "Running setup-seafile-mysql.sh in auto mode");
                self.setup_networked(db, &install_dir)?;
            }
        }

        self.enter(Phase::ConfigPatch, "Configuring seafile");
        self.patch_configs()?;

        self.enter(Phase::DirectoryMigration, "Moving state into the shared volume");
        self.migrate_state()?;

        stamp.write(version)?;
        self.ensure_latest_link(&stamp)?;
        self.enter(Phase::Stamped, &format!("Seafile {} initialized", version));
        Ok(Phase::Stamped)
    }

    fn setup_networked(&self, db: &NetworkedDb, install_dir: &std::path::Path) -> Result<()> {
        waiter::wait_for(self.database, self.timing.wait_timeout, self.timing.poll_interval)
            .context("Database is not reachable")?;

        let password = setup_script::generate_password();
        let env = setup_script::mysql_setup_env(&self.settings.hostname, db, &password);
        setup_script::patch_host_validation(&install_dir.join(setup_script::MYSQL_SETUP_PY))?;
        self.runner.run(&setup_script::mysql_setup_command(install_dir), &env)
    }

    /// Image upgrades replace the versioned directory, so the `latest` link
    /// may be missing or dangling.
    fn ensure_latest_link(&self, stamp: &VersionStamp) -> Result<()> {
        let latest = self.layout.latest_link();
        if latest.exists() {
            return Ok(());
        }
        debug!("Repairing {:?} from {:?}", latest, stamp.path());
        let version = stamp.read()?;
        let current = self.layout.versioned_dir(&self.settings.server_prefix, &version);
        migrate::force_symlink(&current, &latest)?;
        info!("Linked {:?} -> {:?}", latest, current);
        Ok(())
    }

    fn patch_configs(&self) -> Result<()> {
        let seahub = self.layout.conf_file("seahub_settings.py");
        conf::patch_seahub_settings(&seahub, self.settings)?;
        conf::patch_ccnet(&self.layout.conf_file("ccnet.conf"))?;

        let events = self.layout.conf_file("seafevents.conf");
        if events.exists() {
            conf::patch_seafevents(&events)?;
            conf::ensure_office_convertor_root(&seahub)?;
        } else {
            debug!("No {:?}, skipping search and office settings", events);
        }

        let dav = self.layout.conf_file("seafdav.conf");
        if dav.exists() {
            conf::patch_seafdav(&dav)?;
        } else {
            debug!("No {:?}, skipping WebDAV settings", dav);
        }
        Ok(())
    }

    fn migrate_state(&self) -> Result<()> {
        let mut names = STATE_DIRS.to_vec();
        if self.settings.database == Database::Sqlite {
            names.push(SQLITE_DB);
        }

        for name in names {
            let outcome = migrate::migrate(
                &self.layout.install_top.join(name),
                &self.layout.shared_seafile_dir.join(name),
            )?;
            debug!("{}: {:?}", name, outcome);
        }
        Ok(())
    }
}
