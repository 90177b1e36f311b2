/// Seafile state inside the shared volume
pub const SHARED_SEAFILE_DIR: &str = "/shared/seafile";

/// Certificates and ACME account state
pub const SSL_DIR: &str = "/shared/ssl";

/// Output directory for rendered files that are not persisted
pub const GENERATED_DIR: &str = "/bootstrap/generated";

/// Templates shipped with the image
pub const TEMPLATES_DIR: &str = "/templates";

/// Helper scripts shipped with the image (ssl.sh, auto_renew_crt.sh, ...)
pub const SCRIPTS_DIR: &str = "/scripts";

/// Parent of the versioned server directories
pub const INSTALL_TOP: &str = "/opt/seafile";

/// Name of the symlink pointing at the active server directory
pub const LATEST_LINK_NAME: &str = "seafile-server-latest";

/// nginx site config as seen by nginx inside the container
pub const NGINX_LOCAL_CONF: &str = "/etc/nginx/sites-enabled/seafile.nginx.conf";

/// Persisted copy of the nginx site config
pub const NGINX_SHARED_CONF: &str = "/shared/nginx/conf/seafile.nginx.conf";

/// Stamp file name inside `seafile-data`
pub const VERSION_STAMP_NAME: &str = "current_version";

/// Marker whose presence in the shared volume means setup already ran
pub const SEAFILE_DATA: &str = "seafile-data";

/// State directories that must live in the shared volume
pub const STATE_DIRS: [&str; 5] = ["conf", "ccnet", "seafile-data", "seahub-data", "pro-data"];

/// Database file migrated alongside the state directories with sqlite
pub const SQLITE_DB: &str = "seahub.db";

pub const NGINX_TEMPLATE: &str = "seafile.nginx.conf.template";
pub const CRON_TEMPLATE: &str = "letsencrypt.cron.template";
pub const CRON_OUTPUT: &str = "letsencrypt.cron";

/// Subdirectory of the SSL dir created by the ACME client
pub const ACME_STATE_DIR: &str = "letsencrypt";

/// Certificates with fewer days left than this are renewed
pub const RENEWAL_THRESHOLD_DAYS: i64 = 30;

/// Server name handed to the setup scripts
pub const SETUP_SERVER_NAME: &str = "seafile";

/// Database user created by the networked setup script
pub const MYSQL_USER: &str = "seafile";

/// Host pattern the database user may connect from
pub const MYSQL_USER_HOST: &str = "%.%.%.%";

pub const DEFAULT_HOSTNAME: &str = "seafile.example.com";
pub const DEFAULT_DB_TYPE: &str = "mysql";
pub const DEFAULT_DB_HOST: &str = "127.0.0.1";
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_SERVER_PREFIX: &str = "seafile-server";
pub const DEFAULT_TIME_ZONE: &str = "Etc/UTC";

/// Seconds to wait for nginx or the database before giving up
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;

/// Fixed polling interval for readiness checks
pub const WAIT_POLL_INTERVAL_MS: u64 = 2000;

/// Pause after `nginx -s reload` so the new config is live
pub const RELOAD_SETTLE_MS: u64 = 2000;

/// Health check used for nginx readiness
pub const NGINX_PROBE_COMMAND: &str = "pgrep -f 'nginx: master process'";

pub const NGINX_RELOAD_COMMAND: &str = "nginx -s reload";

/// ccnet client socket, kept off the mounted volume
pub const CCNET_SOCKET_PATH: &str = "/opt/seafile/ccnet.sock";

pub const OFFICE_CONVERTOR_ROOT_LINE: &str = "OFFICE_CONVERTOR_ROOT = 'http://127.0.0.1:6000/'";
