use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub media_dir: PathBuf,
    pub database_url: String,
    pub admin_key: String,
    pub max_upload_bytes: usize,
    pub worker_poll_interval: Duration,
    pub temp_share_ttl: Option<Duration>,
    pub mail: MailConfig,
}

/// SendGrid credentials. Mail is only sent when `api_key` is set.
#[derive(Clone, Default)]
pub struct MailConfig {
    pub api_key: Option<String>,
    pub sender_name: String,
    pub sender_mail: String,
    pub template_id: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("sender_name", &self.sender_name)
            .field("sender_mail", &self.sender_mail)
            .field("template_id", &self.template_id)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File sharing API")]
pub struct Args {
    /// Host to bind to (overrides SHAREBOX_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SHAREBOX_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root of the `temp/` and `data/` trees (overrides SHAREBOX_MEDIA_DIR)
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Database URL (overrides SHAREBOX_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum accepted request body in bytes (overrides SHAREBOX_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SHAREBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("SHAREBOX_PORT", 6969u16)?;
        let env_media = env::var("SHAREBOX_MEDIA_DIR").unwrap_or_else(|_| "./media".into());
        let env_db = env::var("SHAREBOX_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./media/sharebox.db".into());
        let env_max_upload = env_parse("SHAREBOX_MAX_UPLOAD_BYTES", 10usize << 20)?;

        let admin_key = env::var("SHAREBOX_ADMIN_KEY").unwrap_or_default();
        if admin_key.is_empty() {
            tracing::warn!("SHAREBOX_ADMIN_KEY is empty, admin access is disabled");
        }

        let poll_secs = env_parse("SHAREBOX_WORKER_POLL_SECS", 5u64)?;
        let ttl_hours = env_parse("SHAREBOX_TEMP_SHARE_TTL_HOURS", 24u64)?;

        let mail = MailConfig {
            api_key: env::var("SENDGRID_API_KEY").ok().filter(|k| !k.is_empty()),
            sender_name: env::var("SENDGRID_SENDER_NAME").unwrap_or_else(|_| "sharebox".into()),
            sender_mail: env::var("SENDGRID_SENDER_MAIL").unwrap_or_default(),
            template_id: env::var("SENDGRID_SHARE_TEMPLATE").unwrap_or_default(),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            media_dir: args.media_dir.unwrap_or_else(|| env_media.into()),
            database_url: args.database_url.unwrap_or(env_db),
            admin_key,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            worker_poll_interval: Duration::from_secs(poll_secs.max(1)),
            // 0 disables the purge of abandoned temporary shares
            temp_share_ttl: (ttl_hours > 0).then(|| Duration::from_secs(ttl_hours * 3600)),
            mail,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
