use once_cell::sync::OnceCell;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const LOG_PREFIX: &str = "lochness";

/// Rolling file sink settings read from `LOCHNESS_LOG_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogSettings {
    pub dir: String,
    pub rotation: String,
}

impl FileLogSettings {
    /// `Some` only when `LOCHNESS_LOG_ROLL=1`.
    pub fn from_env() -> Option<Self> {
        if std::env::var("LOCHNESS_LOG_ROLL").ok().as_deref() != Some("1") {
            return None;
        }
        Some(Self {
            dir: std::env::var("LOCHNESS_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            rotation: std::env::var("LOCHNESS_LOG_ROTATION").unwrap_or_else(|_| "daily".into()),
        })
    }

    pub fn rotation(&self) -> Rotation {
        match self.rotation.to_lowercase().as_str() {
            "hourly" => Rotation::HOURLY,
            "minutely" => Rotation::MINUTELY,
            "never" => Rotation::NEVER,
            _ => Rotation::DAILY,
        }
    }
}

/// Installs the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus an optional rolling file.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(console.with_filter(filter));

    match FileLogSettings::from_env() {
        Some(settings) => {
            if std::fs::create_dir_all(&settings.dir).is_err() {
                tracing::warn!(directory = %settings.dir, "failed to create log directory");
            }
            let writer = tracing_appender::rolling::RollingFileAppender::new(
                settings.rotation(),
                &settings.dir,
                LOG_PREFIX,
            );
            let (nb, guard) = tracing_appender::non_blocking(writer);
            let _ = FILE_GUARD.set(guard);
            let file_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(nb)
                .with_filter(file_filter);
            let _ = registry.with(file_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}
