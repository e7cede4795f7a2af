use shared::config::{Config, LogFormat};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{self, MakeWriter},
};

/// Installs the global tracing subscriber described by `config.logging`,
/// writing to stdout.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Returns
/// The configured log level.
///
/// # Errors
/// Returns an error if a global subscriber was already installed.
pub fn initialize_tracing(
    config: &Config,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let ansi = !matches!(config.logging.format, LogFormat::Json);
    tracing::subscriber::set_global_default(build_subscriber(config, std::io::stdout, ansi))?;
    Ok(config.logging.level.clone())
}

pub(crate) fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Builds the subscriber [`initialize_tracing`] installs, without color and
/// writing to `writer`, and leaves it uninstalled.
pub fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    build_subscriber(config, writer, false)
}

fn build_subscriber<W>(config: &Config, writer: W, ansi: bool) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(writer)
        .with_ansi(ansi);

    match config.logging.format {
        LogFormat::Json => Box::new(builder.json().finish()),
        LogFormat::Pretty => Box::new(builder.finish()),
    }
}
