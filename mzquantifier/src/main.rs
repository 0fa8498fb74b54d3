use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzquantifier::{MZQuantifier, MZQuantifierError};

fn configure_log(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, MZQuantifierError> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let handle = fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(handle);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(tracing::Level::DEBUG.into())
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()))
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(tracing::Level::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MZQuantifierError::LoggingError(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| MZQuantifierError::LoggingError(e.to_string()))?;
    Ok(guard)
}

fn load_config(args: MZQuantifier) -> Result<MZQuantifier, MZQuantifierError> {
    let config_file = args.config_file.clone();
    let mut config = Figment::new()
        .merge(Serialized::defaults(args))
        .merge(Toml::file("mzquantifier.toml"));
    if let Some(config_file) = config_file {
        config = config.merge(Toml::file_exact(config_file));
    }
    Ok(config.merge(Env::prefixed("MZQUANTIFIER_")).extract()?)
}

fn main() -> Result<(), MZQuantifierError> {
    let args = MZQuantifier::parse();
    let driver = load_config(args)?;
    let _guard = configure_log(driver.log_file.as_deref())?;
    if let Ok(dump) = serde_json::to_string(&driver) {
        tracing::debug!("Configuration: {dump}");
    }
    if let Err(e) = driver.main() {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}
