use anyhow::Context as _;
use std::{fs, io::IsTerminal as _, path::Path};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Installs the global logger: human-readable INFO logs on stdout
/// (overridable with `RUST_LOG`) and, if `log_file` is set, machine-readable
/// DEBUG logs in that file.
pub(crate) fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_file(false)
        .with_line_number(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        );

    let file_log = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
            }
            let file = fs::File::create(path).with_context(|| path.display().to_string())?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    let subscriber = Registry::default().with(stdout_log).with(file_log);
    tracing::subscriber::set_global_default(subscriber).context("set_global_default()")?;
    Ok(())
}
