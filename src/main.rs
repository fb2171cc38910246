mod cli;
mod report;

use crate::cli::Cli;
use clap::Parser;
use miette::{IntoDiagnostic, miette};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tinyimage_codec::ImageCodec;
use tinyimage_config::{AppConfig, FileSettingsStore, Settings, load_default_settings, save_default_settings};
use tinyimage_pipeline::session::error::ErrorKind as SessionErrorKind;
use tinyimage_pipeline::{BatchRequest, Session};
use tinyimage_storage::backend::LocalFilesystem;
use tracing_subscriber::EnvFilter;

/// Render an `exn` error for the terminal, keeping the full tree in the log.
fn fatal<K>(err: exn::Exn<K>) -> miette::Report
where
    K: std::error::Error + Send + Sync + 'static,
{
    tracing::debug!(error = ?err, "Fatal error");
    miette!("{}", &*err)
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Ask on the terminal before a batch replaces originals.
fn confirm_overwrite(request: &BatchRequest) -> bool {
    eprint!(
        "Overwrite {} original image(s) with the current settings? This cannot be undone. [y/N] ",
        request.writable
    );
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).map_err(fatal)?;
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    let config = config.validated();
    init_tracing(&config.log_level);

    let store = FileSettingsStore::new(config.settings_path().map_err(fatal)?);
    let defaults = match load_default_settings(&store) {
        Ok(settings) => settings.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(
                path = %store.path().display(),
                error = ?err,
                "Cannot read saved defaults; using built-in defaults"
            );
            Settings::default()
        },
    };
    let settings = cli.overlay(defaults);
    tracing::debug!(?settings, "Effective settings");

    let paths = cli
        .paths
        .iter()
        .map(std::path::absolute)
        .collect::<std::io::Result<Vec<PathBuf>>>()
        .into_diagnostic()?;
    let session = Session::new(
        paths,
        settings,
        Arc::new(LocalFilesystem::new()),
        Arc::new(ImageCodec::new()),
        config.concurrency,
    )
    .map_err(fatal)?;

    session.start().await.wait().await;
    print!("{}", report::render_tasks(&session.snapshot().await));
    println!("{}", report::render_summary(&session.summary().await));

    if cli.save_defaults {
        save_default_settings(&store, &settings).map_err(fatal)?;
        tracing::info!(path = %store.path().display(), "Saved default settings");
    }

    if !cli.write {
        return Ok(());
    }
    let assume_yes = cli.yes;
    match session.write_all(|request| assume_yes || confirm_overwrite(request)).await {
        Ok(batch) => {
            print!("{}", report::render_tasks(&session.snapshot().await));
            println!("{}", report::render_batch(&batch));
            if batch.failed > 0 {
                return Err(miette!("{} image(s) failed to write", batch.failed));
            }
            Ok(())
        },
        Err(err) if *err == SessionErrorKind::Declined => {
            println!("Nothing written.");
            Ok(())
        },
        Err(err) => Err(fatal(err)),
    }
}
