//! `partflow <file> [key=value ...]`
//!
//! Uploads `<file>` and prints the processed record as JSON. Extra
//! `key=value` arguments are added to the start request body.
//!
//! Environment:
//! - `PARTFLOW_CONFIG`: config file, defaults to `./partflow.json`
//! - `PARTFLOW_TOKEN`: bearer token for the start and search endpoints

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use partflow_protocol::{Indicator, Progress};
use partflow_uploader::{
    FnSink, HttpHost, UploadFile, UploadOrchestrator, UploaderConfig,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "partflow.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (path, extra) = parse_args(std::env::args().skip(1))?;

    let config_path = std::env::var_os("PARTFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = UploaderConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let token = std::env::var("PARTFLOW_TOKEN").ok();

    let host = HttpHost::new(
        &config.api_base_url,
        &config.start_path,
        &config.search_path,
        token.as_deref(),
    )?;
    let sink = FnSink(|progress: Progress| {
        tracing::info!(target: "partflow::progress", "{}", render(&progress));
    });
    let orchestrator = UploadOrchestrator::new(Arc::new(host), config, Arc::new(sink))
        .with_extra_params(extra);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling upload");
            ctrl_c.cancel();
        }
    });

    let item = orchestrator
        .run(UploadFile::OnDisk { path }, &cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> anyhow::Result<(PathBuf, Map<String, Value>)> {
    let Some(path) = args.next() else {
        bail!("usage: partflow <file> [key=value ...]");
    };

    let mut extra = Map::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            bail!("expected key=value, got {arg:?}");
        };
        // Values that parse as JSON keep their type; anything else is a string.
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        extra.insert(key.to_string(), value);
    }
    Ok((PathBuf::from(path), extra))
}

fn render(progress: &Progress) -> String {
    match progress.indicator {
        Some(Indicator::Bar { at, of }) if of > 0 => {
            format!("{} [{}%]", progress.message, at * 100 / of)
        }
        _ => progress.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn file_and_extra_params() {
        let (path, extra) = parse_args(args(&["a.png", "purpose=avatar", "public=true"])).unwrap();
        assert_eq!(path, PathBuf::from("a.png"));
        assert_eq!(extra["purpose"], Value::from("avatar"));
        assert_eq!(extra["public"], Value::from(true));
    }

    #[test]
    fn missing_file_is_usage_error() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["a.png", "novalue"])).is_err());
    }

    #[test]
    fn bars_render_percent() {
        assert_eq!(render(&Progress::bar("uploading", 25, 100)), "uploading [25%]");
        assert_eq!(render(&Progress::spinner("initializing upload")), "initializing upload");
        assert_eq!(render(&Progress::bar("hashing", 0, 0)), "hashing");
    }
}
