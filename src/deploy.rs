//! Generate the connector configuration and hand it to the platform CLI.
//!
//! `base_config.json` holds committed, non-secret settings. Every `KEY=value`
//! line of the `.env` file is merged in under its camelCase name
//! (`NEWS_API_KEY` → `newsApiKey`) and the result is written to
//! `configuration.json`, which is then passed to
//! `fivetran deploy --api-key … --destination … --connection … --configuration …`.

use crate::error::DeployError;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Everything needed for one deployment.
#[derive(Debug)]
pub struct DeployRequest {
    pub base_config: PathBuf,
    pub env_file: PathBuf,
    pub output: PathBuf,
    pub program: String,
    pub api_key: Option<SecretString>,
    pub destination: String,
    pub connection: String,
    pub project_dir: PathBuf,
    pub dry_run: bool,
}

/// `SOME_API_KEY` → `someApiKey`.
pub fn snake_to_camel(key: &str) -> String {
    key.split('_')
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i == 0 {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Merge the `.env` file into the base config object.
#[instrument(level = "info", skip_all, fields(base = %base_config.display(), env = %env_file.display()))]
pub async fn generate_configuration(
    base_config: &Path,
    env_file: &Path,
) -> Result<Map<String, Value>, DeployError> {
    let raw = fs::read(base_config).await.map_err(|source| DeployError::Io {
        path: base_config.to_path_buf(),
        source,
    })?;
    let base: Value = serde_json::from_slice(&raw).map_err(|source| DeployError::Json {
        path: base_config.to_path_buf(),
        source,
    })?;
    let Value::Object(mut config) = base else {
        return Err(DeployError::NotAnObject(base_config.to_path_buf()));
    };

    let env_err = |source| DeployError::EnvFile {
        path: env_file.to_path_buf(),
        source,
    };
    for item in dotenvy::from_path_iter(env_file).map_err(env_err)? {
        let (key, value) = item.map_err(env_err)?;
        config.insert(snake_to_camel(&key), Value::String(value));
    }
    info!(keys = config.len(), "Generated configuration");
    Ok(config)
}

/// Arguments for the platform CLI, plus the printable command line with the
/// API key masked.
fn deploy_command(req: &DeployRequest) -> (Vec<String>, String) {
    let mut args: Vec<String> = vec!["deploy".to_string()];
    let mut shown: Vec<String> = vec!["deploy".to_string()];
    if let Some(key) = &req.api_key {
        args.extend(["--api-key".to_string(), key.expose_secret().clone()]);
        shown.extend(["--api-key".to_string(), "***".to_string()]);
    } else {
        warn!("No platform API key given; relying on the CLI's own credentials");
    }
    let rest = [
        "--destination".to_string(),
        req.destination.clone(),
        "--connection".to_string(),
        req.connection.clone(),
        "--configuration".to_string(),
        req.output.display().to_string(),
    ];
    args.extend(rest.iter().cloned());
    shown.extend(rest);
    (args, format!("{} {}", req.program, shown.join(" ")))
}

/// Write the configuration file and, unless `dry_run`, invoke the platform CLI.
#[instrument(level = "info", skip_all, fields(connection = %req.connection, destination = %req.destination))]
pub async fn deploy(req: &DeployRequest) -> Result<(), DeployError> {
    let config = generate_configuration(&req.base_config, &req.env_file).await?;
    let json = serde_json::to_vec_pretty(&config).map_err(|source| DeployError::Json {
        path: req.output.clone(),
        source,
    })?;
    fs::write(&req.output, json)
        .await
        .map_err(|source| DeployError::Io {
            path: req.output.clone(),
            source,
        })?;
    info!(path = %req.output.display(), "Wrote connector configuration");

    let (args, command) = deploy_command(req);

    if req.dry_run {
        info!(%command, "Dry run; skipping deployment");
        return Ok(());
    }

    info!(%command, project_dir = %req.project_dir.display(), "Deploying connector");
    let status = Command::new(&req.program)
        .args(&args)
        .current_dir(&req.project_dir)
        .status()
        .await
        .map_err(|source| DeployError::Spawn {
            program: req.program.clone(),
            source,
        })?;
    if !status.success() {
        return Err(DeployError::CommandFailed {
            program: req.program.clone(),
            status,
        });
    }
    info!("Deployment finished");
    Ok(())
}
