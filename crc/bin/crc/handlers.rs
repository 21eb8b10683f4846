use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use crc::{
    api::{self, Handler, Response, Server, StartArgs},
    cli::AnsiStyles,
    config::{Config, CrcPaths, JsonFileStorage},
    machine::{Client as _, MachineClient, Synchronized},
    version, CrcError, CrcResult, ErrorType,
};
use serde_json::Value;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn start_subcommand(paths: &CrcPaths, pull_secret_file: Option<PathBuf>) -> CrcResult<()> {
    let args = StartArgs {
        pull_secret_file: pull_secret_file
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
    };

    tracing::info!("starting the cluster, this can take several minutes");
    let response = checked(client(paths).start(args).await?)?;
    let cluster = &response.cluster_config;

    println!("{}", "Started the OpenShift cluster.".valid());
    println!();
    println!("The server is accessible via web console at:");
    println!("  {}", cluster.web_console_url.literal());
    println!();
    println!("Log in as administrator:");
    println!("  Username: kubeadmin");
    println!("  Password: {}", cluster.kubeadmin_pass);
    println!();
    println!("Log in as user:");
    println!("  Username: developer");
    println!("  Password: developer");
    println!();
    println!("Use the 'oc' command line interface:");
    println!("  {}", format!("oc login -u developer {}", cluster.cluster_api).literal());
    Ok(())
}

pub async fn stop_subcommand(paths: &CrcPaths) -> CrcResult<()> {
    checked(client(paths).stop().await?)?;
    println!("{}", "Stopped the instance".valid());
    Ok(())
}

pub async fn delete_subcommand(paths: &CrcPaths) -> CrcResult<()> {
    checked(client(paths).delete().await?)?;
    println!("{}", "Deleted the instance".valid());
    Ok(())
}

pub async fn status_subcommand(paths: &CrcPaths) -> CrcResult<()> {
    let status = checked(client(paths).status().await?)?;

    let openshift = if status.openshift_version.is_empty() {
        status.openshift_status.clone()
    } else {
        format!("{} (v{})", status.openshift_status, status.openshift_version)
    };

    println!("{} {}", "CRC VM:".header(), status.crc_status);
    println!("{} {}", "OpenShift:".header(), openshift);
    println!(
        "{} {} of {} (Inside the CRC VM)",
        "Disk Usage:".header(),
        human_size(status.disk_use),
        human_size(status.disk_size)
    );
    Ok(())
}

pub async fn ip_subcommand(paths: &CrcPaths) -> CrcResult<()> {
    let config = Arc::new(local_config(paths));
    let machine = MachineClient::new(paths.clone(), config);
    if !machine.exists().await? {
        return Err(CrcError::MachineDoesNotExist(machine.get_name().to_string()));
    }

    println!("{}", machine.ip().await?);
    Ok(())
}

pub async fn console_subcommand(paths: &CrcPaths, credentials: bool) -> CrcResult<()> {
    let console = checked(client(paths).web_console_url().await?)?;
    let cluster = &console.cluster_config;

    if console.state != "Running" {
        tracing::warn!("the cluster is not running (state: {})", console.state);
    }

    if !credentials {
        println!("{}", cluster.web_console_url);
        return Ok(());
    }

    println!("To login as a regular user, run 'oc login -u developer -p developer {}'.", cluster.cluster_api);
    println!(
        "To login as an admin, run 'oc login -u kubeadmin -p {} {}'",
        cluster.kubeadmin_pass, cluster.cluster_api
    );
    Ok(())
}

pub fn version_subcommand() {
    println!("CRC version: {}+{}", version::CRC_VERSION, version::commit_sha());
    println!("OpenShift version: {}", version::BUNDLE_VERSION);
}

pub async fn config_get_subcommand(paths: &CrcPaths, key: String) -> CrcResult<()> {
    let result = checked(client(paths).get_config(vec![key.clone()]).await?)?;
    match result.configs.as_ref().and_then(|configs| configs.get(&key)) {
        Some(value) => println!("{key} : {}", display_value(value)),
        None => return Err(CrcError::UnknownConfigKey(key)),
    }
    Ok(())
}

pub async fn config_set_subcommand(paths: &CrcPaths, key: String, value: String) -> CrcResult<()> {
    let properties = BTreeMap::from([(key.clone(), Value::String(value))]);
    checked(client(paths).set_config(properties).await?)?;
    println!("Successfully configured {key}");
    Ok(())
}

pub async fn config_unset_subcommand(paths: &CrcPaths, key: String) -> CrcResult<()> {
    checked(client(paths).unset_config(vec![key.clone()]).await?)?;
    println!("Successfully unset configuration property '{key}'");
    Ok(())
}

pub async fn config_view_subcommand(paths: &CrcPaths) -> CrcResult<()> {
    let result = checked(client(paths).get_config(Vec::new()).await?)?;
    for (key, value) in result.configs.unwrap_or_default() {
        println!("- {key:<38}: {}", display_value(&value));
    }
    Ok(())
}

pub async fn daemon_subcommand(paths: CrcPaths) -> CrcResult<()> {
    paths.ensure_dirs()?;

    let config = Arc::new(local_config(&paths));
    let machine = Synchronized::new(MachineClient::new(paths.clone(), config.clone()));
    let handler = Handler::new(Arc::new(machine), config, paths.clone());

    let socket_path = paths.get_socket_path();
    let server = Server::bind(&socket_path, handler)?;
    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server.serve(shutdown.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM signal"),
        _ = sigint.recv() => tracing::info!("received SIGINT signal"),
    }

    shutdown.cancel();
    serving.await??;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("could not remove {}: {}", socket_path.display(), e);
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Prints `error` and, for preflight failures, how to fix the host.
pub fn report_error(error: &CrcError) {
    eprintln!("{}", error.to_string().error());
    if error.error_type() == ErrorType::Preflight {
        eprintln!("Run '{}' to set up the host before starting the cluster", "crc setup".literal());
    }
}

fn client(paths: &CrcPaths) -> api::Client {
    api::Client::new(paths.get_socket_path())
}

fn local_config(paths: &CrcPaths) -> Config {
    Config::with_crc_settings(JsonFileStorage::new(paths.get_config_path()), paths)
}

fn checked<R: Response>(response: R) -> CrcResult<R> {
    match response.get_error() {
        Some(error) => Err(CrcError::Daemon(error)),
        None => Ok(response),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{size:.2}{}", UNITS[unit])
    }
}
