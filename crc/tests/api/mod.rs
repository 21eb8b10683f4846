use std::{collections::BTreeMap, sync::Arc, time::Duration};

use crc::{
    api::{self, Handler, Request, Server, StartArgs, CAPACITY_REACHED, SHUTTING_DOWN},
    config::{Config, CrcPaths, InMemoryStorage, MUTATING_QUEUE_CAPACITY},
    driver::VmState,
    machine::fake::FakeMachine,
    preflight, CrcResult,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A daemon serving a fake machine from a temporary home directory.
struct Daemon {
    client: api::Client,
    paths: CrcPaths,
    machine: Arc<FakeMachine>,
    shutdown: CancellationToken,
    serving: JoinHandle<CrcResult<()>>,
    _home: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Function: Helper
//--------------------------------------------------------------------------------------------------

fn spawn_daemon(machine: FakeMachine) -> anyhow::Result<Daemon> {
    let home = TempDir::new()?;
    let paths = CrcPaths::new(home.path());
    let config = Arc::new(Config::with_crc_settings(InMemoryStorage::default(), &paths));
    for key in preflight::skip_keys() {
        config.set(&key, Value::Bool(true))?;
    }

    let machine = Arc::new(machine);
    let handler = Handler::new(machine.clone(), config, paths.clone());
    let server = Server::bind(paths.get_socket_path(), handler)?;

    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server.serve(shutdown.clone()));

    Ok(Daemon {
        client: api::Client::new(paths.get_socket_path()),
        paths,
        machine,
        shutdown,
        serving,
        _home: home,
    })
}

impl Daemon {
    async fn raw(&self, payload: &[u8]) -> anyhow::Result<String> {
        let mut stream = UnixStream::connect(self.paths.get_socket_path()).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    async fn call(&self, command: &str) -> anyhow::Result<Value> {
        let request = Request {
            command: command.to_string(),
            args: None,
        };
        Ok(serde_json::from_str(&self.client.send(&request).await?)?)
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.serving.await??;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_start_status_stop_over_socket() -> anyhow::Result<()> {
    let daemon = spawn_daemon(FakeMachine::new())?;

    let start = daemon.client.start(StartArgs::default()).await?;
    assert_eq!(start.error, "");
    assert_eq!(start.status, "Running");
    assert!(start.kubelet_started);
    assert_eq!(start.cluster_config.kubeadmin_pass, "hunter2");

    let status = daemon.client.status().await?;
    assert!(status.success);
    assert_eq!(status.crc_status, "Running");

    let stop = daemon.client.stop().await?;
    assert!(stop.success);
    assert_eq!(stop.state.as_deref(), Some("Stopped"));
    assert_eq!(daemon.machine.get_state(), VmState::Stopped);

    let delete = daemon.client.delete().await?;
    assert!(delete.success);
    assert_eq!(daemon.machine.get_state(), VmState::None);

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_status_before_the_vm_exists() -> anyhow::Result<()> {
    let daemon = spawn_daemon(FakeMachine::new())?;

    let status = daemon.call("status").await?;
    assert_eq!(status["Success"], false);
    assert_eq!(status["CrcStatus"], "");
    assert_eq!(status["OpenshiftStatus"], "");
    assert!(status["Error"].as_str().is_some_and(|e| e.contains("does not exist")));

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_config_round_trip_over_socket() -> anyhow::Result<()> {
    let daemon = spawn_daemon(FakeMachine::new())?;

    let set = daemon
        .client
        .set_config(BTreeMap::from([("cpus".to_string(), json!("6"))]))
        .await?;
    assert_eq!(set.error, "");
    assert_eq!(set.properties, vec!["cpus".to_string()]);

    let get = daemon.client.get_config(vec!["cpus".to_string()]).await?;
    assert_eq!(get.configs, Some(BTreeMap::from([("cpus".to_string(), json!(6))])));

    let all = daemon.client.get_config(Vec::new()).await?;
    assert!(all.configs.is_some_and(|configs| configs.contains_key("memory")));

    let unset = daemon.client.unset_config(vec!["cpus".to_string()]).await?;
    assert_eq!(unset.error, "");

    let get = daemon.client.get_config(vec!["cpus".to_string()]).await?;
    assert_eq!(get.configs, Some(BTreeMap::from([("cpus".to_string(), json!(4))])));

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_malformed_request_gets_an_error_response() -> anyhow::Result<()> {
    let daemon = spawn_daemon(FakeMachine::new())?;

    let response: Value = serde_json::from_str(&daemon.raw(b"{\"command\": ").await?)?;
    assert_eq!(response["Success"], false);
    assert!(response["Error"]
        .as_str()
        .is_some_and(|e| e.starts_with("Error decoding request")));

    let response: Value = serde_json::from_str(&daemon.raw(br#"{"command":"reboot"}"#).await?)?;
    assert_eq!(response["Error"], "Unknown command supplied: reboot");

    let version = daemon.client.version().await?;
    assert!(version.success);
    assert_eq!(version.crc_version, crc::version::CRC_VERSION);

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_reads_are_answered_while_a_start_runs() -> anyhow::Result<()> {
    let release = CancellationToken::new();
    let daemon = spawn_daemon(FakeMachine::blocking(release.clone()))?;

    let client = daemon.client.clone();
    let start = tokio::spawn(async move { client.start(StartArgs::default()).await });
    while daemon.machine.get_start_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = daemon.client.status().await?;
    assert_eq!(status.crc_status, "Stopped");
    let console = daemon.client.web_console_url().await?;
    assert!(console.success);

    release.cancel();
    let start = start.await??;
    assert_eq!(start.status, "Running");

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_mutating_request_over_capacity_is_rejected() -> anyhow::Result<()> {
    let release = CancellationToken::new();
    let daemon = spawn_daemon(FakeMachine::blocking(release.clone()))?;

    let mut queued = Vec::new();
    for _ in 0..MUTATING_QUEUE_CAPACITY {
        let client = daemon.client.clone();
        queued.push(tokio::spawn(async move { client.start(StartArgs::default()).await }));
    }
    while daemon.machine.get_start_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let rejected: Value = serde_json::from_str(&daemon.raw(br#"{"command":"stop"}"#).await?)?;
    assert_eq!(rejected["Success"], false);
    assert_eq!(rejected["Error"], CAPACITY_REACHED);

    release.cancel();
    for start in queued {
        let start = start.await??;
        assert_eq!(start.error, "");
        assert_eq!(start.status, "Running");
    }
    assert_eq!(daemon.machine.get_start_count(), MUTATING_QUEUE_CAPACITY);

    let stop = daemon.client.stop().await?;
    assert!(stop.success);

    daemon.stop().await
}

#[test_log::test(tokio::test)]
async fn test_shutdown_answers_in_flight_and_queued_requests() -> anyhow::Result<()> {
    let daemon = spawn_daemon(FakeMachine::blocking(CancellationToken::new()))?;

    let send = |command: &str| {
        let client = daemon.client.clone();
        let request = Request {
            command: command.to_string(),
            args: None,
        };
        tokio::spawn(async move { client.send(&request).await })
    };

    let start = send("start");
    while daemon.machine.get_start_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stop = send("stop");
    tokio::time::sleep(Duration::from_millis(300)).await;

    daemon.shutdown.cancel();

    let start: Value = serde_json::from_str(&start.await??)?;
    assert!(start["Error"].as_str().is_some_and(|e| e.contains("cancelled")));

    let stop: Value = serde_json::from_str(&stop.await??)?;
    assert_eq!(stop["Success"], false);
    assert_eq!(stop["Error"], SHUTTING_DOWN);

    daemon.stop().await
}
