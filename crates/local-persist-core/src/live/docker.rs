//! Live source backed by the `docker` CLI.
//!
//! Lists every container (running or not) and inspects them in one call,
//! keeping the mounts whose volume driver matches ours.

use super::{LiveSource, Observation};
use crate::config::LiveSourceConfig;
use crate::error::{PersistError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ContainerInfo {
    #[serde(rename = "Mounts", default)]
    mounts: Option<Vec<MountInfo>>,
}

#[derive(Debug, Deserialize)]
struct MountInfo {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Driver", default)]
    driver: String,
}

/// Queries the runtime through `docker ps` and `docker inspect`.
#[derive(Debug, Clone)]
pub struct DockerCliSource {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for DockerCliSource {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(LiveSourceConfig::DOCKER_BINARY),
            timeout: LiveSourceConfig::QUERY_TIMEOUT,
        }
    }
}

impl DockerCliSource {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let command = Command::new(&self.binary).args(args).kill_on_drop(true).output();

        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PersistError::live_query(format!(
                "failed to run {} {}: {}",
                self.binary.display(),
                args.first().copied().unwrap_or_default(),
                e
            ))),
            Err(_) => Err(PersistError::live_query(format!(
                "{} {} timed out after {:?}",
                self.binary.display(),
                args.first().copied().unwrap_or_default(),
                self.timeout
            ))),
        }
    }

    async fn list_container_ids(&self) -> Result<Vec<String>> {
        let output = self.run(&["ps", "--all", "--quiet", "--no-trunc"]).await?;
        if !output.status.success() {
            return Err(PersistError::live_query(format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl LiveSource for DockerCliSource {
    fn id(&self) -> &'static str {
        "docker-cli"
    }

    async fn observe(&self, driver_name: &str) -> Result<Vec<Observation>> {
        let ids = self.list_container_ids().await?;
        debug!("docker ps reported {} container(s)", ids.len());
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect", "--type", "container"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.run(&args).await?;

        if !output.status.success() {
            // A container removed between `ps` and `inspect` makes the exit
            // code non-zero while the rest are still printed.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.stdout.is_empty() {
                return Err(PersistError::live_query(format!(
                    "docker inspect failed: {}",
                    stderr.trim()
                )));
            }
            warn!("docker inspect partially failed: {}", stderr.trim());
        }

        parse_inspect_output(&output.stdout, driver_name)
    }
}

/// Extract this driver's mounts from `docker inspect` JSON output.
pub(crate) fn parse_inspect_output(stdout: &[u8], driver_name: &str) -> Result<Vec<Observation>> {
    let containers: Vec<ContainerInfo> = serde_json::from_slice(stdout)
        .map_err(|e| PersistError::live_query(format!("unparsable docker inspect output: {e}")))?;

    Ok(containers
        .into_iter()
        .flat_map(|c| c.mounts.unwrap_or_default())
        .filter(|m| m.driver == driver_name && !m.name.is_empty())
        .map(|m| Observation::new(m.name, m.source))
        .collect())
}
