use serde::Deserialize;

use super::Oc;
use crate::{ssh::Runner, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MONITORING_OPERATOR: &str = "monitoring";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Aggregated health of the cluster operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterOperatorsStatus {
    /// Every operator is available.
    pub available: bool,

    /// At least one operator is progressing.
    pub progressing: bool,

    /// At least one operator is degraded.
    pub degraded: bool,
}

#[derive(Deserialize)]
struct OperatorList {
    #[serde(default)]
    items: Vec<Operator>,
}

#[derive(Deserialize)]
struct Operator {
    metadata: Metadata,
    #[serde(default)]
    status: OperatorStatus,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Default, Deserialize)]
struct OperatorStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ClusterOperatorsStatus {
    /// The OpenShift status string shown to users.
    pub fn openshift_status(&self) -> &'static str {
        if self.progressing {
            "Starting"
        } else if self.degraded {
            "Degraded"
        } else if self.available {
            "Running"
        } else {
            "Stopped"
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the cluster operators. The monitoring operator is skipped unless monitoring is enabled.
pub async fn get_cluster_operators_status(
    oc: Oc<'_>,
    monitoring_enabled: bool,
) -> CrcResult<ClusterOperatorsStatus> {
    let output = oc.run(&["get", "co", "-ojson"]).await?;
    parse_operators(&output, monitoring_enabled)
}

/// Returns the size and usage of the guest root filesystem, in bytes.
pub async fn get_root_partition_usage(runner: &dyn Runner) -> CrcResult<(u64, u64)> {
    let output = runner
        .run("df -B1 --output=size,used,target /sysroot | tail -1")
        .await?;
    parse_df(&output)
}

fn parse_operators(output: &str, monitoring_enabled: bool) -> CrcResult<ClusterOperatorsStatus> {
    let list: OperatorList = serde_json::from_str(output)?;
    let operators: Vec<_> = list
        .items
        .iter()
        .filter(|op| monitoring_enabled || op.metadata.name != MONITORING_OPERATOR)
        .collect();

    if operators.is_empty() {
        return Err(CrcError::Cluster("no cluster operators found".to_string()));
    }

    let mut status = ClusterOperatorsStatus {
        available: true,
        ..Default::default()
    };

    for operator in operators {
        let is_true = |kind: &str| {
            operator
                .status
                .conditions
                .iter()
                .any(|c| c.kind == kind && c.status == "True")
        };

        if !is_true("Available") {
            tracing::debug!("{} operator not available", operator.metadata.name);
            status.available = false;
        }
        if is_true("Progressing") {
            tracing::debug!("{} operator still progressing", operator.metadata.name);
            status.progressing = true;
        }
        if is_true("Degraded") {
            tracing::debug!("{} operator is degraded", operator.metadata.name);
            status.degraded = true;
        }
    }

    Ok(status)
}

fn parse_df(output: &str) -> CrcResult<(u64, u64)> {
    let invalid = || CrcError::Cluster(format!("unexpected disk usage output: '{}'", output.trim()));
    let mut fields = output.split_whitespace();
    let size = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(invalid)?;
    let used = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(invalid)?;
    Ok((size, used))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
