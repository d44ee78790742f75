//! Wire and storage model shared by the sampler, the server and its peers.
//!
//! Field names follow gpustat's JSON (`query_time`, `memory.used`, ...) so a
//! node can poll peers running the Python gpuview as well as this one.
//! Memory figures are MiB.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessUsage {
    pub username: String,
    pub command: String,
    pub gpu_memory_usage: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GpuSample {
    pub index: u32,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "memory.used")]
    pub memory_used: u64,
    #[serde(rename = "memory.total")]
    pub memory_total: u64,
    /// `None` when the driver reports N/A.
    #[serde(rename = "utilization.gpu", default)]
    pub utilization_percent: Option<u32>,
    #[serde(rename = "temperature.gpu", default)]
    pub temperature: Option<u32>,
    #[serde(default)]
    pub processes: Vec<ProcessUsage>,
}

impl GpuSample {
    /// Sum of the memory held by the processes the driver could attribute.
    pub fn process_memory(&self) -> u64 {
        self.processes.iter().map(|p| p.gpu_memory_usage).sum()
    }

    /// Distance between the driver-reported usage and the attributed usage.
    pub fn divergence(&self) -> u64 {
        self.memory_used.abs_diff(self.process_memory())
    }

    pub fn usernames(&self) -> BTreeSet<&str> {
        self.processes.iter().map(|p| p.username.as_str()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    /// Display identity, not the network address.
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "query_time", alias = "timestamp")]
    pub timestamp: NaiveDateTime,
    pub gpus: Vec<GpuSample>,
    /// Set by the sampler when the GPU state could not be read. `gpus` is
    /// meaningless in that case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostSnapshot {
    pub fn new(hostname: impl Into<String>, timestamp: NaiveDateTime, gpus: Vec<GpuSample>) -> Self {
        Self {
            hostname: hostname.into(),
            timestamp,
            gpus,
            error: None,
        }
    }

    pub fn failed(
        hostname: impl Into<String>,
        timestamp: NaiveDateTime,
        error: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            timestamp,
            gpus: vec![],
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }

    pub fn gpu(&self, index: u32) -> Option<&GpuSample> {
        self.gpus.iter().find(|g| g.index == index)
    }
}

/// Every host reachable during one poll, ordered by hostname.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct FleetSnapshot(Vec<HostSnapshot>);

impl FleetSnapshot {
    /// Builds a snapshot from hosts in any order. The result only depends on
    /// the set of hosts, never on the order they arrived in.
    pub fn from_hosts(mut hosts: Vec<HostSnapshot>) -> Self {
        hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Self(hosts)
    }

    pub fn hosts(&self) -> &[HostSnapshot] {
        &self.0
    }

    pub fn host(&self, hostname: &str) -> Option<&HostSnapshot> {
        self.0.iter().find(|h| h.hostname == hostname)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
