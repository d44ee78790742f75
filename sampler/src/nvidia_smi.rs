use crate::{local_hostname, LocalSampler};
use chrono::Local;
use eyre::eyre;
use gpuview_shared::{GpuSample, HostSnapshot, ProcessUsage};
use std::collections::HashMap;
use tokio::process::Command;

const GPU_QUERY: &str =
    "--query-gpu=index,uuid,name,temperature.gpu,utilization.gpu,memory.used,memory.total";
const APPS_QUERY: &str = "--query-compute-apps=gpu_uuid,pid,used_memory,process_name";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

/// Samples the local GPUs through `nvidia-smi`, resolving process owners with `ps`.
pub struct NvidiaSmiSampler {
    hostname: String,
    binary: String,
}

impl NvidiaSmiSampler {
    pub fn new() -> Self {
        Self {
            hostname: local_hostname(),
            binary: "nvidia-smi".into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn query(&self) -> eyre::Result<Vec<GpuSample>> {
        let gpus = run(&self.binary, &[GPU_QUERY, CSV_FORMAT]).await?;
        let apps = run(&self.binary, &[APPS_QUERY, CSV_FORMAT]).await?;

        let mut gpus = parse_gpu_rows(&gpus)?;
        let apps = parse_compute_apps(&apps);
        if apps.is_empty() {
            return Ok(gpus);
        }

        let pids = apps.iter().map(|a| a.pid.to_string()).collect::<Vec<_>>().join(",");
        // a process can exit between the two calls, ps then exits non-zero
        let owners = match run("ps", &["-o", "pid=,user:64=,comm=", "-p", &pids]).await {
            Ok(out) => parse_ps(&out),
            Err(e) => {
                log::debug!("ps lookup failed: {e}");
                HashMap::new()
            }
        };

        attach_processes(&mut gpus, apps, &owners);
        Ok(gpus)
    }
}

impl Default for NvidiaSmiSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSampler for NvidiaSmiSampler {
    async fn sample(&self) -> HostSnapshot {
        let result = self.query().await;
        let now = Local::now().naive_local();
        match result {
            Ok(gpus) => HostSnapshot::new(self.hostname.as_str(), now, gpus),
            Err(e) => {
                log::error!("failed to read gpu state: {e}");
                HostSnapshot::failed(self.hostname.as_str(), now, format!("{e}!"))
            }
        }
    }
}

async fn run(program: &str, args: &[&str]) -> eyre::Result<String> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(eyre!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8(output.stdout)?)
}

#[derive(Debug, PartialEq)]
struct ComputeApp {
    gpu_uuid: String,
    pid: u32,
    used_memory: u64,
    process_name: String,
}

fn fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

fn optional(value: &str) -> Option<u32> {
    value.parse().ok()
}

fn parse_gpu_rows(out: &str) -> eyre::Result<Vec<GpuSample>> {
    let mut gpus = vec![];
    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        let f = fields(line);
        let n = f.len();
        if n < 7 {
            return Err(eyre!("unexpected nvidia-smi row: {line}"));
        }
        // MIG slices and some boards report [N/A] here, such a gpu is left out
        let (Ok(index), Ok(memory_used), Ok(memory_total)) =
            (f[0].parse::<u32>(), f[n - 2].parse::<u64>(), f[n - 1].parse::<u64>())
        else {
            log::warn!("skipping gpu without readable memory: {line}");
            continue;
        };
        gpus.push(GpuSample {
            index,
            uuid: f[1].to_owned(),
            // gpu names may carry commas, everything between uuid and the metrics is the name
            name: f[2..n - 4].join(", "),
            temperature: optional(f[n - 4]),
            utilization_percent: optional(f[n - 3]),
            memory_used,
            memory_total,
            processes: vec![],
        });
    }
    Ok(gpus)
}

fn parse_compute_apps(out: &str) -> Vec<ComputeApp> {
    out.lines()
        .filter_map(|line| {
            let f = fields(line);
            if f.len() < 4 {
                return None;
            }
            Some(ComputeApp {
                gpu_uuid: f[0].to_owned(),
                pid: f[1].parse().ok()?,
                used_memory: f[2].parse().unwrap_or_default(),
                process_name: f[3..].join(","),
            })
        })
        .collect()
}

/// pid -> (user, command)
fn parse_ps(out: &str) -> HashMap<u32, (String, String)> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let user = parts.next()?.to_owned();
            let command = parts.collect::<Vec<_>>().join(" ");
            Some((pid, (user, command)))
        })
        .collect()
}

fn attach_processes(
    gpus: &mut [GpuSample],
    apps: Vec<ComputeApp>,
    owners: &HashMap<u32, (String, String)>,
) {
    for app in apps {
        let Some(gpu) = gpus.iter_mut().find(|g| g.uuid == app.gpu_uuid) else {
            log::debug!("process {} runs on unknown gpu {}", app.pid, app.gpu_uuid);
            continue;
        };
        let (username, command) = match owners.get(&app.pid) {
            Some((user, command)) => (user.clone(), command.clone()),
            None => {
                let base = app.process_name.rsplit('/').next().unwrap_or_default();
                ("unknown".to_owned(), base.to_owned())
            }
        };
        gpu.processes.push(ProcessUsage {
            username,
            command,
            gpu_memory_usage: app.used_memory,
            pid: Some(app.pid),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPUS: &str = "\
0, GPU-aaa, NVIDIA A100-SXM4-40GB, 41, 87, 30000, 40960
1, GPU-bbb, Tesla V100, PCIe, [N/A], [N/A], 0, 16384
";

    const APPS: &str = "\
GPU-aaa, 4242, 20000, /usr/bin/python3
GPU-aaa, 4243, 9000, /opt/conda/bin/python
GPU-zzz, 1, 10, ghost
";

    #[test]
    fn parses_gpu_rows_with_missing_metrics() {
        let gpus = parse_gpu_rows(GPUS).expect("rows");
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].utilization_percent, Some(87));
        assert_eq!(gpus[0].memory_used, 30000);
        assert_eq!(gpus[1].name, "Tesla V100, PCIe");
        assert_eq!(gpus[1].temperature, None);
        assert_eq!(gpus[1].memory_total, 16384);
    }

    #[test]
    fn rejects_truncated_rows() {
        assert!(parse_gpu_rows("0, GPU-aaa, 41").is_err());
    }

    #[test]
    fn gpus_without_memory_readings_are_skipped() {
        let rows = "0, GPU-aaa, NVIDIA A100, 41, 87, 30000, 40960\n\
                    1, MIG-bbb, NVIDIA A100 MIG 1g.5gb, [N/A], [N/A], [N/A], [N/A]\n";
        let gpus = parse_gpu_rows(rows).expect("rows");
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].uuid, "GPU-aaa");
    }

    #[tokio::test]
    async fn missing_binary_yields_a_failed_snapshot() {
        let snapshot = NvidiaSmiSampler::new()
            .with_binary("/nonexistent/nvidia-smi")
            .sample()
            .await;
        assert!(!snapshot.is_healthy());
        assert!(snapshot.gpus.is_empty());
        assert_eq!(snapshot.hostname, local_hostname());
    }

    #[test]
    fn attributes_processes_to_their_gpu() {
        let mut gpus = parse_gpu_rows(GPUS).expect("rows");
        let owners = parse_ps("4242 alice python3\n");

        attach_processes(&mut gpus, parse_compute_apps(APPS), &owners);

        let procs = &gpus[0].processes;
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].username, "alice");
        assert_eq!(procs[0].command, "python3");
        assert_eq!(procs[0].gpu_memory_usage, 20000);
        // exited before ps ran
        assert_eq!(procs[1].username, "unknown");
        assert_eq!(procs[1].command, "python");
        assert!(gpus[1].processes.is_empty());
        assert_eq!(gpus[0].divergence(), 1000);
    }

    #[test]
    fn unreadable_memory_counts_as_zero() {
        let apps = parse_compute_apps("GPU-aaa, 17, [N/A], /bin/app\nnot a row\n");
        assert_eq!(
            apps,
            vec![ComputeApp {
                gpu_uuid: "GPU-aaa".into(),
                pid: 17,
                used_memory: 0,
                process_name: "/bin/app".into(),
            }]
        );
    }
}
