use crate::prelude::{CONFIG_DIR_PATH, DATA_DIR_PATH};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DB_NAME: &str = "gpustats.db";
const HOSTS_NAME: &str = "hosts.json";

#[derive(Parser, Debug)]
#[command(version, about = "A lightweight web dashboard for monitoring GPU usage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample the local GPUs, poll the registered peers and serve the dashboard
    Run(AppConfig),
    /// Install `gpuview run` with the given options as a systemd service
    Service(AppConfig),
    /// Register a peer
    Add {
        #[arg(long, help = "base url of the peer, e.g. http://10.0.0.2:9988")]
        url: String,
        #[arg(long, help = "display name, defaults to the url")]
        name: Option<String>,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// Remove a registered peer
    Remove {
        #[arg(long)]
        url: String,
        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// Print the registered peers
    Hosts {
        #[command(flatten)]
        registry: RegistryArgs,
    },
}

#[derive(Args, Debug, Serialize, Deserialize, Clone)]
pub struct RegistryArgs {
    #[arg(long, default_value_t = default_hosts_path(), help = "peer registry file")]
    pub hosts_file: String,
}

#[derive(ValueEnum, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// embedded database file at --db-path
    #[default]
    Native,
    /// process memory, lost on exit
    Memory,
}

#[derive(Parser, Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[arg(long, default_value = "0.0.0.0", help = "address the api binds to")]
    pub host: String,

    #[arg(long, default_value_t = 9988, help = "specify the api port")]
    pub port: u16,

    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..), help = "seconds between two local samples")]
    pub sample_interval: u64,

    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..), help = "seconds between two fleet polls")]
    pub poll_interval: u64,

    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..), help = "seconds to wait for a single peer")]
    pub peer_timeout: u64,

    #[arg(long, default_value_t = 72, help = "hours of history kept by the retention sweep")]
    pub retention_hours: u64,

    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(1..), help = "hours between two retention sweeps")]
    pub sweep_interval_hours: u64,

    #[arg(long, default_value_t = 400, help = "MiB of unattributed gpu memory that marks a pending release")]
    pub release_threshold: u64,

    #[arg(long, value_enum, default_value_t = Backend::Native)]
    pub backend: Backend,

    #[arg(short, long, default_value_t = default_db_path(), help = "storage path for the native backend")]
    pub db_path: String,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[arg(long, action = ArgAction::SetTrue, help = "do not report the local gpus to /gpustat or the fleet")]
    pub exclude_self: bool,
}

impl AppConfig {
    pub fn sample_every(&self) -> Duration {
        Duration::from_secs(self.sample_interval)
    }

    pub fn poll_every(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout)
    }

    pub fn sweep_every(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours * 3600)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    /// The options as `run` arguments, used to build the service unit.
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            format!("--host={}", self.host),
            format!("--port={}", self.port),
            format!("--sample-interval={}", self.sample_interval),
            format!("--poll-interval={}", self.poll_interval),
            format!("--peer-timeout={}", self.peer_timeout),
            format!("--retention-hours={}", self.retention_hours),
            format!("--sweep-interval-hours={}", self.sweep_interval_hours),
            format!("--release-threshold={}", self.release_threshold),
            format!("--db-path={}", self.db_path),
            format!("--hosts-file={}", self.registry.hosts_file),
        ];
        if let Some(backend) = self.backend.to_possible_value() {
            args.push(format!("--backend={}", backend.get_name()));
        }
        if self.exclude_self {
            args.push("--exclude-self".to_owned());
        }
        args
    }
}

fn default_db_path() -> String {
    DATA_DIR_PATH.join(DB_NAME).to_string_lossy().into_owned()
}

fn default_hosts_path() -> String {
    CONFIG_DIR_PATH.join(HOSTS_NAME).to_string_lossy().into_owned()
}

#[derive(Clone)]
pub struct AppConfigRef {
    inner: Arc<AppConfig>,
}

impl From<AppConfig> for AppConfigRef {
    fn from(value: AppConfig) -> Self {
        AppConfigRef {
            inner: Arc::new(value),
        }
    }
}

impl std::ops::Deref for AppConfigRef {
    type Target = AppConfig;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
