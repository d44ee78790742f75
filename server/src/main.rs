use crate::libs::app_config::{AppConfig, AppConfigRef, Cli, Command};
use crate::libs::peer_registry::PeerRegistry;
use crate::libs::service_installer;
use crate::libs::shared_state::SharedState;
use crate::workers::sampling;
use clap::Parser;
use eyre::eyre;
use gpuview_sampler::NvidiaSmiSampler;
use prelude::Res;
use tokio::sync::oneshot;

mod api;
mod libs;
mod models;
mod prelude;
mod workers;

#[tokio::main]
async fn main() -> Res {
    dotenv::dotenv().ok();
    prelude::init_logger()?;

    match Cli::parse().command {
        Command::Run(config) => run(config).await,
        Command::Service(config) => service_installer::install(&config),
        Command::Add {
            url,
            name,
            registry,
        } => {
            let url = PeerRegistry::new(&registry.hosts_file)
                .add(&url, name.as_deref())
                .await?;
            log::info!("registered {url} in {}", registry.hosts_file);
            Ok(())
        }
        Command::Remove { url, registry } => {
            if PeerRegistry::new(&registry.hosts_file).remove(&url).await? {
                log::info!("removed {url}");
            } else {
                log::warn!("{url} is not registered");
            }
            Ok(())
        }
        Command::Hosts { registry } => {
            for (url, name) in PeerRegistry::new(&registry.hosts_file).load().await? {
                println!("{url}\t{name}");
            }
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> Res {
    log::debug!("config: {}", serde_json::to_string(&config)?);
    let config = AppConfigRef::from(config);
    let state = SharedState::new(config)?;

    let (fatal_tx, fatal_rx) = oneshot::channel();
    workers::spawn(&state, NvidiaSmiSampler::new(), fatal_tx);

    let (reason_tx, reason_rx) = oneshot::channel::<String>();
    let shutdown = async move {
        tokio::select! {
            reason = sampling::stopped(fatal_rx) => {
                let _ = reason_tx.send(reason);
            }
            _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
        }
    };

    api::run(state, shutdown).await?;

    match reason_rx.await {
        Ok(reason) => Err(eyre!("local gpu sampling failed: {reason}")),
        Err(_) => Ok(()),
    }
}
