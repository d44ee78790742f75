use crate::libs::peer_registry::{PeerRegistry, Peers};
use crate::libs::shared_state::SharedState;
use crate::libs::snapshot_store::{StoreRef, Stream};
use eyre::eyre;
use gpuview_shared::{FleetSnapshot, HostSnapshot};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;

/// Merges the local sample and every reachable peer into one fleet snapshot
/// per cycle.
pub struct FleetPoller {
    store: StoreRef,
    registry: PeerRegistry,
    client: reqwest::Client,
    include_local: bool,
}

impl FleetPoller {
    pub fn new(
        store: StoreRef,
        registry: PeerRegistry,
        client: reqwest::Client,
        include_local: bool,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            include_local,
        }
    }

    pub fn from_state(state: &SharedState) -> Self {
        Self::new(
            state.store.clone(),
            state.registry.clone(),
            state.http.clone(),
            !state.app_config.exclude_self,
        )
    }

    pub async fn run(self, every: Duration) {
        loop {
            match self.poll_once().await {
                Ok((id, fleet)) => log::debug!("fleet snapshot {id} with {} hosts", fleet.len()),
                Err(e) => log::error!("fleet poll failed: {e}"),
            }
            sleep(every).await;
        }
    }

    /// One full cycle. Unreachable or broken peers are left out, the merged
    /// snapshot is stored even when it ends up empty.
    pub async fn poll_once(&self) -> eyre::Result<(u64, FleetSnapshot)> {
        let peers = self.registry.load().await?;

        let mut hosts = vec![];
        if self.include_local {
            hosts.extend(self.local_entry());
        }
        hosts.extend(self.fetch_peers(&peers).await);

        let fleet = FleetSnapshot::from_hosts(hosts);
        let id = self.store.append_snapshot(Stream::Fleet, &fleet)?;
        Ok((id, fleet))
    }

    fn local_entry(&self) -> Option<HostSnapshot> {
        match self.store.latest_snapshot::<HostSnapshot>(Stream::Local) {
            Ok(Some((_, snapshot))) if snapshot.is_healthy() => Some(snapshot),
            Ok(_) => None,
            Err(e) => {
                log::warn!("could not read the local sample: {e}");
                None
            }
        }
    }

    async fn fetch_peers(&self, peers: &Peers) -> Vec<HostSnapshot> {
        let mut fetches = JoinSet::new();
        for (url, name) in peers {
            let client = self.client.clone();
            let url = url.clone();
            let name = name.clone();
            fetches.spawn(async move {
                match fetch(&client, &url).await {
                    Ok(mut snapshot) => {
                        if snapshot.hostname.is_empty() || name != url {
                            snapshot.hostname = name;
                        }
                        Some(snapshot)
                    }
                    Err(e) => {
                        log::warn!("error getting gpustat from {url}: {e}");
                        None
                    }
                }
            });
        }

        let mut hosts = vec![];
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(Some(snapshot)) => hosts.push(snapshot),
                Ok(None) => {}
                Err(e) => log::error!("peer fetch task failed: {e}"),
            }
        }
        hosts
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> eyre::Result<HostSnapshot> {
    let snapshot: HostSnapshot = client
        .get(format!("{url}/gpustat"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if let Some(error) = &snapshot.error {
        return Err(eyre!("peer reported: {error}"));
    }
    Ok(snapshot)
}
