use crate::prelude::Res;
use eyre::eyre;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// base url -> display name
pub type Peers = BTreeMap<String, String>;

/// The peers a node polls, kept as a JSON object on disk. It is read again on
/// every poll, so `gpuview add` and `gpuview remove` apply to a running server.
#[derive(Clone, Debug)]
pub struct PeerRegistry {
    path: PathBuf,
}

impl PeerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> eyre::Result<Peers> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Peers::new());
        }
        let str = tokio::fs::read_to_string(&self.path).await?;
        if str.trim().is_empty() {
            return Ok(Peers::new());
        }
        serde_json::from_str(&str).map_err(|e| eyre!("invalid peer registry {:?}: {e}", self.path))
    }

    /// Registers `url`, or renames it when it is already known. The url is the
    /// display name unless `name` is given.
    pub async fn add(&self, url: &str, name: Option<&str>) -> eyre::Result<String> {
        let url = normalize(url)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(url.as_str())
            .to_owned();

        let mut peers = self.load().await?;
        peers.insert(url.clone(), name);
        self.save(&peers).await?;
        Ok(url)
    }

    pub async fn remove(&self, url: &str) -> eyre::Result<bool> {
        let url = normalize(url)?;
        let mut peers = self.load().await?;
        if peers.remove(&url).is_none() {
            return Ok(false);
        }
        self.save(&peers).await?;
        Ok(true)
    }

    async fn save(&self, peers: &Peers) -> Res {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(peers)?).await?;
        Ok(())
    }
}

fn normalize(url: &str) -> eyre::Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(eyre!("peer url must start with http:// or https://, got {url:?}"));
    }
    Ok(url.to_owned())
}
