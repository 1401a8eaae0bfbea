use crate::config::{Config, HostConfig};
use crate::error::{MangaUpError, Result};
use crate::hosts::{CatboxHost, ImgbbHost, ImgurHost, PixeldrainHost};
use crate::traits::HostBackend;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of the image hosts enabled in the configuration.
pub struct HostRegistry {
    hosts: BTreeMap<String, Arc<dyn HostBackend>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            hosts: BTreeMap::new(),
        }
    }

    /// Build every enabled host listed under `[hosts.*]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (name, host_config) in &config.hosts {
            if !host_config.enabled {
                debug!("Host '{}' disabled, skipping", name);
                continue;
            }
            let host = Self::build(name, host_config)?;
            registry.register_host(name, host);
        }
        info!("Registered {} host(s)", registry.hosts.len());
        Ok(registry)
    }

    fn build(name: &str, config: &HostConfig) -> Result<Arc<dyn HostBackend>> {
        let host: Arc<dyn HostBackend> = match name.to_lowercase().as_str() {
            "catbox" => Arc::new(CatboxHost::new(config)?),
            "imgur" => Arc::new(ImgurHost::new(config)?),
            "imgbb" => Arc::new(ImgbbHost::new(config)?),
            "pixeldrain" => Arc::new(PixeldrainHost::new(config)?),
            _ => return Err(MangaUpError::host_not_found(name)),
        };
        Ok(host)
    }

    pub fn register_host(&mut self, name: &str, host: Arc<dyn HostBackend>) {
        self.hosts.insert(name.to_lowercase(), host);
    }

    pub fn get_host(&self, name: &str) -> Option<Arc<dyn HostBackend>> {
        self.hosts.get(&name.to_lowercase()).cloned()
    }

    pub fn require_host(&self, name: &str) -> Result<Arc<dyn HostBackend>> {
        self.get_host(name).ok_or_else(|| MangaUpError::host_not_found(name))
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&str, &Arc<dyn HostBackend>)> {
        self.hosts.iter().map(|(name, host)| (name.as_str(), host))
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}
