use std::sync::Arc;

use crate::DiscoveredInstance;
use crate::Registry;
use crate::Result;

/// Read-only lookup of healthy instances of any service
#[derive(Clone)]
pub struct Finder {
    registry: Arc<dyn Registry>,
    tag: Option<String>,
}

impl Finder {
    pub fn new(
        registry: Arc<dyn Registry>,
        tag: Option<String>,
    ) -> Self {
        Self { registry, tag }
    }

    /// All healthy instances of `service`, in registry order
    pub async fn find(
        &self,
        service: &str,
    ) -> Result<Vec<DiscoveredInstance>> {
        self.registry.healthy_instances(service, self.tag.clone()).await
    }

    /// First healthy instance of `service`, the one the watcher would pick
    pub async fn find_first(
        &self,
        service: &str,
    ) -> Result<Option<DiscoveredInstance>> {
        Ok(self.find(service).await?.into_iter().next())
    }
}

impl std::fmt::Debug for Finder {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Finder").field("tag", &self.tag).finish()
    }
}
