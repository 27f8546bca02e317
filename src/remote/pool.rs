use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DirectoryCache, RemoteStore};

/// One configured remote with the size range it accepts.
pub struct Endpoint {
    pub index: usize,
    pub min_size: u64,
    pub max_size: u64,
    pub store: Arc<dyn RemoteStore>,
    pub dirs: DirectoryCache,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("index", &self.index)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn new(index: usize, min_size: u64, max_size: u64, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            index,
            min_size,
            max_size,
            dirs: DirectoryCache::new(store.clone()),
            store,
        }
    }

    pub fn accepts(&self, size: u64) -> bool {
        size >= self.min_size && size <= self.max_size
    }
}

#[derive(Debug, thiserror::Error)]
#[error("no endpoint accepts a unit of {size} bytes")]
pub struct NoEndpoint {
    pub size: u64,
}

/// Routes units to endpoints by size, round-robin among those eligible.
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    next: AtomicUsize,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn single(store: Arc<dyn RemoteStore>) -> Self {
        Self::new(vec![Endpoint::new(0, 0, u64::MAX, store)])
    }

    pub fn select(&self, size: u64) -> Result<Arc<Endpoint>, NoEndpoint> {
        let eligible: Vec<&Arc<Endpoint>> =
            self.endpoints.iter().filter(|e| e.accepts(size)).collect();
        if eligible.is_empty() {
            return Err(NoEndpoint { size });
        }
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(eligible[turn % eligible.len()].clone())
    }
}
