//! Per-process engine state, built once and handed to every component.

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::content_store::ContentStore;
use crate::error::Result;
use crate::events::EventBus;
use crate::interceptor::{InterceptorChain, StorageInterceptor};
use crate::location::registry::LocationFactory;
use crate::location::{LocationRegistry, RetryPolicy};
use crate::platform;
use crate::space::{SpaceProbe, SystemSpaceProbe};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the hidden folder holding the catalog inside the output directory.
pub const META_DIR: &str = ".hoard";
pub const CATALOG_FILE: &str = "catalog.db";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Where things live under the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub meta_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let meta_dir = root.join(META_DIR);
        Self {
            catalog_path: meta_dir.join(CATALOG_FILE),
            snapshots_dir: meta_dir.join(SNAPSHOTS_DIR),
            meta_dir,
            root,
        }
    }
}

pub struct EngineContext {
    config: EngineConfig,
    layout: OutputLayout,
    events: EventBus,
    interceptors: InterceptorChain,
    locations: LocationRegistry,
    space: Arc<dyn SpaceProbe>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            layout: OutputLayout::new(&config.output_dir),
            config,
            events: EventBus::default(),
            interceptors: InterceptorChain::new(),
            locations: LocationRegistry::with_local(RetryPolicy::default()),
            space: Arc::new(SystemSpaceProbe),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn StorageInterceptor>) -> Self {
        self.interceptors.register(interceptor);
        self
    }

    pub fn with_location_factory(mut self, scheme: &str, factory: LocationFactory) -> Self {
        self.locations.register(scheme, factory);
        self
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    pub fn space_probe(&self) -> &dyn SpaceProbe {
        self.space.as_ref()
    }

    /// Open (creating if needed) the catalog in its hidden folder.
    pub fn open_catalog(&self) -> Result<Catalog> {
        let created = !self.layout.meta_dir.exists();
        fs::create_dir_all(&self.layout.meta_dir)?;
        if created {
            if let Err(e) = platform::set_hidden(&self.layout.meta_dir, true) {
                warn!(
                    "Could not hide {}: {}",
                    self.layout.meta_dir.display(),
                    e
                );
            }
        }
        let catalog = Catalog::open(&self.layout.catalog_path)?;
        debug!("Catalog opened at {}", self.layout.catalog_path.display());
        Ok(catalog)
    }

    pub fn content_store(&self) -> ContentStore {
        ContentStore::new(&self.layout.root, self.interceptors.clone())
            .with_compression_level(self.config.compression_level)
    }

    pub fn output_root(&self) -> &Path {
        &self.layout.root
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("layout", &self.layout)
            .field("interceptors", &self.interceptors)
            .field("schemes", &self.locations.schemes())
            .finish()
    }
}
