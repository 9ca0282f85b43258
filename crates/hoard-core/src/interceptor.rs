//! Storage interceptors: pluggable stream transforms (encryption, typically)
//! applied symmetrically on the blob write and read paths.

use crate::error::{Error, Result};
use crate::stream::BlobWrite;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::debug;

pub trait StorageInterceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before a run or check touches any blob.
    fn initialize(&self) -> io::Result<()> {
        Ok(())
    }

    fn wrap_writer(
        &self,
        inner: Box<dyn BlobWrite>,
        declared_length: u64,
    ) -> io::Result<Box<dyn BlobWrite>>;

    fn wrap_reader<'a>(
        &self,
        inner: Box<dyn Read + 'a>,
        declared_length: u64,
    ) -> io::Result<Box<dyn Read + 'a>>;

    fn destroy(&self) {}
}

/// Ordered set of interceptors. Registration order is wrapping order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn StorageInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, interceptor: Arc<dyn StorageInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Initialize every interceptor in order. On the first failure the ones
    /// already initialized are destroyed again and the failure is returned.
    pub fn activate(&self) -> Result<()> {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            if let Err(e) = interceptor.initialize() {
                for activated in self.interceptors[..index].iter().rev() {
                    activated.destroy();
                }
                return Err(Error::Interceptor {
                    name: interceptor.name().to_string(),
                    reason: e.to_string(),
                });
            }
            debug!("Storage interceptor '{}' activated", interceptor.name());
        }
        Ok(())
    }

    pub fn deactivate(&self) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.destroy();
            debug!("Storage interceptor '{}' deactivated", interceptor.name());
        }
    }

    /// The file is innermost, so interceptors registered first end up closest to it.
    pub fn wrap_writer(
        &self,
        mut writer: Box<dyn BlobWrite>,
        declared_length: u64,
    ) -> io::Result<Box<dyn BlobWrite>> {
        for interceptor in &self.interceptors {
            writer = interceptor.wrap_writer(writer, declared_length)?;
        }
        Ok(writer)
    }

    pub fn wrap_reader<'a>(
        &self,
        mut reader: Box<dyn Read + 'a>,
        declared_length: u64,
    ) -> io::Result<Box<dyn Read + 'a>> {
        for interceptor in &self.interceptors {
            reader = interceptor.wrap_reader(reader, declared_length)?;
        }
        Ok(reader)
    }
}

/// Activates a chain and deactivates it again when dropped, so every exit
/// path of a run or check releases the interceptors.
pub struct ActivationGuard<'a> {
    chain: &'a InterceptorChain,
}

impl<'a> ActivationGuard<'a> {
    pub fn activate(chain: &'a InterceptorChain) -> Result<Self> {
        chain.activate()?;
        Ok(Self { chain })
    }
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        if !self.chain.is_empty() {
            self.chain.deactivate();
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorChain").field("interceptors", &names).finish()
    }
}
