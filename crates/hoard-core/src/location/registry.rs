use super::local::LocalLocation;
use super::retry::RetryPolicy;
use super::Location;
use crate::error::{Error, Result};
use std::sync::Arc;

pub type LocationFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Location>> + Send + Sync>;

pub const LOCAL_SCHEME: &str = "file";

/// Location implementations keyed by URI scheme.
///
/// `file` is always listed first; bare paths resolve to it.
#[derive(Clone, Default)]
pub struct LocationRegistry {
    factories: Vec<(String, LocationFactory)>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(retry: RetryPolicy) -> Self {
        let mut registry = Self::new();
        registry.register(
            LOCAL_SCHEME,
            Arc::new(move |path: &str| {
                Ok(Arc::new(LocalLocation::new(path).with_retry(retry)) as Arc<dyn Location>)
            }),
        );
        registry
    }

    /// Register (or replace) the factory for `scheme`.
    pub fn register(&mut self, scheme: &str, factory: LocationFactory) {
        let scheme = scheme.to_ascii_lowercase();
        if let Some(existing) = self.factories.iter_mut().find(|(s, _)| *s == scheme) {
            existing.1 = factory;
        } else {
            self.factories.push((scheme, factory));
        }
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.iter().map(|(s, _)| s.as_str()).collect();
        // Stable sort keeps registration order for everything else
        schemes.sort_by_key(|s| *s != LOCAL_SCHEME);
        schemes
    }

    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn Location>> {
        let (scheme, rest) = split_scheme(uri);
        let factory = self
            .factories
            .iter()
            .find(|(s, _)| *s == scheme)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| Error::NotFound {
                what: format!("location provider for scheme '{}'", scheme),
            })?;
        factory(rest)
    }
}

/// `scheme://rest`, or the local scheme for anything without one.
fn split_scheme(uri: &str) -> (String, &str) {
    match uri.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (scheme.to_ascii_lowercase(), rest)
        }
        _ => (LOCAL_SCHEME.to_string(), uri),
    }
}

impl std::fmt::Debug for LocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("/home/me"), ("file".to_string(), "/home/me"));
        assert_eq!(split_scheme("file:///home/me"), ("file".to_string(), "/home/me"));
        assert_eq!(split_scheme("SFTP://host/dir"), ("sftp".to_string(), "host/dir"));
        assert_eq!(split_scheme(r"C:\data"), ("file".to_string(), r"C:\data"));
    }

    #[test]
    fn test_local_is_listed_first() {
        let mut registry = LocationRegistry::new();
        registry.register(
            "sftp",
            Arc::new(|_: &str| {
                Err(Error::Other("not available in tests".to_string()))
            }),
        );
        let local = LocationRegistry::with_local(RetryPolicy::none());
        registry.register(LOCAL_SCHEME, local.factories[0].1.clone());
        assert_eq!(registry.schemes(), vec!["file", "sftp"]);
    }

    #[test]
    fn test_resolve_unknown_scheme() {
        let registry = LocationRegistry::with_local(RetryPolicy::none());
        assert!(matches!(
            registry.resolve("ftp://example.org/pub"),
            Err(Error::NotFound { .. })
        ));
        let dir = tempfile::tempdir().unwrap();
        let location = registry.resolve(&dir.path().to_string_lossy()).unwrap();
        assert!(location.root().is_ok());
    }
}
