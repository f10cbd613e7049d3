//! Engine configuration passed into a process at construction time
//!
//! Replaces the source system's global parameter-service singleton with an
//! explicit struct: registered defaults for optional parameters, and the
//! resolver that turns repository-location parameter values into paths.
//! Both are pure lookup services; neither calls back into the engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolver for `repository-location`-typed parameter values
pub trait LocationResolver: Send + Sync {
    /// Turn a location string into an absolute addressable path.
    fn resolve(&self, location: &str) -> Option<PathBuf>;
}

/// Resolves locations relative to a root directory
///
/// Location strings use '/'-separated segments; a leading '/' is the
/// repository root.
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LocationResolver for DirectoryResolver {
    fn resolve(&self, location: &str) -> Option<PathBuf> {
        let trimmed = location.trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let mut path = self.root.clone();
        for segment in trimmed.split('/') {
            // Refuse traversal outside the root
            if segment == ".." || segment.contains(std::path::MAIN_SEPARATOR) {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }
}

/// Configuration injected into a [`Process`](crate::process::Process)
#[derive(Clone, Default)]
pub struct EngineConfig {
    defaults: HashMap<String, String>,
    resolver: Option<Arc<dyn LocationResolver>>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global default for a parameter key.
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Look up a registered default.
    pub fn registered_default(&self, key: &str) -> Option<&str> {
        self.defaults.get(key).map(|s| s.as_str())
    }

    /// Install the repository location resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn LocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolve a repository location through the installed resolver.
    pub fn resolve_location(&self, location: &str) -> Option<PathBuf> {
        self.resolver.as_ref()?.resolve(location)
    }

    /// Whether a resolver is installed.
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("defaults", &self.defaults)
            .field("resolver", &self.resolver.as_ref().map(|_| "<resolver>"))
            .finish()
    }
}

/// Helper for tests and demos: resolver rooted at a plain directory.
pub fn directory_resolver(root: impl AsRef<Path>) -> Arc<dyn LocationResolver> {
    Arc::new(DirectoryResolver::new(root.as_ref().to_path_buf()))
}
