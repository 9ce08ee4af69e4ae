use std::collections::BTreeMap;

use crate::config::SourceConfig;

/// Read-only set of sources known to this process.
///
/// Built once from config; the scheduler consults it on every registration
/// and manual submission, the fetcher uses it to find feed URLs.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceConfig>,
}

impl SourceRegistry {
    pub fn new(sources: impl IntoIterator<Item = SourceConfig>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    /// Registry with bare names only (no feed URL). Handy for tests and
    /// for fetchers that resolve sources themselves.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|n| SourceConfig {
            name: n.into(),
            feed_url: String::new(),
        }))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    /// Source names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
