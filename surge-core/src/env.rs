use std::collections::BTreeMap;
use std::sync::Arc;

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

/// Read-only key/value overrides handed to setup, every iteration and teardown.
/// Later entries win when a key repeats.
#[derive(Debug, Clone)]
pub struct Env {
    vars: EnvVars,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            vars: Arc::from(Vec::new().into_boxed_slice()),
        }
    }
}

impl Env {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let map: BTreeMap<Arc<str>, Arc<str>> = pairs
            .into_iter()
            .map(|(k, v)| (Arc::from(k.as_ref()), Arc::from(v.as_ref())))
            .collect();
        Self {
            vars: Arc::from(map.into_iter().collect::<Vec<_>>().into_boxed_slice()),
        }
    }

    pub fn process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Returns a copy with `overrides` layered on top.
    pub fn with_overrides<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let base = self.iter().map(|(k, v)| (k.to_string(), v.to_string()));
        let extra = overrides
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()));
        Self::from_pairs(base.chain(extra))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .binary_search_by(|(k, _)| (**k).cmp(key))
            .ok()
            .map(|idx| &*self.vars[idx].1)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.vars.iter().map(|(k, v)| (&**k, &**v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
