use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[derive(Debug, Default)]
struct Strings {
    ids: HashMap<Arc<str>, KeyId, RandomState>,
    names: Vec<Arc<str>>,
}

/// Maps metric names and tag keys/values to compact ids.
#[derive(Debug, Default)]
pub struct Interner {
    inner: RwLock<Strings>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.inner.read().ids.get(s).copied()
    }

    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(id) = self.get(s) {
            return id;
        }

        let mut inner = self.inner.write();
        // Another writer may have won the race between the two locks.
        if let Some(&id) = inner.ids.get(s) {
            return id;
        }

        let id = KeyId(inner.names.len() as u32);
        let s: Arc<str> = Arc::from(s);
        inner.names.push(s.clone());
        inner.ids.insert(s, id);
        id
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().names.get(id.0 as usize).cloned()
    }
}
