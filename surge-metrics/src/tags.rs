use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted, deduplicated set of interned `(key, value)` pairs identifying one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Series usually carry fewer than four tags.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a set from unsorted pairs. A repeated key keeps its last value.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::new();
        for (k, v) in pairs {
            match tags.binary_search_by(|(existing, _)| existing.cmp(&k)) {
                Ok(idx) => tags[idx].1 = v,
                Err(idx) => tags.insert(idx, (k, v)),
            }
        }
        Self { tags }
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }
}
