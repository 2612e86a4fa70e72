// ============================================================
// Layer 4 — Index Mapper
// ============================================================
// Embedding tables are indexed by contiguous integers, but user and
// item ids in the store are sparse. The mapper hands out dense
// indices in first-seen order:
//
//   stream order:  u42, u7, u42, u1000
//   user indices:  u42 → 0, u7 → 1, u1000 → 2
//
// Because assignment depends only on traversal order, re-running
// the pipeline over the same ordered data reproduces the same maps.
// During training the mapper only ever grows; once serialized into
// an artifact it is treated as read-only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which of the two maps an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdKind {
    User,
    Item,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexMapError {
    #[error("{kind:?} index map repeats external id {id}")]
    DuplicateId { kind: IdKind, id: i64 },
    #[error("{kind:?} index map is not contiguous: index {index} outside 0..{len} or repeated")]
    NonContiguous { kind: IdKind, index: usize, len: usize },
}

/// Serialized form: `(externalId, denseIndex)` pairs in index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMappings {
    pub user_index_map: Vec<(i64, usize)>,
    pub item_index_map: Vec<(i64, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IdIndex {
    forward: HashMap<i64, usize>,
    reverse: Vec<i64>,
}

impl IdIndex {
    fn index_of(&mut self, id: i64) -> usize {
        if let Some(&idx) = self.forward.get(&id) {
            return idx;
        }
        let idx = self.reverse.len();
        self.forward.insert(id, idx);
        self.reverse.push(id);
        idx
    }

    fn pairs(&self) -> Vec<(i64, usize)> {
        self.reverse.iter().enumerate().map(|(idx, &id)| (id, idx)).collect()
    }

    fn from_pairs(kind: IdKind, pairs: &[(i64, usize)]) -> Result<Self, IndexMapError> {
        let len = pairs.len();
        let mut slots: Vec<Option<i64>> = vec![None; len];
        let mut forward = HashMap::with_capacity(len);

        for &(id, index) in pairs {
            if index >= len || slots[index].is_some() {
                return Err(IndexMapError::NonContiguous { kind, index, len });
            }
            if forward.insert(id, index).is_some() {
                return Err(IndexMapError::DuplicateId { kind, id });
            }
            slots[index] = Some(id);
        }

        // Every slot is filled: len distinct indices, each < len.
        let reverse = slots.into_iter().flatten().collect();
        Ok(Self { forward, reverse })
    }
}

/// Bidirectional external-id ↔ dense-index maps for users and items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMapper {
    users: IdIndex,
    items: IdIndex,
}

impl IndexMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense index for `id`, allocating the next free index on first sight.
    pub fn index_of(&mut self, id: i64, kind: IdKind) -> usize {
        match kind {
            IdKind::User => self.users.index_of(id),
            IdKind::Item => self.items.index_of(id),
        }
    }

    pub fn index_of_user(&mut self, id: i64) -> usize {
        self.index_of(id, IdKind::User)
    }

    pub fn index_of_item(&mut self, id: i64) -> usize {
        self.index_of(id, IdKind::Item)
    }

    /// Read-only lookup. `None` means the id was never seen during
    /// training; the inference engine treats it as a cold start.
    pub fn lookup(&self, id: i64, kind: IdKind) -> Option<usize> {
        let map = match kind {
            IdKind::User => &self.users,
            IdKind::Item => &self.items,
        };
        map.forward.get(&id).copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.reverse.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.reverse.len()
    }

    /// Item ids in dense-index order.
    pub fn item_ids(&self) -> &[i64] {
        &self.items.reverse
    }

    pub fn serialize(&self) -> IndexMappings {
        IndexMappings {
            user_index_map: self.users.pairs(),
            item_index_map: self.items.pairs(),
        }
    }

    pub fn load(mappings: &IndexMappings) -> Result<Self, IndexMapError> {
        Ok(Self {
            users: IdIndex::from_pairs(IdKind::User, &mappings.user_index_map)?,
            items: IdIndex::from_pairs(IdKind::Item, &mappings.item_index_map)?,
        })
    }
}
