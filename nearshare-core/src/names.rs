//! Neighbor name table: append-only map from endpoint id to display name.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::identity::NeighborId;

/// Names learned while connecting, kept so later states can show them.
/// Entries are never changed or evicted once inserted.
#[derive(Debug, Default)]
pub struct NameLookupTable {
    names: RwLock<HashMap<NeighborId, String>>,
}

impl NameLookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name. Returns false if the id already had one (the first name is kept).
    pub fn record(&self, id: &NeighborId, name: &str) -> bool {
        let mut names = match self.names.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if names.contains_key(id) {
            return false;
        }
        names.insert(id.clone(), name.to_string());
        true
    }

    pub fn lookup(&self, id: &NeighborId) -> Option<String> {
        let names = match self.names.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        names.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        match self.names.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
