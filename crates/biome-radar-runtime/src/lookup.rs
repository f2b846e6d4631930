//! Account lookup backed by the config file's `[accounts]` table.

use std::collections::{BTreeMap, HashMap};

use biome_radar_detector::{AccountLookup, LookupError};

/// Resolves display names from a fixed table. Names match ignoring ASCII
/// case; a name that is itself a numeric id resolves to that id.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    ids: BTreeMap<String, String>,
}

impl StaticLookup {
    pub fn new(ids: BTreeMap<String, String>) -> Self {
        Self { ids }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(id) = self.ids.get(name) {
            return Some(id.clone());
        }
        if let Some((_, id)) = self.ids.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            return Some(id.clone());
        }
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            return Some(name.to_owned());
        }
        None
    }
}

impl AccountLookup for StaticLookup {
    async fn resolve_ids(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Option<String>>, LookupError> {
        Ok(names
            .iter()
            .map(|name| (name.clone(), self.lookup(name)))
            .collect())
    }
}
