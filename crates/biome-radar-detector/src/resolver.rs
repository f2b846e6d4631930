//! Display name <-> account id mapping for tracked accounts.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use biome_radar_core::TrackedAccount;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("account lookup failed: {0}")]
    Failed(String),

    #[error("account lookup service unavailable: {0}")]
    Unavailable(String),
}

/// Batch display-name to account-id lookup.
///
/// Implementations return an entry per name they know about; a `None` id (or
/// a missing entry) means the name does not resolve.
pub trait AccountLookup: Send + Sync {
    fn resolve_ids(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Option<String>>, LookupError>> + Send;
}

impl<T: AccountLookup> AccountLookup for &T {
    fn resolve_ids(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Option<String>>, LookupError>> + Send {
        (**self).resolve_ids(names)
    }
}

/// Trim, drop empties and drop duplicates, keeping first-seen order.
pub fn normalize_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct AccountResolver {
    accounts: Vec<TrackedAccount>,
    id_by_name: HashMap<String, String>,
    name_by_id: HashMap<String, String>,
}

impl AccountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all mappings with the lookup result for `names`.
    ///
    /// Returns the number of accounts that resolved. A lookup failure leaves
    /// the resolver empty.
    pub async fn resolve<L: AccountLookup>(&mut self, lookup: &L, names: &[String]) -> usize {
        self.clear();
        let names = normalize_names(names);
        if names.is_empty() {
            return 0;
        }

        let resolved = match lookup.resolve_ids(&names).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, accounts = names.len(), "account lookup failed; tracking nothing");
                return 0;
            }
        };

        for name in names {
            let id = resolved
                .get(&name)
                .or_else(|| {
                    resolved
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                        .map(|(_, v)| v)
                })
                .cloned()
                .flatten();
            let Some(id) = id else {
                debug!(name = %name, "account name did not resolve");
                continue;
            };
            if self.name_by_id.contains_key(&id) {
                debug!(name = %name, account_id = %id, "duplicate account id ignored");
                continue;
            }
            self.insert(TrackedAccount::new(id, name));
        }
        self.accounts.len()
    }

    fn insert(&mut self, account: TrackedAccount) {
        self.id_by_name
            .insert(account.display_name.clone(), account.account_id.clone());
        self.name_by_id
            .insert(account.account_id.clone(), account.display_name.clone());
        self.accounts.push(account);
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.id_by_name.clear();
        self.name_by_id.clear();
    }

    /// Tracked accounts in input order.
    pub fn accounts(&self) -> &[TrackedAccount] {
        &self.accounts
    }

    pub fn display_name(&self, account_id: &str) -> Option<&str> {
        self.name_by_id.get(account_id).map(String::as_str)
    }

    pub fn account_id(&self, display_name: &str) -> Option<&str> {
        self.id_by_name.get(display_name).map(String::as_str)
    }

    pub fn is_tracked(&self, account_id: &str) -> bool {
        self.name_by_id.contains_key(account_id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
