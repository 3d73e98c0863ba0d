//! Ensures the destination tab exists before anything is written to it.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::TabularStore;

/// A destination tab: a spreadsheet id plus a tab name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetTarget {
    pub collection_id: String,
    pub tab: String,
}

impl SheetTarget {
    /// Builds a target, rejecting blank ids or tab names.
    pub fn new(collection_id: impl Into<String>, tab: impl Into<String>) -> Result<Self> {
        let collection_id = collection_id.into().trim().to_string();
        let tab = tab.into().trim().to_string();
        if collection_id.is_empty() {
            return Err(Error::MissingSelector("spreadsheet id"));
        }
        if tab.is_empty() {
            return Err(Error::MissingSelector("manager"));
        }
        Ok(Self { collection_id, tab })
    }
}

async fn try_ensure_sheet(store: &dyn TabularStore, target: &SheetTarget) -> Result<bool> {
    let tabs = store.list_tabs(&target.collection_id).await?;
    if tabs.iter().any(|t| *t == target.tab) {
        return Ok(false);
    }
    store.create_tab(&target.collection_id, &target.tab).await?;
    Ok(true)
}

/// Creates `target.tab` when the collection does not have it yet.
///
/// Best effort: failures are logged and swallowed, a missing tab surfaces
/// later as a write failure. Returns whether a tab was created.
pub async fn ensure_sheet(store: &dyn TabularStore, target: &SheetTarget) -> bool {
    match try_ensure_sheet(store, target).await {
        Ok(created) => {
            if created {
                info!("created tab '{}'", target.tab);
            }
            created
        }
        Err(e) => {
            let err = Error::Provisioning {
                tab: target.tab.clone(),
                message: e.to_string(),
            };
            warn!("{err}; continuing");
            false
        }
    }
}
