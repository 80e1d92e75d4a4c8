//! Domain model persisted in the local database.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use blockchat_shared::constants::DEFAULT_PAGE_SIZE;

/// The persisted part of the synchronized state of one user.
///
/// Everything else (block cursors, fetched events, pending sends) is
/// rebuilt from the ledger at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    /// Recipient keys in the order the user added them.
    pub recipients: Vec<String>,
    /// The recipient currently shown in the UI.
    pub active: Option<String>,
    /// Message blocks fetched per "load more" page.
    pub page_size: u64,
    /// Recipients whose outgoing messages are sealed to their public key.
    pub encrypted_recipients: BTreeSet<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            active: None,
            page_size: DEFAULT_PAGE_SIZE,
            encrypted_recipients: BTreeSet::new(),
        }
    }
}
