//! Account/toon enumeration and per-toon upload enablement.

use crate::scan::{enumerate_accounts, toon_replay_dir, ScanError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Upload enablement for every discovered toon.
///
/// Cloning shares the underlying map, so the daemon and the status server
/// see the same toggles.
#[derive(Debug, Clone, Default)]
pub struct ToonEnablement {
    inner: Arc<Mutex<BTreeMap<String, bool>>>,
}

impl ToonEnablement {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, bool>> {
        // A poisoned map is still a valid map of booleans
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the map with `toons`, enabling those permitted by `allow_list`.
    ///
    /// No allow-list enables every toon.
    pub fn reset(&self, toons: &[String], allow_list: Option<&[String]>) {
        let mut map = self.lock();
        map.clear();
        for toon in toons {
            let enabled = allow_list.map_or(true, |allowed| allowed.contains(toon));
            map.insert(toon.clone(), enabled);
        }
    }

    /// Unknown toons count as disabled.
    pub fn is_enabled(&self, toon: &str) -> bool {
        self.lock().get(toon).copied().unwrap_or(false)
    }

    /// Flip a toon's flag, returning the new value (None for unknown toons).
    pub fn toggle(&self, toon: &str) -> Option<bool> {
        let mut map = self.lock();
        let flag = map.get_mut(toon)?;
        *flag = !*flag;
        Some(*flag)
    }

    pub fn set(&self, toon: &str, enabled: bool) -> Option<bool> {
        let mut map = self.lock();
        let flag = map.get_mut(toon)?;
        let previous = *flag;
        *flag = enabled;
        Some(previous)
    }

    pub fn enabled_toons(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(toon, _)| toon.clone())
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.lock().clone()
    }

    /// The allow-list to persist: `None` when every toon is enabled.
    pub fn allow_list(&self) -> Option<Vec<String>> {
        let map = self.lock();
        if map.values().all(|enabled| *enabled) {
            return None;
        }
        Some(
            map.iter()
                .filter(|(_, enabled)| **enabled)
                .map(|(toon, _)| toon.clone())
                .collect(),
        )
    }
}

/// Multiplayer replay directories of the enabled toons under `root`.
///
/// Returns an empty list when no root is configured. Directories that do
/// not exist are left out so the result can be handed straight to the
/// watcher.
pub fn watch_paths(
    root: Option<&Path>,
    enablement: &ToonEnablement,
) -> Vec<PathBuf> {
    let Some(root) = root else {
        return Vec::new();
    };

    enablement
        .enabled_toons()
        .iter()
        .map(|toon| toon_replay_dir(root, toon))
        .filter(|dir| dir.is_dir())
        .collect()
}

/// Discover the toons under `root`, refresh `enablement`, and return the watch set.
pub fn discover_watch_paths(
    root: Option<&Path>,
    suffix: &str,
    allow_list: Option<&[String]>,
    enablement: &ToonEnablement,
) -> Result<Vec<PathBuf>, ScanError> {
    let Some(root) = root else {
        enablement.reset(&[], allow_list);
        return Ok(Vec::new());
    };

    let toons = enumerate_accounts(root, suffix)?;
    enablement.reset(&toons, allow_list);
    Ok(watch_paths(Some(root), enablement))
}

/// One account and the toons found under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountGroup {
    pub account: String,
    pub toons: Vec<String>,
}

/// Group `<account>/<toon>` ids by account, keeping discovery order.
pub fn group_toons(ids: &[String]) -> Vec<AccountGroup> {
    let mut groups: Vec<AccountGroup> = Vec::new();

    for id in ids {
        let Some((account, toon)) = id.split_once('/') else {
            continue;
        };

        match groups.iter_mut().find(|g| g.account == account) {
            Some(group) => group.toons.push(toon.to_string()),
            None => groups.push(AccountGroup {
                account: account.to_string(),
                toons: vec![toon.to_string()],
            }),
        }
    }

    groups
}

/// Battle.net region of a toon id such as `2-S2-1-987654`.
pub fn region_name(toon: &str) -> &'static str {
    match toon.split('-').next() {
        Some("1") => "Americas",
        Some("2") => "Europe",
        Some("3") => "Asia",
        Some("5") => "China",
        Some("98") => "Public Test",
        _ => "Unknown",
    }
}

/// Character id at the end of a toon id, used to match server-side players.
pub fn character_id(toon: &str) -> Option<u64> {
    toon.rsplit('-').next()?.parse().ok()
}
