use std::collections::BTreeMap;

use rocpp_core::v16::types::{AuthorizationData, IdTagInfo, UpdateStatus};

/// Mirror of the charge point's local authorization list, used to predict
/// the device's answers to `SendLocalList` and `GetLocalListVersion`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalList {
    version: i32,
    entries: BTreeMap<String, IdTagInfo>,
}

impl LocalList {
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn get(&self, id_tag: &str) -> Option<&IdTagInfo> {
        self.entries.get(id_tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the whole list. An empty or absent list clears it and the
    /// version drops to 0 whatever `version` was sent.
    pub fn apply_full(&mut self, version: i32, list: Option<&[AuthorizationData]>) -> UpdateStatus {
        self.entries.clear();
        match list {
            Some(list) if !list.is_empty() => {
                for entry in list {
                    if let Some(info) = &entry.id_tag_info {
                        self.entries.insert(entry.id_tag.clone(), info.clone());
                    }
                }
                self.version = version;
            }
            _ => self.version = 0,
        }
        UpdateStatus::Accepted
    }

    /// Applies a differential update. Only `current + 1` is accepted; entries
    /// without `id_tag_info` delete their tag.
    pub fn apply_differential(&mut self, version: i32, list: &[AuthorizationData]) -> UpdateStatus {
        if version <= 0 {
            return UpdateStatus::Failed;
        }
        if version != self.version + 1 {
            return UpdateStatus::VersionMismatch;
        }
        for entry in list {
            match &entry.id_tag_info {
                Some(info) => {
                    self.entries.insert(entry.id_tag.clone(), info.clone());
                }
                None => {
                    self.entries.remove(&entry.id_tag);
                }
            }
        }
        self.version = version;
        UpdateStatus::Accepted
    }
}
