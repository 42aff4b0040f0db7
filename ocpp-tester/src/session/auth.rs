use chrono::{DateTime, Utc};
use rocpp_core::v16::types::{AuthorizationData, AuthorizationStatus, IdTagInfo};

/// Tag that matches every presented id tag in the override list.
pub const WILDCARD_TAG: &str = "*";

const DEFAULT_KEY_TABLE: &[(&str, AuthorizationStatus, Option<&str>)] = &[
    ("7d1b5f0a-accepted", AuthorizationStatus::Accepted, None),
    ("4c9e2a61-child", AuthorizationStatus::Accepted, Some("7d1b5f0a-accepted")),
    ("a02f6d3e-blocked", AuthorizationStatus::Blocked, None),
    ("e81c47b9-expired", AuthorizationStatus::Expired, None),
    ("5b3d90c2-invalid", AuthorizationStatus::Invalid, None),
];

/// The static key list consulted after the session override keys. Also the
/// payload of full local-list updates.
pub fn default_keys() -> Vec<AuthorizationData> {
    DEFAULT_KEY_TABLE
        .iter()
        .map(|(tag, status, parent)| AuthorizationData {
            id_tag: tag.to_string(),
            id_tag_info: Some(IdTagInfo {
                expiry_date: None,
                parent_id_tag: parent.map(str::to_string),
                status: *status,
            }),
        })
        .collect()
}

pub fn invalid() -> IdTagInfo {
    IdTagInfo {
        expiry_date: None,
        parent_id_tag: None,
        status: AuthorizationStatus::Invalid,
    }
}

pub fn accepted_until(expiry: DateTime<Utc>) -> IdTagInfo {
    IdTagInfo {
        expiry_date: Some(expiry),
        parent_id_tag: None,
        status: AuthorizationStatus::Accepted,
    }
}

pub fn with_status(status: AuthorizationStatus) -> IdTagInfo {
    IdTagInfo {
        expiry_date: None,
        parent_id_tag: None,
        status,
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizationState {
    pub last_tag: Option<String>,
    pub last_result: Option<IdTagInfo>,
    /// Consulted first, in order; the first match wins.
    pub override_keys: Vec<(String, IdTagInfo)>,
}

impl AuthorizationState {
    pub fn resolve(&self, id_tag: &str) -> IdTagInfo {
        if let Some((_, info)) = self
            .override_keys
            .iter()
            .find(|(tag, _)| tag == id_tag || tag == WILDCARD_TAG)
        {
            return info.clone();
        }
        DEFAULT_KEY_TABLE
            .iter()
            .find(|(tag, _, _)| *tag == id_tag)
            .map(|(_, status, parent)| IdTagInfo {
                expiry_date: None,
                parent_id_tag: parent.map(str::to_string),
                status: *status,
            })
            .unwrap_or_else(invalid)
    }
}
