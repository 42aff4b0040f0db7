use rocpp_core::v16::{
    messages::{
        change_configuration::ChangeConfigurationRequest,
        get_configuration::GetConfigurationRequest,
    },
    types::ConfigurationStatus,
};

use crate::{session::Session, transport::CallError};

/// Outcome of a successful [`reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// ChangeConfiguration requests issued.
    pub changed: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("could not read configuration: {0}")]
    Fetch(#[source] CallError),
    #[error("device does not report key {0}")]
    Unsupported(String),
    #[error("changing {key} answered {status:?}")]
    Rejected {
        key: String,
        status: ConfigurationStatus,
    },
    #[error("changing {key} failed: {error}")]
    Change {
        key: String,
        #[source]
        error: CallError,
    },
}

/// Brings the device configuration to `desired`, changing only keys whose
/// value differs. A failure leaves earlier keys of the batch changed.
pub async fn reconcile(
    session: &Session,
    desired: &[(&str, &str)],
) -> Result<ReconcileReport, ReconcileError> {
    let current = session
        .call(GetConfigurationRequest { key: None })
        .await
        .map_err(ReconcileError::Fetch)?
        .configuration_key
        .unwrap_or_default();

    let mut changed = 0;
    for (key, value) in desired {
        let entry = current
            .iter()
            .find(|kv| kv.key == *key)
            .ok_or_else(|| ReconcileError::Unsupported((*key).to_owned()))?;
        if entry.value.as_deref() == Some(*value) {
            continue;
        }
        log::info!("{} ensuring {} = {}", session.identity(), key, value);
        let res = session
            .call(ChangeConfigurationRequest {
                key: (*key).to_owned(),
                value: (*value).to_owned(),
            })
            .await
            .map_err(|error| ReconcileError::Change {
                key: (*key).to_owned(),
                error,
            })?;
        changed += 1;
        if res.status != ConfigurationStatus::Accepted {
            log::error!("{} unable to set {} to {}: {:?}", session.identity(), key, value, res.status);
            return Err(ReconcileError::Rejected {
                key: (*key).to_owned(),
                status: res.status,
            });
        }
    }
    Ok(ReconcileReport { changed })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use rocpp_core::v16::{protocol_error::ProtocolError, Action};
    use serde_json::{json, Value};

    use super::*;
    use crate::transport::CallTransport;

    /// Configuration store that refuses to change `locked` keys.
    struct ConfigDevice {
        keys: Mutex<BTreeMap<String, String>>,
        locked: Vec<&'static str>,
        changes: Mutex<usize>,
    }

    impl ConfigDevice {
        fn new(keys: &[(&str, &str)], locked: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                keys: Mutex::new(
                    keys.iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
                locked,
                changes: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl CallTransport for ConfigDevice {
        async fn send_call(&self, action: Action, payload: Value) -> Result<Value, CallError> {
            match action {
                Action::GetConfiguration => {
                    let keys = self.keys.lock().unwrap();
                    let list: Vec<Value> = keys
                        .iter()
                        .map(|(k, v)| json!({"key": k, "readonly": false, "value": v}))
                        .collect();
                    Ok(json!({ "configurationKey": list }))
                }
                Action::ChangeConfiguration => {
                    *self.changes.lock().unwrap() += 1;
                    let key = payload["key"].as_str().unwrap().to_owned();
                    if self.locked.contains(&key.as_str()) {
                        return Ok(json!({"status": "Rejected"}));
                    }
                    let value = payload["value"].as_str().unwrap().to_owned();
                    self.keys.lock().unwrap().insert(key, value);
                    Ok(json!({"status": "Accepted"}))
                }
                other => panic!("unexpected {other}"),
            }
        }

        async fn close(&self, _code: u16, _reason: &str) {}
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let device = ConfigDevice::new(
            &[("HeartbeatInterval", "60"), ("ConnectionTimeOut", "7")],
            vec![],
        );
        let session = Session::new("CP");
        session.attach(device.clone());

        let desired = [("HeartbeatInterval", "0"), ("ConnectionTimeOut", "7")];
        assert_eq!(reconcile(&session, &desired).await, Ok(ReconcileReport { changed: 1 }));
        assert_eq!(reconcile(&session, &desired).await, Ok(ReconcileReport { changed: 0 }));
        assert_eq!(*device.changes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn absent_key_is_unsupported() {
        let device = ConfigDevice::new(&[("HeartbeatInterval", "60")], vec![]);
        let session = Session::new("CP");
        session.attach(device.clone());

        let res = reconcile(&session, &[("HeartbeatInterval", "0"), ("Nope", "1")]).await;
        assert_eq!(res, Err(ReconcileError::Unsupported("Nope".into())));
        // no rollback of the key changed before the failure
        assert_eq!(device.keys.lock().unwrap()["HeartbeatInterval"], "0");
    }

    #[tokio::test]
    async fn rejected_change_fails() {
        let device = ConfigDevice::new(&[("HeartbeatInterval", "60")], vec!["HeartbeatInterval"]);
        let session = Session::new("CP");
        session.attach(device);

        let res = reconcile(&session, &[("HeartbeatInterval", "30")]).await;
        assert_eq!(
            res,
            Err(ReconcileError::Rejected {
                key: "HeartbeatInterval".into(),
                status: ConfigurationStatus::Rejected,
            })
        );
    }

    #[tokio::test]
    async fn offline_fetch_fails() {
        let session = Session::new("CP");
        let err = reconcile(&session, &[("HeartbeatInterval", "0")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Fetch(_)));
        assert_eq!(err.to_string(), "could not read configuration: charge point offline");

        // scenario steps look through the context chain for link failures
        let err = anyhow::Error::new(err).context("preparing configuration");
        let cause = err
            .chain()
            .find_map(|c| c.downcast_ref::<CallError>())
            .expect("call error in chain");
        assert!(cause.is_transport());
    }

    #[test]
    fn change_errors_name_the_key() {
        let rejected = ReconcileError::Rejected {
            key: "HeartbeatInterval".into(),
            status: ConfigurationStatus::Rejected,
        };
        assert_eq!(rejected.to_string(), "changing HeartbeatInterval answered Rejected");

        let failed = ReconcileError::Change {
            key: "HeartbeatInterval".into(),
            error: CallError::Protocol(ProtocolError::NotSupported),
        };
        assert_eq!(
            failed.to_string(),
            "changing HeartbeatInterval failed: CallError NotSupported"
        );
        assert!(std::error::Error::source(&failed).is_some());
    }
}
