#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteStartStopStatus {
    Accepted,
    Rejected,
}
