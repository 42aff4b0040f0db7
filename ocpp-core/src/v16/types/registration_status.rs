#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}
