#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ProtocolError {
    #[error("InternalError")]
    InternalError,
    #[error("ProtocolError")]
    ProtocolError,
    #[error("SecurityError")]
    SecurityError,
    #[error("FormationViolation")]
    FormationViolation,
    #[error("PropertyConstraintViolation")]
    PropertyConstraintViolation,
    #[error("OccurrenceConstraintViolation")]
    OccurrenceConstraintViolation,
    #[error("TypeConstraintViolation")]
    TypeConstraintViolation,
    #[error("GenericError")]
    GenericError,
    #[error("NotImplemented")]
    NotImplemented,
    #[error("NotSupported")]
    NotSupported,
}
