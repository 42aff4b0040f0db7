use thiserror::Error;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Error)]
pub enum GenericError {
    #[error("call timed out")]
    TimeOut,
    #[error("charge point offline")]
    Offline,
    #[error("call failed")]
    General,
    #[error("malformed response payload")]
    ParsingError,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Error)]
pub enum OcppError<T> {
    #[error("CallError {0}")]
    Protocol(T),
    #[error(transparent)]
    Other(#[from] GenericError),
}

impl<T> OcppError<T> {
    /// True when the exchange failed below the protocol level (no reply or a broken link).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OcppError::Other(GenericError::TimeOut | GenericError::Offline)
        )
    }
}
