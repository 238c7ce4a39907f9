use thiserror::Error;

/// Error taxonomy shared by the pool, store and engine layers.
///
/// Operations never panic past their own boundary; they return one of these
/// kinds and the API layer decides whether the caller or the server is at
/// fault.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Caller input was missing or invalid.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// A value exceeded a fixed field width.
    #[error("parameter too long: {0}")]
    ParamTooLong(String),

    /// The backing store call failed or returned inconsistent data.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// A required singleton lookup had no match.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant violation inside the service.
    #[error("internal error: {0}")]
    Internal(String),

    /// Anonymous access where an identity is required.
    #[error("access denied: {0}")]
    AccessDenied(String),
}

impl RegistryError {
    /// Machine-readable detail code attached to faults.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::BadParameter(_) => "BadParameter",
            RegistryError::ParamTooLong(_) => "ParamTooLong",
            RegistryError::StoreFailure(_) => "StoreFailure",
            RegistryError::NotFound(_) => "NotFound",
            RegistryError::Internal(_) => "Internal",
            RegistryError::AccessDenied(_) => "AccessDenied",
        }
    }

    /// True when the caller, not the server, is at fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            RegistryError::BadParameter(_)
                | RegistryError::ParamTooLong(_)
                | RegistryError::AccessDenied(_)
        )
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::StoreFailure(err.to_string())
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
