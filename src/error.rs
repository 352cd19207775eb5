use thiserror::Error;

/// Failures that stop a job before it processes any item. Per-item problems
/// never surface here; they only bump the summary's `failed` count.
#[derive(Debug, Error)]
pub enum JobError {
    /// A required credential or DSN is missing; no external call was made.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or mismatched scheduler secret.
    #[error("unauthorized")]
    Unauthorized,

    /// The store failed during job setup (e.g. loading mappings).
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl JobError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP status the scheduler sees for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Config(_) | Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(JobError::Unauthorized.status_code(), 401);
        assert_eq!(JobError::config("missing DATABASE_SERVICE_URL").status_code(), 500);
        let err: JobError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "store error: boom");
    }
}
