use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),
}

impl NetworkError {
    /// True when the failure means the origin could not be reached at all.
    pub fn is_offline(&self) -> bool {
        match self {
            NetworkError::Offline(_) => true,
            NetworkError::Http(e) => e.is_connect() || e.is_timeout(),
        }
    }
}
