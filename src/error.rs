use std::error::Error as StdError;

use crate::transport::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("couldn't get OAuth credentials: {0}")]
    CredentialUnavailable(String),
    #[error("failed to renew session")]
    RenewalFailed(#[source] Box<Error>),
    #[error("fetch {index} of batch failed")]
    BatchFetchFailed {
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("proxy request failed: {0}")]
    ProxyRequestFailed(String),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("fetch aborted: {0}")]
    FetchPanicked(String),
    #[error("decode response")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The innermost error of a renewal or batch failure, as delivered by the
    /// operation that actually failed.
    pub fn root(&self) -> &Error {
        match self {
            Error::RenewalFailed(inner) => inner.root(),
            Error::BatchFetchFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Funnel for errors nobody upstream knows what to do with: log them and move on.
pub fn report(err: &(dyn StdError + 'static)) {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    if chain.is_empty() {
        tracing::error!(error = %err, "unhandled error");
    } else {
        tracing::error!(error = %err, causes = ?chain, "unhandled error");
    }
}
