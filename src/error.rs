use thiserror::Error;

/// Failure of a single call against the coin daemon.
///
/// Callers decide severity: a failed transaction lookup is skipped, a failed
/// tip or block lookup ends the run.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl RpcError {
    /// Daemon code for an unknown transaction or an unindexed node.
    pub const NO_SUCH_TRANSACTION: i64 = -5;
    /// Daemon code for a block height past the tip.
    pub const OUT_OF_RANGE: i64 = -8;
    /// Reply carried neither a result nor an error.
    pub const MISSING_RESULT: i64 = -343;

    pub fn from_payload(code: i64, message: String) -> Self {
        match code {
            Self::NO_SUCH_TRANSACTION | Self::OUT_OF_RANGE => RpcError::NotFound(message),
            _ => RpcError::Rpc { code, message },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same natural key is already stored.
    #[error("conflicting row already stored: {0}")]
    Conflict(String),

    #[error("expected tables are missing: {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{context}: {source}")]
    Rpc {
        context: String,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no stored block at height {0} to continue from")]
    MissingParent(u64),
}

impl IndexError {
    pub fn rpc(context: impl Into<String>, source: RpcError) -> Self {
        IndexError::Rpc {
            context: context.into(),
            source,
        }
    }
}
