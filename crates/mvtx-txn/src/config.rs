//! Store configuration.

use mvtx_error::{MvtxError, Result};
use mvtx_types::TxnId;
use serde::{Deserialize, Serialize};

/// Default upper bound on concurrently open transactions.
pub const DEFAULT_MAX_TRANSACTIONS: u32 = 65_535;

/// Configuration for [`MemTransactionStore`](crate::MemTransactionStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on concurrently open transactions (and on ids).
    pub max_transactions: u32,
    /// Hand out the lowest free id. When off, ids are assigned round-robin
    /// so a freed id is not reused until the counter wraps.
    pub reuse_transaction_ids: bool,
    /// Persist transaction metadata on prepare, rename and commit.
    pub persist_metadata: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            reuse_transaction_ids: true,
            persist_metadata: true,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_transactions == 0 {
            return Err(MvtxError::InvalidConfig {
                detail: "max_transactions must be at least 1".to_owned(),
            });
        }
        if self.max_transactions > TxnId::MAX_RAW {
            return Err(MvtxError::InvalidConfig {
                detail: format!(
                    "max_transactions {} exceeds {}",
                    self.max_transactions,
                    TxnId::MAX_RAW
                ),
            });
        }
        Ok(())
    }

    /// Parse a JSON configuration document; absent fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| MvtxError::InvalidConfig {
            detail: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}
