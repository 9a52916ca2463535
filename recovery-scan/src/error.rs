use crate::Utxo;
use std::time::Duration;

/// Errors that end a scan.
///
/// Transient server and network failures ([`electrum_pool::Error`]) never show up here
/// directly, a scan task retries them until it runs out of time.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(
        "scan task timed out after {timeout:?} and {attempts} attempts{}",
        .last_error.as_ref().map_or(", no attempt completed", |_| "")
    )]
    TimedOut {
        timeout: Duration,
        attempts: u32,
        /// The last failure observed before the deadline, if any attempt completed
        #[source]
        last_error: Option<electrum_pool::Error>,
    },
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("scan job did not complete")]
    Join(#[from] tokio::task::JoinError),
}

impl ScanError {
    /// Whether the error was caused by the data handed to the scan rather than by the
    /// servers or the network.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidAddress { .. } | ScanError::InvalidConfig(_)
        )
    }

    pub fn last_error(&self) -> Option<&electrum_pool::Error> {
        match self {
            ScanError::TimedOut { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }
}

/// A scan that was aborted, together with everything found before it stopped.
#[derive(Debug, thiserror::Error)]
#[error("address scan aborted with {} UTXOs found", .partial.len())]
pub struct ScanFailure {
    #[source]
    pub error: ScanError,
    /// Outputs found by the address groups that completed
    pub partial: Vec<Utxo>,
}
