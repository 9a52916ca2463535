#![warn(
    unused_extern_crates,
    missing_copy_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

//! Address scanning engine of the recovery tool.
//!
//! Candidate addresses are split into groups, each group is looked up on a public
//! Electrum server by a [`task::ScanTask`] holding one client of the
//! [`electrum_pool::ClientPool`], and the results are merged into a single list of
//! [`Utxo`]s by the [`Scanner`].

pub mod cli;
pub mod config;
pub mod error;
pub mod scanner;
pub mod script;
pub mod task;
pub mod tracing_util;
pub mod utxo;

pub use error::{ScanError, ScanFailure};
pub use scanner::{ScanConfig, Scanner};
pub use script::{index_hash, CandidateAddress};
pub use utxo::Utxo;
