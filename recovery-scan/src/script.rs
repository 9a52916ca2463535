use crate::ScanError;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Network, Script, ScriptBuf};
use std::fmt;
use std::str::FromStr;

/// An address produced by the key derivation, together with the path it was derived at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct CandidateAddress {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    derivation_path: Option<String>,
}

impl CandidateAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            derivation_path: None,
        }
    }

    pub fn with_derivation_path(mut self, path: impl Into<String>) -> Self {
        self.derivation_path = Some(path.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    pub fn derivation_path(&self) -> Option<&str> {
        self.derivation_path.as_deref()
    }

    /// The script paying to this address.
    ///
    /// Fails if the address cannot be decoded or belongs to another network. These
    /// failures are caused by the input data and retrying does not help.
    pub fn output_script(&self, network: Network) -> Result<ScriptBuf, ScanError> {
        let invalid = |reason: String| ScanError::InvalidAddress {
            address: self.address.clone(),
            reason,
        };

        let address = Address::from_str(&self.address)
            .map_err(|e| invalid(e.to_string()))?
            .require_network(network)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(address.script_pubkey())
    }
}

impl fmt::Display for CandidateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A candidate address whose output script is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanTarget {
    pub address: CandidateAddress,
    pub script: ScriptBuf,
}

/// Resolve the output scripts of a group of addresses, preserving order.
///
/// Stops at the first address that has no valid output script.
pub fn output_scripts(
    addresses: &[CandidateAddress],
    network: Network,
) -> Result<Vec<ScanTarget>, ScanError> {
    addresses
        .iter()
        .map(|address| {
            Ok(ScanTarget {
                script: address.output_script(network)?,
                address: address.clone(),
            })
        })
        .collect()
}

/// Electrum index hash ("scripthash") of an output script.
///
/// This is the SHA256 digest of the script, hex encoded in reversed byte order.
pub fn index_hash(script: &Script) -> String {
    let mut digest = sha256::Hash::hash(script.as_bytes()).to_byte_array();
    digest.reverse();
    hex::encode(digest)
}

/// Index hashes of the given scripts, in the same order.
pub fn index_hashes<'a>(scripts: impl IntoIterator<Item = &'a Script>) -> Vec<String> {
    scripts.into_iter().map(index_hash).collect()
}
