use crate::script::{CandidateAddress, ScanTarget};
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use electrum_pool::UnspentRef;
use std::fmt;

/// An unspent output paying to one of the scanned addresses.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    pub script: ScriptBuf,
    pub address: CandidateAddress,
}

impl Utxo {
    pub fn new(target: &ScanTarget, unspent: UnspentRef) -> Self {
        Self {
            txid: unspent.tx_hash,
            vout: unspent.tx_pos,
            amount: Amount::from_sat(unspent.value),
            script: target.script.clone(),
            address: target.address.clone(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

impl fmt::Display for Utxo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.outpoint(), self.amount, self.address)
    }
}

/// Order outputs by address, then by outpoint.
///
/// Scan results arrive in no particular order, use this wherever the output needs to be
/// reproducible.
pub fn sort_utxos(utxos: &mut [Utxo]) {
    utxos.sort_by(|a, b| {
        a.address
            .cmp(&b.address)
            .then_with(|| a.outpoint().cmp(&b.outpoint()))
    });
}

/// Sum of all amounts, `None` if it overflows.
pub fn total_amount(utxos: &[Utxo]) -> Option<Amount> {
    utxos
        .iter()
        .try_fold(Amount::ZERO, |total, utxo| total.checked_add(utxo.amount))
}
