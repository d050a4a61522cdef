//! Miner login identities and wallet address validation

use crate::error::{Result, StratumError};

/// Identity extracted from a stratum `login` string.
///
/// Login strings have the form `<address>[.<worker>][#<payment_id>]`;
/// the worker defaults to `"0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerIdentity {
    pub address: String,
    pub worker: String,
    pub payment_id: Option<String>,
}

impl MinerIdentity {
    /// Parse a login string. `payment_id_hex_len` is the exact hex length
    /// the coin expects for an integrated payment id.
    pub fn parse(login: &str, payment_id_hex_len: usize) -> Result<Self> {
        let (address_part, worker_part) = match login.split_once('.') {
            Some((address, worker)) => (address, worker),
            None => (login, ""),
        };

        let mut payment_id = None;
        let mut address = address_part;
        let mut worker = worker_part;

        if let Some((a, pid)) = address_part.split_once('#') {
            address = a;
            payment_id = Some(pid);
        } else if let Some((w, pid)) = worker_part.split_once('#') {
            worker = w;
            payment_id = Some(pid);
        }

        let payment_id = match payment_id {
            Some(pid) => {
                let valid_hex = pid.len() == payment_id_hex_len
                    && pid.chars().all(|c| c.is_ascii_hexdigit());
                if !valid_hex {
                    return Err(StratumError::InvalidPaymentId.into());
                }
                Some(pid.to_ascii_lowercase())
            }
            None => None,
        };

        if address.is_empty() {
            return Err(StratumError::InvalidAddress {
                address: login.to_string(),
            }
            .into());
        }

        Ok(Self {
            address: address.to_string(),
            worker: if worker.is_empty() {
                "0".to_string()
            } else {
                worker.to_string()
            },
            payment_id,
        })
    }
}

/// Control variables carried in the stratum `pass` field as
/// `key=value;key=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassVars {
    /// `d=<n>`: requested static difficulty
    pub static_difficulty: Option<u64>,
}

impl PassVars {
    /// Parse the `pass` field. Unknown keys are ignored.
    pub fn parse(pass: &str) -> Self {
        let mut vars = Self::default();
        for pair in pass.split(';') {
            if let Some((key, value)) = pair.split_once('=') {
                if key.trim() == "d" {
                    vars.static_difficulty = value.trim().parse::<u64>().ok();
                }
            }
        }
        vars
    }
}

/// Wallet address validator, supplied by the coin template registry.
pub trait AddressValidator: Send + Sync {
    /// Whether the address can receive this coin.
    fn validate(&self, address: &str) -> bool;
}

/// Validator checking base58 shape, known prefixes, and length bounds.
#[derive(Debug, Clone)]
pub struct PrefixAddressValidator {
    prefixes: Vec<String>,
    min_len: usize,
    max_len: usize,
}

impl PrefixAddressValidator {
    pub fn new(prefixes: Vec<String>, min_len: usize, max_len: usize) -> Self {
        Self {
            prefixes,
            min_len,
            max_len,
        }
    }

    fn is_base58(address: &str) -> bool {
        address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'))
    }
}

impl AddressValidator for PrefixAddressValidator {
    fn validate(&self, address: &str) -> bool {
        if address.len() < self.min_len || address.len() > self.max_len {
            return false;
        }
        if !Self::is_base58(address) {
            return false;
        }
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| address.starts_with(p.as_str()))
    }
}
