//! Transaction signing for the relay's own identity on each ledger.
//!
//! Legacy EIP-155 transactions, RLP-encoded and signed in-process with k256 over keccak256.

use crate::error::LedgerError;
use alloy::primitives::{Address, B256};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use std::fmt;

/// Raw secp256k1 secret. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Parse a 32-byte hex key (with or without `0x`) and check it is a valid scalar.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| e.to_string())?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        SigningKey::from_bytes((&key).into()).map_err(|e| e.to_string())?;
        Ok(Self(key))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: Address,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    pub fn new(key: &PrivateKey) -> Result<Self, LedgerError> {
        let key = SigningKey::from_bytes((&key.0).into())
            .map_err(|e| LedgerError::Decode(format!("invalid signing key: {}", e)))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `tx` and return the raw transaction bytes for eth_sendRawTransaction.
    pub fn sign_legacy(&self, tx: &LegacyTx) -> Result<Vec<u8>, LedgerError> {
        let unsigned = rlp_legacy(tx, &[tx.chain_id], &[], &[]);
        let (signature, recovery_id) = self
            .key
            .sign_digest_recoverable(Keccak256::new_with_prefix(&unsigned))
            .map_err(|e| LedgerError::Decode(format!("sign failed: {}", e)))?;

        let v: u64 = tx
            .chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35))
            .and_then(|x| x.checked_add(u64::from(recovery_id.to_byte())))
            .ok_or_else(|| LedgerError::Decode("v overflow".into()))?;

        let sig_bytes = signature.to_bytes();
        let r = trim_leading_zeros(&sig_bytes[0..32]);
        let s = trim_leading_zeros(&sig_bytes[32..64]);
        Ok(rlp_legacy(tx, &[v], r, s))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("address", &self.address).finish()
    }
}

/// Hash of a raw signed transaction, as the node reports it.
pub fn transaction_hash(raw: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(raw))
}

fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    // Uncompressed SEC1 point: 0x04 || X || Y; the address hashes X || Y.
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// [nonce, gas_price, gas_limit, to, value, data, v, r, s]. Unsigned EIP-155 payload uses
/// `v = chain_id` with empty r and s.
fn rlp_legacy(tx: &LegacyTx, v: &[u64; 1], r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut stream = RlpStream::new();
    stream.begin_list(9);
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    let to_slice: &[u8] = tx.to.as_slice();
    stream.append(&to_slice);
    stream.append(&0u64);
    let data_slice: &[u8] = &tx.data;
    stream.append(&data_slice);
    stream.append(&v[0]);
    stream.append(&r);
    stream.append(&s);
    stream.out().to_vec()
}

/// Trim leading zero bytes for RLP integer encoding. All-zero input yields an empty slice.
fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let first = b.iter().position(|&x| x != 0).unwrap_or(b.len());
    &b[first..]
}
