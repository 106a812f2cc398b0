use std::collections::HashSet;

use solana_sdk::pubkey::Pubkey;

use crate::cache::CacheError;

pub const PUBKEY_LEN: usize = 32;

/// An address lookup table: an on-chain account addressed by `address`,
/// holding an ordered list of account addresses.
///
/// Membership queries go through a distinct-address set built at
/// construction; the serialized form is the raw 32-byte address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLookupTable {
    address: Pubkey,
    addresses: Vec<Pubkey>,
    unique: HashSet<Pubkey>,
}

impl AddressLookupTable {
    pub fn new(address: Pubkey, addresses: Vec<Pubkey>) -> Self {
        let unique = addresses.iter().copied().collect();
        Self {
            address,
            addresses,
            unique,
        }
    }

    /// The table account's own address.
    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn contains(&self, key: &Pubkey) -> bool {
        self.unique.contains(key)
    }

    pub fn num_unique_accounts(&self) -> usize {
        self.unique.len()
    }

    pub fn addresses(&self) -> &[Pubkey] {
        &self.addresses
    }

    pub fn serialized_len(&self) -> usize {
        self.addresses.len() * PUBKEY_LEN
    }

    /// Appends the serialized address list to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for address in &self.addresses {
            out.extend_from_slice(&address.to_bytes());
        }
    }

    /// Parses a table from its serialized address list.
    pub fn read(address: Pubkey, data: &[u8]) -> Result<Self, CacheError> {
        let chunks = data.chunks_exact(PUBKEY_LEN);
        if !chunks.remainder().is_empty() {
            return Err(CacheError::Corrupt(format!(
                "table {address} data length {} is not a multiple of {PUBKEY_LEN}",
                data.len()
            )));
        }
        let addresses = chunks
            .map(|chunk| {
                let mut bytes = [0u8; PUBKEY_LEN];
                bytes.copy_from_slice(chunk);
                Pubkey::new_from_array(bytes)
            })
            .collect();
        Ok(Self::new(address, addresses))
    }
}
