//! On-disk partition cache.
//!
//! One file per partition, named `<partition>.dat`, little-endian:
//!
//! ```text
//! u32  numTables
//! repeat numTables times:
//!     byte[32] tableAddress
//!     u32      serializedLength
//!     byte[serializedLength] tableData
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::table::{AddressLookupTable, PUBKEY_LEN};

// address + declared length, ahead of each table payload
const RECORD_HEADER_LEN: usize = PUBKEY_LEN + 4;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt partition cache: {0}")]
    Corrupt(String),
}

pub fn partition_cache_file(dir: &Path, partition: usize) -> PathBuf {
    dir.join(format!("{partition}.dat"))
}

/// Serializes a partition's tables to `<dir>/<partition>.dat`, truncating
/// any existing file.
pub fn write_partition(
    dir: &Path,
    partition: usize,
    tables: &[Arc<AddressLookupTable>],
) -> io::Result<()> {
    let payload_len: usize = tables.iter().map(|t| t.serialized_len()).sum();
    let mut out = Vec::with_capacity(4 + tables.len() * RECORD_HEADER_LEN + payload_len);
    out.extend_from_slice(&(tables.len() as u32).to_le_bytes());
    for table in tables {
        out.extend_from_slice(&table.address().to_bytes());
        out.extend_from_slice(&(table.serialized_len() as u32).to_le_bytes());
        table.write_to(&mut out);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(partition_cache_file(dir, partition))?;
    file.write_all(&out)
}

/// Reads a partition's tables back from disk.
///
/// A missing file is not an error (`Ok(None)`). Declared lengths must
/// reconcile exactly with the file size; any mismatch is reported as
/// [`CacheError::Corrupt`] and the caller treats the partition as absent.
pub fn read_partition(
    dir: &Path,
    partition: usize,
) -> Result<Option<Vec<Arc<AddressLookupTable>>>, CacheError> {
    let path = partition_cache_file(dir, partition);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if data.len() < 4 {
        return Err(CacheError::Corrupt(format!(
            "partition {partition}: {} bytes is too short for a header",
            data.len()
        )));
    }
    let num_tables = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    // the count is untrusted: every table costs at least a record header, so
    // a count the file cannot hold is corruption, not an allocation request
    if num_tables > (data.len() - 4) / RECORD_HEADER_LEN {
        return Err(CacheError::Corrupt(format!(
            "partition {partition}: header declares {num_tables} tables, file holds {} bytes",
            data.len()
        )));
    }

    let mut tables = Vec::with_capacity(num_tables);
    let mut offset = 4;
    let mut payload_total = 0usize;
    for i in 0..num_tables {
        if data.len() - offset < RECORD_HEADER_LEN {
            return Err(CacheError::Corrupt(format!(
                "partition {partition}: truncated record header at table {i}"
            )));
        }
        let mut address_bytes = [0u8; PUBKEY_LEN];
        address_bytes.copy_from_slice(&data[offset..offset + PUBKEY_LEN]);
        let address = Pubkey::new_from_array(address_bytes);
        offset += PUBKEY_LEN;

        let length = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;

        if data.len() - offset < length {
            return Err(CacheError::Corrupt(format!(
                "partition {partition}: table {address} declares {length} bytes past end of file"
            )));
        }
        let table = AddressLookupTable::read(address, &data[offset..offset + length])?;
        offset += length;
        payload_total += length;
        tables.push(Arc::new(table));
    }

    // the declared lengths must account for every byte of the file
    if payload_total != data.len() - 4 - RECORD_HEADER_LEN * num_tables {
        return Err(CacheError::Corrupt(format!(
            "partition {partition}: {} payload bytes declared, file holds {}",
            payload_total,
            data.len() - 4 - RECORD_HEADER_LEN * num_tables
        )));
    }
    Ok(Some(tables))
}
