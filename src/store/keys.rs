/// Key layout for the task store partitions
///
/// - `tasks`: {task_id:u64 BE} -> Task (JSON)
/// - `by_account`: {account_id:u64 BE}{task_id:u64 BE} -> empty
/// - `metadata`: "next_id" -> u64 BE
///
/// Big-endian ids keep range scans in id order.
use super::error::{Result, StoreError};

pub const META_NEXT_ID: &[u8] = b"next_id";

pub fn encode_task_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub fn decode_task_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StoreError::InvalidKey(format!("task key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

pub fn encode_account_prefix(account_id: u64) -> [u8; 8] {
    account_id.to_be_bytes()
}

pub fn encode_account_key(account_id: u64, task_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&account_id.to_be_bytes());
    key[8..].copy_from_slice(&task_id.to_be_bytes());
    key
}

/// Extracts the task id from a `by_account` key
pub fn decode_account_key(key: &[u8]) -> Result<u64> {
    if key.len() != 16 {
        return Err(StoreError::InvalidKey(format!(
            "account index key of {} bytes",
            key.len()
        )));
    }
    decode_task_key(&key[8..])
}
