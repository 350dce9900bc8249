//! Column conversions shared by the row mappers.

use hush_shared::KeyId;
use rusqlite::types::Type;

/// Read a hex-encoded key id from column `idx`.
pub(crate) fn key_id(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<KeyId> {
    let hex_str: String = row.get(idx)?;
    KeyId::from_hex(&hex_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_key_id(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<KeyId>> {
    let hex_str: Option<String> = row.get(idx)?;
    hex_str
        .map(|s| KeyId::from_hex(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
