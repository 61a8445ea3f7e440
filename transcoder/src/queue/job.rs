//! Job metadata: the single row in [`xfermeta`][crate::schema::xfermeta]
//! shared by every worker attached to a queue database.

use indexmap::IndexMap;
use thiserror::Error;

use crate::models::JobMetaRow;
use crate::resin::{ResinError, ResinMode};

/// Errors parsing or validating job metadata.
#[derive(Debug, Error)]
pub enum JobMetaError {
    /// An `encoding_options` pair was missing its `=`.
    #[error("malformed encoding option {0:?}: expected key=value")]
    MalformedOption(String),
    /// An `encoding_options` value didn't parse as an integer.
    #[error("encoding option {key:?} value {value:?} is not an integer")]
    NonIntegerOption {
        /// The option name.
        key: String,
        /// The unparsed value.
        value: String,
    },
    /// The stored `resin_handling` value was invalid.
    #[error(transparent)]
    Resin(#[from] ResinError),
}

/// Parameters for [`crate::queue::WorkQueue::create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Source blob namespace URI.
    pub source: String,
    /// Destination blob namespace URI.
    pub dest: String,
    /// Destination-side bitstream compression name, or `None` for "same".
    pub recompress: Option<String>,
    /// Target encoding format name, or `None` for "same".
    pub reencode: Option<String>,
    /// Encoding level; format-specific meaning (see [`crate::codec`]).
    pub encoding_level: Option<i32>,
    /// Extra per-format encoder options (`effort`, `decodingspeed`, ...).
    pub encoding_options: IndexMap<String, i64>,
    /// How non-tissue tiles should be handled.
    pub resin_handling: ResinMode,
    /// Whether to delete a source tile once it has been written successfully.
    pub delete_original: bool,
}

/// The fully-parsed job description, read back out of the database.
#[derive(Debug, Clone)]
pub struct JobMeta {
    /// Source blob namespace URI.
    pub source: String,
    /// Destination blob namespace URI.
    pub dest: String,
    /// Destination-side bitstream compression name, or `None` for "same".
    pub recompress: Option<String>,
    /// Target encoding format name, or `None` for "same".
    pub reencode: Option<String>,
    /// Encoding level; format-specific meaning (see [`crate::codec`]).
    pub encoding_level: Option<i32>,
    /// Extra per-format encoder options (`effort`, `decodingspeed`, ...).
    pub encoding_options: IndexMap<String, i64>,
    /// How non-tissue tiles should be handled.
    pub resin_handling: ResinMode,
    /// Whether to delete a source tile once it has been written successfully.
    pub delete_original: bool,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
}

impl JobMeta {
    /// Parses a row fetched from [`xfermeta`][crate::schema::xfermeta].
    pub fn from_row(row: JobMetaRow) -> Result<Self, JobMetaError> {
        Ok(Self {
            source: row.source,
            dest: row.dest,
            recompress: row.recompress,
            reencode: row.reencode,
            encoding_level: row.encoding_level,
            encoding_options: parse_encoding_options(row.encoding_options.as_deref())?,
            resin_handling: ResinMode::from_db(row.resin_handling)?,
            delete_original: row.delete_original,
            created_at: row.created_at,
        })
    }
}


/// Serializes `options` as `"k1=v1;k2=v2"`, preserving insertion order.
pub fn serialize_encoding_options(options: &IndexMap<String, i64>) -> String {
    options
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses the `;`-joined `key=value` form stored in `encoding_options`.
/// An empty or absent string yields an empty map.
pub fn parse_encoding_options(raw: Option<&str>) -> Result<IndexMap<String, i64>, JobMetaError> {
    let mut out = IndexMap::new();
    let Some(raw) = raw else {
        return Ok(out);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(out);
    }

    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| JobMetaError::MalformedOption(pair.to_string()))?;
        let parsed: i64 = value
            .parse()
            .map_err(|_| JobMetaError::NonIntegerOption {
                key: key.to_string(),
                value: value.to_string(),
            })?;
        out.insert(key.to_string(), parsed);
    }

    Ok(out)
}
