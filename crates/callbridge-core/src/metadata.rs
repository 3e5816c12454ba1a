//! Call metadata.
//!
//! Metadata maps a case-insensitive header name to an ordered sequence of
//! byte-string values. Headers may repeat; the order of values within a name
//! is preserved, and names keep the order in which they were first seen.

use bytes::Bytes;
use indexmap::IndexMap;

use crate::error::{CoreError, CoreResult};

/// One metadata entry as delivered by the native engine.
pub type RawMetadataEntry = (Bytes, Bytes);

/// Suffix marking headers whose values are arbitrary binary data.
const BINARY_SUFFIX: &str = "-bin";

/// Decoded call metadata.
///
/// # Example
///
/// ```
/// use callbridge_core::Metadata;
///
/// let mut md = Metadata::new();
/// md.append("X-Trace", "a").unwrap();
/// md.append("x-trace", "b").unwrap();
///
/// assert_eq!(md.get_all("X-TRACE").len(), 2);
/// assert_eq!(md.get("x-trace").unwrap().as_ref(), b"a");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: IndexMap<String, Vec<Bytes>>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes raw engine entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Metadata`] if any key is empty, is a pseudo
    /// header, or contains characters outside `[0-9a-z_.-]` after lowercasing.
    pub fn decode<I>(raw: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = RawMetadataEntry>,
    {
        let mut metadata = Self::new();
        for (key, value) in raw {
            let name = normalize_key(&key)?;
            metadata.entries.entry(name).or_default().push(value);
        }
        Ok(metadata)
    }

    /// Appends a value under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Metadata`] if the name is not a legal header name.
    pub fn append(&mut self, name: &str, value: impl Into<Bytes>) -> CoreResult<()> {
        let name = normalize_key(name.as_bytes())?;
        self.entries.entry(name).or_default().push(value.into());
        Ok(())
    }

    /// Returns the first value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.get_all(name).first()
    }

    /// Returns every value for `name`, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[Bytes] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if at least one value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns the number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there is no metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over names and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Bytes])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Flattens the metadata back into raw entries, one per value.
    #[must_use]
    pub fn to_raw(&self) -> Vec<RawMetadataEntry> {
        self.entries
            .iter()
            .flat_map(|(name, values)| {
                let key = Bytes::copy_from_slice(name.as_bytes());
                values.iter().map(move |v| (key.clone(), v.clone()))
            })
            .collect()
    }

    /// Returns `true` if `name` carries binary values.
    #[must_use]
    pub fn is_binary_key(name: &str) -> bool {
        name.to_ascii_lowercase().ends_with(BINARY_SUFFIX)
    }
}

fn normalize_key(raw: &[u8]) -> CoreResult<String> {
    if raw.is_empty() {
        return Err(CoreError::metadata("empty header name"));
    }
    if raw[0] == b':' {
        return Err(CoreError::metadata(format!(
            "pseudo header '{}' is not call metadata",
            String::from_utf8_lossy(raw)
        )));
    }

    let mut name = String::with_capacity(raw.len());
    for &byte in raw {
        let byte = byte.to_ascii_lowercase();
        match byte {
            b'0'..=b'9' | b'a'..=b'z' | b'_' | b'.' | b'-' => name.push(char::from(byte)),
            _ => {
                return Err(CoreError::metadata(format!(
                    "illegal character 0x{byte:02x} in header name '{}'",
                    String::from_utf8_lossy(raw)
                )))
            }
        }
    }
    Ok(name)
}
