//! Specification catalog: device and packet tables
//!
//! The catalog is a JSON conversion of the device specification XML shipped
//! with the RESOL Service Center. The conversion is mechanical, which shows
//! in the data: numbers arrive as strings, field names are alias lists, and
//! entry order is meaningful because matching is first-match-wins.

use std::path::Path;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Top-level key the catalog document must carry
pub const SPECIFICATION_KEY: &str = "vbusSpecification";

/// Catalog loading errors
///
/// Loading is the only fatal failure in the decoding subsystem: without a
/// catalog there is nothing to match packets against.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("failed to read specification file: {0}")]
    Io(#[from] std::io::Error),

    #[error("specification is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing top-level {SPECIFICATION_KEY} key")]
    MissingSpecification,
}

/// One known device family or instance
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    /// Address pattern, 6 hex digits (an optional leading `0x` is ignored)
    pub address: String,
    /// Controls how many leading digits of `address` identify the device
    pub mask: String,
    /// Display name; may contain a single `#` placeholder for the
    /// instance-specific address suffix
    pub name: String,
}

/// One field within a packet's payload
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    /// Aliases for this field; the first one is used in results
    #[serde(deserialize_with = "string_or_list")]
    pub name: Vec<String>,
    /// Byte offset into the assembled payload
    #[serde(deserialize_with = "usize_from_any")]
    pub offset: usize,
    /// Width in bits; only used to derive the byte length
    #[serde(rename = "bitSize", deserialize_with = "u32_from_any")]
    pub bit_size: u32,
    /// Scaling factor; absent means the raw integer is reported
    #[serde(default, deserialize_with = "opt_f64_from_any")]
    pub factor: Option<f64>,
    /// Unit suffix appended to the formatted value
    #[serde(default)]
    pub unit: String,
}

impl FieldSpec {
    /// The name used in result mappings (first alias)
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.first().map_or("", String::as_str)
    }

    /// Byte length of the field in the payload
    #[must_use]
    pub fn byte_length(&self) -> usize {
        ((self.bit_size + 1) / 8) as usize
    }
}

/// One packet layout, keyed by its source/destination/command triplet
#[derive(Debug, Clone, Deserialize)]
pub struct PacketSpec {
    pub source: String,
    pub destination: String,
    pub command: String,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldSpec>,
}

/// The loaded catalog, immutable after loading
///
/// Device and packet order is preserved from the document; both tables are
/// searched front to back and the first match wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpecCatalog {
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSpec>,
    #[serde(default, rename = "packet")]
    pub packets: Vec<PacketSpec>,
}

impl SpecCatalog {
    /// Load a catalog from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, SpecError> {
        let document: serde_json::Value = serde_json::from_str(json)?;
        let spec = document
            .get(SPECIFICATION_KEY)
            .ok_or(SpecError::MissingSpecification)?;
        Ok(serde_json::from_value(spec.clone())?)
    }

    /// Load a catalog from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json_str(&contents)?;
        tracing::info!(
            devices = catalog.devices.len(),
            packets = catalog.packets.len(),
            path = %path.as_ref().display(),
            "loaded specification catalog"
        );
        Ok(catalog)
    }
}

// The XML-to-JSON conversion does not distinguish numbers from strings, so
// numeric fields must accept both.

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn f64_from_any<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid number {s:?}"))),
    }
}

fn opt_f64_from_any<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    f64_from_any(deserializer).map(Some)
}

fn usize_from_any<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64_from_any(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative integer, got {value}"
        )));
    }
    Ok(value as usize)
}

fn u32_from_any<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = usize_from_any(deserializer)?;
    u32::try_from(value).map_err(|_| serde::de::Error::custom("value out of range"))
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => vec![s],
        StringOrList::List(list) => list,
    })
}
