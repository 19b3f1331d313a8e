//! Opaque global identifiers.
//!
//! A global ID is `base64(type_name ":" local_id)` with the standard
//! alphabet. Decoding splits on the first `:`, so local ids may contain `:`
//! but type names may not.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Encode a `(type, local id)` pair.
pub fn encode(type_name: &str, local_id: &str) -> String {
    STANDARD.encode(format!("{type_name}:{local_id}"))
}

/// Decode an opaque identifier into `(type, local id)`.
pub fn decode(gid: &str) -> Result<(String, String), Error> {
    let bytes = STANDARD
        .decode(gid)
        .map_err(|e| Error::Custom(format!("invalid global id {gid:?}: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::Custom(format!("invalid global id {gid:?}: not utf-8")))?;
    match text.split_once(':') {
        Some((type_name, local)) if !type_name.is_empty() => {
            Ok((type_name.to_string(), local.to_string()))
        }
        _ => Err(Error::Custom(format!(
            "invalid global id {gid:?}: expected \"type:id\""
        ))),
    }
}

/// A decoded global identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalId {
    pub type_name: String,
    pub local_id: String,
}

impl GlobalId {
    pub fn new(type_name: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.type_name, &self.local_id))
    }
}

impl FromStr for GlobalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, local_id) = decode(s)?;
        Ok(Self {
            type_name,
            local_id,
        })
    }
}

impl Serialize for GlobalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GlobalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
