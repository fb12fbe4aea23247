//! Purpose: Describe a pack as a layer (name, kind, language, priority, credits).
//! Exports: `PackManifest`, `LayerKind`.
//! Role: Serialized as JSON into the pack header; read by `LayerStack` for ordering.
//! Invariants: Absent optional fields are omitted so identical manifests encode identically.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::format::MAX_MANIFEST_LEN;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Base,
    Text,
    Image,
    Audio,
    Script,
    Mod,
    #[default]
    Other,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackManifest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: LayerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Higher wins when layers overlap.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl PackManifest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let bytes = serde_json::to_vec(self).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message("failed to encode manifest")
                .with_source(err)
        })?;
        if bytes.len() > MAX_MANIFEST_LEN as usize {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("manifest is too large"));
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|err| {
            Error::new(ErrorKind::Format)
                .with_message("invalid manifest json")
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerKind, PackManifest};
    use crate::core::error::ErrorKind;

    #[test]
    fn default_manifest_is_compact() {
        let bytes = PackManifest::default().to_bytes().expect("encode");
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"name":"","type":"other","priority":0}"#
        );
    }

    #[test]
    fn manifest_round_trip() {
        let manifest = PackManifest {
            name: "thai-text".to_string(),
            kind: LayerKind::Text,
            lang: Some("th".to_string()),
            priority: 10,
            author: Some("studio".to_string()),
            ..PackManifest::default()
        };
        let bytes = manifest.to_bytes().expect("encode");
        assert_eq!(PackManifest::from_bytes(&bytes).expect("decode"), manifest);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let manifest = PackManifest::from_bytes(br#"{"name":"base"}"#).expect("decode");
        assert_eq!(manifest.kind, LayerKind::Other);
        assert_eq!(manifest.priority, 0);
    }

    #[test]
    fn garbage_is_format_error() {
        let err = PackManifest::from_bytes(b"{not json").expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
