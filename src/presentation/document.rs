//! IIIF Presentation 3 document types.
//!
//! Only the subset a static image collection needs: one Manifest holding
//! Canvases, each painted by a single Image annotation that points at the
//! full-resolution fallback and advertises the level-0 image service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Language code to display strings, e.g. `{"en": ["My Collection"]}`.
///
/// A `BTreeMap` keeps the serialized key order stable between runs.
pub type Label = BTreeMap<String, Vec<String>>;

/// Build a single-language label.
pub fn label(language: &str, text: &str) -> Label {
    BTreeMap::from([(language.to_string(), vec![text.to_string()])])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Label,
    pub items: Vec<Canvas>,
}

impl Manifest {
    pub fn new(id: String, label: Label, items: Vec<Canvas>) -> Self {
        Self {
            context: PRESENTATION_CONTEXT.to_string(),
            id,
            kind: "Manifest".to_string(),
            label,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub width: u32,
    pub height: u32,
    pub items: Vec<AnnotationPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub motivation: String,
    pub body: ImageBody,
    /// Id of the canvas this annotation paints.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBody {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub service: Vec<ImageService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageService {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub profile: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_helper_builds_single_language_map() {
        let l = label("en", "My Collection");
        assert_eq!(l.get("en"), Some(&vec!["My Collection".to_string()]));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn manifest_serializes_iiif_keys() {
        let manifest = Manifest::new(
            "https://example.org/coll/manifest.json".into(),
            label("en", "Coll"),
            vec![],
        );
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["@context"], PRESENTATION_CONTEXT);
        assert_eq!(value["type"], "Manifest");
        assert_eq!(value["label"]["en"][0], "Coll");
        assert_eq!(value["items"], serde_json::json!([]));
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn label_keys_serialize_in_sorted_order() {
        let mut l = label("nl", "Verzameling");
        l.insert("en".into(), vec!["Collection".into()]);
        let json = serde_json::to_string(&l).unwrap();
        assert_eq!(json, r#"{"en":["Collection"],"nl":["Verzameling"]}"#);
    }
}
