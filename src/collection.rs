//! Collection files.
//!
//! A collection is one pass: a manifest id, a label and an ordered list of
//! images. It is written as TOML next to (or above) the images it names:
//!
//! ```toml
//! id = "coll"
//!
//! [label]
//! en = ["My Collection"]
//!
//! [[items]]
//! id = "p1"
//! image = "scans/p1.jpg"       # relative to this file
//!
//! [[items]]
//! id = "letters"
//! directory = "scans/letters"  # every supported image, sorted by name
//! ```
//!
//! A `directory` item expands to one image per supported file directly inside
//! it, identified as `<id>-<file stem>`. Canvas order is item order, and
//! within a directory item, file name order.

use crate::identifier::{Identifier, IdentifierError};
use crate::presentation::Label;
use crate::tiling::is_supported_input;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Conventional collection file name.
pub const COLLECTION_FILENAME: &str = "collection.toml";

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid collection {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("item '{id}': {reason}")]
    InvalidItem { id: Identifier, reason: String },
    #[error("item '{id}': {source}")]
    InvalidIdentifier {
        id: Identifier,
        #[source]
        source: IdentifierError,
    },
    #[error("identifier '{0}' appears more than once")]
    DuplicateIdentifier(Identifier),
    #[error("collection label must have at least one language")]
    EmptyLabel,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCollection {
    id: Identifier,
    label: Label,
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItem {
    id: Identifier,
    image: Option<PathBuf>,
    directory: Option<PathBuf>,
}

/// One image to tile, with its source path resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionItem {
    pub identifier: Identifier,
    pub image: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// Manifest id; the manifest lands at `<output>/<id>/manifest.json`.
    pub id: Identifier,
    pub label: Label,
    pub items: Vec<CollectionItem>,
}

impl Collection {
    /// Load and expand a collection file.
    pub fn load(path: &Path) -> Result<Self, CollectionError> {
        let content = std::fs::read_to_string(path).map_err(|source| CollectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawCollection =
            toml::from_str(&content).map_err(|source| CollectionError::Toml {
                path: path.to_path_buf(),
                source,
            })?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::resolve(raw, base)
    }

    /// Parse collection TOML, resolving relative paths against `base`.
    pub fn from_toml(content: &str, base: &Path) -> Result<Self, CollectionError> {
        let raw: RawCollection =
            toml::from_str(content).map_err(|source| CollectionError::Toml {
                path: base.to_path_buf(),
                source,
            })?;
        Self::resolve(raw, base)
    }

    fn resolve(raw: RawCollection, base: &Path) -> Result<Self, CollectionError> {
        if raw.label.is_empty() {
            return Err(CollectionError::EmptyLabel);
        }

        let mut items = Vec::new();
        for item in raw.items {
            match (item.image, item.directory) {
                (Some(image), None) => items.push(CollectionItem {
                    identifier: item.id,
                    image: base.join(image),
                }),
                (None, Some(directory)) => {
                    items.extend(expand_directory(&item.id, &base.join(directory))?)
                }
                (Some(_), Some(_)) => {
                    return Err(CollectionError::InvalidItem {
                        id: item.id,
                        reason: "set either `image` or `directory`, not both".into(),
                    });
                }
                (None, None) => {
                    return Err(CollectionError::InvalidItem {
                        id: item.id,
                        reason: "needs an `image` or a `directory`".into(),
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(&item.identifier) {
                return Err(CollectionError::DuplicateIdentifier(item.identifier.clone()));
            }
        }

        Ok(Self {
            id: raw.id,
            label: raw.label,
            items,
        })
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.items.iter().map(|item| &item.identifier)
    }
}

/// One item per supported image directly inside `dir`, sorted by file name.
fn expand_directory(id: &Identifier, dir: &Path) -> Result<Vec<CollectionItem>, CollectionError> {
    if !dir.is_dir() {
        return Err(CollectionError::InvalidItem {
            id: id.clone(),
            reason: format!("{} is not a directory", dir.display()),
        });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| CollectionError::InvalidItem {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported_input(path) {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identifier = Identifier::new(format!("{id}-{stem}")).map_err(|source| {
            CollectionError::InvalidIdentifier {
                id: id.clone(),
                source,
            }
        })?;
        items.push(CollectionItem {
            identifier,
            image: path.to_path_buf(),
        });
    }

    if items.is_empty() {
        return Err(CollectionError::InvalidItem {
            id: id.clone(),
            reason: format!("no supported images in {}", dir.display()),
        });
    }
    Ok(items)
}
