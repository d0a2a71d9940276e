//! Canvas construction from pyramid descriptors.
//!
//! Every id is derived from the base URL and the image identifier alone, so
//! rebuilding a manifest from the same pyramids gives identical output.

use super::document::{Annotation, AnnotationPage, Canvas, ImageBody, ImageService};
use crate::identifier::Identifier;
use crate::tiling::descriptor::{IMAGE_SERVICE_TYPE, ImageInfo, LEVEL0_PROFILE};
use crate::tiling::layout::fallback_relative_path;
use crate::tiling::{IMAGES_DIR, TileFormat};

pub fn manifest_url(base_url: &str, manifest_id: &Identifier) -> String {
    format!("{base_url}/{manifest_id}/manifest.json")
}

pub fn canvas_id(base_url: &str, identifier: &Identifier) -> String {
    format!("{base_url}/canvas/{identifier}")
}

pub fn page_id(base_url: &str, identifier: &Identifier) -> String {
    format!("{base_url}/page/{identifier}")
}

pub fn annotation_id(base_url: &str, identifier: &Identifier) -> String {
    format!("{base_url}/annotation/{identifier}")
}

/// Base URL of the image service, i.e. the directory holding `info.json`.
pub fn service_url(base_url: &str, identifier: &Identifier) -> String {
    format!("{base_url}/{IMAGES_DIR}/{identifier}")
}

/// URL of the full-resolution fallback rendition.
pub fn image_url(base_url: &str, identifier: &Identifier, format: TileFormat) -> String {
    format!(
        "{}/{}",
        service_url(base_url, identifier),
        fallback_relative_path(format)
    )
}

/// One canvas painted by the whole image, sized from its descriptor.
pub fn build_canvas(
    base_url: &str,
    identifier: &Identifier,
    info: &ImageInfo,
    fallback_format: TileFormat,
) -> Canvas {
    let canvas = canvas_id(base_url, identifier);
    let body = ImageBody {
        id: image_url(base_url, identifier, fallback_format),
        kind: "Image".to_string(),
        format: fallback_format.mime_type().to_string(),
        width: info.width,
        height: info.height,
        service: vec![ImageService {
            id: service_url(base_url, identifier),
            kind: IMAGE_SERVICE_TYPE.to_string(),
            profile: LEVEL0_PROFILE.to_string(),
        }],
    };
    let annotation = Annotation {
        id: annotation_id(base_url, identifier),
        kind: "Annotation".to_string(),
        motivation: "painting".to_string(),
        body,
        target: canvas.clone(),
    };
    Canvas {
        id: canvas,
        kind: "Canvas".to_string(),
        width: info.width,
        height: info.height,
        items: vec![AnnotationPage {
            id: page_id(base_url, identifier),
            kind: "AnnotationPage".to_string(),
            items: vec![annotation],
        }],
    }
}
