//! Dataset items and their lazily loaded media.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::annotation::Annotation;
use super::attrs::{AttributeValue, Attributes};
use crate::error::LabelbridgeError;

/// `(subset, item id)` pair used to point at an item in reports and errors.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub subset: String,
    pub id: String,
}

impl ItemRef {
    pub fn new(subset: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            subset: subset.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subset, self.id)
    }
}

/// An image on disk. Nothing is read until dimensions or pixels are asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,

    /// Known `(width, height)`, if a format stored it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }

    pub fn with_size(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            size: Some((width, height)),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Returns `(width, height)`, reading only the file header when the
    /// size is not already known.
    pub fn dimensions(&self) -> Result<(u32, u32), LabelbridgeError> {
        match self.size {
            Some(size) => Ok(size),
            None => read_image_dimensions(&self.path),
        }
    }

    /// Decodes the image into an 8-bit RGB raster.
    pub fn load_rgb(&self) -> Result<image::RgbImage, LabelbridgeError> {
        let img = image::open(&self.path).map_err(|source| LabelbridgeError::ImageDecode {
            path: self.path.clone(),
            source,
        })?;
        Ok(img.to_rgb8())
    }

    /// File extension including the dot, defaulting to `.jpg`.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_else(|| ".jpg".to_string())
    }
}

/// Media backing an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Image(ImageRef),
}

impl MediaRef {
    pub fn as_image(&self) -> Option<&ImageRef> {
        match self {
            MediaRef::Image(image) => Some(image),
        }
    }
}

/// One media unit with its annotations.
///
/// Items are values: transforms build modified copies rather than
/// mutating what an extractor produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,

    pub subset: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,

    #[serde(default)]
    pub annotations: Vec<Annotation>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl DatasetItem {
    pub fn new(id: impl Into<String>, subset: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subset: subset.into(),
            media: None,
            annotations: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.media = Some(MediaRef::Image(image));
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(&self.subset, &self.id)
    }

    pub fn image(&self) -> Option<&ImageRef> {
        self.media.as_ref().and_then(MediaRef::as_image)
    }

    /// Smallest annotation id not yet used by this item.
    pub fn next_annotation_id(&self) -> u64 {
        self.annotations
            .iter()
            .map(|ann| ann.id.get() + 1)
            .max()
            .unwrap_or(0)
    }
}

pub(crate) fn read_image_dimensions(path: &Path) -> Result<(u32, u32), LabelbridgeError> {
    let size = imagesize::size(path).map_err(|source| LabelbridgeError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;

    let width: u32 = size
        .width
        .try_into()
        .map_err(|_| LabelbridgeError::content(path, format!("image width {} does not fit in u32", size.width)))?;
    let height: u32 = size
        .height
        .try_into()
        .map_err(|_| LabelbridgeError::content(path, format!("image height {} does not fit in u32", size.height)))?;

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_display() {
        let item = DatasetItem::new("dir/img_1", "train");
        assert_eq!(item.item_ref().to_string(), "train/dir/img_1");
    }

    #[test]
    fn known_size_skips_file_access() {
        let image = ImageRef::with_size("/nonexistent/x.jpg", 32, 16);
        assert_eq!(image.dimensions().unwrap(), (32, 16));
        assert!(!image.exists());
        assert!(ImageRef::new("/nonexistent/x.jpg").dimensions().is_err());
    }

    #[test]
    fn dimensions_are_read_from_header() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("img.png");
        image::RgbImage::new(7, 5).save(&path).unwrap();

        let image = ImageRef::new(&path);
        assert_eq!(image.dimensions().unwrap(), (7, 5));
        assert_eq!(image.load_rgb().unwrap().dimensions(), (7, 5));
        assert_eq!(image.extension(), ".png");
    }

    #[test]
    fn next_annotation_id_skips_used_ids() {
        let item = DatasetItem::new("a", "default").with_annotations(vec![
            crate::ir::Annotation::caption(3u64, "x"),
            crate::ir::Annotation::caption(1u64, "y"),
        ]);
        assert_eq!(item.next_annotation_id(), 4);
    }
}
