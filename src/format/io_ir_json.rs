//! Native JSON format: the annotation model serialized as is.
//!
//! # Layout
//!
//! ```text
//! root/annotations/<subset>.json   {"version": 1, "categories": [...], "items": [...]}
//! root/images/<subset>/<id>.<ext>  media, only when exported with save_media
//! ```
//!
//! Every annotation variant round-trips. Media paths are stored relative
//! to `root` when the media was copied, and unchanged otherwise; relative
//! paths are resolved against `root` on read.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::{check_item_id, extension_of, ExportItem, ExportOptions, ImportOptions};
use super::{Converter, ConverterFactory, Detector, Extractor, ExtractorFactory};
use crate::conversion::{write_atomic, ItemWriter};
use crate::error::LabelbridgeError;
use crate::ir::{AnnotationType, DatasetItem, ImageRef, LabelCategories, MediaRef};

pub const FORMAT_NAME: &str = "ir-json";

const ANNOTATIONS_DIR: &str = "annotations";
const IMAGES_DIR: &str = "images";
const FORMAT_VERSION: u32 = 1;

/// Contents of one `annotations/<subset>.json` file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubsetFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub categories: LabelCategories,
    #[serde(default)]
    pub items: Vec<DatasetItem>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

/// Parses one subset file from raw bytes.
///
/// Useful for fuzzing and tests without file I/O.
pub fn from_ir_json_slice(bytes: &[u8]) -> Result<SubsetFile, LabelbridgeError> {
    parse_subset_file(bytes, Path::new("<bytes>"))
}

fn parse_subset_file(bytes: &[u8], path: &Path) -> Result<SubsetFile, LabelbridgeError> {
    let file: SubsetFile =
        serde_json::from_slice(bytes).map_err(|source| LabelbridgeError::JsonParse {
            path: path.to_path_buf(),
            source,
        })?;
    if file.version != FORMAT_VERSION {
        return Err(LabelbridgeError::content(
            path,
            format!("unsupported {FORMAT_NAME} version {}", file.version),
        ));
    }
    Ok(file)
}

fn subset_files(root: &Path) -> Result<Vec<(String, PathBuf)>, LabelbridgeError> {
    let dir = root.join(ANNOTATIONS_DIR);
    let entries = fs::read_dir(&dir).map_err(|source| LabelbridgeError::io_at(&dir, source))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| LabelbridgeError::io_at(&dir, source))?
            .path();
        if !path.is_file() || extension_of(&path).as_deref() != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            files.push((stem.to_string(), path));
        }
    }
    files.sort();
    Ok(files)
}

pub struct IrJsonDetector;

impl Detector for IrJsonDetector {
    fn detect(&self, root: &Path) -> Result<bool, LabelbridgeError> {
        if !root.join(ANNOTATIONS_DIR).is_dir() {
            return Ok(false);
        }
        Ok(!subset_files(root)?.is_empty())
    }
}

pub struct IrJsonExtractorFactory;

impl ExtractorFactory for IrJsonExtractorFactory {
    fn open(
        &self,
        root: &Path,
        _options: &ImportOptions,
    ) -> Result<Box<dyn Extractor>, LabelbridgeError> {
        let files = subset_files(root)?;
        if files.is_empty() {
            return Err(LabelbridgeError::structure(
                FORMAT_NAME,
                root,
                format!("no {ANNOTATIONS_DIR}/<subset>.json files"),
            ));
        }

        let mut categories: Option<LabelCategories> = None;
        let mut subsets = Vec::with_capacity(files.len());
        for (subset, path) in files {
            let bytes = fs::read(&path).map_err(|source| LabelbridgeError::io_at(&path, source))?;
            let mut file = parse_subset_file(&bytes, &path)?;

            match &categories {
                None => categories = Some(file.categories.clone()),
                Some(known) if *known != file.categories => {
                    return Err(LabelbridgeError::content(
                        &path,
                        "category table differs from the other subset files",
                    ));
                }
                Some(_) => {}
            }

            for item in &mut file.items {
                item.subset = subset.clone();
                if let Some(MediaRef::Image(image)) = &mut item.media {
                    if image.path.is_relative() {
                        image.path = root.join(&image.path);
                    }
                }
            }
            file.items.sort_by(|a, b| a.id.cmp(&b.id));
            log::debug!("{}: {} item(s)", path.display(), file.items.len());
            subsets.push((subset, file.items));
        }

        Ok(Box::new(IrJsonExtractor {
            categories: categories.unwrap_or_default(),
            subsets,
        }))
    }
}

struct IrJsonExtractor {
    categories: LabelCategories,
    subsets: Vec<(String, Vec<DatasetItem>)>,
}

impl Extractor for IrJsonExtractor {
    fn categories(&self) -> &LabelCategories {
        &self.categories
    }

    fn subsets(&self) -> Vec<String> {
        self.subsets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn len(&self) -> usize {
        self.subsets.iter().map(|(_, items)| items.len()).sum()
    }

    fn items(&self) -> Box<dyn Iterator<Item = Result<DatasetItem, LabelbridgeError>> + '_> {
        Box::new(
            self.subsets
                .iter()
                .flat_map(|(_, items)| items.iter().cloned().map(Ok)),
        )
    }
}

pub struct IrJsonConverterFactory;

impl ConverterFactory for IrJsonConverterFactory {
    fn capabilities(&self) -> &'static [AnnotationType] {
        &AnnotationType::ALL
    }

    fn create(
        &self,
        root: &Path,
        options: &ExportOptions,
    ) -> Result<Box<dyn Converter>, LabelbridgeError> {
        Ok(Box::new(IrJsonConverter {
            root: root.to_path_buf(),
            save_media: options.save_media,
            buffered: Mutex::new(BTreeMap::new()),
        }))
    }
}

type Buffered = BTreeMap<String, Vec<(usize, DatasetItem)>>;

struct IrJsonConverter {
    root: PathBuf,
    save_media: bool,
    buffered: Mutex<Buffered>,
}

impl Converter for IrJsonConverter {
    fn begin(&mut self, _categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        Ok(())
    }

    fn convert_item(
        &self,
        export: &ExportItem<'_>,
        out: &mut ItemWriter,
    ) -> Result<(), LabelbridgeError> {
        let mut item = export.item.clone();
        check_item_id(FORMAT_NAME, &self.root, &item.id)?;
        check_item_id(FORMAT_NAME, &self.root, &item.subset)?;

        if self.save_media {
            if let Some(image) = export.item.image() {
                if !image.exists() {
                    return Err(LabelbridgeError::MediaMissing {
                        item: item.item_ref(),
                        path: image.path.clone(),
                    });
                }
                let relative = Path::new(IMAGES_DIR)
                    .join(&item.subset)
                    .join(format!("{}{}", item.id, image.extension()));
                out.copy_file(&image.path, &self.root.join(&relative))?;
                item.media = Some(MediaRef::Image(ImageRef {
                    path: relative,
                    size: image.size,
                }));
            }
        }

        self.buffered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(item.subset.clone())
            .or_default()
            .push((export.index, item));
        Ok(())
    }

    fn finish(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        let buffered = std::mem::take(
            self.buffered
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (subset, mut entries) in buffered {
            entries.sort_by_key(|(index, _)| *index);
            let file = SubsetFile {
                version: FORMAT_VERSION,
                categories: categories.clone(),
                items: entries.into_iter().map(|(_, item)| item).collect(),
            };
            let path = self
                .root
                .join(ANNOTATIONS_DIR)
                .join(format!("{subset}.json"));
            let bytes = serde_json::to_vec_pretty(&file).map_err(|source| {
                LabelbridgeError::JsonWrite {
                    path: path.clone(),
                    source,
                }
            })?;
            write_atomic(&path, &bytes)?;
            log::debug!("wrote {} item(s) to {}", file.items.len(), path.display());
        }
        Ok(())
    }
}
