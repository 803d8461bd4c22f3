//! TFOD CSV format reader and writer.
//!
//! TensorFlow Object Detection CSV stores one row per box with
//! **normalized coordinates** (0.0 to 1.0):
//!
//! ```text
//! filename,width,height,class,xmin,ymin,xmax,ymax
//! ```
//!
//! # Layout
//!
//! One `root/<subset>.csv` per subset. With `save_media` the images are
//! copied next to the CSV files under their `filename`.
//!
//! # Format Limitations
//!
//! Only boxes are representable. Items without boxes, annotation
//! attributes and item attributes do not survive a round trip.
//!
//! # ID Assignment Policy
//!
//! - **Items**: id is `filename` without its extension.
//! - **Categories**: lexicographic order of class names over all subsets.
//! - **Annotations**: `0, 1, ...` in row order within an item.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::{check_item_id, extension_of, ExportItem, ExportOptions, ImportOptions};
use super::{Converter, ConverterFactory, Detector, Extractor, ExtractorFactory};
use crate::conversion::{write_atomic, ConversionIssueCode, ItemWriter};
use crate::error::LabelbridgeError;
use crate::ir::{
    Annotation, AnnotationKind, AnnotationType, BBoxXYXY, DatasetItem, ImageRef, LabelCategories,
    Normalized,
};

pub const FORMAT_NAME: &str = "tfod-csv";

const HEADER: &str = "filename,width,height,class,xmin,ymin,xmax,ymax";

/// A single row in the TFOD CSV format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TfodRow {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "class")]
    pub class_name: String,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Parses TFOD CSV bytes into rows.
///
/// Useful for fuzzing and processing raw bytes without requiring UTF-8 upfront.
pub fn from_tfod_csv_slice(bytes: &[u8]) -> Result<Vec<TfodRow>, LabelbridgeError> {
    parse_rows(bytes, Path::new("<bytes>"))
}

fn parse_rows(bytes: &[u8], path: &Path) -> Result<Vec<TfodRow>, LabelbridgeError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: TfodRow = result.map_err(|source| LabelbridgeError::CsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Groups rows into items, checking that a filename always has one size.
pub fn rows_to_items(
    rows: &[TfodRow],
    subset: &str,
    root: &Path,
    categories: &LabelCategories,
    path: &Path,
) -> Result<Vec<DatasetItem>, LabelbridgeError> {
    let mut by_file: BTreeMap<&str, (u32, u32, Vec<&TfodRow>)> = BTreeMap::new();
    for row in rows {
        let entry = by_file
            .entry(row.filename.as_str())
            .or_insert((row.width, row.height, Vec::new()));
        if (entry.0, entry.1) != (row.width, row.height) {
            return Err(LabelbridgeError::content(
                path,
                format!(
                    "inconsistent dimensions for '{}': ({}, {}) vs ({}, {})",
                    row.filename, entry.0, entry.1, row.width, row.height
                ),
            ));
        }
        entry.2.push(row);
    }

    let mut items = Vec::with_capacity(by_file.len());
    for (filename, (width, height, rows)) in by_file {
        let id = item_id(filename);
        let mut annotations = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let label = categories.find(&row.class_name).ok_or_else(|| {
                LabelbridgeError::CategoryUnresolved {
                    reference: format!("class '{}'", row.class_name),
                    item: None,
                }
            })?;
            let bbox = BBoxXYXY::<Normalized>::from_xyxy(row.xmin, row.ymin, row.xmax, row.ymax)
                .to_pixel(width as f64, height as f64);
            annotations.push(Annotation {
                id: (i as u64).into(),
                label: Some(label),
                group: None,
                z_order: 0,
                attributes: Default::default(),
                kind: AnnotationKind::Bbox { bbox },
            });
        }
        items.push(
            DatasetItem::new(id, subset)
                .with_image(ImageRef::with_size(root.join(filename), width, height))
                .with_annotations(annotations),
        );
    }
    items.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(items)
}

fn item_id(filename: &str) -> String {
    let path = Path::new(filename);
    match (path.parent(), path.file_stem().and_then(|s| s.to_str())) {
        (Some(parent), Some(stem)) if !parent.as_os_str().is_empty() => {
            format!("{}/{}", parent.to_string_lossy().replace('\\', "/"), stem)
        }
        (_, Some(stem)) => stem.to_string(),
        _ => filename.to_string(),
    }
}

fn csv_files(root: &Path) -> Result<Vec<(String, PathBuf)>, LabelbridgeError> {
    let entries = fs::read_dir(root).map_err(|source| LabelbridgeError::io_at(root, source))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| LabelbridgeError::io_at(root, source))?
            .path();
        if path.is_file() && extension_of(&path).as_deref() == Some("csv") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path));
            }
        }
    }
    files.sort();
    Ok(files)
}

fn has_tfod_header(path: &Path) -> Result<bool, LabelbridgeError> {
    let mut head = [0u8; 256];
    let mut file = fs::File::open(path).map_err(|source| LabelbridgeError::io_at(path, source))?;
    let read = file
        .read(&mut head)
        .map_err(|source| LabelbridgeError::io_at(path, source))?;
    let text = String::from_utf8_lossy(&head[..read]);
    let first = text
        .trim_start_matches('\u{feff}')
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    Ok(first == HEADER)
}

pub struct TfodDetector;

impl Detector for TfodDetector {
    fn detect(&self, root: &Path) -> Result<bool, LabelbridgeError> {
        for (_, path) in csv_files(root)? {
            if has_tfod_header(&path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct TfodExtractorFactory;

impl ExtractorFactory for TfodExtractorFactory {
    fn open(
        &self,
        root: &Path,
        _options: &ImportOptions,
    ) -> Result<Box<dyn Extractor>, LabelbridgeError> {
        let mut parsed = Vec::new();
        for (subset, path) in csv_files(root)? {
            if !has_tfod_header(&path)? {
                log::debug!("skipping {}: not a TFOD header", path.display());
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| LabelbridgeError::io_at(&path, source))?;
            parsed.push((subset, path.clone(), parse_rows(&bytes, &path)?));
        }
        if parsed.is_empty() {
            return Err(LabelbridgeError::structure(
                FORMAT_NAME,
                root,
                "no <subset>.csv file with a TFOD header",
            ));
        }

        let names: BTreeSet<&str> = parsed
            .iter()
            .flat_map(|(_, _, rows)| rows.iter().map(|row| row.class_name.as_str()))
            .collect();
        let categories = LabelCategories::from_names(names)?;

        let mut subsets = Vec::with_capacity(parsed.len());
        for (subset, path, rows) in &parsed {
            let items = rows_to_items(rows, subset, root, &categories, path)?;
            subsets.push((subset.clone(), items));
        }

        Ok(Box::new(TfodExtractor { categories, subsets }))
    }
}

struct TfodExtractor {
    categories: LabelCategories,
    subsets: Vec<(String, Vec<DatasetItem>)>,
}

impl Extractor for TfodExtractor {
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

pub struct TfodConverterFactory;

impl ConverterFactory for TfodConverterFactory {
    fn capabilities(&self) -> &'static [AnnotationType] {
        &[AnnotationType::Bbox]
    }

    fn create(
        &self,
        root: &Path,
        options: &ExportOptions,
    ) -> Result<Box<dyn Converter>, LabelbridgeError> {
        Ok(Box::new(TfodConverter {
            root: root.to_path_buf(),
            save_media: options.save_media,
            rows: Mutex::new(BTreeMap::new()),
        }))
    }
}

type BufferedRows = BTreeMap<String, Vec<(usize, Vec<TfodRow>)>>;

struct TfodConverter {
    root: PathBuf,
    save_media: bool,
    rows: Mutex<BufferedRows>,
}

impl Converter for TfodConverter {
    fn begin(&mut self, _categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        Ok(())
    }

    fn convert_item(
        &self,
        export: &ExportItem<'_>,
        out: &mut ItemWriter,
    ) -> Result<(), LabelbridgeError> {
        let item = export.item;
        check_item_id(FORMAT_NAME, &self.root, &item.id)?;
        check_item_id(FORMAT_NAME, &self.root, &item.subset)?;

        let image = item.image();
        let (width, height) = match image {
            Some(image) => image.dimensions()?,
            None => {
                return Err(LabelbridgeError::content(
                    &self.root,
                    format!("{FORMAT_NAME} needs image dimensions but the item has no media"),
                ))
            }
        };
        if width == 0 || height == 0 {
            return Err(LabelbridgeError::content(
                &self.root,
                format!("image size {width}x{height} cannot normalize boxes"),
            ));
        }

        let extension = image.map(ImageRef::extension).unwrap_or_else(|| ".jpg".to_string());
        let filename = format!("{}{}", item.id, extension);

        let mut rows = Vec::with_capacity(item.annotations.len());
        let mut with_attributes = 0;
        for ann in &item.annotations {
            let AnnotationKind::Bbox { bbox } = &ann.kind else {
                continue;
            };
            let label = ann.label.ok_or_else(|| {
                LabelbridgeError::InvalidAnnotation(format!("box {} has no label", ann.id))
            })?;
            if !ann.attributes.is_empty() {
                with_attributes += 1;
            }
            let norm = bbox.to_normalized(width as f64, height as f64);
            rows.push(TfodRow {
                filename: filename.clone(),
                width,
                height,
                class_name: export.categories.name(label)?.to_string(),
                xmin: norm.xmin(),
                ymin: norm.ymin(),
                xmax: norm.xmax(),
                ymax: norm.ymax(),
            });
        }

        if rows.is_empty() {
            out.warn(
                ConversionIssueCode::ItemWithoutAnnotations,
                "item has no boxes and will not appear in the CSV",
            );
        }
        if with_attributes > 0 {
            out.warn(
                ConversionIssueCode::DropAnnotationAttributes,
                format!("{with_attributes} box(es) have attributes that will be dropped"),
            );
        }
        if !item.attributes.is_empty() {
            out.warn(
                ConversionIssueCode::DropItemAttributes,
                "item attributes will be dropped",
            );
        }

        if self.save_media {
            if let Some(image) = image {
                if !image.exists() {
                    return Err(LabelbridgeError::MediaMissing {
                        item: item.item_ref(),
                        path: image.path.clone(),
                    });
                }
                out.copy_file(&image.path, &self.root.join(&filename))?;
            }
        }

        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(item.subset.clone())
            .or_default()
            .push((export.index, rows));
        Ok(())
    }

    fn finish(&mut self, _categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        let buffered = std::mem::take(self.rows.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (subset, mut entries) in buffered {
            entries.sort_by_key(|(index, _)| *index);
            let path = self.root.join(format!("{subset}.csv"));

            // Header is written by hand so that subsets without boxes still get one.
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(Vec::new());
            writer
                .write_record(HEADER.split(','))
                .map_err(|source| LabelbridgeError::CsvWrite {
                    path: path.clone(),
                    source,
                })?;
            for row in entries.iter().flat_map(|(_, rows)| rows) {
                writer
                    .serialize(row)
                    .map_err(|source| LabelbridgeError::CsvWrite {
                        path: path.clone(),
                        source,
                    })?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|err| LabelbridgeError::io_at(&path, err.into_error()))?;
            write_atomic(&path, &bytes)?;
        }
        Ok(())
    }
}
