//! ADE20K-style mask-channel format.
//!
//! # Layout
//!
//! ```text
//! root/dataset_meta.json                  {"labels": [{"name", "parent"?}]}   (optional)
//! root/<subset>/[<super-label>/]X.jpg     media (jpg, jpeg, png or bmp)
//!                               X.json    object records
//!                               X_seg.png RGB: class = R * 256 + G, instance = B
//!                               X_parts_N.png   gray: part class id at level N
//!                               X/instance_<id>.png   optional per-object mask
//! ```
//!
//! Segmentation rasters directly under `root` mean there are no subset
//! directories; every item then belongs to subset `default`.
//!
//! The object file is the source of truth for names: a raster class id is
//! only meaningful through the record that names it. Records link to
//! raster pixels by `(class_id, instance)` at level 0 and by
//! `(level, class_id)` for parts.
//!
//! # Lossy cases
//!
//! - Empty masks are not written.
//! - Overlapping instances are flattened in `X_seg.png`; writing
//!   `X/instance_<id>.png` files keeps them intact.
//! - Every imported annotation carries an `occluded` attribute.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{check_item_id, ExportItem, ExportOptions, ImportOptions};
use super::{Converter, ConverterFactory, Detector, Extractor, ExtractorFactory};
use crate::codec::{
    self, check_dimensions, ClassLookup, InstanceLayer, PartAssignment, PartLayer,
};
use crate::conversion::{write_atomic, ConversionIssueCode, ItemWriter};
use crate::error::LabelbridgeError;
use crate::ir::{
    read_image_dimensions, Annotation, AnnotationKind, AnnotationType, AttributeValue,
    Attributes, CategoryId, DatasetItem, ImageRef, InstanceKey, LabelCategories, LabelCategory,
    Mask,
};

pub const FORMAT_NAME: &str = "ade20k";

const META_FILE: &str = "dataset_meta.json";
const SEG_SUFFIX: &str = "_seg.png";
const PARTS_INFIX: &str = "_parts_";
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
const DEFAULT_SUBSET: &str = "default";
const OCCLUDED: &str = "occluded";

/// `root/<subset>/<super-label>/X_seg.png` is three levels down.
const MAX_DEPTH: usize = 3;

// ============================================================================
// On-disk schema
// ============================================================================

/// Contents of `X.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRecord>,

    /// Item-level attributes.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Media file name relative to the object file, when media was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// One object or part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: u64,
    pub name: String,
    /// Raster class id: `R * 256 + G` at level 0, pixel value in parts.
    pub class_id: u32,
    /// 0 for objects, N for `X_parts_N.png`.
    #[serde(default)]
    pub level: u32,
    /// `B` discriminator in `X_seg.png` (objects only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<u32>,
    #[serde(default)]
    pub occluded: bool,
    /// Record id of the owning object (parts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    /// Per-object mask file relative to the object file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    /// The object is a class mask without instance identity.
    #[serde(default, skip_serializing_if = "is_false")]
    pub class_mask: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub z_order: i32,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// Contents of `dataset_meta.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct MetaFile {
    labels: Vec<LabelCategory>,
}

/// Parses an object file from raw bytes.
///
/// Useful for fuzzing and tests without file I/O.
pub fn from_ade20k_object_slice(bytes: &[u8]) -> Result<ObjectFile, LabelbridgeError> {
    parse_object_file(bytes, Path::new("<bytes>"))
}

fn parse_object_file(bytes: &[u8], path: &Path) -> Result<ObjectFile, LabelbridgeError> {
    let file: ObjectFile =
        serde_json::from_slice(bytes).map_err(|source| LabelbridgeError::JsonParse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut ids = HashSet::new();
    for record in &file.objects {
        if !ids.insert(record.id) {
            return Err(LabelbridgeError::content(
                path,
                format!("duplicate object id {}", record.id),
            ));
        }
        if record.level == 0 && record.instance.is_none() {
            return Err(LabelbridgeError::content(
                path,
                format!("object {} has no instance discriminator", record.id),
            ));
        }
    }
    Ok(file)
}

fn read_object_file(path: &Path) -> Result<ObjectFile, LabelbridgeError> {
    let bytes = fs::read(path).map_err(|source| LabelbridgeError::io_at(path, source))?;
    parse_object_file(&bytes, path)
}

// ============================================================================
// Layout discovery
// ============================================================================

/// Files of one item: `base` is `dir/X` without any suffix.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ItemFiles {
    subset: String,
    id: String,
    base: PathBuf,
}

impl ItemFiles {
    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = self.base.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    fn json_path(&self) -> PathBuf {
        self.with_suffix(".json")
    }

    fn seg_path(&self) -> PathBuf {
        self.with_suffix(SEG_SUFFIX)
    }

    fn dir(&self) -> &Path {
        self.base.parent().unwrap_or_else(|| Path::new("."))
    }

    fn stem(&self) -> String {
        self.base
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `(level, path)` of every `X_parts_N.png`, by level.
    fn part_files(&self) -> Result<Vec<(u32, PathBuf)>, LabelbridgeError> {
        let prefix = format!("{}{PARTS_INFIX}", self.stem());
        let dir = self.dir();
        let entries = fs::read_dir(dir).map_err(|source| LabelbridgeError::io_at(dir, source))?;

        let mut parts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| LabelbridgeError::io_at(dir, source))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let level = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".png"))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(level) = level.filter(|level| *level >= 1) {
                parts.push((level, path));
            }
        }
        parts.sort();
        Ok(parts)
    }
}

/// Finds every item under `root`.
///
/// # Errors
/// A segmentation raster without its object file is a layout violation.
fn scan(root: &Path) -> Result<Vec<ItemFiles>, LabelbridgeError> {
    let mut segs = Vec::new();
    for entry in WalkDir::new(root)
        .max_depth(MAX_DEPTH)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| {
            LabelbridgeError::structure(
                FORMAT_NAME,
                root,
                format!("failed while traversing directory: {source}"),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(SEG_SUFFIX) else {
            continue;
        };
        if stem.is_empty() {
            continue;
        }
        let base = entry.path().with_file_name(stem);
        let json = {
            let mut path = base.clone().into_os_string();
            path.push(".json");
            PathBuf::from(path)
        };
        if !json.is_file() {
            return Err(LabelbridgeError::structure(
                FORMAT_NAME,
                entry.path(),
                format!("{name} has no {stem}.json object file"),
            ));
        }
        segs.push((entry.depth(), base));
    }

    let flat = segs.iter().any(|(depth, _)| *depth == 1);
    let mut items = Vec::with_capacity(segs.len());
    for (_, base) in segs {
        let relative = base.strip_prefix(root).unwrap_or(&base);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let (subset, id) = if flat {
            (DEFAULT_SUBSET.to_string(), parts.join("/"))
        } else {
            match parts.split_first() {
                Some((subset, rest)) if !rest.is_empty() => (subset.clone(), rest.join("/")),
                _ => (DEFAULT_SUBSET.to_string(), parts.join("/")),
            }
        };
        items.push(ItemFiles { subset, id, base });
    }
    items.sort();
    Ok(items)
}

// ============================================================================
// Detector
// ============================================================================

pub struct Ade20kDetector;

impl Detector for Ade20kDetector {
    fn detect(&self, root: &Path) -> Result<bool, LabelbridgeError> {
        Ok(!scan(root)?.is_empty())
    }
}

// ============================================================================
// Extractor
// ============================================================================

pub struct Ade20kExtractorFactory;

impl ExtractorFactory for Ade20kExtractorFactory {
    fn open(
        &self,
        root: &Path,
        options: &ImportOptions,
    ) -> Result<Box<dyn Extractor>, LabelbridgeError> {
        let entries = scan(root)?;
        if entries.is_empty() {
            return Err(LabelbridgeError::structure(
                FORMAT_NAME,
                root,
                format!("no *{SEG_SUFFIX} rasters within {MAX_DEPTH} levels"),
            ));
        }

        let categories = load_categories(root, &entries)?;
        let mut subsets: Vec<String> = entries.iter().map(|e| e.subset.clone()).collect();
        subsets.dedup();

        log::info!(
            "{FORMAT_NAME}: {} item(s) in {} subset(s), {} categories",
            entries.len(),
            subsets.len(),
            categories.len()
        );

        Ok(Box::new(Ade20kExtractor {
            categories,
            subsets,
            entries,
            part_assignment: options.part_assignment,
        }))
    }
}

/// Categories from `dataset_meta.json`, or else every object name found in
/// the object files, sorted.
fn load_categories(root: &Path, entries: &[ItemFiles]) -> Result<LabelCategories, LabelbridgeError> {
    let meta_path = root.join(META_FILE);
    if meta_path.is_file() {
        let bytes =
            fs::read(&meta_path).map_err(|source| LabelbridgeError::io_at(&meta_path, source))?;
        let meta: MetaFile =
            serde_json::from_slice(&bytes).map_err(|source| LabelbridgeError::JsonParse {
                path: meta_path.clone(),
                source,
            })?;
        let mut categories = LabelCategories::new();
        for label in meta.labels {
            categories
                .add(label)
                .map_err(|err| LabelbridgeError::content(&meta_path, err.to_string()))?;
        }
        return Ok(categories);
    }

    let mut names = BTreeSet::new();
    for entry in entries {
        let path = entry.json_path();
        match read_object_file(&path) {
            Ok(file) => names.extend(file.objects.into_iter().map(|record| record.name)),
            // Reported again, with item context, when the item is read.
            Err(err) => log::debug!("category pre-pass skipped {}: {err}", path.display()),
        }
    }
    LabelCategories::from_names(names)
}

struct Ade20kExtractor {
    categories: LabelCategories,
    subsets: Vec<String>,
    entries: Vec<ItemFiles>,
    part_assignment: PartAssignment,
}

impl Extractor for Ade20kExtractor {
    fn categories(&self) -> &LabelCategories {
        &self.categories
    }

    fn subsets(&self) -> Vec<String> {
        self.subsets.clone()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn items(&self) -> Box<dyn Iterator<Item = Result<DatasetItem, LabelbridgeError>> + '_> {
        Box::new(self.entries.iter().map(move |files| {
            let item_ref = crate::ir::ItemRef::new(&files.subset, &files.id);
            self.load_item(files).map_err(|err| err.in_item(&item_ref))
        }))
    }
}

impl Ade20kExtractor {
    fn load_item(&self, files: &ItemFiles) -> Result<DatasetItem, LabelbridgeError> {
        let json_path = files.json_path();
        let object_file = read_object_file(&json_path)?;

        let seg_path = files.seg_path();
        let seg = image::open(&seg_path)
            .map_err(|source| LabelbridgeError::ImageDecode {
                path: seg_path.clone(),
                source,
            })?
            .to_rgb8();
        let size = seg.dimensions();

        let seg_name = format!("{}{SEG_SUFFIX}", files.stem());
        let recorded = object_file.image.as_ref().map(|image| (image.width, image.height));
        let media = match resolve_media(files, &object_file)? {
            Some(path) => {
                let actual = read_image_dimensions(&path)?;
                if let Some(recorded) = recorded {
                    check_dimensions(&path.display().to_string(), recorded, actual)?;
                }
                check_dimensions(&seg_name, actual, size)?;
                Some(ImageRef::with_size(path, actual.0, actual.1))
            }
            None => {
                if let Some(recorded) = recorded {
                    check_dimensions(&seg_name, recorded, size)?;
                }
                None
            }
        };

        let lookups = RecordLookups::build(&object_file, &self.categories, &json_path)?;
        let mut next_id = object_file
            .objects
            .iter()
            .map(|record| record.id + 1)
            .max()
            .unwrap_or(0);

        // Level 0: objects.
        let by_pixel_key: HashMap<(u32, u32), &ObjectRecord> = object_file
            .objects
            .iter()
            .filter(|r| r.level == 0)
            .filter_map(|r| r.instance.map(|instance| ((r.class_id, instance), r)))
            .collect();

        let mut annotations = Vec::new();
        let mut owners: Vec<(InstanceKey, Mask)> = Vec::new();
        let mut record_keys: HashMap<u64, InstanceKey> = HashMap::new();

        for decoded in codec::decode_instances(&seg, &lookups.objects)? {
            let key = decoded.key;
            let pixel_key = (decoded.class_id, key.instance_id.get());
            let ann = match by_pixel_key.get(&pixel_key) {
                Some(record) => {
                    let mask = match &record.mask {
                        Some(relative) => load_binary_mask(&files.dir().join(relative), size)?,
                        None => decoded.mask,
                    };
                    record_keys.insert(record.id, key);
                    owners.push((key, mask.clone()));
                    object_annotation(record, key, mask)
                }
                None => {
                    log::debug!(
                        "{}: class {} instance {} has no object record",
                        seg_path.display(),
                        decoded.class_id,
                        key.instance_id
                    );
                    owners.push((key, decoded.mask.clone()));
                    next_id += 1;
                    decoded.into_annotation(next_id - 1)
                }
            };
            annotations.push(ann);
        }

        // Objects fully hidden in the raster survive through their mask file.
        for record in object_file.objects.iter().filter(|r| r.level == 0) {
            if record_keys.contains_key(&record.id) {
                continue;
            }
            let key = InstanceKey::new(
                lookups.objects.resolve(record.class_id)?,
                record.instance.unwrap_or_default(),
            );
            match &record.mask {
                Some(relative) => {
                    let mask = load_binary_mask(&files.dir().join(relative), size)?;
                    record_keys.insert(record.id, key);
                    owners.push((key, mask.clone()));
                    annotations.push(object_annotation(record, key, mask));
                }
                None => log::warn!(
                    "{}: object {} has no pixels and is skipped",
                    json_path.display(),
                    record.id
                ),
            }
        }

        // Levels >= 1: parts.
        let owner_refs: Vec<(InstanceKey, &Mask)> = owners.iter().map(|(k, m)| (*k, m)).collect();
        let mut used_parts: HashSet<u64> = HashSet::new();
        let empty = ClassLookup::new();
        for (level, path) in files.part_files()? {
            let raster = image::open(&path)
                .map_err(|source| LabelbridgeError::ImageDecode {
                    path: path.clone(),
                    source,
                })?
                .to_luma8();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            check_dimensions(&name, size, raster.dimensions())?;

            let lookup = lookups.parts.get(&level).unwrap_or(&empty);
            let decoded =
                codec::decode_parts(&raster, level, &owner_refs, lookup, &self.part_assignment)?;
            for part in decoded {
                let record = find_part_record(&object_file, &record_keys, &used_parts, &part);
                let ann = match record {
                    Some(record) => {
                        used_parts.insert(record.id);
                        let owner = record
                            .parent
                            .and_then(|parent| record_keys.get(&parent).copied())
                            .or(part.owner);
                        part_annotation(record, part.label, level, owner, part.mask)?
                    }
                    None => {
                        next_id += 1;
                        part.into_annotation(next_id - 1)?
                    }
                };
                annotations.push(ann);
            }
        }

        for record in object_file.objects.iter().filter(|r| r.level > 0) {
            if !used_parts.contains(&record.id) {
                log::warn!(
                    "{}: part {} has no pixels in level {} and is skipped",
                    json_path.display(),
                    record.id,
                    record.level
                );
            }
        }

        annotations.sort_by_key(|ann| ann.id);

        let mut item = DatasetItem::new(&files.id, &files.subset).with_annotations(annotations);
        item.attributes = object_file.attributes;
        item.media = media.map(crate::ir::MediaRef::Image);
        log::debug!("read {}/{} ({} annotations)", item.subset, item.id, item.annotations.len());
        Ok(item)
    }
}

/// Per-item class tables built from the object records.
struct RecordLookups {
    objects: ClassLookup,
    parts: BTreeMap<u32, ClassLookup>,
}

impl RecordLookups {
    fn build(
        file: &ObjectFile,
        categories: &LabelCategories,
        path: &Path,
    ) -> Result<Self, LabelbridgeError> {
        let mut objects = ClassLookup::new();
        let mut parts: BTreeMap<u32, ClassLookup> = BTreeMap::new();
        for record in &file.objects {
            let label = categories.find(&record.name).ok_or_else(|| {
                LabelbridgeError::CategoryUnresolved {
                    reference: format!("object {} named '{}'", record.id, record.name),
                    item: None,
                }
            })?;
            let lookup = if record.level == 0 {
                &mut objects
            } else {
                parts.entry(record.level).or_default()
            };
            if let Some(existing) = lookup.category(record.class_id) {
                if existing != label {
                    return Err(LabelbridgeError::content(
                        path,
                        format!(
                            "class id {} at level {} names both '{}' and '{}'",
                            record.class_id,
                            record.level,
                            categories.name(existing)?,
                            record.name
                        ),
                    ));
                }
            }
            lookup
                .insert(record.class_id, label)
                .map_err(|err| LabelbridgeError::content(path, err.to_string()))?;
        }
        Ok(Self { objects, parts })
    }
}

/// Finds the media file of an item: the recorded file name, else a sibling
/// with a known image extension.
fn resolve_media(files: &ItemFiles, file: &ObjectFile) -> Result<Option<PathBuf>, LabelbridgeError> {
    if let Some(filename) = file.image.as_ref().and_then(|image| image.filename.as_ref()) {
        let path = files.dir().join(filename);
        if !path.is_file() {
            return Err(LabelbridgeError::MediaMissing {
                item: crate::ir::ItemRef::new(&files.subset, &files.id),
                path,
            });
        }
        return Ok(Some(path));
    }

    Ok(IMAGE_EXTENSIONS
        .iter()
        .map(|ext| files.with_suffix(&format!(".{ext}")))
        .find(|path| path.is_file()))
}

fn load_binary_mask(path: &Path, size: (u32, u32)) -> Result<Mask, LabelbridgeError> {
    let raster = image::open(path)
        .map_err(|source| LabelbridgeError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    check_dimensions(&path.display().to_string(), size, raster.dimensions())?;
    Mask::from_fn(size.0, size.1, |x, y| raster.get_pixel(x, y).0[0] != 0)
}

fn record_attributes(record: &ObjectRecord) -> Attributes {
    let mut attributes = record.attributes.clone();
    attributes.insert(OCCLUDED.to_string(), AttributeValue::Bool(record.occluded));
    attributes
}

fn object_annotation(record: &ObjectRecord, key: InstanceKey, mask: Mask) -> Annotation {
    let kind = if record.class_mask {
        AnnotationKind::Mask { mask }
    } else {
        AnnotationKind::InstanceMask {
            mask,
            instance_id: key.instance_id,
        }
    };
    Annotation {
        id: record.id.into(),
        label: Some(key.label),
        group: record.group,
        z_order: record.z_order,
        attributes: record_attributes(record),
        kind,
    }
}

fn part_annotation(
    record: &ObjectRecord,
    label: CategoryId,
    level: u32,
    owner: Option<InstanceKey>,
    mask: Mask,
) -> Result<Annotation, LabelbridgeError> {
    let mut ann = Annotation::part_mask(record.id, label, level, owner, mask)?;
    ann.group = record.group;
    ann.z_order = record.z_order;
    ann.attributes = record_attributes(record);
    Ok(ann)
}

fn find_part_record<'a>(
    file: &'a ObjectFile,
    record_keys: &HashMap<u64, InstanceKey>,
    used: &HashSet<u64>,
    part: &codec::DecodedPart,
) -> Option<&'a ObjectRecord> {
    let candidates = || {
        file.objects.iter().filter(|r| {
            r.level == part.level && r.class_id == part.class_id && !used.contains(&r.id)
        })
    };
    candidates()
        .find(|r| r.parent.and_then(|p| record_keys.get(&p).copied()) == part.owner)
        .or_else(|| candidates().next())
}

// ============================================================================
// Converter
// ============================================================================

pub struct Ade20kConverterFactory;

impl ConverterFactory for Ade20kConverterFactory {
    fn capabilities(&self) -> &'static [AnnotationType] {
        &[
            AnnotationType::Mask,
            AnnotationType::InstanceMask,
            AnnotationType::PartMask,
        ]
    }

    fn create(
        &self,
        root: &Path,
        options: &ExportOptions,
    ) -> Result<Box<dyn Converter>, LabelbridgeError> {
        Ok(Box::new(Ade20kConverter {
            root: root.to_path_buf(),
            save_media: options.save_media,
            save_instance_masks: options.save_instance_masks,
            lookup: ClassLookup::new(),
        }))
    }
}

struct Ade20kConverter {
    root: PathBuf,
    save_media: bool,
    save_instance_masks: bool,
    lookup: ClassLookup,
}

/// A level-0 object with its resolved instance key.
struct ObjectEntry<'a> {
    ann: &'a Annotation,
    key: InstanceKey,
    mask: &'a Mask,
    class_mask: bool,
}

struct PartEntry<'a> {
    ann: &'a Annotation,
    label: CategoryId,
    level: u32,
    owner: Option<InstanceKey>,
    mask: &'a Mask,
}

impl Converter for Ade20kConverter {
    fn begin(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        self.lookup = ClassLookup::sequential(categories);
        if self.lookup.len() < categories.len() {
            log::warn!(
                "{FORMAT_NAME}: only the first {} of {} categories have a raster class id",
                self.lookup.len(),
                categories.len()
            );
        }
        Ok(())
    }

    fn convert_item(
        &self,
        export: &ExportItem<'_>,
        out: &mut ItemWriter,
    ) -> Result<(), LabelbridgeError> {
        let item = export.item;
        check_item_id(FORMAT_NAME, &self.root, &item.subset)?;
        check_item_id(FORMAT_NAME, &self.root, &item.id)?;
        let files = ItemFiles {
            subset: item.subset.clone(),
            id: item.id.clone(),
            base: self.root.join(&item.subset).join(&item.id),
        };
        let stem = files.stem();

        let (objects, parts) = collect_layers(item, out);
        let (width, height) = raster_size(item, &self.root)?;

        // Objects.
        let layers: Vec<InstanceLayer<'_>> = objects
            .iter()
            .map(|object| InstanceLayer {
                key: object.key,
                mask: object.mask,
                z_order: object.ann.z_order,
            })
            .collect();
        let encoded = codec::encode_instances(width, height, &layers, &self.lookup)?;
        if encoded.overwritten_pixels > 0 {
            out.warn(
                ConversionIssueCode::PixelsOverwritten,
                format!(
                    "{} object pixel(s) are hidden by overlapping objects in {stem}{SEG_SUFFIX}",
                    encoded.overwritten_pixels
                ),
            );
        }
        let renumbered = objects
            .iter()
            .filter(|object| {
                encoded.discriminators.get(&object.key).map(|d| u32::from(*d))
                    != Some(object.key.instance_id.get())
            })
            .count();
        if renumbered > 0 {
            out.info(
                ConversionIssueCode::InstancesRenumbered,
                format!("{renumbered} instance id(s) were renumbered to fit the blue channel"),
            );
        }

        let mut records = Vec::with_capacity(objects.len() + parts.len());
        let mut record_of_key: HashMap<InstanceKey, u64> = HashMap::new();
        for object in &objects {
            let mut record = self.record(object.ann, export.categories, 0, object.key.label)?;
            record.instance = encoded.discriminators.get(&object.key).map(|d| u32::from(*d));
            record.class_mask = object.class_mask;
            if self.save_instance_masks {
                let relative = format!("{stem}/instance_{}.png", object.ann.id);
                out.write_gray_png(&files.dir().join(&relative), &mask_to_gray(object.mask))?;
                record.mask = Some(relative);
            }
            record_of_key.entry(object.key).or_insert(record.id);
            records.push(record);
        }

        // Parts.
        let part_layers: Vec<PartLayer<'_>> = parts
            .iter()
            .map(|part| PartLayer {
                label: part.label,
                level: part.level,
                mask: part.mask,
                z_order: part.ann.z_order,
            })
            .collect();
        let encoded_parts = codec::encode_parts(width, height, &part_layers, &self.lookup)?;
        if encoded_parts.overwritten_pixels > 0 {
            out.warn(
                ConversionIssueCode::PixelsOverwritten,
                format!(
                    "{} part pixel(s) are hidden by overlapping parts",
                    encoded_parts.overwritten_pixels
                ),
            );
        }
        for part in &parts {
            let mut record = self.record(part.ann, export.categories, part.level, part.label)?;
            record.parent = part.owner.and_then(|key| record_of_key.get(&key).copied());
            if part.owner.is_some() && record.parent.is_none() {
                log::debug!("{}: part {} owner is not exported", item.item_ref(), part.ann.id);
            }
            records.push(record);
        }
        records.sort_by_key(|record| record.id);

        let image = match item.image() {
            Some(image) if self.save_media => {
                if !image.exists() {
                    return Err(LabelbridgeError::MediaMissing {
                        item: item.item_ref(),
                        path: image.path.clone(),
                    });
                }
                let filename = format!("{stem}{}", image.extension());
                out.copy_file(&image.path, &files.dir().join(&filename))?;
                Some(filename)
            }
            _ => None,
        };

        let object_file = ObjectFile {
            image: Some(ImageRecord {
                filename: image,
                width,
                height,
            }),
            attributes: item.attributes.clone(),
            objects: records,
        };
        out.write_json(&files.json_path(), &object_file)?;
        out.write_rgb_png(&files.seg_path(), &encoded.raster)?;
        for (level, raster) in &encoded_parts.rasters {
            out.write_gray_png(&files.with_suffix(&format!("{PARTS_INFIX}{level}.png")), raster)?;
        }
        Ok(())
    }

    fn finish(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        let meta = MetaFile {
            labels: categories.iter().map(|(_, label)| label.clone()).collect(),
        };
        let path = self.root.join(META_FILE);
        let bytes = serde_json::to_vec_pretty(&meta).map_err(|source| LabelbridgeError::JsonWrite {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &bytes)
    }
}

impl Ade20kConverter {
    fn record(
        &self,
        ann: &Annotation,
        categories: &LabelCategories,
        level: u32,
        label: CategoryId,
    ) -> Result<ObjectRecord, LabelbridgeError> {
        let mut attributes = ann.attributes.clone();
        let occluded = match attributes.get(OCCLUDED).and_then(AttributeValue::as_bool) {
            Some(occluded) => {
                attributes.remove(OCCLUDED);
                occluded
            }
            None => false,
        };
        Ok(ObjectRecord {
            id: ann.id.get(),
            name: categories.name(label)?.to_string(),
            class_id: self.lookup.class_for(label)?,
            level,
            instance: None,
            occluded,
            parent: None,
            mask: None,
            class_mask: false,
            group: ann.group,
            z_order: ann.z_order,
            attributes,
        })
    }
}

/// Splits an item's raster annotations into objects and parts.
///
/// Plain masks take the lowest instance id not used by an instance mask
/// of the same label.
fn collect_layers<'a>(
    item: &'a DatasetItem,
    out: &mut ItemWriter,
) -> (Vec<ObjectEntry<'a>>, Vec<PartEntry<'a>>) {
    let mut taken: HashMap<CategoryId, BTreeSet<u32>> = HashMap::new();
    for key in item.annotations.iter().filter_map(Annotation::instance_key) {
        taken.entry(key.label).or_default().insert(key.instance_id.get());
    }

    let mut objects = Vec::new();
    let mut parts = Vec::new();
    for ann in &item.annotations {
        let Some(mask) = ann.raster() else {
            continue;
        };
        if mask.is_empty() {
            out.warn(
                ConversionIssueCode::EmptyMaskDropped,
                format!("annotation {} has an empty mask", ann.id),
            );
            continue;
        }
        let Some(label) = ann.label else {
            out.warn(
                ConversionIssueCode::UnlabeledMaskDropped,
                format!("annotation {} has no label", ann.id),
            );
            continue;
        };
        match &ann.kind {
            AnnotationKind::InstanceMask { instance_id, .. } => objects.push(ObjectEntry {
                ann,
                key: InstanceKey::new(label, *instance_id),
                mask,
                class_mask: false,
            }),
            AnnotationKind::Mask { .. } => {
                let used = taken.entry(label).or_default();
                let fresh = (0..=u32::MAX)
                    .find(|id| !used.contains(id))
                    .unwrap_or(u32::MAX);
                used.insert(fresh);
                objects.push(ObjectEntry {
                    ann,
                    key: InstanceKey::new(label, fresh),
                    mask,
                    class_mask: true,
                });
            }
            AnnotationKind::PartMask { level, owner, .. } => parts.push(PartEntry {
                ann,
                label,
                level: *level,
                owner: *owner,
                mask,
            }),
            _ => {}
        }
    }
    (objects, parts)
}

/// Raster size from the media, falling back to the first mask.
fn raster_size(item: &DatasetItem, root: &Path) -> Result<(u32, u32), LabelbridgeError> {
    if let Some(image) = item.image() {
        if image.size.is_some() || image.exists() {
            return image.dimensions();
        }
    }
    let from_masks = item
        .annotations
        .iter()
        .find_map(Annotation::raster)
        .map(Mask::dimensions);
    match (from_masks, item.image()) {
        (Some(size), _) => Ok(size),
        (None, Some(image)) => Err(LabelbridgeError::MediaMissing {
            item: item.item_ref(),
            path: image.path.clone(),
        }),
        (None, None) => Err(LabelbridgeError::content(
            root,
            format!("{}: no media and no masks to size the raster", item.item_ref()),
        )),
    }
}

fn mask_to_gray(mask: &Mask) -> GrayImage {
    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([if mask.get(x, y) { 255 } else { 0 }]))
}
