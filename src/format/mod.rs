//! Format plugins: detection, extraction and conversion contracts.
//!
//! A format is a triple of a [`Detector`], an [`ExtractorFactory`] and a
//! [`ConverterFactory`], registered by name in a [`FormatRegistry`].
//! Plugins are selected by name or by detection, never by probing for
//! optional methods.
//!
//! Built-in formats:
//!
//! | name       | reads | writes | annotation types |
//! |------------|-------|--------|------------------|
//! | `ade20k`   | yes   | yes    | instance mask, part mask, mask |
//! | `ir-json`  | yes   | yes    | all |
//! | `tfod-csv` | yes   | yes    | bbox |

pub mod detect;
pub mod io_ade20k;
pub mod io_ir_json;
pub mod io_tfod_csv;
mod options;
pub mod registry;

pub use detect::detect_format;
pub use options::{ExportOptions, ImportOptions};
pub use registry::{FormatPlugin, FormatRegistry};

use std::path::Path;

use crate::conversion::ItemWriter;
use crate::error::LabelbridgeError;
use crate::ir::{AnnotationType, DatasetItem, LabelCategories};

/// Cheap structural check of a dataset root.
pub trait Detector: Send + Sync {
    /// `Ok(true)` if the layout matches, `Ok(false)` if it is unrelated.
    ///
    /// An `Err` means the tree carries part of this format's signature
    /// but violates its layout (for example a segmentation raster without
    /// its object file). Detection reports such errors as reasons when no
    /// other format matches.
    ///
    /// Implementations must only look at names and file headers, never
    /// parse annotation content.
    fn detect(&self, root: &Path) -> Result<bool, LabelbridgeError>;
}

/// Opens an [`Extractor`] over a dataset root.
pub trait ExtractorFactory: Send + Sync {
    /// # Errors
    /// Layout violations are [`LabelbridgeError::StructureInvalid`].
    fn open(
        &self,
        root: &Path,
        options: &ImportOptions,
    ) -> Result<Box<dyn Extractor>, LabelbridgeError>;
}

/// A finite, restartable source of dataset items.
pub trait Extractor: Send {
    /// Labels declared by, or discovered in, the source.
    fn categories(&self) -> &LabelCategories;

    /// Subset names in extraction order.
    fn subsets(&self) -> Vec<String>;

    /// Number of items [`items`](Extractor::items) yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a fresh traversal, ordered by subset then item id.
    ///
    /// Every call starts from the beginning. Per-item failures are yielded
    /// in place of the item and do not end the sequence.
    fn items(&self) -> Box<dyn Iterator<Item = Result<DatasetItem, LabelbridgeError>> + '_>;
}

/// One item handed to a [`Converter`].
///
/// The item only carries annotations the converter declared it supports.
#[derive(Clone, Copy, Debug)]
pub struct ExportItem<'a> {
    /// Position in the export sequence; buffering converters sort by it.
    pub index: usize,
    pub item: &'a DatasetItem,
    pub categories: &'a LabelCategories,
}

/// Creates a [`Converter`] for an output root.
pub trait ConverterFactory: Send + Sync {
    fn capabilities(&self) -> &'static [AnnotationType];

    fn create(
        &self,
        root: &Path,
        options: &ExportOptions,
    ) -> Result<Box<dyn Converter>, LabelbridgeError>;
}

/// Writes items in one format.
///
/// `begin` and `finish` run once on the driving thread; `convert_item`
/// may be called from several worker threads at once.
pub trait Converter: Send + Sync {
    fn begin(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError>;

    /// Writes one item. Files must go through `out` so that a failed item
    /// can be removed again.
    fn convert_item(
        &self,
        item: &ExportItem<'_>,
        out: &mut ItemWriter,
    ) -> Result<(), LabelbridgeError>;

    fn finish(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError>;
}

/// Lower-cased extension of `path`, if any.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Rejects item ids that would escape the output directory.
pub(crate) fn check_item_id(format: &str, root: &Path, id: &str) -> Result<(), LabelbridgeError> {
    let escapes = id.is_empty()
        || id.starts_with('/')
        || id.contains('\\')
        || id.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if escapes {
        return Err(LabelbridgeError::structure(
            format,
            root,
            format!("item id '{id}' is not a relative path"),
        ));
    }
    Ok(())
}
