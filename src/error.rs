use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::ir::{AnnotationType, ItemRef};
use crate::validation::ValidationReport;

/// The main error type for labelbridge operations.
///
/// Every variant carries the path and/or the `(subset, item)` it concerns
/// so a report is actionable without re-running at a higher log level.
#[derive(Debug, Error)]
pub enum LabelbridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ambiguous format at {path}: matched {}", .candidates.join(", "))]
    FormatAmbiguous {
        path: PathBuf,
        candidates: Vec<String>,
    },

    #[error("No registered format matches {path}{}", fmt_rejections(.rejections))]
    FormatNotFound {
        path: PathBuf,
        /// `(format, reason)` for detectors that recognised a partial layout.
        rejections: Vec<(String, String)>,
    },

    #[error("Unknown format '{name}' (registered: {})", .available.join(", "))]
    UnknownFormat { name: String, available: Vec<String> },

    #[error("Format '{0}' is already registered")]
    DuplicateFormat(String),

    #[error("Invalid {format} layout at {path}: {message}")]
    StructureInvalid {
        format: String,
        path: PathBuf,
        message: String,
    },

    #[error("Invalid content in {path}{}: {message}", fmt_item(.item))]
    ContentInvalid {
        path: PathBuf,
        item: Option<ItemRef>,
        message: String,
    },

    #[error("Failed to parse JSON from {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse CSV from {path}: {source}")]
    CsvParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write CSV to {path}: {source}")]
    CsvWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to decode raster {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to encode raster {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Media missing for item {item}: expected {path}")]
    MediaMissing { item: ItemRef, path: PathBuf },

    #[error("Unresolved category: {reference}{}", fmt_item(.item))]
    CategoryUnresolved {
        reference: String,
        item: Option<ItemRef>,
    },

    #[error(
        "Mask size {} does not match media size {} ({source_name}){}",
        fmt_size(.actual), fmt_size(.expected), fmt_item(.item)
    )]
    MaskDimensionMismatch {
        source_name: String,
        expected: (u32, u32),
        actual: (u32, u32),
        item: Option<ItemRef>,
    },

    #[error(
        "Instance overflow: class {class_id} has {count} instances, the channel scheme holds at most 256{}",
        fmt_item(.item)
    )]
    InstanceOverflow {
        class_id: u32,
        count: usize,
        item: Option<ItemRef>,
    },

    #[error("Format '{format}' cannot represent {kind} annotations (item {item})")]
    CapabilityGap {
        format: String,
        kind: AnnotationType,
        item: ItemRef,
    },

    #[error("Duplicate item id '{id}' in subset '{subset}'")]
    DuplicateItem { subset: String, id: String },

    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("Conversion cancelled after {completed} item(s)")]
    Cancelled { completed: usize },

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },
}

/// Coarse classification of [`LabelbridgeError`] used for propagation
/// decisions and for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FormatAmbiguous,
    FormatNotFound,
    Registry,
    StructureInvalid,
    ContentInvalid,
    MediaMissing,
    CategoryUnresolved,
    MaskDimensionMismatch,
    InstanceOverflow,
    CapabilityGap,
    InvalidAnnotation,
    Cancelled,
    Io,
    Validation,
}

impl LabelbridgeError {
    pub fn kind(&self) -> ErrorKind {
        use LabelbridgeError as E;
        match self {
            E::Io(_) | E::IoAt { .. } | E::ImageEncode { .. } | E::JsonWrite { .. } => {
                ErrorKind::Io
            }
            E::CsvWrite { .. } => ErrorKind::Io,
            E::FormatAmbiguous { .. } => ErrorKind::FormatAmbiguous,
            E::FormatNotFound { .. } => ErrorKind::FormatNotFound,
            E::UnknownFormat { .. } | E::DuplicateFormat(_) => ErrorKind::Registry,
            E::StructureInvalid { .. } => ErrorKind::StructureInvalid,
            E::ContentInvalid { .. }
            | E::JsonParse { .. }
            | E::CsvParse { .. }
            | E::ImageDecode { .. }
            | E::ImageDimensionRead { .. }
            | E::DuplicateItem { .. } => ErrorKind::ContentInvalid,
            E::MediaMissing { .. } => ErrorKind::MediaMissing,
            E::CategoryUnresolved { .. } => ErrorKind::CategoryUnresolved,
            E::MaskDimensionMismatch { .. } => ErrorKind::MaskDimensionMismatch,
            E::InstanceOverflow { .. } => ErrorKind::InstanceOverflow,
            E::CapabilityGap { .. } => ErrorKind::CapabilityGap,
            E::InvalidAnnotation(_) => ErrorKind::InvalidAnnotation,
            E::Cancelled { .. } => ErrorKind::Cancelled,
            E::ValidationFailed { .. } => ErrorKind::Validation,
        }
    }

    /// Whether this error must abort a run even in best-effort mode.
    ///
    /// Detection and layout errors mean the wrong format was chosen; IO
    /// failures on the output side leave nothing sensible to continue with.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FormatAmbiguous
                | ErrorKind::FormatNotFound
                | ErrorKind::Registry
                | ErrorKind::StructureInvalid
                | ErrorKind::Cancelled
                | ErrorKind::Io
                | ErrorKind::Validation
        )
    }

    /// Attaches item context to errors raised below the item level
    /// (codec, mask constructors) that could not know it.
    pub fn in_item(mut self, item_ref: &ItemRef) -> Self {
        use LabelbridgeError as E;
        match &mut self {
            E::ContentInvalid { item, .. }
            | E::CategoryUnresolved { item, .. }
            | E::MaskDimensionMismatch { item, .. }
            | E::InstanceOverflow { item, .. } => {
                if item.is_none() {
                    *item = Some(item_ref.clone());
                }
            }
            _ => {}
        }
        self
    }

    /// The item this error concerns, when known.
    pub fn item(&self) -> Option<&ItemRef> {
        use LabelbridgeError as E;
        match self {
            E::ContentInvalid { item, .. }
            | E::CategoryUnresolved { item, .. }
            | E::MaskDimensionMismatch { item, .. }
            | E::InstanceOverflow { item, .. } => item.as_ref(),
            E::MediaMissing { item, .. } | E::CapabilityGap { item, .. } => Some(item),
            _ => None,
        }
    }

    pub(crate) fn content(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ContentInvalid {
            path: path.into(),
            item: None,
            message: message.into(),
        }
    }

    pub(crate) fn structure(
        format: &str,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::StructureInvalid {
            format: format.to_string(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }
}

fn fmt_item(item: &Option<ItemRef>) -> String {
    match item {
        Some(item) => format!(" (item {item})"),
        None => String::new(),
    }
}

fn fmt_size(size: &(u32, u32)) -> String {
    format!("{}x{}", size.0, size.1)
}

fn fmt_rejections(rejections: &[(String, String)]) -> String {
    struct Rejections<'a>(&'a [(String, String)]);

    impl fmt::Display for Rejections<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for (format, reason) in self.0 {
                write!(f, "; {format}: {reason}")?;
            }
            Ok(())
        }
    }

    Rejections(rejections).to_string()
}
