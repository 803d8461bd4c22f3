//! Conversion report types for tracking lossiness and per-item failures.
//!
//! Both directions of a run produce a [`ConversionReport`]: imports list
//! the items that could not be read, exports additionally list every
//! annotation the target format could not represent.

use serde::Serialize;
use std::fmt;

use crate::error::{ErrorKind, LabelbridgeError};
use crate::ir::{AnnotationType, ItemRef};

/// Which side of a conversion a report describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Import,
    #[default]
    Export,
}

/// A report generated by an import or export run.
///
/// Capability gaps and failed items are returned here as data; they are
/// logged as well but never only logged.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversionReport {
    /// Format read or written.
    pub format: String,
    pub stage: Stage,
    /// Counts of what the run was given.
    pub input: ConversionCounts,
    /// Counts of what the run produced.
    pub output: ConversionCounts,
    pub issues: Vec<ConversionIssue>,
}

impl ConversionReport {
    pub fn new(stage: Stage, format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            stage,
            ..Default::default()
        }
    }

    pub fn add(&mut self, issue: ConversionIssue) {
        self.issues.push(issue);
    }

    pub fn error_count(&self) -> usize {
        self.count(ConversionSeverity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(ConversionSeverity::Warning)
    }

    pub fn info_count(&self) -> usize {
        self.count(ConversionSeverity::Info)
    }

    fn count(&self, severity: ConversionSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Returns true if any information was lost or any item failed.
    pub fn is_lossy(&self) -> bool {
        self.error_count() > 0 || self.warning_count() > 0
    }

    /// Capability-gap entries: one per unrepresentable annotation.
    pub fn gaps(&self) -> impl Iterator<Item = &ConversionIssue> {
        self.issues
            .iter()
            .filter(|i| i.code == ConversionIssueCode::CapabilityGap)
    }

    pub fn gap_count(&self) -> usize {
        self.gaps().count()
    }

    /// Items that failed and were skipped.
    pub fn failures(&self) -> impl Iterator<Item = &ConversionIssue> {
        self.issues
            .iter()
            .filter(|i| i.code == ConversionIssueCode::ItemFailed)
    }

    /// Orders issues by item position, keeping insertion order within an item.
    pub(crate) fn sort_issues(&mut self) {
        self.issues.sort_by_key(|issue| issue.position.unwrap_or(usize::MAX));
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.stage {
            Stage::Import => "read",
            Stage::Export => "wrote",
        };
        writeln!(
            f,
            "  {} {}: {} of {} item(s), {} annotation(s), {} categories",
            verb,
            self.format,
            self.output.items,
            self.input.items,
            self.output.annotations,
            self.output.categories
        )?;

        for (title, severity) in [
            ("Errors", ConversionSeverity::Error),
            ("Warnings", ConversionSeverity::Warning),
            ("Notes", ConversionSeverity::Info),
        ] {
            let count = self.count(severity);
            if count == 0 {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{} ({}):", title, count)?;
            for issue in self.issues.iter().filter(|i| i.severity == severity) {
                writeln!(f, "  - {}", issue)?;
            }
        }

        Ok(())
    }
}

/// Counts of dataset elements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConversionCounts {
    pub items: usize,
    pub categories: usize,
    pub annotations: usize,
}

/// A single issue found while converting.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionIssue {
    pub severity: ConversionSeverity,
    pub code: ConversionIssueCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemRef>,
    /// Variant that could not be represented (capability gaps only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_type: Option<AnnotationType>,
    /// Error classification (failed items only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip)]
    pub(crate) position: Option<usize>,
}

impl ConversionIssue {
    fn new(severity: ConversionSeverity, code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            item: None,
            annotation_type: None,
            error_kind: None,
            message: message.into(),
            position: None,
        }
    }

    /// Create a warning-level issue (indicates lossiness).
    pub fn warning(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self::new(ConversionSeverity::Warning, code, message)
    }

    /// Create an info-level issue (policy note, does not block).
    pub fn info(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self::new(ConversionSeverity::Info, code, message)
    }

    /// An annotation the target format cannot represent.
    pub fn capability_gap(format: &str, item: ItemRef, kind: AnnotationType, annotation_id: u64) -> Self {
        let mut issue = Self::new(
            ConversionSeverity::Warning,
            ConversionIssueCode::CapabilityGap,
            format!("{format} cannot represent {kind} annotation {annotation_id}"),
        );
        issue.item = Some(item);
        issue.annotation_type = Some(kind);
        issue
    }

    /// An item that was skipped because of `error`.
    pub fn item_failed(item: Option<ItemRef>, error: &LabelbridgeError) -> Self {
        let mut issue = Self::new(
            ConversionSeverity::Error,
            ConversionIssueCode::ItemFailed,
            error.to_string(),
        );
        issue.item = item;
        issue.error_kind = Some(error.kind());
        issue
    }

    pub fn for_item(mut self, item: ItemRef) -> Self {
        self.item = Some(item);
        self
    }

    pub(crate) fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for ConversionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}: {}", item, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Severity level for conversion issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSeverity {
    /// An item was not converted.
    Error,
    /// Information was lost.
    Warning,
    /// A policy decision; nothing was lost.
    Info,
}

/// Stable issue codes for programmatic consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionIssueCode {
    /// The target format cannot represent an annotation variant.
    CapabilityGap,
    /// An item failed and was skipped (best-effort mode).
    ItemFailed,
    /// Empty masks encode no pixels and were not written.
    EmptyMaskDropped,
    /// Overlapping masks were flattened into one raster.
    PixelsOverwritten,
    /// Instance ids did not fit the raster's discriminator and were renumbered.
    InstancesRenumbered,
    /// Masks without a label have no class id and were not written.
    UnlabeledMaskDropped,
    /// Items without annotations leave no trace in the output.
    ItemWithoutAnnotations,
    /// Annotation attributes are not stored by the format.
    DropAnnotationAttributes,
    /// Item attributes are not stored by the format.
    DropItemAttributes,
    /// An object record referenced nothing in its raster.
    RecordWithoutPixels,
}
