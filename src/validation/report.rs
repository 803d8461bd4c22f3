//! Validation report types for structured error reporting.
//!
//! Results can be printed, serialized to JSON or filtered by code.

use serde::Serialize;
use std::fmt;

/// The result of validating a dataset.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// Returns true if there are no errors.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Returns true if validation passed in strict mode (no errors or warnings).
    pub fn is_ok_strict(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues with the given code.
    pub fn with_code(&self, code: IssueCode) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |issue| issue.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Validation passed: no issues found");
        }

        writeln!(
            f,
            "Validation completed with {} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        writeln!(f)?;

        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }

        Ok(())
    }
}

/// A single validation issue (error or warning).
#[derive(Clone, Debug, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,

    /// A stable code for the issue type.
    pub code: IssueCode,

    pub message: String,

    /// Where the issue occurred.
    pub context: IssueContext,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        code: IssueCode,
        message: impl Into<String>,
        context: IssueContext,
    ) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Error, code, message, context)
    }

    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Warning, code, message, context)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(
            f,
            "[{}] {:?} in {}: {}",
            severity, self.code, self.context, self.message
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Suspicious but still convertible.
    Warning,
    /// Invalid data that a converter would reject or misrepresent.
    Error,
}

/// A stable code identifying the type of validation issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // Label table
    EmptyCategoryName,
    /// A label names a parent that is not in the table.
    UnknownParentCategory,

    // Identity
    DuplicateAnnotationId,
    /// Two instance masks share label and instance id.
    DuplicateInstance,
    /// More distinct instances of one label than a channel raster holds.
    InstanceOverflow,

    // Media
    MediaMissing,
    /// A mask does not have the size of the item's image.
    MaskDimensionMismatch,

    // Masks
    EmptyMask,
    /// A raster annotation has no label and cannot be encoded.
    MaskWithoutLabel,
    /// Two instance masks claim the same pixels.
    OverlappingInstances,
    /// A part names an owner instance that is not in the item.
    PartOwnerMissing,
    /// A part has pixels outside its owner instance.
    PartOutsideOwner,

    // Geometry
    BBoxNotFinite,
    InvalidBBoxOrdering,
    BBoxOutOfBounds,
    InvalidBBoxArea,
    /// A polygon has fewer than three vertices or non-finite ones.
    InvalidPolygon,
}

/// Where a validation issue occurred.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum IssueContext {
    Dataset,
    Category { id: u32 },
    Item { subset: String, id: String },
    Annotation { subset: String, item: String, id: u64 },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Dataset => write!(f, "dataset"),
            IssueContext::Category { id } => write!(f, "category {}", id),
            IssueContext::Item { subset, id } => write!(f, "item {}/{}", subset, id),
            IssueContext::Annotation { subset, item, id } => {
                write!(f, "annotation {} of {}/{}", id, subset, item)
            }
        }
    }
}
