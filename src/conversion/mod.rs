//! Export driver.
//!
//! Runs a format's converter over a sequence of items, either on the
//! calling thread or on a bounded `rayon` pool. For every item the driver
//!
//! 1. checks the cancellation token,
//! 2. splits off annotations the target cannot represent and records one
//!    capability-gap issue for each,
//! 3. lets the converter write the rest through an [`ItemWriter`], removing
//!    the item's files again if it fails.
//!
//! Per-item failures are collected in the [`ConversionReport`] unless the
//! run is strict or the error is fatal.

pub mod report;
mod writer;

pub use report::{
    ConversionCounts, ConversionIssue, ConversionIssueCode, ConversionReport, ConversionSeverity,
    Stage,
};
pub use writer::ItemWriter;
pub(crate) use writer::write_atomic;

use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LabelbridgeError;
use crate::format::{Converter, ExportItem, ExportOptions, FormatPlugin};
use crate::ir::{AnnotationType, DatasetItem, ItemRef, LabelCategories};

/// Shared flag that asks a running export to stop between items.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Creates `root`, or checks that it may be written into.
///
/// # Errors
/// A non-empty existing directory is refused unless `overwrite` is set.
pub(crate) fn prepare_output_dir(
    format: &str,
    root: &Path,
    overwrite: bool,
) -> Result<(), LabelbridgeError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(LabelbridgeError::structure(
                format,
                root,
                "output path exists and is not a directory",
            ));
        }
        let mut entries = fs::read_dir(root).map_err(|source| LabelbridgeError::io_at(root, source))?;
        if !overwrite && entries.next().is_some() {
            return Err(LabelbridgeError::structure(
                format,
                root,
                "output directory is not empty (pass overwrite to write into it)",
            ));
        }
        Ok(())
    } else {
        fs::create_dir_all(root).map_err(|source| LabelbridgeError::io_at(root, source))
    }
}

/// Writes `items` to `root` with `plugin`'s converter.
///
/// Items are handed to the converter in slice order; `ExportItem::index`
/// is the position in `items`.
///
/// # Errors
/// Fatal errors (layout, IO, cancellation) abort the run; so does any
/// per-item error when `options.strict` is set. Otherwise failed items
/// are listed in the returned report.
pub fn export_items(
    plugin: &FormatPlugin,
    categories: &LabelCategories,
    items: &[&DatasetItem],
    root: &Path,
    options: &ExportOptions,
) -> Result<ConversionReport, LabelbridgeError> {
    prepare_output_dir(&plugin.name, root, options.overwrite)?;

    let mut converter = plugin.converter.create(root, options)?;
    let capabilities: BTreeSet<AnnotationType> =
        plugin.converter.capabilities().iter().copied().collect();

    let mut report = ConversionReport::new(Stage::Export, plugin.name.clone());
    report.input = ConversionCounts {
        items: items.len(),
        categories: categories.len(),
        annotations: items.iter().map(|item| item.annotations.len()).sum(),
    };

    converter.begin(categories)?;

    let job = ExportJob {
        format: &plugin.name,
        converter: converter.as_ref(),
        capabilities: &capabilities,
        categories,
        options,
    };
    let collector = Collector {
        report,
        strict: options.strict,
    };

    let collector = if options.jobs <= 1 {
        job.run_sequential(items, collector)?
    } else {
        job.run_parallel(items, collector)?
    };

    let mut report = collector.report;
    report.sort_issues();
    report.output.categories = categories.len();

    converter.finish(categories)?;

    log::info!(
        "exported {} of {} item(s) as {} to {}",
        report.output.items,
        report.input.items,
        plugin.name,
        root.display()
    );
    Ok(report)
}

struct ExportJob<'a> {
    format: &'a str,
    converter: &'a dyn Converter,
    capabilities: &'a BTreeSet<AnnotationType>,
    categories: &'a LabelCategories,
    options: &'a ExportOptions,
}

struct ItemOutcome {
    item: ItemRef,
    issues: Vec<ConversionIssue>,
    result: Result<usize, LabelbridgeError>,
}

impl ExportJob<'_> {
    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn run_sequential(
        &self,
        items: &[&DatasetItem],
        mut collector: Collector,
    ) -> Result<Collector, LabelbridgeError> {
        for (index, item) in items.iter().enumerate() {
            if self.cancelled() {
                log::warn!("export cancelled after {index} item(s)");
                return Err(LabelbridgeError::Cancelled { completed: index });
            }
            collector.record(index, self.export_one(index, item))?;
        }
        Ok(collector)
    }

    fn run_parallel(
        &self,
        items: &[&DatasetItem],
        collector: Collector,
    ) -> Result<Collector, LabelbridgeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
            .map_err(|err| LabelbridgeError::Io(std::io::Error::other(err)))?;
        log::debug!("exporting with {} worker thread(s)", self.options.jobs);

        let collector = Mutex::new(collector);
        let completed = AtomicUsize::new(0);
        pool.install(|| {
            items.par_iter().enumerate().try_for_each(|(index, item)| {
                if self.cancelled() {
                    return Err(LabelbridgeError::Cancelled {
                        completed: completed.load(Ordering::SeqCst),
                    });
                }
                let outcome = self.export_one(index, item);
                collector
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(index, outcome)?;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })?;

        Ok(collector.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    fn export_one(&self, index: usize, item: &DatasetItem) -> ItemOutcome {
        let item_ref = item.item_ref();
        let mut issues = Vec::new();

        let (supported, unsupported): (Vec<_>, Vec<_>) = item
            .annotations
            .iter()
            .partition(|ann| self.capabilities.contains(&ann.annotation_type()));
        for ann in &unsupported {
            issues.push(
                ConversionIssue::capability_gap(
                    self.format,
                    item_ref.clone(),
                    ann.annotation_type(),
                    ann.id.get(),
                )
                .at(index),
            );
        }
        if !unsupported.is_empty() {
            log::warn!(
                "{item_ref}: {} annotation(s) not representable in {}",
                unsupported.len(),
                self.format
            );
        }

        let narrowed;
        let view = if unsupported.is_empty() {
            item
        } else {
            narrowed = DatasetItem {
                id: item.id.clone(),
                subset: item.subset.clone(),
                media: item.media.clone(),
                annotations: supported.into_iter().cloned().collect(),
                attributes: item.attributes.clone(),
            };
            &narrowed
        };

        let mut out = ItemWriter::new();
        let export_item = ExportItem {
            index,
            item: view,
            categories: self.categories,
        };
        log::debug!("writing {item_ref}");
        let result = match self.converter.convert_item(&export_item, &mut out) {
            Ok(()) => {
                issues.extend(
                    out.into_notes()
                        .into_iter()
                        .map(|note| note.for_item(item_ref.clone()).at(index)),
                );
                Ok(view.annotations.len())
            }
            Err(err) => {
                out.rollback();
                Err(err.in_item(&item_ref))
            }
        };

        ItemOutcome {
            item: item_ref,
            issues,
            result,
        }
    }
}

struct Collector {
    report: ConversionReport,
    strict: bool,
}

impl Collector {
    fn record(&mut self, index: usize, outcome: ItemOutcome) -> Result<(), LabelbridgeError> {
        self.report.issues.extend(outcome.issues);
        match outcome.result {
            Ok(annotations) => {
                self.report.output.items += 1;
                self.report.output.annotations += annotations;
                Ok(())
            }
            Err(err) if self.strict || err.is_fatal() => Err(err),
            Err(err) => {
                log::warn!("skipping {}: {err}", outcome.item);
                self.report
                    .add(ConversionIssue::item_failed(Some(outcome.item), &err).at(index));
                Ok(())
            }
        }
    }
}
