//! Cancellation of a running export, sequential and parallel.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use labelbridge::conversion::{CancellationToken, ItemWriter};
use labelbridge::dataset::Dataset;
use labelbridge::error::LabelbridgeError;
use labelbridge::format::io_ade20k::{Ade20kConverterFactory, Ade20kDetector, Ade20kExtractorFactory};
use labelbridge::format::{Converter, ConverterFactory, ExportItem, ExportOptions, FormatRegistry};
use labelbridge::ir::{Annotation, AnnotationType, DatasetItem, LabelCategories};
use walkdir::WalkDir;

mod common;

const FORMAT: &str = "ade20k-cancelling";

/// ade20k output that cancels `token` once `after` items were written.
struct CancellingFactory {
    token: CancellationToken,
    after: usize,
}

impl ConverterFactory for CancellingFactory {
    fn capabilities(&self) -> &'static [AnnotationType] {
        Ade20kConverterFactory.capabilities()
    }

    fn create(
        &self,
        root: &Path,
        options: &ExportOptions,
    ) -> Result<Box<dyn Converter>, LabelbridgeError> {
        Ok(Box::new(CancellingConverter {
            inner: Ade20kConverterFactory.create(root, options)?,
            token: self.token.clone(),
            after: self.after,
            written: AtomicUsize::new(0),
        }))
    }
}

struct CancellingConverter {
    inner: Box<dyn Converter>,
    token: CancellationToken,
    after: usize,
    written: AtomicUsize,
}

impl Converter for CancellingConverter {
    fn begin(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        self.inner.begin(categories)
    }

    fn convert_item(
        &self,
        item: &ExportItem<'_>,
        out: &mut ItemWriter,
    ) -> Result<(), LabelbridgeError> {
        self.inner.convert_item(item, out)?;
        if self.written.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(())
    }

    fn finish(&mut self, categories: &LabelCategories) -> Result<(), LabelbridgeError> {
        self.inner.finish(categories)
    }
}

fn registry(token: &CancellationToken, after: usize) -> FormatRegistry {
    let mut registry = FormatRegistry::new();
    registry
        .register(
            FORMAT,
            Box::new(Ade20kDetector),
            Box::new(Ade20kExtractorFactory),
            Box::new(CancellingFactory {
                token: token.clone(),
                after,
            }),
        )
        .expect("register");
    registry
}

fn cars(count: usize) -> Dataset {
    let mut dataset = Dataset::with_categories(LabelCategories::from_names(["car"]).unwrap());
    for i in 0..count {
        let x0 = (i % 6) as u32;
        dataset
            .add_item(
                DatasetItem::new(format!("car_{i:02}"), "train").with_annotations(vec![
                    Annotation::instance_mask(0u64, 0u32, 0u32, common::rect(x0, 0, x0 + 4, 6))
                        .with_attribute("occluded", false),
                ]),
            )
            .unwrap();
    }
    dataset
}

fn files(root: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk output"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().strip_prefix(root).unwrap().to_path_buf())
        .collect()
}

/// Ids of items whose object file was written.
fn written_items(files: &BTreeSet<PathBuf>) -> BTreeSet<String> {
    files
        .iter()
        .filter(|path| path.starts_with("train"))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .collect()
}

/// Every written item has both its object file and its raster.
fn assert_items_complete(files: &BTreeSet<PathBuf>) {
    for id in written_items(files) {
        assert!(files.contains(&PathBuf::from(format!("train/{id}_seg.png"))), "{id}");
    }
    for path in files {
        let name = path.to_string_lossy();
        assert!(!name.ends_with(".partial"), "{name}");
        if let Some(id) = name.strip_suffix("_seg.png") {
            assert!(files.contains(&PathBuf::from(format!("{id}.json"))), "{name}");
        }
    }
}

#[test]
fn sequential_export_stops_after_the_cancelling_item() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("out");
    let token = CancellationToken::new();

    let err = cars(12)
        .export(
            &root,
            FORMAT,
            &registry(&token, 3),
            &ExportOptions::default().cancel_token(token.clone()),
        )
        .unwrap_err();
    assert!(matches!(err, LabelbridgeError::Cancelled { completed: 3 }), "{err}");

    let files = files(&root);
    assert_items_complete(&files);
    let expected: BTreeSet<String> = ["car_00", "car_01", "car_02"].map(String::from).into();
    assert_eq!(written_items(&files), expected);
    assert!(!files.contains(Path::new("dataset_meta.json")));
}

#[test]
fn parallel_export_stops_without_half_written_items() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("out");
    let token = CancellationToken::new();
    let jobs = 4;

    let err = cars(40)
        .export(
            &root,
            FORMAT,
            &registry(&token, 3),
            &ExportOptions::default().jobs(jobs).cancel_token(token.clone()),
        )
        .unwrap_err();
    assert!(matches!(err, LabelbridgeError::Cancelled { .. }), "{err}");
    assert!(token.is_cancelled());

    // Items already running when the flag was raised still finish.
    let files = files(&root);
    assert_items_complete(&files);
    let written = written_items(&files).len();
    assert!(written >= 3, "{written}");
    assert!(written < 3 + jobs, "{written}");
}

#[test]
fn uncancelled_wrapper_writes_everything() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("out");
    let token = CancellationToken::new();

    let report = cars(5)
        .export(
            &root,
            FORMAT,
            &registry(&token, 100),
            &ExportOptions::default().jobs(2).cancel_token(token.clone()),
        )
        .unwrap();
    assert_eq!(report.output.items, 5);
    let files = files(&root);
    assert_items_complete(&files);
    assert_eq!(written_items(&files).len(), 5);
    assert!(files.contains(Path::new("dataset_meta.json")));
}
