//! Integration tests for the ade20k mask-channel format.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use labelbridge::conversion::CancellationToken;
use labelbridge::dataset::Dataset;
use labelbridge::error::{ErrorKind, LabelbridgeError};
use labelbridge::format::{ExportOptions, FormatRegistry, ImportOptions};
use labelbridge::ir::{AnnotationKind, AnnotationType, ImageRef, ItemRef};
use walkdir::WalkDir;

mod common;

fn export(dataset: &Dataset, root: &Path, format: &str, options: &ExportOptions) {
    let report = dataset
        .export(root, format, FormatRegistry::builtin(), options)
        .expect("export");
    assert_eq!(report.error_count(), 0, "{report}");
}

fn import(root: &Path, format: Option<&str>) -> Dataset {
    Dataset::import(root, format, FormatRegistry::builtin(), &ImportOptions::default())
        .expect("import")
}

/// Relative path -> file contents for every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk output"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(entry.path()).unwrap())
        })
        .collect()
}

#[test]
fn export_then_import_restores_the_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    let dataset = common::street_dataset();

    export(&dataset, &root, "ade20k", &ExportOptions::default());
    assert!(root.join("dataset_meta.json").is_file());
    assert!(root.join("train/street_1_seg.png").is_file());
    assert!(root.join("train/street_1_parts_1.png").is_file());
    assert!(root.join("val/street_3.json").is_file());

    let restored = import(&root, None);
    assert_eq!(restored, dataset);
}

#[test]
fn ade20k_to_ir_json_and_back_is_lossless() {
    let temp = tempfile::tempdir().unwrap();
    let ade = temp.path().join("ade");
    let json = temp.path().join("json");
    let back = temp.path().join("back");
    let dataset = common::street_dataset();

    export(&dataset, &ade, "ade20k", &ExportOptions::default());
    let first = import(&ade, Some("ade20k"));
    export(&first, &json, "ir-json", &ExportOptions::default());
    let second = import(&json, Some("ir-json"));
    export(&second, &back, "ade20k", &ExportOptions::default());
    let third = import(&back, Some("ade20k"));

    assert_eq!(second, dataset);
    assert_eq!(third, dataset);
    assert_eq!(snapshot(&ade), snapshot(&back));
}

#[test]
fn worker_count_does_not_change_the_output() {
    let temp = tempfile::tempdir().unwrap();
    let sequential = temp.path().join("seq");
    let parallel = temp.path().join("par");
    let dataset = common::street_dataset();

    export(&dataset, &sequential, "ade20k", &ExportOptions::default());
    export(&dataset, &parallel, "ade20k", &ExportOptions::default().jobs(4));

    assert_eq!(snapshot(&sequential), snapshot(&parallel));
}

#[test]
fn class_five_instance_one_decodes_to_one_instance_mask() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("train");
    common::write_seg(
        &dir.join("house_seg.png"),
        &common::seg_with_rect(Rgb([0, 5, 1]), 2, 2, 6, 5),
    );
    common::write_text(
        &dir.join("house.json"),
        r#"{"objects": [{"id": 0, "name": "building", "class_id": 5, "instance": 1}]}"#,
    );

    let dataset = import(temp.path(), None);
    let item = dataset.get("train", "house").expect("item");
    assert_eq!(item.annotations.len(), 1);

    let ann = &item.annotations[0];
    assert_eq!(ann.annotation_type(), AnnotationType::InstanceMask);
    let label = ann.label.expect("labeled");
    assert_eq!(dataset.categories().name(label).unwrap(), "building");
    match &ann.kind {
        AnnotationKind::InstanceMask { mask, instance_id } => {
            assert_eq!(instance_id.get(), 1);
            assert_eq!(mask, &common::rect(2, 2, 6, 5));
        }
        other => panic!("unexpected annotation {other:?}"),
    }
}

#[test]
fn missing_object_file_is_a_layout_error() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("train");
    common::write_seg(&dir.join("a_seg.png"), &common::seg_with_rect(Rgb([0, 1, 0]), 0, 0, 2, 2));
    common::write_text(&dir.join("a.json"), r#"{"objects": [{"id": 0, "name": "car", "class_id": 1, "instance": 0}]}"#);
    common::write_seg(&dir.join("b_seg.png"), &common::seg_with_rect(Rgb([0, 1, 0]), 0, 0, 2, 2));

    let err = Dataset::import(
        temp.path(),
        Some("ade20k"),
        FormatRegistry::builtin(),
        &ImportOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StructureInvalid);
    assert!(err.to_string().contains("b_seg.png"), "{err}");

    let err = Dataset::import(temp.path(), None, FormatRegistry::builtin(), &ImportOptions::default())
        .unwrap_err();
    match err {
        LabelbridgeError::FormatNotFound { rejections, .. } => {
            assert_eq!(rejections.len(), 1);
            assert_eq!(rejections[0].0, "ade20k");
        }
        other => panic!("expected FormatNotFound, got {other}"),
    }
}

#[test]
fn unreadable_items_are_skipped_unless_strict() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("train");
    common::write_seg(&dir.join("a_seg.png"), &common::seg_with_rect(Rgb([0, 1, 0]), 0, 0, 2, 2));
    common::write_text(&dir.join("a.json"), r#"{"objects": [{"id": 0, "name": "car", "class_id": 1, "instance": 0}]}"#);
    common::write_seg(&dir.join("b_seg.png"), &common::seg_with_rect(Rgb([0, 9, 0]), 0, 0, 2, 2));
    common::write_text(&dir.join("b.json"), r#"{"objects": []}"#);

    let (dataset, report) = Dataset::import_with_report(
        temp.path(),
        None,
        FormatRegistry::builtin(),
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(dataset.len(), 1);
    assert_eq!(report.failures().count(), 1);

    let err = Dataset::import(
        temp.path(),
        None,
        FormatRegistry::builtin(),
        &ImportOptions::default().strict(true),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CategoryUnresolved);
}

#[test]
fn non_empty_output_needs_overwrite() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    let dataset = common::street_dataset();

    export(&dataset, &root, "ade20k", &ExportOptions::default());
    let err = dataset
        .export(&root, "ade20k", FormatRegistry::builtin(), &ExportOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StructureInvalid);

    export(&dataset, &root, "ade20k", &ExportOptions::default().overwrite(true));
}

#[test]
fn cancelled_export_stops_before_the_first_item() {
    let temp = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = common::street_dataset()
        .export(
            &temp.path().join("ade"),
            "ade20k",
            FormatRegistry::builtin(),
            &ExportOptions::default().cancel_token(token),
        )
        .unwrap_err();
    assert!(matches!(err, LabelbridgeError::Cancelled { completed: 0 }));
}

#[test]
fn saved_media_is_found_again() {
    let temp = tempfile::tempdir().unwrap();
    let media = temp.path().join("media/street_2.bmp");
    common::write_bmp(&media, common::WIDTH, common::HEIGHT);

    let mut dataset = common::street_dataset();
    let mut item = dataset.remove_item("train", "street_2").unwrap();
    item = item.with_image(ImageRef::new(&media));
    dataset.add_item(item).unwrap();

    let root = temp.path().join("ade");
    export(&dataset, &root, "ade20k", &ExportOptions::default().save_media(true));
    assert!(root.join("train/street_2.bmp").is_file());

    let restored = import(&root, None);
    let image = restored.get("train", "street_2").unwrap().image().expect("media");
    assert_eq!(image.dimensions().unwrap(), (common::WIDTH, common::HEIGHT));
    assert!(restored.get("train", "street_1").unwrap().image().is_none());
}

fn import_strict(root: &Path) -> Result<Dataset, LabelbridgeError> {
    Dataset::import(
        root,
        Some("ade20k"),
        FormatRegistry::builtin(),
        &ImportOptions::default().strict(true),
    )
}

#[test]
fn media_size_is_read_from_the_file_not_the_record() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("train");
    common::write_seg(&dir.join("x_seg.png"), &RgbImage::new(3, 3));
    common::write_bmp(&dir.join("x.bmp"), 4, 4);
    common::write_text(
        &dir.join("x.json"),
        r#"{"image": {"width": 3, "height": 3}, "objects": []}"#,
    );

    let err = import_strict(temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaskDimensionMismatch);
    assert_eq!(err.item(), Some(&ItemRef::new("train", "x")));

    // Record and media agree with each other but not with the raster.
    common::write_text(
        &dir.join("x.json"),
        r#"{"image": {"width": 4, "height": 4}, "objects": []}"#,
    );
    let err = import_strict(temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaskDimensionMismatch);

    // A matching media file with a stale record.
    common::write_bmp(&dir.join("x.bmp"), 3, 3);
    let err = import_strict(temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaskDimensionMismatch);

    common::write_text(
        &dir.join("x.json"),
        r#"{"image": {"width": 3, "height": 3}, "objects": []}"#,
    );
    let dataset = import_strict(temp.path()).expect("consistent sizes");
    let image = dataset.get("train", "x").unwrap().image().expect("media");
    assert_eq!(image.dimensions().unwrap(), (3, 3));
}

#[test]
fn missing_recorded_media_is_reported_with_its_item() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("train");
    common::write_seg(&dir.join("a_seg.png"), &common::seg_with_rect(Rgb([0, 1, 0]), 0, 0, 2, 2));
    common::write_text(
        &dir.join("a.json"),
        r#"{"image": {"filename": "a.jpg", "width": 12, "height": 8},
            "objects": [{"id": 0, "name": "car", "class_id": 1, "instance": 0}]}"#,
    );
    common::write_seg(&dir.join("b_seg.png"), &common::seg_with_rect(Rgb([0, 1, 0]), 0, 0, 2, 2));
    common::write_text(&dir.join("b.json"), r#"{"objects": [{"id": 0, "name": "car", "class_id": 1, "instance": 0}]}"#);

    let err = import_strict(temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MediaMissing);
    assert_eq!(err.item(), Some(&ItemRef::new("train", "a")));
    match &err {
        LabelbridgeError::MediaMissing { path, .. } => assert!(path.ends_with("train/a.jpg")),
        other => panic!("expected MediaMissing, got {other}"),
    }

    let (dataset, report) = Dataset::import_with_report(
        temp.path(),
        Some("ade20k"),
        FormatRegistry::builtin(),
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(dataset.len(), 1);
    assert!(dataset.get("train", "b").is_some());
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn failed_item_leaves_no_files_behind() {
    let temp = tempfile::tempdir().unwrap();
    let mut dataset = common::street_dataset();
    let item = dataset.remove_item("train", "street_2").unwrap();
    dataset
        .add_item(item.with_image(ImageRef::new(temp.path().join("gone/street_2.jpg"))))
        .unwrap();

    let root = temp.path().join("ade");
    let report = dataset
        .export(
            &root,
            "ade20k",
            FormatRegistry::builtin(),
            &ExportOptions::default().save_media(true).save_instance_masks(true),
        )
        .unwrap();
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.output.items, 2);

    let files = snapshot(&root);
    assert!(files.keys().any(|path| path.starts_with("train/street_1")));
    assert!(files.contains_key(Path::new("train/street_1/instance_0.png")));
    assert!(
        !files.keys().any(|path| path.to_string_lossy().contains("street_2")),
        "{:?}",
        files.keys().collect::<Vec<_>>()
    );
    assert!(!files.keys().any(|path| path.to_string_lossy().ends_with(".partial")));
}
