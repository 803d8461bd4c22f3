//! Format detection over real directory trees.

use std::path::Path;

use labelbridge::error::{ErrorKind, LabelbridgeError};
use labelbridge::format::{detect_format, ExportOptions, FormatRegistry};

mod common;

fn detect(root: &Path) -> Result<String, LabelbridgeError> {
    detect_format(root, FormatRegistry::builtin())
}

fn export(root: &Path, format: &str) {
    common::street_dataset()
        .export(root, format, FormatRegistry::builtin(), &ExportOptions::default())
        .expect("export");
}

#[test]
fn every_builtin_writer_output_is_detected_as_itself() {
    let temp = tempfile::tempdir().unwrap();
    for format in FormatRegistry::builtin().list() {
        let root = temp.path().join(format);
        if format == "tfod-csv" {
            // Masks have no box representation; write one box instead.
            common::write_text(
                &root.join("train.csv"),
                "filename,width,height,class,xmin,ymin,xmax,ymax\na.jpg,10,10,car,0.1,0.1,0.5,0.5\n",
            );
        } else {
            export(&root, format);
        }
        assert_eq!(detect(&root).unwrap(), format);
    }
}

#[test]
fn detection_is_deterministic() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    export(&root, "ade20k");

    let first = detect(&root).unwrap();
    for _ in 0..5 {
        assert_eq!(detect(&root).unwrap(), first);
    }
}

#[test]
fn two_matching_layouts_are_ambiguous() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("mixed");
    export(&root, "ade20k");
    common::write_text(
        &root.join("train.csv"),
        "filename,width,height,class,xmin,ymin,xmax,ymax\n",
    );

    match detect(&root).unwrap_err() {
        LabelbridgeError::FormatAmbiguous { candidates, .. } => {
            assert_eq!(candidates, vec!["ade20k".to_string(), "tfod-csv".to_string()]);
        }
        other => panic!("expected FormatAmbiguous, got {other}"),
    }
}

#[test]
fn unrelated_directory_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    common::write_text(&temp.path().join("notes.txt"), "nothing to see");

    let err = detect(temp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatNotFound);
    match err {
        LabelbridgeError::FormatNotFound { rejections, .. } => assert!(rejections.is_empty()),
        other => panic!("expected FormatNotFound, got {other}"),
    }
}

#[test]
fn missing_root_is_an_io_error() {
    let temp = tempfile::tempdir().unwrap();
    let err = detect(&temp.path().join("absent")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
