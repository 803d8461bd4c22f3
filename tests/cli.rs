use std::path::Path;

use assert_cmd::Command;
use labelbridge::dataset::Dataset;
use labelbridge::format::{ExportOptions, FormatRegistry};
use labelbridge::ir::{Annotation, DatasetItem, LabelCategories};
use predicates::prelude::*;

mod common;

fn labelbridge() -> Command {
    Command::cargo_bin("labelbridge").unwrap()
}

fn write_dataset(dataset: &Dataset, root: &Path, format: &str) {
    dataset
        .export(root, format, FormatRegistry::builtin(), &ExportOptions::default())
        .expect("write fixture dataset");
}

/// Two cars claiming the same pixels; only a lossless format keeps both.
fn overlapping_dataset() -> Dataset {
    let mut dataset = Dataset::with_categories(LabelCategories::from_names(["car"]).unwrap());
    dataset
        .add_item(DatasetItem::new("a", "train").with_annotations(vec![
            Annotation::instance_mask(0u64, 0u32, 0u32, common::rect(0, 0, 6, 6)),
            Annotation::instance_mask(1u64, 0u32, 1u32, common::rect(4, 4, 10, 8)),
        ]))
        .unwrap();
    dataset
}

#[test]
fn runs() {
    labelbridge().assert().success();
}

#[test]
fn outputs_tool_name() {
    labelbridge()
        .arg("-V")
        .assert()
        .success()
        .stdout("labelbridge 0.1.0\n");
}

#[test]
fn list_formats_names_every_builtin() {
    labelbridge()
        .arg("list-formats")
        .assert()
        .success()
        .stdout(predicate::str::contains("ade20k"))
        .stdout(predicate::str::contains("ir-json"))
        .stdout(predicate::str::contains("tfod-csv"));
}

#[test]
fn detect_prints_the_format_name() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &root, "ade20k");

    labelbridge()
        .arg("detect")
        .arg(&root)
        .assert()
        .success()
        .stdout("ade20k\n");
}

#[test]
fn detect_ambiguous_tree_fails() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &root, "ade20k");
    common::write_text(
        &root.join("boxes.csv"),
        "filename,width,height,class,xmin,ymin,xmax,ymax\n",
    );

    labelbridge()
        .arg("detect")
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Ambiguous format"));
}

#[test]
fn convert_ade20k_to_ir_json() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("ade");
    let output = temp.path().join("json");
    write_dataset(&common::street_dataset(), &input, "ade20k");

    labelbridge()
        .arg("convert")
        .arg(&input)
        .args(["--to", "ir-json", "-o"])
        .arg(&output)
        .env("LABELBRIDGE_JOBS", "3")
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote ir-json: 3 of 3 item(s)"));

    assert!(output.join("annotations/train.json").is_file());
    assert!(output.join("annotations/val.json").is_file());
}

#[test]
fn convert_reports_gaps_as_json() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("ade");
    let output = temp.path().join("tfod");
    write_dataset(&common::street_dataset(), &input, "ade20k");

    labelbridge()
        .arg("convert")
        .arg(&input)
        .args(["--from", "ade20k", "--to", "tfod-csv", "--report", "json", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"code\": \"capability_gap\""));
}

#[test]
fn convert_refuses_non_empty_output() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("ade");
    let output = temp.path().join("out");
    write_dataset(&common::street_dataset(), &input, "ade20k");
    common::write_text(&output.join("keep.txt"), "existing");

    labelbridge()
        .arg("convert")
        .arg(&input)
        .args(["--to", "ade20k", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not empty"));

    labelbridge()
        .arg("convert")
        .arg(&input)
        .args(["--to", "ade20k", "--overwrite", "-o"])
        .arg(&output)
        .assert()
        .success();
}

#[test]
fn convert_unknown_format_fails() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &input, "ade20k");

    labelbridge()
        .arg("convert")
        .arg(&input)
        .args(["--to", "coco", "-o"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown format 'coco'"));
}

#[test]
fn validate_valid_dataset_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &root, "ade20k");

    labelbridge()
        .arg("validate")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Validation passed"));
}

#[test]
fn validate_reports_overlapping_instances_as_warnings() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("json");
    write_dataset(&overlapping_dataset(), &root, "ir-json");

    labelbridge()
        .arg("validate")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("OverlappingInstances"));

    labelbridge()
        .arg("validate")
        .arg(&root)
        .arg("--strict-warnings")
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 warning(s)"));
}

#[test]
fn validate_json_output_format() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("json");
    write_dataset(&overlapping_dataset(), &root, "ir-json");

    labelbridge()
        .arg("validate")
        .arg(&root)
        .args(["--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"code\": \"overlapping_instances\""))
        .stdout(predicate::str::contains("\"scope\": \"annotation\""));
}

#[test]
fn validate_nonexistent_dir_fails() {
    labelbridge()
        .args(["validate", "nonexistent_dataset_dir"])
        .assert()
        .failure();
}

#[test]
fn stats_lists_labels() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &root, "ade20k");

    labelbridge()
        .arg("stats")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dataset Stats Report"))
        .stdout(predicate::str::contains("person"))
        .stdout(predicate::str::contains("instance_mask"));
}

#[test]
fn stats_json_output_format() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("ade");
    write_dataset(&common::street_dataset(), &root, "ade20k");

    labelbridge()
        .arg("stats")
        .arg(&root)
        .args(["--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"items\": 3"));
}
