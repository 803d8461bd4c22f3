//! Per-item output staging.
//!
//! Every file is written to a `.partial` sibling and renamed into place,
//! so no output file is ever observed truncated. If an item fails
//! half-way the files it already produced are removed again.

use image::{ExtendedColorType, GrayImage, ImageFormat, RgbImage};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use super::report::{ConversionIssue, ConversionIssueCode};
use crate::error::LabelbridgeError;

/// Collects the files one item writes plus any notes about lossiness.
#[derive(Debug, Default)]
pub struct ItemWriter {
    written: Vec<PathBuf>,
    notes: Vec<ConversionIssue>,
}

impl ItemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files written so far, in write order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn write_bytes(&mut self, path: &Path, bytes: &[u8]) -> Result<(), LabelbridgeError> {
        write_atomic(path, bytes)?;
        self.written.push(path.to_path_buf());
        Ok(())
    }

    pub fn write_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), LabelbridgeError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| LabelbridgeError::JsonWrite {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_bytes(path, &bytes)
    }

    pub fn write_rgb_png(&mut self, path: &Path, raster: &RgbImage) -> Result<(), LabelbridgeError> {
        let bytes = encode_png(path, raster.as_raw(), raster.dimensions(), ExtendedColorType::Rgb8)?;
        self.write_bytes(path, &bytes)
    }

    pub fn write_gray_png(&mut self, path: &Path, raster: &GrayImage) -> Result<(), LabelbridgeError> {
        let bytes = encode_png(path, raster.as_raw(), raster.dimensions(), ExtendedColorType::L8)?;
        self.write_bytes(path, &bytes)
    }

    /// Copies a media file into the output tree.
    pub fn copy_file(&mut self, from: &Path, to: &Path) -> Result<(), LabelbridgeError> {
        let bytes = fs::read(from).map_err(|source| LabelbridgeError::io_at(from, source))?;
        self.write_bytes(to, &bytes)
    }

    /// Records a lossiness note for the current item.
    pub fn warn(&mut self, code: ConversionIssueCode, message: impl Into<String>) {
        self.notes.push(ConversionIssue::warning(code, message));
    }

    /// Records a policy note for the current item.
    pub fn info(&mut self, code: ConversionIssueCode, message: impl Into<String>) {
        self.notes.push(ConversionIssue::info(code, message));
    }

    pub(crate) fn into_notes(self) -> Vec<ConversionIssue> {
        self.notes
    }

    /// Removes every file this item wrote.
    pub(crate) fn rollback(self) {
        for path in self.written.iter().rev() {
            if let Err(err) = fs::remove_file(path) {
                log::warn!("could not remove {} after failure: {err}", path.display());
            }
        }
    }
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LabelbridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LabelbridgeError::io_at(parent, source))?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = (|| {
        let file = fs::File::create(&partial)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        fs::rename(&partial, path)
    })();

    result.map_err(|source| {
        let _ = fs::remove_file(&partial);
        LabelbridgeError::io_at(path, source)
    })
}

fn encode_png(
    path: &Path,
    raw: &[u8],
    (width, height): (u32, u32),
    color: ExtendedColorType,
) -> Result<Vec<u8>, LabelbridgeError> {
    let mut cursor = Cursor::new(Vec::new());
    image::write_buffer_with_format(&mut cursor, raw, width, height, color, ImageFormat::Png)
        .map_err(|source| LabelbridgeError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_atomic_and_tracked() {
        let temp = tempfile::tempdir().unwrap();
        let mut out = ItemWriter::new();
        let json = temp.path().join("a/b.json");
        out.write_json(&json, &serde_json::json!({"k": 1})).unwrap();

        assert!(json.is_file());
        assert!(!temp.path().join("a/b.json.partial").exists());
        assert_eq!(out.written(), &[json]);
    }

    #[test]
    fn rollback_removes_written_files() {
        let temp = tempfile::tempdir().unwrap();
        let mut out = ItemWriter::new();
        let png = temp.path().join("x_seg.png");
        out.write_rgb_png(&png, &RgbImage::new(3, 2)).unwrap();
        assert_eq!(image::open(&png).unwrap().to_rgb8().dimensions(), (3, 2));

        out.rollback();
        assert!(!png.exists());
    }

    #[test]
    fn notes_are_kept_per_item() {
        let mut out = ItemWriter::new();
        out.warn(ConversionIssueCode::EmptyMaskDropped, "mask 3 is empty");
        let notes = out.into_notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, ConversionIssueCode::EmptyMaskDropped);
    }
}
