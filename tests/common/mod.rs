#![allow(dead_code)]

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use labelbridge::dataset::Dataset;
use labelbridge::ir::{Annotation, DatasetItem, InstanceKey, LabelCategories, Mask};

pub const WIDTH: u32 = 12;
pub const HEIGHT: u32 = 8;

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

pub fn write_text(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, text).expect("write text file");
}

pub fn write_seg(path: &Path, raster: &RgbImage) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    raster.save(path).expect("write segmentation png");
}

/// A `WIDTH x HEIGHT` mask covering `[x0, x1) x [y0, y1)`.
pub fn rect(x0: u32, y0: u32, x1: u32, y1: u32) -> Mask {
    Mask::from_fn(WIDTH, HEIGHT, |x, y| x >= x0 && x < x1 && y >= y0 && y < y1)
        .expect("non-zero mask size")
}

/// A raster with one labeled rectangle, every other pixel unlabeled.
pub fn seg_with_rect(pixel: Rgb<u8>, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if x >= x0 && x < x1 && y >= y0 && y < y1 {
            pixel
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Two subsets of street scenes with cars, wheels and people.
///
/// Every annotation carries the `occluded` attribute so that the dataset
/// survives an ade20k round trip unchanged.
pub fn street_dataset() -> Dataset {
    let labels = LabelCategories::from_names(["car", "wheel", "person"]).expect("unique names");
    let mut dataset = Dataset::with_categories(labels);

    let car = InstanceKey::new(0u32, 1u32);
    dataset
        .add_item(DatasetItem::new("street_1", "train").with_annotations(vec![
            Annotation::instance_mask(0u64, 0u32, 1u32, rect(0, 0, 6, 4))
                .with_attribute("occluded", false),
            Annotation::instance_mask(1u64, 2u32, 3u32, rect(8, 0, 10, 8))
                .with_attribute("occluded", true),
            Annotation::part_mask(2u64, 1u32, 1, Some(car), rect(1, 3, 3, 4))
                .expect("level 1")
                .with_attribute("occluded", false),
        ]))
        .expect("add street_1");
    dataset
        .add_item(DatasetItem::new("street_2", "train").with_annotations(vec![
            Annotation::instance_mask(0u64, 0u32, 0u32, rect(2, 2, 12, 8))
                .with_attribute("occluded", false),
        ]))
        .expect("add street_2");
    dataset
        .add_item(DatasetItem::new("street_3", "val").with_annotations(vec![
            Annotation::instance_mask(0u64, 2u32, 0u32, rect(0, 0, 3, 8))
                .with_attribute("occluded", false),
            Annotation::instance_mask(1u64, 2u32, 1u32, rect(4, 0, 7, 8))
                .with_attribute("occluded", false),
        ]))
        .expect("add street_3");
    dataset
}
