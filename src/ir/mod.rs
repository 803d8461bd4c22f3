//! The unified annotation model.
//!
//! Every format plugin reads into and writes out of these types. Items
//! hold integer category ids that index a single [`LabelCategories`]
//! table owned by the dataset, never copies of the labels themselves.
//!
//! # Design Principles
//!
//! 1. **Type Safety**: newtype ids and coordinate-space markers keep
//!    category, instance and annotation ids (and pixel vs normalized
//!    geometry) from being mixed up.
//!
//! 2. **Validating constructors, permissive fields**: `Annotation::bbox`,
//!    `Mask::new` and friends reject invalid values, while the public
//!    fields still let readers represent whatever a file holds so that
//!    validation can report it.
//!
//! 3. **No I/O** beyond the lazy media accessors on [`ImageRef`].
//!
//! # Example
//!
//! ```
//! use labelbridge::ir::{Annotation, DatasetItem, LabelCategories, Mask};
//!
//! let labels = LabelCategories::from_names(["car"]).unwrap();
//! let car = labels.find("car").unwrap();
//!
//! let mask = Mask::from_fn(4, 4, |x, _| x < 2).unwrap();
//! let item = DatasetItem::new("img_1", "train")
//!     .with_annotations(vec![Annotation::instance_mask(0u64, car, 1u32, mask)]);
//! assert_eq!(item.annotations.len(), 1);
//! ```

mod annotation;
mod attrs;
mod bbox;
mod categories;
mod coord;
mod ids;
mod item;
mod mask;
mod space;

pub use annotation::{Annotation, AnnotationKind, AnnotationType, InstanceKey};
pub use attrs::{AttributeValue, Attributes};
pub use bbox::BBoxXYXY;
pub use categories::{LabelCategories, LabelCategory};
pub use coord::Coord;
pub use ids::{AnnotationId, CategoryId, InstanceId};
pub use item::{DatasetItem, ImageRef, ItemRef, MediaRef};
pub use mask::Mask;
pub use space::{Normalized, Pixel};

pub(crate) use item::read_image_dimensions;
