//! Newtype IDs for the annotation model.
//!
//! Category ids index into a [`LabelCategories`](super::LabelCategories)
//! table, annotation ids are local to one item, and instance ids
//! discriminate objects of the same category within one item.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            pub fn new(id: $inner) -> Self {
                Self(id)
            }

            #[inline]
            pub fn get(&self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Index of a label in the dataset's [`LabelCategories`](super::LabelCategories).
    CategoryId(u32)
);

id_newtype!(
    /// Identifier of an annotation, unique within its item.
    AnnotationId(u64)
);

id_newtype!(
    /// Object instance discriminator, unique per category within an item.
    InstanceId(u32)
);

impl CategoryId {
    /// Position of this id in the category table.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}
