//! Metadata-file loading and image-header inspection

pub mod exif;
pub mod metadata;
