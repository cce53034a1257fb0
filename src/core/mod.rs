//! Geometry, raster and point-cloud boundary utilities.
//!
//! Everything here is a stateless wrapper over OGR/OSR calls or over the
//! external `gdal_translate` and `pdal` tools.

pub mod geoimage;
pub mod geometries;
pub mod lasfile;
