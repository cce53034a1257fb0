//! Functions for handling geo-referenced images. Boundary extraction reads
//! the GDAL geotransform; clipping shells out to `gdal_translate`.

use gdal::raster::{Buffer, ColorInterpretation, GdalType, RasterCreationOption};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::Geometry;
use gdal::{Dataset, DriverManager, Metadata};
use gdal_sys::OGRwkbGeometryType::{wkbLinearRing, wkbMultiPolygon};
use ndarray::{Array2, Array3, Axis};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use crate::core::geometries::{self, BoundsTuple};
use crate::types::{PipelineError, PipelineResult, LAT_LON_EPSG_CODE};

/// Clip a raster to the given bounds, (min Y, max Y, min X, max X).
///
/// Invokes `gdal_translate -projwin` and reads the clipped image back as a
/// (band, row, column) pixel array. When `out_path` is `None` the clipped
/// file only lives long enough to be read back. An output without any pixels
/// is deleted and reported as `Ok(None)`.
pub fn clip_raster(
    raster_path: &Path,
    bounds: BoundsTuple,
    out_path: Option<&Path>,
    compress: bool,
) -> PipelineResult<Option<Array3<f32>>> {
    let (clip_path, _temp_file) = match out_path {
        Some(path) => (path.to_path_buf(), None),
        None => {
            let temp_file = tempfile::Builder::new()
                .prefix("clip")
                .suffix(".tif")
                .tempfile()?;
            (temp_file.path().to_path_buf(), Some(temp_file))
        }
    };

    let (min_y, max_y, min_x, max_x) = bounds;
    let mut cmd = Command::new("gdal_translate");
    if compress {
        cmd.args(["-co", "COMPRESS=LZW"]);
    }
    cmd.arg("-projwin")
        .args([
            min_x.to_string(),
            max_y.to_string(),
            max_x.to_string(),
            min_y.to_string(),
        ])
        .arg(raster_path)
        .arg(&clip_path);

    log::debug!("Running clip command: {:?}", cmd);
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(PipelineError::Processing(format!(
            "gdal_translate failed for '{}': {}",
            raster_path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let pixels = read_raster_pixels(&clip_path)?;

    // If we have any pixels, we consider clipping a success
    if pixels.shape()[1] > 0 && pixels.shape()[2] > 0 {
        return Ok(Some(pixels));
    }

    if out_path.is_some() {
        std::fs::remove_file(&clip_path)?;
    }
    Ok(None)
}

/// Clips the raster to the intersection of the file bounds and plot bounds.
///
/// The boundaries are assumed to be in the same coordinate system. An empty
/// input polygon is an explicit error; an empty intersection is the normal
/// "no overlap" outcome. On success the number of clipped pixels is returned.
pub fn clip_raster_intersection(
    file_path: &Path,
    file_bounds: &Geometry,
    plot_bounds: &Geometry,
    out_file: &Path,
) -> PipelineResult<Option<u64>> {
    log::debug!(
        "Clip to intersect of plot boundary: File: '{}' '{:?}' Plot: '{:?}'",
        file_path.display(),
        file_bounds.wkt(),
        plot_bounds.wkt()
    );

    if file_bounds.is_empty() || plot_bounds.is_empty() {
        log::error!(
            "Invalid polygon specified for clip_raster_intersection: File: '{}'",
            file_path.display()
        );
        return Err(PipelineError::InvalidGeometry(
            "One or more invalid polygons specified when clipping raster".to_string(),
        ));
    }

    let intersection = match file_bounds.intersection(plot_bounds) {
        Some(intersection) if intersection.area() > 0.0 => intersection,
        _ => {
            log::info!(
                "File does not intersect plot boundary: {}",
                file_path.display()
            );
            return Ok(None);
        }
    };

    // Make sure the tuple converter always sees a multi polygon
    let multi_polygon = if intersection.geometry_name().starts_with("MULTI") {
        intersection
    } else {
        let mut multi = Geometry::empty(wkbMultiPolygon)?;
        multi.add_geometry(intersection)?;
        multi
    };

    let tuples = geometries::geometry_to_tuples(&multi_polygon);
    match clip_raster(file_path, tuples, Some(out_file), true)? {
        Some(pixels) => Ok(Some(pixels.len() as u64)),
        None => Ok(None),
    }
}

/// Same as [`clip_raster_intersection`] but with the boundaries given as
/// GeoJSON strings. Unparseable boundaries are an explicit error.
pub fn clip_raster_intersection_json(
    file_path: &Path,
    file_bounds: &str,
    plot_bounds: &str,
    out_file: &Path,
) -> PipelineResult<Option<u64>> {
    let file_poly = Geometry::from_geojson(file_bounds);
    let plot_poly = Geometry::from_geojson(plot_bounds);

    let (file_poly, plot_poly) = match (file_poly, plot_poly) {
        (Ok(file_poly), Ok(plot_poly)) => (file_poly, plot_poly),
        _ => {
            log::error!(
                "Invalid polygon specified for clip_raster_intersection: File: '{}' plot: '{}'",
                file_bounds,
                plot_bounds
            );
            return Err(PipelineError::InvalidGeometry(
                "One or more invalid polygons specified when clipping raster".to_string(),
            ));
        }
    };

    clip_raster_intersection(file_path, &file_poly, &plot_poly, out_file)
}

/// Writes a GeoTIFF from a (band, row, column) pixel array with the
/// geotransform and projection derived from the GPS bounds and SRID.
///
/// 3- and 4-band images get RGB(A) color interpretation; `nodata` is applied
/// to every band when given.
pub fn create_geotiff<T: GdalType + Copy>(
    pixels: &Array3<T>,
    gps_bounds: BoundsTuple,
    out_path: &Path,
    srid: u32,
    nodata: Option<f64>,
    image_md: Option<&HashMap<String, String>>,
    compress: bool,
) -> PipelineResult<()> {
    common_create_tiff(
        pixels,
        out_path,
        nodata,
        image_md,
        compress,
        Some(&|dataset: &mut Dataset| {
            let (cols, rows) = dataset.raster_size();
            let (min_y, max_y, min_x, max_x) = gps_bounds;
            let geotransform = [
                min_x,                             // upper-left x
                (max_x - min_x) / cols as f64,     // W-E pixel resolution
                0.0,                               // rotation (0 = North is up)
                max_y,                             // upper-left y
                0.0,                               // rotation (0 = North is up)
                -((max_y - min_y) / rows as f64),  // N-S pixel resolution
            ];
            dataset.set_geo_transform(&geotransform)?;
            let srs = SpatialRef::from_epsg(srid)?;
            dataset.set_spatial_ref(&srs)?;
            Ok(())
        }),
    )
}

/// Writes a plain TIFF from a (band, row, column) pixel array, without
/// georeferencing information.
pub fn create_tiff<T: GdalType + Copy>(
    pixels: &Array3<T>,
    out_path: &Path,
    nodata: Option<f64>,
    image_md: Option<&HashMap<String, String>>,
    compress: bool,
) -> PipelineResult<()> {
    common_create_tiff(pixels, out_path, nodata, image_md, compress, None)
}

type RasterUpdateFn<'a> = &'a dyn Fn(&mut Dataset) -> PipelineResult<()>;

fn common_create_tiff<T: GdalType + Copy>(
    pixels: &Array3<T>,
    out_path: &Path,
    nodata: Option<f64>,
    image_md: Option<&HashMap<String, String>>,
    compress: bool,
    raster_update: Option<RasterUpdateFn>,
) -> PipelineResult<()> {
    let (channels, rows, cols) = pixels.dim();

    let options = if compress {
        vec![
            RasterCreationOption { key: "COMPRESS", value: "LZW" },
            RasterCreationOption { key: "PREDICTOR", value: "2" },
        ]
    } else {
        vec![RasterCreationOption { key: "BIGTIFF", value: "IF_NEEDED" }]
    };

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        out_path,
        cols as isize,
        rows as isize,
        channels as isize,
        &options,
    )?;

    // The geotransform has to be in place before pixels are written
    if let Some(update) = raster_update {
        update(&mut dataset)?;
    }

    if let Some(image_md) = image_md {
        for (key, value) in image_md {
            dataset.set_metadata_item(key, value, "")?;
        }
    }

    // RGB and RGBA channel interpretations; ColorInterpretation is not
    // Copy, so build the value at the use site instead of indexing an array
    fn channel_type(channel: usize) -> ColorInterpretation {
        [
            ColorInterpretation::RedBand,
            ColorInterpretation::GreenBand,
            ColorInterpretation::BlueBand,
            ColorInterpretation::AlphaBand,
        ]
        .into_iter()
        .nth(channel)
        .expect("channel index out of range")
    }

    for channel in 0..channels {
        let mut band = dataset.rasterband((channel + 1) as isize)?;
        let data: Vec<T> = pixels.index_axis(Axis(0), channel).iter().copied().collect();
        let buffer = Buffer::new((cols, rows), data);
        band.write((0, 0), (cols, rows), &buffer)?;
        if channels == 3 || channels == 4 {
            band.set_color_interpretation(channel_type(channel))?;
        }
        if let Some(nodata) = nodata {
            band.set_no_data_value(Some(nodata))?;
        }
    }

    Ok(())
}

/// Returns the lat/lon centroid of a geo-referenced image file.
///
/// Unlike boundary extraction this is a hard failure when the image is not
/// georeferenced or an EPSG code cannot be imported.
pub fn get_centroid_latlon(filename: &Path) -> PipelineResult<(f64, f64)> {
    let epsg = get_epsg(filename).ok_or_else(|| {
        let msg = format!("EPSG is not found in image file: '{}'", filename.display());
        log::error!("{}", msg);
        PipelineError::Processing(msg)
    })?;

    let poly = get_image_bounds(filename, Some(epsg)).ok_or_else(|| {
        let msg = format!(
            "File is not a geo-referenced image file: {}",
            filename.display()
        );
        log::error!("{}", msg);
        PipelineError::Processing(msg)
    })?;

    let dest_spatial = SpatialRef::from_epsg(LAT_LON_EPSG_CODE)?;
    // GDAL 3 changed the default axis order for geographic CRS
    dest_spatial
        .set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    let ref_sys = SpatialRef::from_epsg(epsg)?;

    let transform = CoordTransform::new(&ref_sys, &dest_spatial)?;
    let latlon_poly = poly.transform(&transform)?;
    let centroid = geometries::geometry_centroid(&latlon_poly)?;
    let (x, y, _) = centroid.get_point(0);
    Ok((x, y))
}

/// Returns the EPSG code of a georeferenced image file, or `None` if it's
/// not found or an error occurred.
pub fn get_epsg(filename: &Path) -> Option<u32> {
    match read_epsg(filename) {
        Ok(epsg) => Some(epsg),
        Err(err) => {
            log::warn!("[get_epsg] Exception caught: {}", err);
            None
        }
    }
}

fn read_epsg(filename: &Path) -> PipelineResult<u32> {
    let dataset = Dataset::open(filename)?;
    let proj = dataset.spatial_ref()?;
    Ok(proj.auth_code()? as u32)
}

/// Loads the boundary of an image file as a polygon with its coordinate
/// system assigned.
///
/// A file without a coordinate system falls back to `default_epsg`; with no
/// default either, the boundary is unavailable (`None`) and a warning is
/// logged. A file that cannot be read at all also yields `None`.
pub fn get_image_bounds(file_path: &Path, default_epsg: Option<u32>) -> Option<Geometry> {
    let (min_y, max_y, min_x, max_x) = image_get_geobounds(file_path)?;

    let epsg = match get_epsg(file_path) {
        Some(epsg) => epsg,
        None => match default_epsg {
            Some(default_epsg) => default_epsg,
            None => {
                log::warn!(
                    "File does not have a coordinate system defined and no default was specified: '{}'",
                    file_path.display()
                );
                return None;
            }
        },
    };

    let mut ring = Geometry::empty(wkbLinearRing).ok()?;
    ring.add_point_2d((min_x, max_y)); // Upper left
    ring.add_point_2d((max_x, max_y)); // Upper right
    ring.add_point_2d((max_x, min_y)); // Lower right
    ring.add_point_2d((min_x, min_y)); // Lower left
    ring.add_point_2d((min_x, max_y)); // Closing the polygon

    geometries::polygon_from_ring(ring, Some(epsg)).ok().flatten()
}

/// Loads the boundary of an image file and returns the GeoJSON representing
/// the bounds (including the EPSG code), or `None` if the bounds could not
/// be loaded.
pub fn get_image_bounds_json(file_path: &Path, default_epsg: Option<u32>) -> Option<String> {
    let geom = get_image_bounds(file_path, default_epsg)?;
    geometries::geometry_to_geojson(&geom, None, None).ok()
}

/// Retrieves the rectilinear boundary of a raster from its geotransform in
/// (min Y, max Y, min X, max X) order, or `None` if it can't be determined.
pub fn image_get_geobounds(source_path: &Path) -> Option<BoundsTuple> {
    match read_geobounds(source_path) {
        Ok(bounds) => Some(bounds),
        Err(err) => {
            log::debug!("[image_get_geobounds] Exception caught: {}", err);
            None
        }
    }
}

fn read_geobounds(source_path: &Path) -> PipelineResult<BoundsTuple> {
    let dataset = Dataset::open(source_path)?;
    let [ulx, xres, _, uly, _, yres] = dataset.geo_transform()?;
    let (cols, rows) = dataset.raster_size();

    let lrx = ulx + (cols as f64 * xres);
    let lry = uly + (rows as f64 * yres);

    Ok((uly.min(lry), uly.max(lry), ulx.min(lrx), ulx.max(lrx)))
}

fn read_raster_pixels(path: &Path) -> PipelineResult<Array3<f32>> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let bands = dataset.raster_count() as usize;

    let mut pixels = Array3::<f32>::zeros((bands, height, width));
    for band_index in 0..bands {
        let band = dataset.rasterband((band_index + 1) as isize)?;
        let data = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let band_array = Array2::from_shape_vec((height, width), data.data)
            .map_err(|e| PipelineError::Processing(format!("Failed to reshape raster data: {}", e)))?;
        pixels.index_axis_mut(Axis(0), band_index).assign(&band_array);
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    #[test]
    fn test_image_get_geobounds_missing_file() {
        assert!(image_get_geobounds(Path::new("no_such_image.tif")).is_none());
    }

    #[test]
    fn test_get_image_bounds_missing_file() {
        assert!(get_image_bounds(Path::new("no_such_image.tif"), Some(4326)).is_none());
    }

    #[test]
    fn test_get_epsg_missing_file() {
        assert!(get_epsg(Path::new("no_such_image.tif")).is_none());
    }

    #[test]
    fn test_create_geotiff_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("test.tif");

        // 10x10 single band image covering a one degree square
        let pixels = Array3::<u8>::from_elem((1, 10, 10), 42);
        let bounds = (30.0, 31.0, -110.0, -109.0);
        create_geotiff(&pixels, bounds, &out_path, 4326, Some(-99.0), None, false).unwrap();

        let read_back = image_get_geobounds(&out_path).expect("bounds should be readable");
        assert_abs_diff_eq!(read_back.0, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(read_back.1, 31.0, epsilon = 1e-9);
        assert_abs_diff_eq!(read_back.2, -110.0, epsilon = 1e-9);
        assert_abs_diff_eq!(read_back.3, -109.0, epsilon = 1e-9);

        assert_eq!(get_epsg(&out_path), Some(4326));

        let poly = get_image_bounds(&out_path, None).expect("polygon should be available");
        let tuples = geometries::geometry_to_tuples(&poly);
        assert_abs_diff_eq!(tuples.2, -110.0, epsilon = 1e-9);
    }

    #[test]
    fn test_create_tiff_has_no_georeference() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("plain.tif");

        let pixels = Array3::<u8>::from_elem((3, 4, 4), 7);
        create_tiff(&pixels, &out_path, None, None, true).unwrap();

        // No CRS and no default: boundary is unavailable but not an error
        assert!(get_image_bounds(&out_path, None).is_none());
    }

    #[test]
    fn test_clip_raster_intersection_disjoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let raster_path = dir.path().join("source.tif");
        let pixels = Array3::<u8>::from_elem((1, 10, 10), 42);
        let bounds = (30.0, 31.0, -110.0, -109.0);
        create_geotiff(&pixels, bounds, &raster_path, 4326, None, None, false).unwrap();

        let file_bounds = get_image_bounds(&raster_path, None).expect("raster bounds");
        let plot_bounds = Geometry::from_geojson(
            r#"{"type": "Polygon", "coordinates": [[[10, 10], [11, 10], [11, 11], [10, 11], [10, 10]]]}"#,
        )
        .unwrap();
        let out_path = dir.path().join("clipped.tif");

        // No overlap is a normal outcome, not an error, and no output is made
        let clipped =
            clip_raster_intersection(&raster_path, &file_bounds, &plot_bounds, &out_path).unwrap();
        assert!(clipped.is_none());
        assert!(!out_path.exists());
    }

    #[test]
    fn test_clip_raster_intersection_empty_polygon_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("clipped.tif");

        let empty = Geometry::empty(gdal_sys::OGRwkbGeometryType::wkbPolygon).unwrap();
        let plot_bounds = Geometry::from_geojson(
            r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}"#,
        )
        .unwrap();

        let result =
            clip_raster_intersection(Path::new("input.tif"), &empty, &plot_bounds, &out_path);
        assert!(result.is_err());
        assert!(!out_path.exists());
    }

    #[test]
    fn test_clip_raster_intersection_json_bad_polygon_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("clipped.tif");
        let plot_bounds =
            r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}"#;

        let result =
            clip_raster_intersection_json(Path::new("input.tif"), "{}", plot_bounds, &out_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_get_centroid_latlon_missing_file_is_error() {
        assert!(get_centroid_latlon(Path::new("no_such_image.tif")).is_err());
    }

    #[test]
    fn test_get_centroid_latlon() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("centroid.tif");

        let pixels = Array3::<u8>::from_elem((1, 8, 8), 1);
        let bounds = (30.0, 32.0, -110.0, -108.0);
        create_geotiff(&pixels, bounds, &out_path, 4326, None, None, false).unwrap();

        let (lon, lat) = get_centroid_latlon(&out_path).unwrap();
        assert_abs_diff_eq!(lon, -109.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lat, 31.0, epsilon = 1e-6);
    }
}
