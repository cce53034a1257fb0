//! Functions for handling LAS/LAZ point-cloud files. Extents and clipping
//! are delegated to the external `pdal` tool.

use gdal_sys::OGRwkbGeometryType::wkbLinearRing;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use gdal::vector::Geometry;

use crate::core::geometries;
use crate::types::{PipelineError, PipelineResult};

/// Clip bounds in (min X, max X, min Y, max Y) order, matching the PDAL
/// crop filter convention.
pub type LasClipTuple = (f64, f64, f64, f64);

/// Clips a LAS file to the given bounds.
///
/// A PDAL crop pipeline is written next to the output file, handed to
/// `pdal pipeline`, and removed afterwards. The clip bounds are assumed to
/// be in the point cloud's coordinate system.
pub fn clip_las(las_path: &Path, clip_tuple: LasClipTuple, out_path: &Path) -> PipelineResult<()> {
    let pipeline = serde_json::json!({
        "pipeline": [
            las_path,
            { "type": "filters.crop", "bounds": crop_bounds_string(clip_tuple) },
            { "type": "writers.las", "filename": out_path }
        ]
    });
    log::debug!("Writing crop pipeline contents: {}", pipeline);

    let pipeline_dir = out_path.parent().unwrap_or_else(|| Path::new("."));
    let mut pipeline_file = tempfile::Builder::new()
        .prefix("pdal_crop")
        .suffix(".json")
        .tempfile_in(pipeline_dir)?;
    serde_json::to_writer(&mut pipeline_file, &pipeline)?;
    pipeline_file.flush()?;

    log::debug!("Running pipeline file: '{}'", pipeline_file.path().display());
    let output = Command::new("pdal")
        .arg("pipeline")
        .arg(pipeline_file.path())
        .output()?;
    if !output.status.success() {
        return Err(PipelineError::Processing(format!(
            "pdal pipeline failed for '{}': {}",
            las_path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn crop_bounds_string(clip_tuple: LasClipTuple) -> String {
    let (min_x, max_x, min_y, max_y) = clip_tuple;
    format!("([{}, {}], [{}, {}])", min_x, max_x, min_y, max_y)
}

/// Returns the EPSG code found in a `pdal info` result, or `None`
pub fn get_las_epsg_from_info(json_result: &Value) -> Option<String> {
    let bbox = json_result.get("stats")?.get("bbox")?.as_object()?;
    for key in bbox.keys() {
        if key.contains("EPSG") {
            return key.split(':').nth(1).map(str::to_string);
        }
    }
    None
}

/// Returns the EPSG code from the LAS header, or `None` when it can't
/// be determined
pub fn get_las_epsg(file_path: &Path) -> Option<String> {
    match pdal_info(file_path) {
        Ok(info) => get_las_epsg_from_info(&info),
        Err(err) => {
            log::debug!("Unable to find EPSG in LAS file header");
            log::debug!("    exception caught: {}", err);
            None
        }
    }
}

/// Calculates the extent of the given LAS file and returns it as GeoJSON.
///
/// A file without a coordinate system falls back to `default_epsg`; with no
/// default either, no boundary is available (`Ok(None)`) and a warning is
/// logged.
pub fn get_las_extents(file_path: &Path, default_epsg: Option<u32>) -> PipelineResult<Option<String>> {
    let info = pdal_info(file_path)?;
    let bbox = native_bbox(&info).ok_or_else(|| {
        PipelineError::Metadata(format!(
            "No native bounding box found in pdal info for '{}'",
            file_path.display()
        ))
    })?;

    let epsg = match get_las_epsg_from_info(&info).and_then(|code| code.parse::<u32>().ok()) {
        Some(epsg) => epsg,
        None => match default_epsg {
            Some(default_epsg) => default_epsg,
            None => {
                log::warn!(
                    "Unable to find EPSG and no default is specified for file '{}'",
                    file_path.display()
                );
                return Ok(None);
            }
        },
    };

    let (min_x, max_x, min_y, max_y) = bbox;
    let mut ring = Geometry::empty(wkbLinearRing)?;
    ring.add_point_2d((min_x, max_y)); // Upper left
    ring.add_point_2d((max_x, max_y)); // Upper right
    ring.add_point_2d((max_x, min_y)); // Lower right
    ring.add_point_2d((min_x, min_y)); // Lower left
    ring.add_point_2d((min_x, max_y)); // Closing the polygon

    match geometries::polygon_from_ring(ring, Some(epsg))? {
        Some(poly) => Ok(Some(geometries::geometry_to_geojson(&poly, None, None)?)),
        None => {
            log::error!(
                "Failed to create bounding polygon with EPSG {} from las file '{}'",
                epsg,
                file_path.display()
            );
            Ok(None)
        }
    }
}

fn pdal_info(file_path: &Path) -> PipelineResult<Value> {
    let output = Command::new("pdal").arg("info").arg(file_path).output()?;
    if !output.status.success() {
        return Err(PipelineError::Processing(format!(
            "pdal info failed for '{}': {}",
            file_path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn native_bbox(info: &Value) -> Option<LasClipTuple> {
    let bbox = info.get("stats")?.get("bbox")?.get("native")?.get("bbox")?;
    Some((
        bbox.get("minx")?.as_f64()?,
        bbox.get("maxx")?.as_f64()?,
        bbox.get("miny")?.as_f64()?,
        bbox.get("maxy")?.as_f64()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> Value {
        serde_json::json!({
            "stats": {
                "bbox": {
                    "EPSG:4326": {
                        "bbox": { "minx": -110.0, "maxx": -109.0, "miny": 30.0, "maxy": 31.0 }
                    },
                    "native": {
                        "bbox": { "minx": 409000.0, "maxx": 409100.0, "miny": 3659000.0, "maxy": 3659100.0 }
                    }
                }
            }
        })
    }

    #[test]
    fn test_epsg_from_info() {
        assert_eq!(get_las_epsg_from_info(&sample_info()), Some("4326".to_string()));
    }

    #[test]
    fn test_epsg_from_info_missing() {
        let info = serde_json::json!({ "stats": { "bbox": { "native": {} } } });
        assert_eq!(get_las_epsg_from_info(&info), None);
        assert_eq!(get_las_epsg_from_info(&serde_json::json!({})), None);
    }

    #[test]
    fn test_native_bbox() {
        let bbox = native_bbox(&sample_info()).unwrap();
        assert_eq!(bbox, (409000.0, 409100.0, 3659000.0, 3659100.0));
    }

    #[test]
    fn test_crop_bounds_string() {
        let bounds = crop_bounds_string((1.0, 2.0, 3.5, 4.5));
        assert_eq!(bounds, "([1, 2], [3.5, 4.5])");
    }

    #[test]
    fn test_get_las_epsg_missing_file() {
        // pdal is either unavailable or fails on the missing file; both
        // degrade to None
        assert_eq!(get_las_epsg(Path::new("no_such_file.las")), None);
    }
}
