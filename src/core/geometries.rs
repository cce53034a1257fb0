//! Geometry functions for translating between representations and
//! coordinate systems. All heavy lifting is delegated to OGR/OSR.

use gdal::spatial_ref::SpatialRef;
use gdal::vector::Geometry;
use gdal_sys::OGRwkbGeometryType::{wkbPoint, wkbPolygon};
use serde_json::Value;

use crate::types::{PipelineError, PipelineResult};

/// Envelope of a geometry in (min Y, max Y, min X, max X) order
pub type BoundsTuple = (f64, f64, f64, f64);

/// Given WKT, return the (x, y) of the geometry's centroid
pub fn calculate_centroid_from_wkt(wkt: &str) -> PipelineResult<(f64, f64)> {
    let geom = Geometry::from_wkt(wkt)?;
    let centroid = geometry_centroid(&geom)?;
    let (x, y, _) = centroid.get_point(0);
    Ok((x, y))
}

/// Computes the centroid of a geometry. The gdal crate does not wrap
/// OGR_G_Centroid, so this goes through gdal-sys.
pub(crate) fn geometry_centroid(geom: &Geometry) -> PipelineResult<Geometry> {
    let centroid = Geometry::empty(wkbPoint)?;
    let rv = unsafe { gdal_sys::OGR_G_Centroid(geom.c_geometry(), centroid.c_geometry()) };
    if rv != gdal_sys::OGRErr::OGRERR_NONE as i32 {
        return Err(PipelineError::InvalidGeometry(
            "unable to compute geometry centroid".to_string(),
        ));
    }
    Ok(centroid)
}

/// Calculates the percentage overlap between the two boundaries: the area of
/// the intersection divided by the area of the check bounds.
///
/// Returns a value in 0.0 - 1.0, or 0.0 when there is no overlap. If an
/// exception is detected a warning is logged and 0.0 is returned.
pub fn calculate_overlap_percent(check_bounds: &str, bounding_box: &str) -> f64 {
    match overlap_percent(check_bounds, bounding_box) {
        Ok(percent) => percent,
        Err(err) => {
            log::warn!("Exception caught while calculating shape overlap: {}", err);
            0.0
        }
    }
}

fn overlap_percent(check_bounds: &str, bounding_box: &str) -> PipelineResult<f64> {
    let check_poly = Geometry::from_geojson(check_bounds)?;
    let bbox_poly = Geometry::from_geojson(bounding_box)?;

    let check_area = check_poly.area();
    if check_area == 0.0 {
        return Ok(0.0);
    }
    match bbox_poly.intersection(&check_poly) {
        Some(intersection) => Ok(intersection.area() / check_area),
        None => Ok(0.0),
    }
}

/// Converts the geometry to the new spatial reference if possible.
///
/// Reprojection only happens when the geometry carries a spatial reference
/// different from the target. A transform failure logs a warning and returns
/// the original geometry unchanged.
pub fn convert_geometry(geometry: Geometry, new_spatialreference: &SpatialRef) -> Geometry {
    let geom_sr = match geometry.spatial_ref() {
        Some(sr) => sr,
        None => return geometry,
    };

    // GDAL 3 changed the default axis order for geographic CRS:
    // https://github.com/OSGeo/gdal/issues/1546
    geom_sr.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

    if geom_sr == *new_spatialreference {
        return geometry;
    }

    match geometry.transform_to(new_spatialreference) {
        Ok(transformed) => transformed,
        Err(err) => {
            log::warn!("Exception caught while transforming geometries: {}", err);
            log::warn!("    Returning original geometry");
            geometry
        }
    }
}

/// Returns the bounds of a geometry given as GeoJSON. The input is run
/// through the YAML parser first so single-quoted, pythonesque JSON that
/// shows up in legacy metadata still loads.
pub fn geojson_to_tuples(bounding_box: &str) -> PipelineResult<BoundsTuple> {
    let yaml_geom: Value = serde_yaml::from_str(bounding_box)?;
    let geom = Geometry::from_geojson(&serde_json::to_string(&yaml_geom)?)?;
    Ok(geometry_to_tuples(&geom))
}

/// Returns the bounds of the geometry in (min Y, max Y, min X, max X) order
pub fn geometry_to_tuples(geom: &Geometry) -> BoundsTuple {
    let envelope = geom.envelope();
    (envelope.MinY, envelope.MaxY, envelope.MinX, envelope.MaxX)
}

/// Converts a geometry to GeoJSON with a `crs` member.
///
/// If the geometry has a spatial reference, its authority name and code are
/// used. Otherwise both alternate coordinate-system values must be given for
/// a `crs` member to be written; the geometry itself is left unaltered.
pub fn geometry_to_geojson(
    geom: &Geometry,
    alt_coord_type: Option<&str>,
    alt_coord_code: Option<&str>,
) -> PipelineResult<String> {
    let mut geom_json: Value = serde_json::from_str(&geom.json()?)?;

    match geom.spatial_ref() {
        Some(ref_sys) => {
            let auth_name = ref_sys.auth_name().unwrap_or_default();
            let auth_code = ref_sys
                .auth_code()
                .map(|code| code.to_string())
                .unwrap_or_default();
            geom_json["crs"] = serde_json::json!({
                "type": auth_name,
                "properties": { "code": auth_code }
            });
        }
        None => {
            if let (Some(coord_type), Some(coord_code)) = (alt_coord_type, alt_coord_code) {
                // No coordinate system on the geometry, use what was passed in
                geom_json["crs"] = serde_json::json!({
                    "type": coord_type,
                    "properties": { "code": coord_code }
                });
            }
        }
    }

    Ok(serde_json::to_string(&geom_json)?)
}

/// Creates a polygon from the linear ring geometry passed in.
///
/// Returns `None` when an EPSG code is specified but can't be imported;
/// an empty ring produces an empty polygon.
pub fn polygon_from_ring(ring: Geometry, epsg: Option<u32>) -> PipelineResult<Option<Geometry>> {
    let mut poly = Geometry::empty(wkbPolygon)?;
    poly.add_geometry(ring)?;

    if let Some(epsg) = epsg {
        match SpatialRef::from_epsg(epsg) {
            Ok(ref_sys) => poly.set_spatial_ref(ref_sys),
            Err(err) => {
                log::warn!("Unable to import EPSG {}: {}", epsg, err);
                return Ok(None);
            }
        }
    }
    Ok(Some(poly))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use gdal_sys::OGRwkbGeometryType::wkbLinearRing;

    const UNIT_SQUARE: &str =
        r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}"#;
    const FAR_SQUARE: &str =
        r#"{"type": "Polygon", "coordinates": [[[10, 10], [11, 10], [11, 11], [10, 11], [10, 10]]]}"#;

    fn unit_ring() -> Geometry {
        let mut ring = Geometry::empty(wkbLinearRing).unwrap();
        ring.add_point_2d((0.0, 0.0));
        ring.add_point_2d((1.0, 0.0));
        ring.add_point_2d((1.0, 1.0));
        ring.add_point_2d((0.0, 1.0));
        ring.add_point_2d((0.0, 0.0));
        ring
    }

    #[test]
    fn test_centroid_from_wkt() {
        let (x, y) = calculate_centroid_from_wkt("POINT (0 0)").unwrap();
        assert_eq!((x, y), (0.0, 0.0));

        let (x, y) = calculate_centroid_from_wkt("LINESTRING (2 0, 2 4, 3 4)").unwrap();
        assert_abs_diff_eq!(x, 2.1, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 2.4, epsilon = 1e-9);
    }

    #[test]
    fn test_centroid_bad_wkt() {
        assert!(calculate_centroid_from_wkt("NOT A GEOMETRY").is_err());
    }

    #[test]
    fn test_overlap_with_self_is_one() {
        assert_abs_diff_eq!(
            calculate_overlap_percent(UNIT_SQUARE, UNIT_SQUARE),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_overlap_disjoint_is_zero() {
        assert_eq!(calculate_overlap_percent(UNIT_SQUARE, FAR_SQUARE), 0.0);
    }

    #[test]
    fn test_overlap_bad_input_is_zero() {
        assert_eq!(calculate_overlap_percent("{}", UNIT_SQUARE), 0.0);
    }

    #[test]
    fn test_convert_geometry_same_srs_is_identity() {
        let poly = polygon_from_ring(unit_ring(), Some(4326)).unwrap().unwrap();
        let before = geometry_to_tuples(&poly);

        let target = SpatialRef::from_epsg(4326).unwrap();
        let converted = convert_geometry(poly, &target);
        let after = geometry_to_tuples(&converted);

        assert_eq!(before, after);
    }

    #[test]
    fn test_convert_geometry_without_srs_is_unchanged() {
        let poly = polygon_from_ring(unit_ring(), None).unwrap().unwrap();
        let before = geometry_to_tuples(&poly);

        let target = SpatialRef::from_epsg(3857).unwrap();
        let converted = convert_geometry(poly, &target);

        assert_eq!(before, geometry_to_tuples(&converted));
        assert!(converted.spatial_ref().is_none());
    }

    #[test]
    fn test_geojson_round_trip_preserves_envelope() {
        let poly = polygon_from_ring(unit_ring(), Some(4326)).unwrap().unwrap();
        let bounds = geometry_to_tuples(&poly);

        let geojson = geometry_to_geojson(&poly, None, None).unwrap();
        let round_trip = geojson_to_tuples(&geojson).unwrap();

        assert_abs_diff_eq!(bounds.0, round_trip.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.1, round_trip.1, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.2, round_trip.2, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds.3, round_trip.3, epsilon = 1e-9);
    }

    #[test]
    fn test_geometry_to_geojson_crs_from_srs() {
        let poly = polygon_from_ring(unit_ring(), Some(4326)).unwrap().unwrap();
        let geojson = geometry_to_geojson(&poly, None, None).unwrap();
        let parsed: Value = serde_json::from_str(&geojson).unwrap();
        assert_eq!(parsed["crs"]["type"], "EPSG");
        assert_eq!(parsed["crs"]["properties"]["code"], "4326");
    }

    #[test]
    fn test_geometry_to_geojson_alt_crs() {
        let poly = polygon_from_ring(unit_ring(), None).unwrap().unwrap();
        let geojson = geometry_to_geojson(&poly, Some("EPSG"), Some("32612")).unwrap();
        let parsed: Value = serde_json::from_str(&geojson).unwrap();
        assert_eq!(parsed["crs"]["properties"]["code"], "32612");
    }

    #[test]
    fn test_polygon_from_empty_ring() {
        let ring = Geometry::empty(wkbLinearRing).unwrap();
        let poly = polygon_from_ring(ring, None).unwrap().unwrap();
        assert_eq!(poly.area(), 0.0);
    }

    #[test]
    fn test_polygon_from_ring_bad_epsg() {
        let result = polygon_from_ring(unit_ring(), Some(999_999_999)).unwrap();
        assert!(result.is_none());
    }
}
