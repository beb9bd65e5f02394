use coastlines::io::raster::{read_band, read_mask, study_area_dir, write_band, write_mask, RasterStackLoader};
use coastlines::types::{GeoBox, GeoTransform, MaskClass, Measurement};
use gdal::spatial_ref::SpatialRef;
use ndarray::Array2;
use std::path::Path;

fn geobox() -> GeoBox {
    let crs = SpatialRef::from_epsg(3577).unwrap().to_wkt().unwrap();
    GeoBox::new(
        crs,
        GeoTransform::from_gdal([1_500_000.0, 30.0, 0.0, -3_900_000.0, 0.0, -30.0]),
        12,
        8,
    )
}

fn write_year(dir: &Path, year: i32, measurements: &[Measurement], geobox: &GeoBox) {
    for m in measurements {
        let value = year as f32 - 2000.0;
        let mut band = Array2::from_elem((8, 12), value);
        band[[0, 0]] = f32::NAN;
        let path = dir.join(format!("{}_{}.tif", year, m.file_suffix("mndwi")));
        write_band(path, &band, geobox).unwrap();
    }
}

#[test]
fn test_band_roundtrip_keeps_nan_and_grid() {
    let dir = tempfile::tempdir().unwrap();
    let gb = geobox();
    let mut band = Array2::from_shape_fn((8, 12), |(r, c)| (r * 12 + c) as f32 / 10.0);
    band[[3, 4]] = f32::NAN;
    let path = dir.path().join("2001_mndwi.tif");
    write_band(&path, &band, &gb).unwrap();

    let (read, read_gb) = read_band(&path).unwrap();
    assert_eq!(read.dim(), (8, 12));
    assert!(read[[3, 4]].is_nan());
    assert_eq!(read[[7, 11]], band[[7, 11]]);
    assert_eq!(read_gb.transform, gb.transform);
    assert_eq!(read_gb.shape(), gb.shape());
}

#[test]
fn test_mask_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let gb = geobox();
    let mask = Array2::from_shape_fn((8, 12), |(r, c)| ((r + c) % 6) as u8);
    let path = dir.path().join("all_time_mask.tif");
    write_mask(&path, &mask, &gb).unwrap();

    let (read, read_gb) = read_mask(&path).unwrap();
    assert_eq!(read, mask);
    assert!(read.iter().all(|&v| MaskClass::from_code(v).is_some()));
    // Every class code survives the Byte band
    for code in 0u8..=5 {
        assert!(read.iter().any(|&v| v == code), "class {} lost", code);
    }
    assert_eq!(read_gb.transform, gb.transform);
}

#[test]
fn test_stack_skips_year_without_gapfill() {
    let root = tempfile::tempdir().unwrap();
    let dir = study_area_dir(root.path(), "12", "v1");
    std::fs::create_dir_all(&dir).unwrap();
    let gb = geobox();

    // The first year of a run never has gap-fill composites
    let first: Vec<Measurement> = Measurement::ALL
        .into_iter()
        .filter(|m| !matches!(m, Measurement::GapfillIndex | Measurement::GapfillTide | Measurement::GapfillCount))
        .collect();
    write_year(&dir, 2000, &first, &gb);
    write_year(&dir, 2001, &Measurement::ALL, &gb);
    write_year(&dir, 2002, &Measurement::ALL, &gb);
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let stack = RasterStackLoader::new("mndwi").load(&dir, "12").unwrap();
    assert_eq!(stack.years(), vec![2001, 2002]);
    let layers = stack.year(2002).unwrap();
    assert_eq!(layers.tide[[1, 1]], 2.0);
    assert!(layers.index[[0, 0]].is_nan());
}

#[test]
fn test_missing_measurement_reported() {
    let root = tempfile::tempdir().unwrap();
    let dir = study_area_dir(root.path(), "12", "v1");
    std::fs::create_dir_all(&dir).unwrap();
    let gb = geobox();
    write_year(&dir, 2001, &Measurement::ALL, &gb);
    let partial: Vec<Measurement> = Measurement::ALL
        .into_iter()
        .filter(|m| *m != Measurement::Stdev)
        .collect();
    write_year(&dir, 2002, &partial, &gb);

    let err = RasterStackLoader::new("mndwi").load(&dir, "12").unwrap_err();
    assert_eq!(err.kind(), "MissingRasters");
    assert!(err.to_string().contains("2002_stdev.tif"));
}

#[test]
fn test_grid_mismatch_reported() {
    let root = tempfile::tempdir().unwrap();
    let dir = study_area_dir(root.path(), "12", "v1");
    std::fs::create_dir_all(&dir).unwrap();
    let gb = geobox();
    write_year(&dir, 2001, &Measurement::ALL, &gb);
    let mut shifted = gb.clone();
    shifted.transform.top_left_x += 30.0;
    write_year(&dir, 2002, &Measurement::ALL, &shifted);

    let err = RasterStackLoader::new("mndwi").load(&dir, "12").unwrap_err();
    assert_eq!(err.kind(), "GeoBoxMismatch");
}

#[test]
fn test_missing_directory() {
    let root = tempfile::tempdir().unwrap();
    let err = RasterStackLoader::new("mndwi")
        .load(root.path().join("99_v1"), "99")
        .unwrap_err();
    assert_eq!(err.kind(), "MissingRasters");
}
