#![allow(clippy::cast_precision_loss)]
use giwaxs_algorithms::{propose_rings, RadialProfile};
use giwaxs_core::{BeamCenter, FitConfig, ImageContext, InterpolationConfig, ParameterValue};
use giwaxs_io::{read_edf, write_edf, ConfigStore, CsvWriter, EdfReader};
use ndarray::Array2;
use tempfile::tempdir;

fn ring_image() -> Array2<f64> {
    Array2::from_shape_fn((80, 60), |(i, j)| {
        let r = (i as f64 - 40.0).hypot(j as f64 - 30.0);
        let d = (r - 20.5) / 1.5;
        100.0 * (-0.5 * d * d).exp()
    })
}

#[test]
fn test_edf_file_to_proposed_ring() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ring.edf");
    write_edf(&path, &ring_image()).unwrap();

    let edf = read_edf(&path).unwrap();
    assert_eq!(edf.header.get("DataType"), Some("DoubleValue"));
    assert_eq!(edf.data.dim(), (60, 80));

    let mut ctx = ImageContext::new();
    ctx.set_image(edf.data);
    // The ring center moves with the counter-clockwise rotation.
    ctx.set_beam_center(BeamCenter::new(29.0, 40.0)).unwrap();
    let profile = RadialProfile::from_context(&ctx, 0.0).unwrap().unwrap();
    let rings = propose_rings(
        &profile,
        &FitConfig::default().with_sigma_find(Some(1.0)).with_init_width(6.0),
    );
    assert_eq!(rings.len(), 1);
    assert!((rings[0].radius - 20.0).abs() <= 1.5, "ring at {}", rings[0].radius);

    let csv = dir.path().join("radial.csv");
    let mut writer = CsvWriter::create(&csv).unwrap();
    writer.write_profile(profile.x.view(), profile.y.view()).unwrap();
    let content = std::fs::read_to_string(&csv).unwrap();
    assert_eq!(content.lines().count(), profile.y.len() + 1);
}

#[test]
fn test_unrotated_reader_keeps_stored_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plain.edf");
    let image = ring_image();
    write_edf(&path, &image).unwrap();
    let reader = EdfReader::open(&path).unwrap().with_rotation(false);
    assert_eq!(reader.read().unwrap().data, image);
}

#[test]
fn test_config_store_round_trip_through_typed_config() {
    let dir = tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("user_config"));

    let mut map = InterpolationConfig::default().to_parameters();
    map.insert("r_size".into(), ParameterValue::Int(256));
    store.save_config(InterpolationConfig::NAME, &map).unwrap();

    assert!(dir.path().join("user_config/Interpolation parameters.json").is_file());
    assert_eq!(store.interpolation_config().r_size, 256);
    assert_eq!(
        store
            .read_config(InterpolationConfig::NAME, true)
            .unwrap()
            .get("r_size"),
        Some(&ParameterValue::Int(512))
    );
}
