use nalgebra::Point2;

use waterline_calib::{from_file, to_file, CalibrationControl, CalibrationModel};
use waterline_target::TargetGeometry;

fn regular_octagon(center: Point2<f64>, radius: f64) -> Vec<Point2<f64>> {
    (0..8)
        .map(|k| {
            let theta = (-112.5 + 45.0 * k as f64).to_radians();
            Point2::new(
                center.x + radius * theta.cos(),
                center.y + radius * theta.sin(),
            )
        })
        .collect()
}

fn octagon_model() -> (CalibrationModel, CalibrationControl) {
    let mut control = CalibrationControl::for_target(TargetGeometry::octagon(), 0.7);
    control.zero_offset = 2.0;

    let pixels = regular_octagon(Point2::new(400.0, 300.0), 100.0);
    let world: Vec<Point2<f64>> = control
        .target
        .world_points(control.facet_length)
        .into_iter()
        .map(|p| Point2::new(p.x, p.y + control.zero_offset))
        .collect();

    let mut model = CalibrationModel::new();
    model
        .calibrate_from_points((800, 600), pixels, world, &control)
        .expect("calibrate");
    (model, control)
}

#[test]
fn document_round_trip_reproduces_the_transform() {
    let (model, _) = octagon_model();
    let doc = to_file(&model).expect("document");

    assert_eq!(doc.calib_type, "Octagon");
    assert_eq!(doc.image_width, 800);
    assert_eq!(doc.image_height, 600);
    assert_eq!(doc.pixel_to_world.points.len(), 8);
    assert_eq!(doc.search_lines.len(), model.search_lines().len());

    let reloaded = from_file(&doc).expect("reload");
    // Homographies are refit from the stored points, so the mapping must
    // agree with the original to numeric precision.
    for p in [Point2::new(400.0, 300.0), Point2::new(350.0, 380.0)] {
        let a = model.pixel_to_world(p).unwrap();
        let b = reloaded.pixel_to_world(p).unwrap();
        assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
    }
    assert_eq!(
        reloaded.search_lines().len(),
        model.search_lines().len(),
        "search lines are regenerated, not copied"
    );
}

#[test]
fn json_text_round_trip() {
    let (model, _) = octagon_model();
    let doc = to_file(&model).expect("document");
    let text = serde_json::to_string_pretty(&doc).expect("serialize");

    // Spot-check the external field names.
    assert!(text.contains("\"calibType\""));
    assert!(text.contains("\"facetLength\""));
    assert!(text.contains("\"PixelToWorld\""));
    assert!(text.contains("\"pixelX\""));
    assert!(text.contains("\"WaterlineSearchRegion\""));
    assert!(text.contains("\"toplft_x\""));
    assert!(text.contains("\"control_json\""));

    let parsed: waterline_calib::CalibrationFile =
        serde_json::from_str(&text).expect("parse");
    let reloaded = from_file(&parsed).expect("reload");
    assert!(reloaded.is_calibrated());
}

#[test]
fn too_few_points_fail_to_load() {
    let (model, _) = octagon_model();
    let mut doc = to_file(&model).expect("document");
    doc.pixel_to_world.points.truncate(4);
    let err = from_file(&doc);
    assert!(err.is_err(), "4 points must not satisfy an octagon model");
}

#[test]
fn unknown_calib_type_is_rejected() {
    let (model, _) = octagon_model();
    let mut doc = to_file(&model).expect("document");
    doc.calib_type = "Hexagon".to_string();
    assert!(from_file(&doc).is_err());
}

#[test]
fn bow_tie_grid_requires_exact_point_count() {
    let control = CalibrationControl::for_target(TargetGeometry::bow_tie(3, 2), 0.5);
    let pixels: Vec<Point2<f64>> = (0..6)
        .map(|i| Point2::new(100.0 + (i % 3) as f64 * 80.0, 200.0 + (i / 3) as f64 * 80.0))
        .collect();
    let world = control.target.world_points(control.facet_length);

    let mut model = CalibrationModel::new();
    model
        .calibrate_from_points((640, 480), pixels, world, &control)
        .expect("bow-tie calibration");

    let mut doc = to_file(&model).expect("document");
    assert_eq!(doc.calib_type, "BowTie");

    // Dropping one node breaks the columns*rows contract.
    doc.pixel_to_world.points.truncate(5);
    assert!(from_file(&doc).is_err());
}

#[test]
fn adjust_for_rotation_refits_the_transform() {
    let (mut model, _) = octagon_model();
    let before = model.target_angle_deg().expect("angle");
    assert!(before.abs() < 1e-9);

    // The measured water line slopes 3 degrees: the model rotates its mask,
    // re-extracts corners, and refits. The adjusted fiducial orientation
    // must follow the measured angle.
    model.adjust_for_rotation(3.0).expect("adjust");
    let after = model.target_angle_deg().expect("angle");
    assert!(
        (after - 3.0).abs() < 1.0,
        "expected orientation near 3 deg, got {after:.2}"
    );
    assert!(model.is_calibrated());
}
