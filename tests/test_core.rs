use cellrelax::core::chemistry;
use cellrelax::core::domain::{Lattice, Site, Structure};
use cellrelax::core::spatial;
use cellrelax::engine::adaptor::{AtomsAdaptor, StructureAdaptor};
use nalgebra::{Matrix3, Point3, Vector3};

#[test]
fn test_lattice_parameters_of_known_cells() {
    let cubic = Lattice::cubic(3.5).parameters();
    assert!((cubic.a - 3.5).abs() < 1e-12);
    assert!((cubic.gamma - 90.0).abs() < 1e-9);
    assert!((cubic.volume - 42.875).abs() < 1e-9);

    // Hexagonal: a = b, gamma = 120
    let hex = Lattice::from_parameters(2.5, 2.5, 4.0, 90.0, 90.0, 120.0).unwrap();
    let p = hex.parameters();
    assert!((p.b - 2.5).abs() < 1e-12);
    assert!((p.c - 4.0).abs() < 1e-12);
    assert!((p.alpha - 90.0).abs() < 1e-9);
    assert!((p.beta - 90.0).abs() < 1e-9);
    assert!((p.gamma - 120.0).abs() < 1e-9);
    let expected_volume = 2.5 * 2.5 * 4.0 * (3.0f64).sqrt() / 2.0;
    assert!((p.volume - expected_volume).abs() < 1e-9);

    // Impossible angle set
    assert!(Lattice::from_parameters(1.0, 1.0, 1.0, 10.0, 10.0, 120.0).is_none());
}

#[test]
fn test_fractional_cartesian_round_trip() {
    let lattice = Lattice::from_parameters(3.0, 4.0, 5.0, 80.0, 95.0, 105.0).unwrap();
    let frac = Point3::new(0.1, 0.7, 0.35);
    let back = lattice.to_fractional(&lattice.to_cartesian(&frac));
    assert!((back - frac).norm() < 1e-12);
    assert!(Lattice::from_rows(&Matrix3::zeros()).is_none());
}

#[test]
fn test_element_lookup() {
    assert_eq!(chemistry::atomic_number("Cu"), Some(29));
    assert_eq!(chemistry::atomic_number("cu"), None);
    assert_eq!(chemistry::symbol(8), Some("O"));
    assert_eq!(chemistry::symbol(0), None);
    assert_eq!(chemistry::symbol(200), None);
}

#[test]
fn test_minimum_image_in_skewed_cell() {
    #[rustfmt::skip]
    let rows = Matrix3::new(
        4.0, 0.0, 0.0,
        2.0, 3.0, 0.0,
        0.0, 0.0, 5.0,
    );
    let inv_t = rows.transpose().try_inverse().unwrap();

    // A full lattice translation maps back onto the origin.
    let d = spatial::minimum_image_fractional(&(inv_t * Vector3::new(6.0, 3.0, 5.0)));
    assert!(d.norm() < 1e-12);

    // 0.6 a1 - 0.7 a2 + 0.2 a3 wraps to -0.4 a1 + 0.3 a2 + 0.2 a3.
    let delta = rows.transpose() * Vector3::new(0.6, -0.7, 0.2);
    let d = spatial::minimum_image_fractional(&(inv_t * delta));
    assert!((d - Vector3::new(-0.4, 0.3, 0.2)).norm() < 1e-12);
    assert!((rows.transpose() * d - Vector3::new(-1.0, 0.9, 1.0)).norm() < 1e-12);
}

#[test]
fn test_image_range_covers_cutoff() {
    let rows = Matrix3::from_diagonal_element(3.0);
    assert_eq!(spatial::image_range(&rows, 3.0), [1, 1, 1]);
    assert_eq!(spatial::image_range(&rows, 3.1), [2, 2, 2]);
}

#[test]
fn test_structure_json_round_trip() {
    let structure = Structure::new(
        Lattice::cubic(4.2),
        vec![
            Site { species: "Na".into(), frac: Point3::new(0.0, 0.0, 0.0) },
            Site { species: "Cl".into(), frac: Point3::new(0.5, 0.5, 0.5) },
        ],
    );
    let json = serde_json::to_string(&structure).unwrap();
    let back: Structure = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back.species().collect::<Vec<_>>(), vec!["Na", "Cl"]);
    assert!((back.lattice.vectors - structure.lattice.vectors).norm() < 1e-12);
}

#[test]
fn test_lattice_json_recomputes_inverse() {
    let lattice = Lattice::from_parameters(3.0, 4.0, 5.0, 80.0, 95.0, 105.0).unwrap();
    let mut json = serde_json::to_value(&lattice).unwrap();
    assert!(json.get("inverse").is_none());

    // A stale inverse in hand-written input has no effect.
    json["inverse"] = serde_json::to_value(Matrix3::<f64>::identity()).unwrap();
    let back: Lattice = serde_json::from_value(json.clone()).unwrap();
    assert!((back.inverse - lattice.inverse).norm() < 1e-12);
    let frac = back.to_fractional(&lattice.to_cartesian(&Point3::new(0.2, 0.4, 0.6)));
    assert!((frac - Point3::new(0.2, 0.4, 0.6)).norm() < 1e-12);

    json["vectors"] = serde_json::to_value(Matrix3::<f64>::zeros()).unwrap();
    assert!(serde_json::from_value::<Lattice>(json).is_err());
}

#[test]
fn test_adaptor_keeps_unwrapped_coordinates() {
    let structure = Structure::new(
        Lattice::cubic(2.0),
        vec![Site { species: "He".into(), frac: Point3::new(1.25, -0.5, 0.0) }],
    );
    let atoms = AtomsAdaptor.to_atoms(&structure).unwrap();
    assert!((atoms.positions()[0] - Vector3::new(2.5, -1.0, 0.0)).norm() < 1e-12);

    let back = AtomsAdaptor.from_atoms(&atoms).unwrap();
    assert!((back.sites[0].frac - Point3::new(1.25, -0.5, 0.0)).norm() < 1e-12);
}
