use nalgebra::{Matrix3, Point3, Vector3};

/// Minimum image convention on a fractional separation: every component is
/// shifted by whole lattice vectors into [-0.5, 0.5].
///
/// For strongly skewed cells the Cartesian result is a short image rather
/// than strictly the shortest one.
#[inline]
pub fn minimum_image_fractional(d_frac: &Vector3<f64>) -> Vector3<f64> {
    d_frac.map(|x| x - x.round())
}

/// Number of periodic images needed along each lattice vector so that every
/// neighbor within `cutoff` of an atom in the home cell is visited.
///
/// Uses the spacing between opposite faces of the cell: `V / |b x c|` etc.
pub fn image_range(cell: &Matrix3<f64>, cutoff: f64) -> [i32; 3] {
    let rows = [
        cell.row(0).transpose(),
        cell.row(1).transpose(),
        cell.row(2).transpose(),
    ];
    let volume = cell.determinant().abs();
    let mut out = [0; 3];
    for (k, n) in out.iter_mut().enumerate() {
        let face = rows[(k + 1) % 3].cross(&rows[(k + 2) % 3]).norm();
        if volume <= 0.0 || face <= 0.0 {
            continue;
        }
        let spacing = volume / face;
        *n = (cutoff / spacing).ceil() as i32;
    }
    out
}

/// Wraps a fractional point into the primary cell [0, 1).
pub fn wrap_fractional(p: &Point3<f64>) -> Point3<f64> {
    Point3::new(p.x.rem_euclid(1.0), p.y.rem_euclid(1.0), p.z.rem_euclid(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_image_wraps_each_component() {
        let d = minimum_image_fractional(&Vector3::new(0.9, -0.6, 0.2));
        assert!((d - Vector3::new(-0.1, 0.4, 0.2)).norm() < 1e-12);
    }

    #[test]
    fn image_range_counts_face_spacings() {
        let cell = Matrix3::from_diagonal(&Vector3::new(2.0, 5.0, 10.0));
        assert_eq!(image_range(&cell, 4.5), [3, 1, 1]);
        assert_eq!(image_range(&cell, 10.0), [5, 2, 1]);
    }

    #[test]
    fn wrapping_keeps_points_in_cell() {
        let p = wrap_fractional(&Point3::new(-0.25, 1.5, 0.999));
        assert!((p.x - 0.75).abs() < 1e-12);
        assert!((p.y - 0.5).abs() < 1e-12);
        assert!((p.z - 0.999).abs() < 1e-12);
    }
}
