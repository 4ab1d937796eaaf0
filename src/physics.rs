//! Stateless collision math for equal-mass hard spheres.
//!
//! Nothing here mutates a particle; callers apply the returned times and
//! velocities themselves.

use crate::store::Particle;
use simulation_common::{Vec3, MAX_DIMENSIONS};

/// Time until two spheres first touch, if they are on course to.
///
/// Solves `a t^2 + b t + c = 0` with `a = |dv|^2`, `b = 2 dv.dp` and
/// `c = |dp|^2 - (ra + rb)^2` for the relative motion of `b` seen from `a`,
/// and keeps the smaller root when it is non-negative. The larger root marks
/// the spheres leaving an overlap and is never reported. Identical velocities
/// (`a == 0`) count as no collision even when the spheres are in contact.
#[inline]
pub fn time_to_contact(
    center_a: Vec3,
    velocity_a: Vec3,
    radius_a: f64,
    center_b: Vec3,
    velocity_b: Vec3,
    radius_b: f64,
) -> Option<f64> {
    let dv = velocity_b - velocity_a;
    let dp = center_b - center_a;

    let a = dv.dot(dv);
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * dv.dot(dp);
    let r_sum = radius_a + radius_b;
    let c = dp.dot(dp) - r_sum * r_sum;

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let t1 = (-b - disc.sqrt()) / (2.0 * a);
    if t1 >= 0.0 {
        Some(t1)
    } else {
        None
    }
}

/// Relative time until `a` and `b` collide, or `None`.
///
/// A particle whose collision budget is spent never collides again,
/// regardless of geometry.
pub fn collide(a: &Particle, b: &Particle) -> Option<f64> {
    collide_with_offset(a, b, Vec3::zero())
}

/// Like [`collide`], with `b` translated by `offset` (a periodic image of `b`).
pub fn collide_with_offset(a: &Particle, b: &Particle, offset: Vec3) -> Option<f64> {
    if a.is_exhausted() || b.is_exhausted() {
        return None;
    }
    time_to_contact(
        a.center(),
        a.velocity(),
        a.radius(),
        b.center() + offset,
        b.velocity(),
        b.radius(),
    )
}

/// Post-collision velocities for an elastic, equal-mass, frictionless contact.
///
/// `separation` points from `a`'s center to `b`'s center at contact. With the
/// unit normal `n` along it, the pair is approaching when `(va - vb).n > 0`;
/// then the normal components are exchanged:
/// `va' = va - ((va - vb).n) n` and `vb' = vb + ((va - vb).n) n`.
/// Separating or grazing pairs (`(va - vb).n <= 0`) come back unchanged, as do
/// coincident centers, where no normal exists.
pub fn resolve_collision(separation: Vec3, velocity_a: Vec3, velocity_b: Vec3) -> (Vec3, Vec3) {
    let normal = separation.normalize_or_zero();
    let closing_speed = (velocity_a - velocity_b).dot(normal);
    if closing_speed <= 0.0 {
        return (velocity_a, velocity_b);
    }
    let exchange = normal * closing_speed;
    (velocity_a - exchange, velocity_b + exchange)
}

/// Shift to add to `b` so that `b - a` becomes the shortest periodic displacement.
pub fn minimum_image_offset(delta: Vec3, domain_size: f64, dimensions: usize) -> Vec3 {
    let half = 0.5 * domain_size;
    let mut offset = Vec3::zero();
    for axis in 0..dimensions {
        if delta[axis] > half {
            offset[axis] = -domain_size;
        } else if delta[axis] < -half {
            offset[axis] = domain_size;
        }
    }
    offset
}

/// Translations of a particle, one per domain face its extrapolated trajectory
/// crosses within `horizon`: `-L` on an axis it leaves through the upper face,
/// `+L` on one it leaves through the lower face.
pub fn trajectory_crossings(
    center: Vec3,
    velocity: Vec3,
    horizon: f64,
    domain_size: f64,
    dimensions: usize,
) -> Vec<Vec3> {
    let future = center + velocity * horizon.max(0.0);
    let mut crossings = Vec::with_capacity(dimensions);
    for axis in 0..dimensions {
        if future[axis] > domain_size {
            crossings.push(Vec3::axis(axis, -domain_size));
        } else if future[axis] < 0.0 {
            crossings.push(Vec3::axis(axis, domain_size));
        }
    }
    crossings
}

/// Offsets of `b` worth testing against `a` in the periodic domain.
///
/// Each axis gets its own candidate shifts: none, the minimum image, the
/// opposite of every face `a` crosses within `horizon` (moving `a` by `s` is
/// the same as moving `b` by `-s`) and every face `b` crosses. The offsets are
/// all combinations of those per-axis shifts, so a contact that wraps on one
/// axis and runs straight on another is still found. The raw placement comes
/// first.
pub fn pair_image_offsets(
    a: &Particle,
    b: &Particle,
    horizon: f64,
    domain_size: f64,
    dimensions: usize,
) -> Vec<Vec3> {
    let mut per_axis: [Vec<f64>; MAX_DIMENSIONS] = Default::default();
    for shifts in per_axis.iter_mut() {
        shifts.push(0.0);
    }
    let mut add = |shift: Vec3| {
        for (axis, shifts) in per_axis.iter_mut().enumerate().take(dimensions) {
            if shift[axis] != 0.0 && !shifts.contains(&shift[axis]) {
                shifts.push(shift[axis]);
            }
        }
    };

    add(minimum_image_offset(b.center() - a.center(), domain_size, dimensions));
    for shift in trajectory_crossings(a.center(), a.velocity(), horizon, domain_size, dimensions) {
        add(-shift);
    }
    for shift in trajectory_crossings(b.center(), b.velocity(), horizon, domain_size, dimensions) {
        add(shift);
    }

    let mut offsets = vec![Vec3::zero()];
    for (axis, shifts) in per_axis.iter().enumerate().take(dimensions) {
        let mut combined = Vec::with_capacity(offsets.len() * shifts.len());
        for &shift in shifts {
            for &offset in &offsets {
                let mut o = offset;
                o[axis] = shift;
                combined.push(o);
            }
        }
        offsets = combined;
    }
    offsets
}

/// Earliest relative collision time of `a` with any tested image of `b`.
pub fn earliest_periodic_contact(
    a: &Particle,
    b: &Particle,
    horizon: f64,
    domain_size: f64,
    dimensions: usize,
) -> Option<f64> {
    pair_image_offsets(a, b, horizon, domain_size, dimensions)
        .into_iter()
        .filter_map(|offset| collide_with_offset(a, b, offset))
        .min_by(|x, y| x.total_cmp(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(radius: f64, center: [f64; 3], velocity: [f64; 3]) -> Particle {
        Particle::detached(radius, Vec3::from(center), Vec3::from(velocity), 1)
    }

    #[test]
    fn head_on_gap_closes_at_expected_time() {
        let a = sphere(1.0, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = sphere(1.0, [3.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        // gap of 1.0 closed at relative speed 2.0
        assert_eq!(collide(&a, &b), Some(0.5));
    }

    #[test]
    fn touching_spheres_collide_now() {
        let a = sphere(1.0, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = sphere(1.0, [2.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), Some(0.0));
    }

    #[test]
    fn tangential_contact_reports_double_root() {
        // b passes a at closest approach exactly r_a + r_b: discriminant is zero
        let a = sphere(0.5, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let b = sphere(0.5, [-2.0, 1.0, 0.0], [1.0, 0.0, 0.0]);
        let t = collide(&a, &b).expect("grazing contact");
        assert!((t - 2.0).abs() < 1e-12);
    }

    #[test]
    fn no_false_positives() {
        // parallel, offset paths
        let a = sphere(1.0, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = sphere(1.0, [0.0, 3.0, 0.0], [-1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);

        // moving apart
        let a = sphere(1.0, [0.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        let b = sphere(1.0, [3.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);

        // identical velocities
        let a = sphere(1.0, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = sphere(1.0, [2.5, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);

        // already overlapping: only the exit root is non-negative
        let a = sphere(1.0, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = sphere(1.0, [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);
    }

    #[test]
    fn collide_is_symmetric() {
        let cases = [
            ([0.1, 0.2, 0.3], [0.3, -0.2, 0.1], [0.4, 0.25, 0.35], [-0.7, 0.1, 0.0]),
            ([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [3.0, 0.0, 0.0], [-1.0, 0.0, 0.0]),
            ([0.5, 0.5, 0.5], [0.0, 1.0, 0.0], [0.5, 0.9, 0.52], [0.0, -0.5, 0.0]),
            ([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [-1.0, 0.0, 0.0]),
        ];
        for (pa, va, pb, vb) in cases {
            let a = sphere(0.05, pa, va);
            let b = sphere(0.07, pb, vb);
            assert_eq!(collide(&a, &b), collide(&b, &a));
        }
    }

    #[test]
    fn exhausted_budget_blocks_collision() {
        let a = Particle::detached(1.0, Vec3::zero(), Vec3::new(1.0, 0.0, 0.0), 0);
        let b = sphere(1.0, [3.0, 0.0, 0.0], [-1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);
        assert_eq!(collide(&b, &a), None);
    }

    #[test]
    fn head_on_exchange() {
        let (va, vb) = resolve_collision(
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
        );
        assert_eq!(va, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(vb, Vec3::new(1.0, 0.0, 0.0));

        // moving into a resting sphere hands over all normal velocity
        let (va, vb) = resolve_collision(
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::zero(),
        );
        assert_eq!(va, Vec3::zero());
        assert_eq!(vb, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn separating_pair_is_not_reversed() {
        let va = Vec3::new(-1.0, 0.3, 0.0);
        let vb = Vec3::new(1.0, 0.0, 0.2);
        let (va2, vb2) = resolve_collision(Vec3::new(2.0, 0.0, 0.0), va, vb);
        assert_eq!((va2, vb2), (va, vb));

        // at rest: nothing to exchange
        let (va2, vb2) = resolve_collision(Vec3::new(2.0, 0.0, 0.0), Vec3::zero(), Vec3::zero());
        assert_eq!((va2, vb2), (Vec3::zero(), Vec3::zero()));
    }

    #[test]
    fn normal_momentum_is_conserved_and_tangent_untouched() {
        let sep = Vec3::new(0.06, 0.08, 0.0); // |sep| = 0.1
        let n = sep.normalize_or_zero();
        let va = Vec3::new(1.2, 0.7, -0.3);
        let vb = Vec3::new(-0.4, 0.1, 0.9);
        let (va2, vb2) = resolve_collision(sep, va, vb);

        let before = va.dot(n) + vb.dot(n);
        let after = va2.dot(n) + vb2.dot(n);
        assert!((before - after).abs() < 1e-12);
        // equal masses: normal components swap
        assert!((va2.dot(n) - vb.dot(n)).abs() < 1e-12);
        assert!((vb2.dot(n) - va.dot(n)).abs() < 1e-12);
        // energy conserved
        let e0 = va.length_squared() + vb.length_squared();
        let e1 = va2.length_squared() + vb2.length_squared();
        assert!((e0 - e1).abs() < 1e-12);
    }

    #[test]
    fn minimum_image_wraps_long_displacements() {
        let off = minimum_image_offset(Vec3::new(0.9, -0.8, 0.2), 1.0, 3);
        assert_eq!(off, Vec3::new(-1.0, 1.0, 0.0));
        // z is ignored in two dimensions
        let off = minimum_image_offset(Vec3::new(0.0, 0.0, 0.9), 1.0, 2);
        assert_eq!(off, Vec3::zero());
    }

    #[test]
    fn crossings_follow_extrapolated_trajectory() {
        let c = trajectory_crossings(Vec3::new(0.75, 0.5, 0.1), Vec3::new(1.0, 0.0, -1.0), 1.0, 1.0, 3);
        assert_eq!(c, vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)]);
        assert!(trajectory_crossings(Vec3::new(0.5, 0.5, 0.5), Vec3::zero(), 1.0, 1.0, 3).is_empty());
    }

    #[test]
    fn wrap_around_collision_found_through_image() {
        // a leaves through x = 1 and meets b from behind after re-entering
        let a = sphere(0.05, [0.75, 0.5, 0.5], [1.0, 0.0, 0.0]);
        let b = sphere(0.05, [0.5, 0.5, 0.5], [0.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);
        let t = earliest_periodic_contact(&a, &b, 1.0, 1.0, 3).expect("image collision");
        assert!((t - 0.65).abs() < 1e-12);
        let t_rev = earliest_periodic_contact(&b, &a, 1.0, 1.0, 3).expect("image collision");
        assert!((t_rev - 0.65).abs() < 1e-12);
    }

    #[test]
    fn neighbours_across_a_face_use_minimum_image() {
        // close through the x face, no trajectory crossing needed
        let a = sphere(0.05, [0.98, 0.5, 0.5], [-0.5, 0.0, 0.0]);
        let b = sphere(0.05, [0.1, 0.5, 0.5], [-1.0, 0.0, 0.0]);
        assert_eq!(collide(&a, &b), None);
        // gap 0.02 closed at relative speed 0.5
        let t = earliest_periodic_contact(&a, &b, 0.01, 1.0, 3).expect("minimum image");
        assert!((t - 0.04).abs() < 1e-9);
    }

    #[test]
    fn mixed_image_wraps_one_axis_only() {
        // adjacent through the x face, approaching directly along y
        let a = sphere(0.05, [0.02, 0.2, 0.5], [0.0, 1.0, 0.0]);
        let b = sphere(0.05, [0.98, 0.8, 0.5], [0.0, -1.0, 0.0]);
        let offsets = pair_image_offsets(&a, &b, 1.0, 1.0, 3);
        assert!(offsets.contains(&Vec3::new(-1.0, 0.0, 0.0)));
        assert_eq!(offsets[0], Vec3::zero());
        let t = earliest_periodic_contact(&a, &b, 1.0, 1.0, 3).expect("mixed image");
        let expected = (0.6 - (0.01f64 - 0.04 * 0.04).sqrt()) / 2.0;
        assert!((t - expected).abs() < 1e-12);
    }

    #[test]
    fn resting_pair_tests_only_raw_and_minimum_image() {
        let a = sphere(0.05, [0.1, 0.5, 0.5], [0.0; 3]);
        let b = sphere(0.05, [0.9, 0.5, 0.5], [0.0; 3]);
        let offsets = pair_image_offsets(&a, &b, 1.0, 1.0, 3);
        assert_eq!(offsets, vec![Vec3::zero(), Vec3::new(-1.0, 0.0, 0.0)]);
    }
}
