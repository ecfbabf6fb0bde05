//! Local smoothers moving a single free vertex
use super::{untangler, TetSimplex};
use crate::geom::Point;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Strategy used to relocate the free vertex of a [`TetSimplex`]
///
/// The three metric smoothers only accept steps which lower their metric,
/// so the metric at the vertex never increases.  The untangler is purely
/// geometric: it places the vertex at the centroid of the region where
/// every tetrahedron is valid.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum SimplexSmoother {
    /// Minimises a regularised mean-ratio energy by a coarse grid search
    /// followed by steepest descent
    VolumeOptimizer,
    /// Newton iterations on a penalty which only grows for (nearly)
    /// inverted tetrahedra
    KnuppMetric,
    /// Least-squares fit of every volume to the average volume
    QuadricMetric,
    /// Centroid of the feasible region
    MeshUntangler,
}

/// Largest number of inner iterations of any smoother
const MAX_ITERATIONS: usize = 50;

/// Upper bound of the Knupp target volume, relative to the mean volume
const MAX_BETA: f64 = 0.5;

/// Fixed parameters of a metric, frozen at the start of a call
#[derive(Copy, Clone, Debug)]
struct MetricScale {
    /// Target volume
    beta: f64,
    /// Smoothing of the penalty
    eps: f64,
    /// Mean absolute volume
    mean: f64,
    /// Typical edge length
    length: f64,
}

impl MetricScale {
    fn new(s: &TetSimplex) -> Self {
        let vols = s.volumes_at(&s.position());
        let n = vols.len().max(1) as f64;
        let length = s.length_scale().max(f64::MIN_POSITIVE);
        let mean = (vols.iter().map(|v| v.abs()).sum::<f64>() / n)
            .max(1e-12 * length.powi(3));
        Self {
            beta: 0.05 * mean,
            eps: 0.1 * mean,
            mean,
            length,
        }
    }
}

impl SimplexSmoother {
    /// Evaluates the smoother's metric at `x`
    ///
    /// Returns `None` for the untangler, which has no metric.
    pub fn metric(&self, s: &TetSimplex, x: &Point) -> Option<f64> {
        let scale = MetricScale::new(s);
        self.metric_scaled(s, x, &scale)
    }

    fn metric_scaled(&self, s: &TetSimplex, x: &Point, scale: &MetricScale) -> Option<f64> {
        match self {
            SimplexSmoother::KnuppMetric => Some(
                s.volumes_at(x)
                    .iter()
                    .map(|v| {
                        let y = v - scale.beta;
                        (y * y + scale.eps * scale.eps).sqrt() - y
                    })
                    .sum(),
            ),
            SimplexSmoother::QuadricMetric => Some(
                s.volumes_at(x)
                    .iter()
                    .map(|v| (v - scale.mean).powi(2))
                    .sum(),
            ),
            SimplexSmoother::VolumeOptimizer => {
                let delta = 1e-4 * scale.mean;
                let f = s.free();
                Some(
                    s.tets
                        .iter()
                        .map(|t| {
                            let mut p = [t[0], t[1], t[2], f].map(|i| s.points[i]);
                            p[3] = *x;
                            let mut l2 = 0.0;
                            for i in 0..4 {
                                for j in i + 1..4 {
                                    l2 += (p[j] - p[i]).norm_squared();
                                }
                            }
                            let v = crate::geom::tet_volume(&p[0], &p[1], &p[2], &p[3]);
                            let h = 0.5 * (v + (v * v + 4.0 * delta * delta).sqrt());
                            l2 / (12.0 * (3.0 * h).powf(2.0 / 3.0))
                        })
                        .sum(),
                )
            }
            SimplexSmoother::MeshUntangler => None,
        }
    }

    /// Moves the free vertex of `s` to a better position
    ///
    /// Iteration stops when the relative improvement of the metric drops
    /// below `tol`.  Returns `true` if the vertex moved.
    pub fn optimize_node_position(&self, s: &mut TetSimplex, tol: f64) -> bool {
        match self {
            SimplexSmoother::MeshUntangler => untangler::untangle(s),
            SimplexSmoother::KnuppMetric => self.newton(s, tol),
            SimplexSmoother::QuadricMetric => self.quadric(s),
            SimplexSmoother::VolumeOptimizer => self.volume(s, tol),
        }
    }

    /// Tries `x + t·dir` for halving `t`, returning the first point with a
    /// lower metric
    fn backtrack<F: Fn(&Point) -> f64>(
        f: F,
        x: &Point,
        fx: f64,
        dir: &Point,
        accept: impl Fn(&Point) -> bool,
    ) -> Option<(Point, f64)> {
        let mut t = 1.0;
        for _ in 0..30 {
            let y = x + dir * t;
            let fy = f(&y);
            if fy < fx && accept(&y) {
                return Some((y, fy));
            }
            t *= 0.5;
        }
        None
    }

    /// Damped Newton iterations on the Knupp metric
    ///
    /// Once the ring is valid, steps must keep it valid.  When no such step
    /// lowers the metric, the target volume `beta` grows, which pushes the
    /// vertex away from the planes of the thinnest tetrahedra, and the
    /// iteration continues.  The result is only kept if it improves the
    /// metric of the starting parameters.
    fn newton(&self, s: &mut TetSimplex, tol: f64) -> bool {
        let initial = MetricScale::new(s);
        let mut scale = initial;
        let planes = s.volume_planes();
        let start = s.position();
        let f0 = self.metric_scaled(s, &start, &initial).unwrap_or(0.0);
        let mut x = start;
        let mut valid = s.is_valid_at(&x);
        for _ in 0..MAX_ITERATIONS {
            let metric = |y: &Point| self.metric_scaled(s, y, &scale).unwrap_or(0.0);
            let fx = metric(&x);
            let mut g = Point::zeros();
            let mut h = Matrix3::<f64>::zeros();
            for (n, d) in &planes {
                let y = n.dot(&x) + d - scale.beta;
                let r = (y * y + scale.eps * scale.eps).sqrt();
                g += n * (y / r - 1.0);
                h += n * n.transpose() * (scale.eps * scale.eps / (r * r * r));
            }
            let dir = h
                .try_inverse()
                .map(|inv| -(inv * g))
                .unwrap_or_else(|| -g * scale.length.powi(2) / g.norm().max(f64::MIN_POSITIVE));
            let accept = |y: &Point| !valid || s.is_valid_at(y);
            let step = Self::backtrack(&metric, &x, fx, &dir, accept);
            match step {
                Some((y, fy)) => {
                    x = y;
                    valid = valid || s.is_valid_at(&x);
                    if fx - fy <= tol * fx.abs() {
                        break;
                    }
                }
                None if valid && scale.beta < MAX_BETA * scale.mean => scale.beta *= 2.0,
                None => break,
            }
        }
        let f = self.metric_scaled(s, &x, &initial).unwrap_or(0.0);
        if f < f0 && (s.is_valid_at(&x) || !s.is_valid_at(&start)) {
            s.set_position(x);
            true
        } else {
            s.set_position(start);
            false
        }
    }

    fn quadric(&self, s: &mut TetSimplex) -> bool {
        let scale = MetricScale::new(s);
        let planes = s.volume_planes();
        let mut a = Matrix3::<f64>::zeros();
        let mut b = Point::zeros();
        for (n, d) in &planes {
            a += n * n.transpose();
            b += n * (scale.mean - d);
        }
        let Some(inv) = a.try_inverse() else {
            return false;
        };
        let x = s.position();
        let target = inv * b;
        let metric = |y: &Point| self.metric_scaled(s, y, &scale).unwrap_or(0.0);
        // Steps must not invert a valid ring
        let valid = s.is_valid_at(&x);
        let accept = |y: &Point| !valid || s.is_valid_at(y);
        let fx = metric(&x);
        match Self::backtrack(&metric, &x, fx, &(target - x), accept) {
            Some((y, _)) => {
                s.set_position(y);
                true
            }
            None => false,
        }
    }

    fn volume(&self, s: &mut TetSimplex, tol: f64) -> bool {
        let scale = MetricScale::new(s);
        let metric = |y: &Point| self.metric_scaled(s, y, &scale).unwrap_or(0.0);
        let start = s.position();
        let f0 = metric(&start);

        // Divide and conquer: a 3x3x3 grid around the best point so far,
        // halving the grid spacing each round
        let mut x = start;
        let mut fx = f0;
        let mut r = 0.5 * scale.length;
        for _ in 0..8 {
            let centre = x;
            for i in -1..=1 {
                for j in -1..=1 {
                    for k in -1..=1 {
                        let y = centre + Point::new(i as f64, j as f64, k as f64) * r;
                        let fy = metric(&y);
                        if fy < fx {
                            x = y;
                            fx = fy;
                        }
                    }
                }
            }
            r *= 0.5;
        }

        // Steepest descent with a central-difference gradient
        let h = 1e-6 * scale.length;
        for _ in 0..MAX_ITERATIONS {
            let g = Point::from_fn(|i, _| {
                let mut e = Point::zeros();
                e[i] = h;
                (metric(&(x + e)) - metric(&(x - e))) / (2.0 * h)
            });
            let norm = g.norm();
            if norm <= f64::MIN_POSITIVE {
                break;
            }
            let dir = -g / norm * r.max(h);
            let Some((y, fy)) = Self::backtrack(&metric, &x, fx, &dir, |_| true) else {
                break;
            };
            let gain = fx - fy;
            r = 2.0 * (y - x).norm();
            x = y;
            fx = fy;
            if gain <= tol * f0.abs() {
                break;
            }
        }
        if fx < f0 {
            s.set_position(x);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::optimize::simplex::test::octahedron;
    use strum::IntoEnumIterator;

    #[test]
    fn metrics_never_increase() {
        for smoother in SimplexSmoother::iter().filter(|s| *s != SimplexSmoother::MeshUntangler) {
            for free in [
                Point::new(0.3, -0.2, 0.1),
                Point::new(0.05, 0.05, 0.6),
                Point::new(-0.4, 0.3, -0.2),
            ] {
                let mut s = octahedron(free);
                let before = smoother.metric(&s, &free).unwrap();
                let scale = MetricScale::new(&s);
                let moved = smoother.optimize_node_position(&mut s, 1e-6);
                let after = smoother.metric_scaled(&s, &s.position(), &scale).unwrap();
                assert!(after <= before, "{smoother}: {after} > {before}");
                assert!(moved, "{smoother} did not move {free:?}");
                assert!(s.is_valid_at(&s.position()));
                // Every smoother pulls the vertex towards the centre
                assert!(s.position().norm() < free.norm(), "{smoother}");
            }
        }
    }

    #[test]
    fn knupp_untangles() {
        let mut s = octahedron(Point::new(0.9, 0.8, 0.7));
        assert!(!s.is_valid_at(&s.position()));
        assert!(SimplexSmoother::KnuppMetric.optimize_node_position(&mut s, 1e-9));
        assert!(s.is_valid_at(&s.position()));
    }

    #[test]
    fn knupp_keeps_valid_rings_valid() {
        for free in [
            Point::new(0.6, 0.1, -0.1),
            Point::new(-0.2, 0.7, 0.05),
            Point::new(0.1, 0.1, -0.75),
        ] {
            let mut s = octahedron(free);
            assert!(s.is_valid_at(&free));
            SimplexSmoother::KnuppMetric.optimize_node_position(&mut s, 1e-9);
            assert!(s.is_valid_at(&s.position()), "{free:?} became invalid");
        }
    }

    #[test]
    fn untangler_has_no_metric() {
        let s = octahedron(Point::zeros());
        assert_eq!(SimplexSmoother::MeshUntangler.metric(&s, &Point::zeros()), None);
        assert_eq!(
            "quadricMetric".parse::<SimplexSmoother>().unwrap(),
            SimplexSmoother::QuadricMetric
        );
        assert_eq!(SimplexSmoother::VolumeOptimizer.to_string(), "volumeOptimizer");
    }
}
