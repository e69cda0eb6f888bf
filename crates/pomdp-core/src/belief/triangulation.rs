//! Freudenthal triangulation of beliefs onto a regular grid.

use crate::numeric::Value;

/// One corner of the enclosing sub-simplex: a grid belief and its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint<V> {
    pub distribution: Vec<(usize, V)>,
    pub weight: V,
}

/// Writes `entries` (ordered by state, strictly positive, summing to one) as a
/// convex combination of grid beliefs whose probabilities are multiples of
/// `1 / resolution`.
///
/// Coordinates within `precision` of an integer are snapped, so floating
/// noise does not create spurious corners with negligible weight.
pub fn freudenthal<V: Value>(entries: &[(usize, V)], resolution: u64, precision: &V) -> Vec<GridPoint<V>> {
    let n = entries.len();
    if n <= 1 {
        return entries
            .iter()
            .map(|(state, _)| GridPoint {
                distribution: vec![(*state, V::one())],
                weight: V::one(),
            })
            .collect();
    }

    let res = V::from_u64(resolution.max(1));
    let one = V::one();

    // x_i = R * sum_{j >= i} b_j
    let mut coords = vec![V::zero(); n];
    let mut suffix = V::zero();
    for i in (0..n).rev() {
        suffix = suffix + entries[i].1.clone();
        coords[i] = res.clone() * suffix.clone();
    }

    let mut base = Vec::with_capacity(n);
    let mut fractions = Vec::with_capacity(n);
    for x in coords {
        let mut floor = x.floor();
        let mut frac = x - floor.clone();
        if frac <= *precision {
            frac = V::zero();
        } else if frac >= one.clone() - precision.clone() {
            floor = floor + one.clone();
            frac = V::zero();
        }
        base.push(floor);
        fractions.push(frac);
    }

    // Stable: ties keep ascending state order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| {
        fractions[*b]
            .partial_cmp(&fractions[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut points = Vec::with_capacity(n);
    let mut vertex = base;
    let first_weight = one - fractions[order[0]].clone();
    if first_weight > V::zero() {
        points.push(GridPoint {
            distribution: vertex_to_belief(entries, &vertex, &res),
            weight: first_weight,
        });
    }
    for k in 0..n {
        vertex[order[k]] = vertex[order[k]].clone() + V::one();
        let next = if k + 1 < n {
            fractions[order[k + 1]].clone()
        } else {
            V::zero()
        };
        let weight = fractions[order[k]].clone() - next;
        if weight > V::zero() {
            points.push(GridPoint {
                distribution: vertex_to_belief(entries, &vertex, &res),
                weight,
            });
        }
    }
    points
}

/// `b(s_i) = (q_i - q_{i+1}) / R` with `q_n = 0`; zero entries are dropped.
fn vertex_to_belief<V: Value>(entries: &[(usize, V)], vertex: &[V], res: &V) -> Vec<(usize, V)> {
    let n = vertex.len();
    let mut belief = Vec::with_capacity(n);
    for i in 0..n {
        let next = if i + 1 < n { vertex[i + 1].clone() } else { V::zero() };
        let mass = vertex[i].clone() - next;
        debug_assert!(mass >= V::zero(), "grid vertex is not monotone");
        if mass > V::zero() {
            belief.push((entries[i].0, mass / res.clone()));
        }
    }
    belief
}
