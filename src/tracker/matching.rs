//! Matching utilities for multi-object tracking.
//!
//! Detections are paired with track predictions by solving a gated linear
//! assignment problem with the Jonker-Volgenant solver from `lapjv`.

use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;
use tracing::{trace, warn};

use crate::error::{Result, TrackerError};

/// Lower bound for the cost of forbidden and padding cells.
const FORBIDDEN_COST: f64 = 1e6;

/// Relative tolerance under which two total costs count as tied.
const TIE_TOLERANCE: f64 = 1e-9;

/// Innovation covariances with a determinant this small are not inverted.
const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Point observation input for the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Observed `[x, y]`
    pub position: Vector2<f64>,
    /// Optional measurement covariance, overriding the configured `R`
    pub covariance: Option<Matrix2<f64>>,
}

impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Vector2::new(x, y),
            covariance: None,
        }
    }

    pub fn with_covariance(x: f64, y: f64, covariance: Matrix2<f64>) -> Self {
        Self {
            position: Vector2::new(x, y),
            covariance: Some(covariance),
        }
    }

    /// Build from a raw coordinate slice, which must hold exactly `[x, y]`.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [x, y] => Ok(Self::new(*x, *y)),
            _ => Err(TrackerError::InvalidObservation(format!(
                "expected 2 coordinates, got {}",
                values.len()
            ))),
        }
    }

    pub fn x(&self) -> f64 {
        self.position[0]
    }

    pub fn y(&self) -> f64 {
        self.position[1]
    }

    /// Check for finite coordinates and a symmetric positive semi-definite covariance.
    pub fn validate(&self) -> Result<()> {
        if !self.position.iter().all(|v| v.is_finite()) {
            return Err(TrackerError::InvalidObservation(format!(
                "non-finite position ({}, {})",
                self.x(),
                self.y()
            )));
        }
        if let Some(cov) = &self.covariance {
            if !cov.iter().all(|v| v.is_finite()) {
                return Err(TrackerError::InvalidObservation(
                    "non-finite covariance".to_string(),
                ));
            }
            let scale = 1.0 + cov.amax();
            if (cov[(0, 1)] - cov[(1, 0)]).abs() > 1e-9 * scale {
                return Err(TrackerError::InvalidObservation(
                    "covariance is not symmetric".to_string(),
                ));
            }
            if cov[(0, 0)] < 0.0 || cov[(1, 1)] < 0.0 || cov.determinant() < -1e-12 * scale {
                return Err(TrackerError::InvalidObservation(
                    "covariance is not positive semi-definite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Predicted track position as seen by the associator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPrediction {
    pub position: Vector2<f64>,
    /// Innovation covariance `S`; Euclidean distance is used when absent.
    pub innovation_covariance: Option<Matrix2<f64>>,
}

impl TrackPrediction {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Vector2::new(x, y),
            innovation_covariance: None,
        }
    }

    pub fn with_covariance(x: f64, y: f64, innovation_covariance: Matrix2<f64>) -> Self {
        Self {
            position: Vector2::new(x, y),
            innovation_covariance: Some(innovation_covariance),
        }
    }
}

/// Mahalanobis distance `sqrt(yᵀ S⁻¹ y)`, or Euclidean when `S` is missing or singular.
pub fn mahalanobis_distance(observation: &Vector2<f64>, prediction: &TrackPrediction) -> f64 {
    let diff = observation - prediction.position;
    let s_inv = prediction
        .innovation_covariance
        .filter(|s| s.determinant().abs() > SINGULARITY_TOLERANCE)
        .and_then(|s| s.try_inverse());

    match s_inv {
        Some(s_inv) => {
            let d2 = diff.dot(&(s_inv * diff));
            if d2.is_finite() && d2 >= 0.0 {
                d2.sqrt()
            } else {
                diff.norm()
            }
        }
        None => diff.norm(),
    }
}

/// Compute the detection x track cost matrix; pairs beyond `gate` are `f64::INFINITY`.
pub fn gated_distance(
    observations: &[Observation],
    predictions: &[TrackPrediction],
    gate: f64,
) -> Array2<f64> {
    let mut dists = Array2::from_elem((observations.len(), predictions.len()), f64::INFINITY);
    for (i, obs) in observations.iter().enumerate() {
        for (j, pred) in predictions.iter().enumerate() {
            let d = mahalanobis_distance(&obs.position, pred);
            if d.is_finite() && d <= gate {
                dists[[i, j]] = d;
            }
        }
    }
    dists
}

/// Outcome of one frame's association. Indices refer to the input slices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// `(detection_index, track_index)` pairs, ordered by detection index
    pub matches: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<usize>,
    /// Sum of the matched pair costs
    pub total_cost: f64,
}

impl Association {
    pub fn all_unmatched(num_detections: usize, num_tracks: usize) -> Self {
        Self {
            matches: vec![],
            unmatched_detections: (0..num_detections).collect(),
            unmatched_tracks: (0..num_tracks).collect(),
            total_cost: 0.0,
        }
    }

    fn from_assignment(cost_matrix: &Array2<f64>, assignment: &[Option<usize>]) -> Self {
        let num_cols = cost_matrix.ncols();
        let mut matches = vec![];
        let mut unmatched_detections = vec![];
        let mut unmatched_tracks_mask = vec![true; num_cols];
        let mut total_cost = 0.0;

        for (row, col) in assignment.iter().enumerate() {
            match col {
                Some(col) => {
                    matches.push((row, *col));
                    unmatched_tracks_mask[*col] = false;
                    total_cost += cost_matrix[[row, *col]];
                }
                None => unmatched_detections.push(row),
            }
        }

        let unmatched_tracks = unmatched_tracks_mask
            .iter()
            .enumerate()
            .filter_map(|(j, &u)| if u { Some(j) } else { None })
            .collect();

        Self {
            matches,
            unmatched_detections,
            unmatched_tracks,
            total_cost,
        }
    }
}

/// Row pin used while resolving ties: `Some(Some(col))` forces the pair,
/// `Some(None)` forces the row to stay unmatched.
type Pin = Option<Option<usize>>;

/// Solve the gated assignment for a detection x track cost matrix.
///
/// Infinite cells are forbidden. The result matches as many pairs as
/// possible, then minimizes their total cost. Among equal-cost optima the
/// lexicographically smallest `(detection, track)` pair set is returned.
pub fn linear_assignment(cost_matrix: &Array2<f64>) -> Result<Association> {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return Ok(Association::all_unmatched(num_rows, num_cols));
    }

    let (assignment, _) = lexicographic_assignment(cost_matrix)?;
    Ok(Association::from_assignment(cost_matrix, &assignment))
}

/// Gate, then solve. Solver failure degrades to everything unmatched.
pub fn associate(
    observations: &[Observation],
    predictions: &[TrackPrediction],
    gate: f64,
) -> Association {
    let dists = gated_distance(observations, predictions, gate);
    match linear_assignment(&dists) {
        Ok(association) => {
            trace!(
                detections = observations.len(),
                tracks = predictions.len(),
                matched = association.matches.len(),
                total_cost = association.total_cost,
                "association solved"
            );
            association
        }
        Err(err) => {
            warn!(%err, "association degenerate, leaving all detections and tracks unmatched");
            Association::all_unmatched(observations.len(), predictions.len())
        }
    }
}

/// Optimal assignment with lexicographic tie-breaking, plus the number of
/// LAPJV solves it took.
///
/// Detections are walked in order and each is pinned to the smallest track
/// index that still admits an optimal completion. Only pairs that lie on a
/// zero-cost reassignment cycle of the first optimum are re-solved, so a
/// frame with a unique optimum costs a single solve.
fn lexicographic_assignment(cost_matrix: &Array2<f64>) -> Result<(Vec<Option<usize>>, usize)> {
    let (num_rows, num_cols) = cost_matrix.dim();
    let padded = PaddedCosts::new(cost_matrix);

    let mut pins: Vec<Pin> = vec![None; num_rows];
    let (row_to_col, mut assignment) = padded.solve(&pins)?;
    let mut solves = 1;

    let (best_count, best_cost) = score(cost_matrix, &assignment);
    let tolerance = TIE_TOLERANCE * (1.0 + best_cost.abs());
    let alternatives = Alternatives::new(&padded, row_to_col, tolerance);

    for row in 0..num_rows {
        let limit = assignment[row].unwrap_or(num_cols);
        for col in 0..limit {
            if !cost_matrix[[row, col]].is_finite()
                || !alternatives.admits(&padded, row, col)
                || assignment[..row].contains(&Some(col))
            {
                continue;
            }
            pins[row] = Some(Some(col));
            let (_, candidate) = padded.solve(&pins)?;
            solves += 1;
            let (count, cost) = score(cost_matrix, &candidate);
            if count == best_count && (cost - best_cost).abs() <= tolerance {
                assignment = candidate;
                break;
            }
        }
        pins[row] = Some(assignment[row]);
    }

    Ok((assignment, solves))
}

/// Square copy of a gated cost matrix as handed to LAPJV.
///
/// Forbidden and padding cells cost more than any set of feasible pairs,
/// so the solver first maximizes the number of feasible pairs.
struct PaddedCosts {
    costs: Array2<f64>,
    forbidden: f64,
    num_rows: usize,
    num_cols: usize,
}

impl PaddedCosts {
    fn new(cost_matrix: &Array2<f64>) -> Self {
        let (num_rows, num_cols) = cost_matrix.dim();
        let feasible: f64 = cost_matrix.iter().filter(|c| c.is_finite()).sum();
        let forbidden = FORBIDDEN_COST.max(2.0 * feasible + 1.0);

        let size = num_rows.max(num_cols);
        let mut costs = Array2::<f64>::from_elem((size, size), forbidden);
        for ((i, j), &c) in cost_matrix.indexed_iter() {
            if c.is_finite() {
                costs[[i, j]] = c;
            }
        }

        Self {
            costs,
            forbidden,
            num_rows,
            num_cols,
        }
    }

    /// Apply pins and run LAPJV. Returns the full row to column permutation
    /// and, per detection, the track it is matched to if the pair is feasible.
    fn solve(&self, pins: &[Pin]) -> Result<(Vec<usize>, Vec<Option<usize>>)> {
        let mut pinned = self.costs.clone();
        for (row, pin) in pins.iter().enumerate() {
            match pin {
                Some(Some(col)) => {
                    let keep = pinned[[row, *col]];
                    pinned.row_mut(row).fill(self.forbidden);
                    pinned.column_mut(*col).fill(self.forbidden);
                    pinned[[row, *col]] = keep;
                }
                Some(None) => pinned.row_mut(row).fill(self.forbidden),
                None => {}
            }
        }

        let (row_to_col, _) = lapjv::lapjv(&pinned)
            .map_err(|e| TrackerError::AssociationDegenerate(format!("{e:?}")))?;

        let assignment = (0..self.num_rows)
            .map(|row| {
                let col = row_to_col[row];
                (col < self.num_cols && pinned[[row, col]] < self.forbidden).then_some(col)
            })
            .collect();
        Ok((row_to_col, assignment))
    }
}

/// Which pairs can appear in some optimal assignment, derived from one
/// optimal permutation of the padded matrix.
///
/// A pair `(row, col)` outside the permutation belongs to another optimum
/// exactly when moving `row` onto `col` closes a reassignment cycle of zero
/// total cost.
struct Alternatives {
    row_to_col: Vec<usize>,
    /// `detour[[a, b]]`: cheapest cost change of moving the row on column `a`
    /// elsewhere, with displaced rows moving on until one lands on `b`
    detour: Array2<f64>,
    slack: f64,
}

impl Alternatives {
    fn new(padded: &PaddedCosts, row_to_col: Vec<usize>, tolerance: f64) -> Self {
        let costs = &padded.costs;
        let size = row_to_col.len();
        let mut col_to_row = vec![0; size];
        for (row, &col) in row_to_col.iter().enumerate() {
            col_to_row[col] = row;
        }

        let mut detour = Array2::from_shape_fn((size, size), |(a, b)| {
            let row = col_to_row[a];
            costs[[row, b]] - costs[[row, a]]
        });
        // The permutation is optimal, so there are no negative cycles.
        for via in 0..size {
            for a in 0..size {
                let to_via = detour[[a, via]];
                for b in 0..size {
                    let through = to_via + detour[[via, b]];
                    if through < detour[[a, b]] {
                        detour[[a, b]] = through;
                    }
                }
            }
        }

        // Sums mixing feasible and forbidden cells round at the scale of `forbidden`.
        let slack = tolerance + size as f64 * padded.forbidden * 4.0 * f64::EPSILON;
        Self {
            row_to_col,
            detour,
            slack,
        }
    }

    fn admits(&self, padded: &PaddedCosts, row: usize, col: usize) -> bool {
        let current = self.row_to_col[row];
        if col == current {
            return true;
        }
        let change = padded.costs[[row, col]] - padded.costs[[row, current]];
        change + self.detour[[col, current]] <= self.slack
    }
}

fn score(cost_matrix: &Array2<f64>, assignment: &[Option<usize>]) -> (usize, f64) {
    assignment
        .iter()
        .enumerate()
        .filter_map(|(row, col)| col.map(|col| cost_matrix[[row, col]]))
        .fold((0, 0.0), |(count, total), c| (count + 1, total + c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const INF: f64 = f64::INFINITY;

    fn assert_partition(association: &Association, num_detections: usize, num_tracks: usize) {
        let mut dets: Vec<usize> = association.matches.iter().map(|m| m.0).collect();
        dets.extend(&association.unmatched_detections);
        dets.sort_unstable();
        assert_eq!(dets, (0..num_detections).collect::<Vec<_>>());

        let mut tracks: Vec<usize> = association.matches.iter().map(|m| m.1).collect();
        tracks.extend(&association.unmatched_tracks);
        tracks.sort_unstable();
        assert_eq!(tracks, (0..num_tracks).collect::<Vec<_>>());
    }

    #[test]
    fn test_nearest_pairing() {
        let observations = [Observation::new(0.0, 0.0), Observation::new(10.0, 10.0)];
        let predictions = [TrackPrediction::new(0.1, 0.1), TrackPrediction::new(9.9, 9.9)];

        let association = associate(&observations, &predictions, 1e3);
        assert_eq!(association.matches, vec![(0, 0), (1, 1)]);
        assert!(association.unmatched_detections.is_empty());
        assert!(association.unmatched_tracks.is_empty());

        let dists = gated_distance(&observations, &predictions, 1e3);
        let cross = dists[[0, 1]] + dists[[1, 0]];
        assert!(association.total_cost < cross);
    }

    #[test]
    fn test_detection_outside_gate_is_unmatched() {
        let observations = [Observation::new(0.0, 0.0), Observation::new(50.0, 50.0)];
        let predictions = [TrackPrediction::new(0.5, 0.0)];

        let association = associate(&observations, &predictions, 5.0);
        assert_eq!(association.matches, vec![(0, 0)]);
        assert_eq!(association.unmatched_detections, vec![1]);
        assert!(association.unmatched_tracks.is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        let association = associate(&[], &[TrackPrediction::new(0.0, 0.0)], 5.0);
        assert_eq!(association, Association::all_unmatched(0, 1));

        let association = associate(&[Observation::new(1.0, 1.0)], &[], 5.0);
        assert_eq!(association, Association::all_unmatched(1, 0));
    }

    #[test]
    fn test_everything_gated_out() {
        let dists = array![[INF, INF], [INF, INF], [INF, INF]];
        let association = linear_assignment(&dists).unwrap();
        assert!(association.matches.is_empty());
        assert_partition(&association, 3, 2);
    }

    #[test]
    fn test_prefers_more_matches_over_lower_cost() {
        // Detection 1 can only take track 0, so detection 0 must yield it.
        let dists = array![[1.0, 1.5], [1.2, INF]];
        let association = linear_assignment(&dists).unwrap();
        assert_eq!(association.matches, vec![(0, 1), (1, 0)]);
        assert_abs_diff_eq!(association.total_cost, 2.7, epsilon = 1e-12);
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let dists = array![[1.0, 2.0], [2.0, 3.0]];
        let association = linear_assignment(&dists).unwrap();
        assert_eq!(association.matches, vec![(0, 0), (1, 1)]);

        let dists = array![[5.0, 5.0, 5.0]];
        let association = linear_assignment(&dists).unwrap();
        assert_eq!(association.matches, vec![(0, 0)]);
        assert_eq!(association.unmatched_tracks, vec![1, 2]);

        let dists = array![[1.0, INF], [1.0, INF]];
        let association = linear_assignment(&dists).unwrap();
        assert_eq!(association.matches, vec![(0, 0)]);
        assert_eq!(association.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_tie_break_keeps_optimal_cost() {
        let dists = array![
            [1.0, 1.0, 4.0],
            [1.0, 1.0, 4.0],
            [4.0, 2.0, 2.0],
        ];
        let association = linear_assignment(&dists).unwrap();
        // Both {(0,0),(1,1),(2,2)} and {(0,1),(1,0),(2,2)} cost 4.
        assert_eq!(association.matches, vec![(0, 0), (1, 1), (2, 2)]);
        assert_abs_diff_eq!(association.total_cost, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unique_optimum_takes_one_solve() {
        // Sorted pairing is the only optimum for points on a line.
        let observations: Vec<Observation> =
            (0..100).map(|i| Observation::new(i as f64, 0.0)).collect();
        let predictions: Vec<TrackPrediction> =
            (0..100).map(|j| TrackPrediction::new(j as f64 + 0.3, 0.0)).collect();
        let dists = gated_distance(&observations, &predictions, 1e3);
        assert!(dists.iter().all(|d| d.is_finite()));

        let (assignment, solves) = lexicographic_assignment(&dists).unwrap();
        assert_eq!(solves, 1);
        assert!(assignment.iter().enumerate().all(|(i, col)| *col == Some(i)));
    }

    #[test]
    fn test_fully_tied_matrix_solves_once_per_detection() {
        let dists = Array2::from_elem((30, 30), 1.0);
        let (assignment, solves) = lexicographic_assignment(&dists).unwrap();
        assert!(assignment.iter().enumerate().all(|(i, col)| *col == Some(i)));
        assert!(solves <= 31, "{solves} solves");
    }

    #[test]
    fn test_rectangular_problem_partitions_indices() {
        let observations: Vec<Observation> = (0..5)
            .map(|i| Observation::new(i as f64 * 10.0, 0.0))
            .collect();
        let predictions = [
            TrackPrediction::new(31.0, 0.0),
            TrackPrediction::new(9.0, 1.0),
            TrackPrediction::new(200.0, 0.0),
        ];
        let association = associate(&observations, &predictions, 4.0);
        assert_eq!(association.matches, vec![(1, 1), (3, 0)]);
        assert_eq!(association.unmatched_detections, vec![0, 2, 4]);
        assert_eq!(association.unmatched_tracks, vec![2]);
        assert_partition(&association, 5, 3);
    }

    #[test]
    fn test_mahalanobis_uses_innovation_covariance() {
        let obs = Vector2::new(0.0, 0.0);
        let elongated =
            TrackPrediction::with_covariance(3.0, 0.0, Matrix2::new(100.0, 0.0, 0.0, 1.0));
        let round = TrackPrediction::with_covariance(0.0, 2.0, Matrix2::identity());

        assert_abs_diff_eq!(mahalanobis_distance(&obs, &elongated), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(mahalanobis_distance(&obs, &round), 2.0, epsilon = 1e-12);

        let association = associate(&[Observation::new(0.0, 0.0)], &[round, elongated], 1.0);
        assert_eq!(association.matches, vec![(0, 1)]);
        assert_eq!(association.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_mahalanobis_falls_back_to_euclidean() {
        let obs = Vector2::new(3.0, 4.0);
        let singular = TrackPrediction::with_covariance(0.0, 0.0, Matrix2::zeros());
        assert_abs_diff_eq!(mahalanobis_distance(&obs, &singular), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            mahalanobis_distance(&obs, &TrackPrediction::new(0.0, 0.0)),
            5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_observation_validation() {
        assert!(Observation::new(1.0, 2.0).validate().is_ok());
        assert!(Observation::new(f64::NAN, 2.0).validate().is_err());
        assert!(
            Observation::with_covariance(0.0, 0.0, Matrix2::new(1.0, 0.5, 0.0, 1.0))
                .validate()
                .is_err()
        );
        assert!(
            Observation::with_covariance(0.0, 0.0, Matrix2::new(-1.0, 0.0, 0.0, 1.0))
                .validate()
                .is_err()
        );
        assert_eq!(
            Observation::from_slice(&[1.0, 2.0, 3.0]).unwrap_err(),
            TrackerError::InvalidObservation("expected 2 coordinates, got 3".into())
        );
        assert_eq!(
            Observation::from_slice(&[1.0, 2.0]).unwrap(),
            Observation::new(1.0, 2.0)
        );
    }
}
