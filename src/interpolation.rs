use num_traits::Float;
use std::fmt::Debug;

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error(
        "Input coordinate was too short, needed at least {req_len} elements but got only {actual_len}"
    )]
    InputTooShort { req_len: usize, actual_len: usize },
    #[error("Requested coordinate ({0}) is not a finite number")]
    NonFiniteTarget(String),
}

/// How distances along a coordinate are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateKind {
    /// Plain linear distance, e.g. latitude
    Linear,
    /// Distance on a circle with the given period in coordinate units, e.g. 360 degrees of longitude
    Periodic(u32),
}

/// Nearest-neighbor selection along one coordinate, with no interpolation between cells.
///
/// Ties go to the lower index, matching a left-to-right scan.
pub struct NearestNeighbor {
    kind: CoordinateKind,
}

impl NearestNeighbor {
    pub fn new(kind: CoordinateKind) -> Self {
        Self { kind }
    }

    pub fn linear() -> Self {
        Self::new(CoordinateKind::Linear)
    }

    pub fn longitude() -> Self {
        Self::new(CoordinateKind::Periodic(360))
    }

    /// Return the index of the element in `coords` closest to `target`.
    pub fn nearest_index<F: Float + Debug>(&self, coords: &[F], target: F) -> Result<usize, InterpolationError> {
        if coords.is_empty() {
            return Err(InterpolationError::InputTooShort { req_len: 1, actual_len: 0 });
        }

        if !target.is_finite() {
            return Err(InterpolationError::NonFiniteTarget(format!("{target:?}")));
        }

        let (i_closest, _) = coords
            .iter()
            .enumerate()
            .fold(None, |acc, (i, x)| {
                let new_diff = self.distance(*x, target);
                if let Some((curr_i, curr_diff)) = acc {
                    if new_diff < curr_diff {
                        Some((i, new_diff))
                    } else {
                        Some((curr_i, curr_diff))
                    }
                } else {
                    Some((i, new_diff))
                }
            })
            .expect("coords must have at least 1 element");

        Ok(i_closest)
    }

    fn distance<F: Float>(&self, a: F, b: F) -> F {
        let d = (a - b).abs();
        match self.kind {
            CoordinateKind::Linear => d,
            CoordinateKind::Periodic(period) => {
                let period = F::from(period).expect("period should be representable as a float");
                let d = d % period;
                d.min(period - d)
            }
        }
    }
}
