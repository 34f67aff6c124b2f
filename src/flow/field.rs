use serde::{Deserialize, Serialize};

/// Integer displacement of one interrogation window, anchored at the window centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplacementVector {
    pub center_x: usize,
    pub center_y: usize,
    pub dx: i32,
    pub dy: i32,
}

impl DisplacementVector {
    pub fn magnitude(&self) -> f64 {
        f64::from(self.dx).hypot(f64::from(self.dy))
    }
}

/// Sparse displacement field in row-major grid order.
///
/// Cells whose search region could not hold a full window are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorField {
    vectors: Vec<DisplacementVector>,
}

impl VectorField {
    pub fn new(vectors: Vec<DisplacementVector>) -> Self {
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DisplacementVector> {
        self.vectors.iter()
    }

    pub fn as_slice(&self) -> &[DisplacementVector] {
        &self.vectors
    }

    pub fn into_vec(self) -> Vec<DisplacementVector> {
        self.vectors
    }

    /// Average `(dx, dy)`, `None` for an empty field
    pub fn mean_displacement(&self) -> Option<(f64, f64)> {
        if self.vectors.is_empty() {
            return None;
        }
        let n = self.vectors.len() as f64;
        let (sx, sy) = self.vectors.iter().fold((0.0, 0.0), |(sx, sy), v| {
            (sx + f64::from(v.dx), sy + f64::from(v.dy))
        });
        Some((sx / n, sy / n))
    }

    pub fn max_magnitude(&self) -> f64 {
        self.vectors
            .iter()
            .map(DisplacementVector::magnitude)
            .fold(0.0, f64::max)
    }

    /// True when no vector is longer than `threshold` pixels
    pub fn is_static(&self, threshold: f64) -> bool {
        self.max_magnitude() <= threshold
    }
}

impl<'a> IntoIterator for &'a VectorField {
    type Item = &'a DisplacementVector;
    type IntoIter = std::slice::Iter<'a, DisplacementVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.iter()
    }
}

impl FromIterator<DisplacementVector> for VectorField {
    fn from_iter<I: IntoIterator<Item = DisplacementVector>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(dx: i32, dy: i32) -> DisplacementVector {
        DisplacementVector {
            center_x: 0,
            center_y: 0,
            dx,
            dy,
        }
    }

    #[test]
    fn test_summary_statistics() {
        let field: VectorField = vec![v(3, 4), v(-1, 0), v(1, 2)].into_iter().collect();
        assert_eq!(field.len(), 3);
        assert_eq!(field.mean_displacement(), Some((1.0, 2.0)));
        assert_eq!(field.max_magnitude(), 5.0);
        assert!(!field.is_static(4.9));
        assert!(field.is_static(5.0));
    }

    #[test]
    fn test_empty_field() {
        let field = VectorField::default();
        assert!(field.is_empty());
        assert_eq!(field.mean_displacement(), None);
        assert!(field.is_static(0.0));
    }
}
