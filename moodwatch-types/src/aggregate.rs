//! Statistical summary over a window of samples.

/// Average, extremes and count of the samples in a window.
///
/// An empty window yields the all-zero aggregate rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aggregate {
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

impl Aggregate {
    /// Summarize a sequence of values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0u64;
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;

        for v in values {
            count += 1;
            sum += v;
            max = max.max(v);
            min = min.min(v);
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            average: sum / count as f64,
            max,
            min,
            count,
        }
    }

    /// True when no samples matched.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
