//! Purpose: Compensated running sum with a record count.
//! Exports: `StableSum`, `Summation`.
//! Role: Final pipeline stage; one instance per worker, merged in a fixed order.
//! Invariants: `count` equals the number of values folded, across merges.
//! Invariants: Kahan step order is fixed; reordering changes rounding.
//! Notes: Kahan cannot recover a term when the following add lands on a rounding tie
//! (e.g. 1e16, 1.0, -1e16); Neumaier keeps that term in its separate correction.
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Summation {
    #[default]
    Kahan,
    Neumaier,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StableSum {
    sum: f64,
    compensation: f64,
    count: u64,
    summation: Summation,
}

impl StableSum {
    pub fn new(summation: Summation) -> Self {
        Self {
            summation,
            ..Self::default()
        }
    }

    pub fn kahan() -> Self {
        Self::new(Summation::Kahan)
    }

    pub fn neumaier() -> Self {
        Self::new(Summation::Neumaier)
    }

    /// Folds one value and counts it.
    pub fn fold(&mut self, value: f64) {
        self.add(value);
        self.count += 1;
    }

    /// Folds another partial: its estimate and its outstanding correction
    /// go through the same compensated step; counts add.
    pub fn merge(&mut self, other: &StableSum) {
        self.add(other.sum);
        self.add(other.correction());
        self.count += other.count;
    }

    fn add(&mut self, value: f64) {
        match self.summation {
            Summation::Kahan => {
                let y = value - self.compensation;
                let t = self.sum + y;
                self.compensation = (t - self.sum) - y;
                self.sum = t;
            }
            Summation::Neumaier => {
                let t = self.sum + value;
                if self.sum.abs() >= value.abs() {
                    self.compensation += (self.sum - t) + value;
                } else {
                    self.compensation += (value - t) + self.sum;
                }
                self.sum = t;
            }
        }
    }

    // Amount still to be added to `sum` to reach the compensated total.
    fn correction(&self) -> f64 {
        match self.summation {
            Summation::Kahan => -self.compensation,
            Summation::Neumaier => self.compensation,
        }
    }

    pub fn summation(&self) -> Summation {
        self.summation
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn compensation(&self) -> f64 {
        self.compensation
    }

    /// Best estimate of the true total.
    pub fn total(&self) -> f64 {
        match self.summation {
            Summation::Kahan => self.sum,
            Summation::Neumaier => self.sum + self.compensation,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `total / count`; an `EmptyDataset` error when nothing was folded.
    pub fn mean(&self) -> Result<f64, Error> {
        if self.count == 0 {
            return Err(Error::new(ErrorKind::EmptyDataset)
                .with_message("no records were accumulated; mean is undefined"));
        }
        Ok(self.total() / self.count as f64)
    }
}

impl Extend<f64> for StableSum {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.fold(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StableSum, Summation};
    use crate::core::error::ErrorKind;

    fn folded(summation: Summation, values: &[f64]) -> StableSum {
        let mut acc = StableSum::new(summation);
        acc.extend(values.iter().copied());
        acc
    }

    #[test]
    fn kahan_recovers_terms_lost_by_naive_summation() {
        let values = [1e16, 1.0, 1.0, -1e16];
        let naive: f64 = values.iter().sum();
        assert_eq!(naive, 0.0);

        let acc = folded(Summation::Kahan, &values);
        assert_eq!(acc.count(), 4);
        assert_eq!(acc.total(), 2.0);
        assert_eq!(acc.mean().expect("mean"), 0.5);
    }

    #[test]
    fn neumaier_recovers_single_cancelled_term() {
        let values = [1e16, 1.0, -1e16];
        let naive: f64 = values.iter().sum();
        assert_eq!(naive, 0.0);

        let acc = folded(Summation::Neumaier, &values);
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.total(), 1.0);
        assert_eq!(acc.mean().expect("mean"), 1.0 / 3.0);
    }

    #[test]
    fn kahan_step_order_is_the_classic_one() {
        let mut acc = StableSum::kahan();
        acc.fold(1e16);
        acc.fold(1.0);
        // 1e16 + 1 rounds back to 1e16; the lost unit is parked as -1.
        assert_eq!(acc.sum(), 1e16);
        assert_eq!(acc.compensation(), -1.0);
    }

    #[test]
    fn empty_mean_is_an_error() {
        for summation in [Summation::Kahan, Summation::Neumaier] {
            let err = StableSum::new(summation).mean().expect_err("empty");
            assert_eq!(err.kind(), ErrorKind::EmptyDataset);
        }
    }

    #[test]
    fn order_does_not_change_mean_beyond_tolerance() {
        let values: Vec<f64> = (0..10_000)
            .map(|i| ((i * 7919) % 10_007) as f64 * 1.000_000_1 + 0.1)
            .collect();
        let reversed: Vec<f64> = values.iter().rev().copied().collect();
        let interleaved: Vec<f64> = values
            .iter()
            .step_by(2)
            .chain(values.iter().skip(1).step_by(2))
            .copied()
            .collect();

        for summation in [Summation::Kahan, Summation::Neumaier] {
            let base = folded(summation, &values).mean().expect("mean");
            for other in [&reversed, &interleaved] {
                let mean = folded(summation, other).mean().expect("mean");
                assert!(((mean - base) / base).abs() < 1e-12, "{mean} vs {base}");
            }
        }
    }

    #[test]
    fn merge_matches_single_pass() {
        let values: Vec<f64> = (1..=1_000).map(|i| 1.0 / i as f64).collect();
        for summation in [Summation::Kahan, Summation::Neumaier] {
            let whole = folded(summation, &values);
            let mut merged = StableSum::new(summation);
            for chunk in values.chunks(137) {
                merged.merge(&folded(summation, chunk));
            }

            assert_eq!(merged.count(), whole.count());
            let tolerance = 4.0 * f64::EPSILON * whole.total();
            assert!((merged.total() - whole.total()).abs() <= tolerance);
        }
    }

    #[test]
    fn merge_keeps_correction_of_partials() {
        let left = folded(Summation::Neumaier, &[1e16, 1.0]);
        let right = folded(Summation::Neumaier, &[-1e16]);

        let mut total = StableSum::neumaier();
        total.merge(&left);
        total.merge(&right);
        assert_eq!(total.count(), 3);
        assert_eq!(total.total(), 1.0);

        let left = folded(Summation::Kahan, &[1e16, 1.0, 1.0]);
        let right = folded(Summation::Kahan, &[-1e16]);
        let mut total = StableSum::kahan();
        total.merge(&left);
        total.merge(&right);
        assert_eq!(total.count(), 4);
        assert_eq!(total.total(), 2.0);
    }
}
