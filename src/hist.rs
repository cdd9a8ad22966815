#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Terminal histograms of document scores.

use std::{collections::BTreeMap, fmt};

use colored::Colorize;
use itertools::{Itertools, MinMaxResult};

use crate::{constants::HISTOGRAM_WIDTH, document::GradeDocument};

/// Equal-width bucket counts over a set of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Heading printed above the bars.
    pub title:  String,
    /// Lower edge of the first bin.
    pub min:    f64,
    /// Upper edge of the last bin.
    pub max:    f64,
    /// Count per bin.
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bins `values` using Sturges' rule. `None` when there is nothing to
    /// plot.
    pub fn new(title: impl Into<String>, values: &[f64]) -> Option<Self> {
        let (min, max) = match values.iter().copied().filter(|v| v.is_finite()).minmax() {
            MinMaxResult::NoElements => return None,
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();

        let bins = if max > min {
            (finite.len() as f64).log2().ceil() as usize + 1
        } else {
            1
        };
        let width = (max - min) / bins as f64;
        let mut counts = vec![0; bins];
        for v in finite {
            let bin = if width > 0.0 {
                (((v - min) / width).floor() as usize).min(bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }

        Some(Self {
            title: title.into(),
            min,
            max,
            counts,
        })
    }

    /// Total score plus one histogram per `qN_points` question.
    pub fn from_document(doc: &GradeDocument) -> Vec<Self> {
        let scores: Vec<f64> = doc.submissions.iter().filter_map(|s| s.score).collect();

        let mut questions: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for record in &doc.submissions {
            for (n, points) in &record.question_points {
                questions.entry(*n).or_default().push(*points);
            }
        }

        Self::new("Total Scores", &scores)
            .into_iter()
            .chain(
                questions
                    .into_iter()
                    .filter_map(|(n, values)| Self::new(format!("q{n}_points Distribution"), &values)),
            )
            .collect()
    }

    /// Number of values binned.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Lower and upper edge of bin `i`.
    fn edges(&self, i: usize) -> (f64, f64) {
        let width = (self.max - self.min) / self.counts.len() as f64;
        (self.min + width * i as f64, self.min + width * (i + 1) as f64)
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (n = {})", self.title.bold(), self.total())?;
        let peak = self.counts.iter().copied().max().unwrap_or(0).max(1);
        for (i, count) in self.counts.iter().enumerate() {
            let (lo, hi) = self.edges(i);
            let len = (count * HISTOGRAM_WIDTH).div_ceil(peak);
            writeln!(
                f,
                "{lo:>8.2} - {hi:<8.2} | {} {count}",
                "█".repeat(len).green()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_values_use_one_bin() {
        let h = Histogram::new("t", &[3.0, 3.0, 3.0]).expect("histogram");
        assert_eq!(h.counts, vec![3]);
    }

    #[test]
    fn empty_input_has_no_histogram() {
        assert!(Histogram::new("t", &[]).is_none());
    }
}
