//! Contingency-table tests and multiple-testing correction.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::factorial::ln_binomial;

/// Relative tolerance when comparing table probabilities in the Fisher test.
const FISHER_RELATIVE_TOLERANCE: f64 = 1e-7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestMethod {
    #[default]
    Fisher,
    Chi2,
}

impl fmt::Display for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMethod::Fisher => write!(f, "fisher"),
            TestMethod::Chi2 => write!(f, "chi2"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FdrMethod {
    #[default]
    #[value(alias = "bh", alias = "fdr_bh")]
    BenjaminiHochberg,
    Bonferroni,
}

impl fmt::Display for FdrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdrMethod::BenjaminiHochberg => write!(f, "benjamini-hochberg"),
            FdrMethod::Bonferroni => write!(f, "bonferroni"),
        }
    }
}

/// 2x2 table: rows are the two groups, columns are present / absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContingencyTable {
    pub present1: u64,
    pub absent1: u64,
    pub present2: u64,
    pub absent2: u64,
}

impl ContingencyTable {
    /// Build from per-group counts and totals. Counts above the total are
    /// clamped so the absent cell never underflows.
    pub fn new(count1: u64, total1: u64, count2: u64, total2: u64) -> Self {
        Self {
            present1: count1,
            absent1: total1.saturating_sub(count1),
            present2: count2,
            absent2: total2.saturating_sub(count2),
        }
    }

    fn row_sums(&self) -> [u64; 2] {
        [
            self.present1 + self.absent1,
            self.present2 + self.absent2,
        ]
    }

    fn col_sums(&self) -> [u64; 2] {
        [
            self.present1 + self.present2,
            self.absent1 + self.absent2,
        ]
    }

    fn total(&self) -> u64 {
        self.present1 + self.absent1 + self.present2 + self.absent2
    }

    fn has_empty_margin(&self) -> bool {
        self.row_sums().contains(&0) || self.col_sums().contains(&0)
    }
}

pub fn p_value(method: TestMethod, table: &ContingencyTable) -> f64 {
    match method {
        TestMethod::Fisher => fisher_exact(table),
        TestMethod::Chi2 => chi_square(table),
    }
}

/// Two-sided Fisher exact test.
///
/// Sums the hypergeometric probabilities of every table with the observed
/// margins that is no more likely than the observed one.
pub fn fisher_exact(table: &ContingencyTable) -> f64 {
    if table.has_empty_margin() {
        return 1.0;
    }
    let [row1, row2] = table.row_sums();
    let [col1, _] = table.col_sums();
    let total = table.total();

    let ln_denominator = ln_binomial(total, col1);
    let ln_probability =
        |x: u64| ln_binomial(row1, x) + ln_binomial(row2, col1 - x) - ln_denominator;

    let observed = ln_probability(table.present1);
    let cutoff = observed + FISHER_RELATIVE_TOLERANCE.ln_1p();
    let low = col1.saturating_sub(row2);
    let high = row1.min(col1);

    let p: f64 = (low..=high)
        .map(ln_probability)
        .filter(|&ln_p| ln_p <= cutoff)
        .map(f64::exp)
        .sum();
    p.min(1.0)
}

/// Pearson chi-square test with Yates' continuity correction, one degree of
/// freedom. Tables with an empty row or column give 1.0.
pub fn chi_square(table: &ContingencyTable) -> f64 {
    if table.has_empty_margin() {
        return 1.0;
    }
    let rows = table.row_sums();
    let cols = table.col_sums();
    let total = table.total() as f64;
    let observed = [
        [table.present1, table.absent1],
        [table.present2, table.absent2],
    ];

    let mut statistic = 0.0;
    for (row, row_sum) in rows.iter().enumerate() {
        for (col, col_sum) in cols.iter().enumerate() {
            let expected = (*row_sum as f64) * (*col_sum as f64) / total;
            let deviation = ((observed[row][col] as f64) - expected).abs();
            let corrected = (deviation - 0.5).max(0.0);
            statistic += corrected * corrected / expected;
        }
    }

    ChiSquared::new(1.0)
        .map(|dist| dist.sf(statistic))
        .unwrap_or(1.0)
}

/// Adjust `p_values` for multiple testing. Output order matches input order.
pub fn adjust_p_values(method: FdrMethod, p_values: &[f64]) -> Vec<f64> {
    match method {
        FdrMethod::BenjaminiHochberg => benjamini_hochberg(p_values),
        FdrMethod::Bonferroni => bonferroni(p_values),
    }
}

/// Benjamini-Hochberg step-up adjustment.
///
/// q[i] = min(p[i] * n / rank[i], q[i+1]), clamped to 1.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut q_sorted = vec![0.0; n];
    q_sorted[n - 1] = p_values[order[n - 1]].min(1.0);
    for i in (0..n - 1).rev() {
        let rank = (i + 1) as f64;
        let adjusted = p_values[order[i]] * n as f64 / rank;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    let mut q_values = vec![0.0; n];
    for (sorted_idx, &original_idx) in order.iter().enumerate() {
        q_values[original_idx] = q_sorted[sorted_idx];
    }
    q_values
}

pub fn bonferroni(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len() as f64;
    p_values.iter().map(|p| (p * n).min(1.0)).collect()
}

/// Ratio of per-group rates. Infinite when only the first group has the
/// annotation, 1.0 when neither does.
pub fn effect_size(count1: u64, total1: u64, count2: u64, total2: u64) -> f64 {
    let rate1 = rate(count1, total1);
    let rate2 = rate(count2, total2);
    if rate2 == 0.0 {
        return if rate1 > 0.0 { f64::INFINITY } else { 1.0 };
    }
    rate1 / rate2
}

pub fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}
