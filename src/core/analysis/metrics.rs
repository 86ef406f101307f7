//! Distribution metrics over holder balances.
//!
//! Pure functions: Gini coefficient, Herfindahl-Hirschman index, and top-K
//! concentration percentages. All outputs are clamped to their documented
//! ranges so downstream scoring never sees out-of-range inputs.

use chrono::Utc;

use crate::core::domain::{DistributionMetrics, Holder};

/// Gini coefficient over balances, in `[0, 1]`. Zero for empty or
/// single-holder distributions.
pub fn gini(balances: &[u64]) -> f64 {
    let n = balances.len();
    if n < 2 {
        return 0.0;
    }
    let total: u128 = balances.iter().map(|b| *b as u128).sum();
    if total == 0 {
        return 0.0;
    }

    let mut sorted: Vec<u64> = balances.to_vec();
    sorted.sort_unstable();

    // G = (2 * Σ i*x_i) / (n * Σ x) - (n + 1) / n, i 1-based over ascending x.
    let weighted: u128 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (i as u128 + 1) * (*x as u128))
        .sum();
    let n_f = n as f64;
    let g = (2.0 * weighted as f64) / (n_f * total as f64) - (n_f + 1.0) / n_f;
    g.clamp(0.0, 1.0)
}

/// Herfindahl-Hirschman index: sum of squared market shares, in `[0, 1]`.
pub fn hhi(balances: &[u64]) -> f64 {
    let total: u128 = balances.iter().map(|b| *b as u128).sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    balances
        .iter()
        .map(|b| {
            let share = *b as f64 / total;
            share * share
        })
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Share of supply held by the top `k` balances, percent. Balances need
/// not be sorted.
pub fn top_k_pct(balances: &[u64], k: usize) -> f64 {
    let total: u128 = balances.iter().map(|b| *b as u128).sum();
    if total == 0 {
        return 0.0;
    }
    let mut sorted: Vec<u64> = balances.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let top: u128 = sorted.iter().take(k).map(|b| *b as u128).sum();
    (top as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Compute the full metric set for one holder list.
pub fn compute(holders: &[Holder]) -> DistributionMetrics {
    let balances: Vec<u64> = holders.iter().map(|h| h.balance).collect();

    let now = Utc::now();
    let mut durations: Vec<f64> = holders
        .iter()
        .filter_map(|h| h.first_acquired_at)
        .map(|t| (now - t).num_seconds().max(0) as f64 / 3_600.0)
        .collect();
    durations.sort_unstable_by(f64::total_cmp);

    let mean_holding_hours = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };
    let median_holding_hours = if durations.is_empty() {
        None
    } else {
        Some(durations[durations.len() / 2])
    };

    DistributionMetrics {
        gini: gini(&balances),
        hhi: hhi(&balances),
        top10_pct: top_k_pct(&balances, 10),
        top25_pct: top_k_pct(&balances, 25),
        top100_pct: top_k_pct(&balances, 100),
        mean_holding_hours,
        median_holding_hours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::WalletAddress;

    fn holders(balances: &[u64]) -> Vec<Holder> {
        balances
            .iter()
            .enumerate()
            .map(|(i, b)| Holder {
                wallet: WalletAddress::from(format!("w{i}")),
                balance: *b,
                first_acquired_at: None,
            })
            .collect()
    }

    #[test]
    fn gini_of_equal_distribution_is_zero() {
        assert_eq!(gini(&[100, 100, 100, 100]), 0.0);
    }

    #[test]
    fn gini_of_concentrated_distribution_approaches_one() {
        let mut balances = vec![0u64; 999];
        balances.push(1_000_000);
        let g = gini(&balances);
        assert!(g > 0.99, "gini {g}");
        assert!(g <= 1.0);
    }

    #[test]
    fn gini_bounds_hold_for_mixed_distributions() {
        for balances in [
            vec![1, 2, 3, 4, 5],
            vec![10, 10, 1000],
            vec![7],
            vec![],
            vec![0, 0, 0],
        ] {
            let g = gini(&balances);
            assert!((0.0..=1.0).contains(&g), "gini {g} for {balances:?}");
        }
    }

    #[test]
    fn hhi_of_monopoly_is_one() {
        assert_eq!(hhi(&[1_000_000]), 1.0);
    }

    #[test]
    fn hhi_of_even_split_is_reciprocal_n() {
        let h = hhi(&[100, 100, 100, 100]);
        assert!((h - 0.25).abs() < 1e-9);
    }

    #[test]
    fn top_k_is_monotone_in_k() {
        let balances: Vec<u64> = (1..=200).collect();
        let top10 = top_k_pct(&balances, 10);
        let top25 = top_k_pct(&balances, 25);
        let top100 = top_k_pct(&balances, 100);
        assert!(top10 <= top25);
        assert!(top25 <= top100);
        assert!(top100 <= 100.0);
    }

    #[test]
    fn compute_produces_in_range_metrics() {
        let metrics = compute(&holders(&[500, 300, 100, 50, 25, 10]));
        assert!((0.0..=1.0).contains(&metrics.gini));
        assert!((0.0..=1.0).contains(&metrics.hhi));
        assert!(metrics.top10_pct <= metrics.top25_pct);
        assert!(metrics.top25_pct <= metrics.top100_pct);
        assert!(metrics.mean_holding_hours.is_none());
    }

    #[test]
    fn holding_durations_when_present() {
        let mut list = holders(&[100, 200]);
        list[0].first_acquired_at = Some(Utc::now() - chrono::Duration::hours(10));
        list[1].first_acquired_at = Some(Utc::now() - chrono::Duration::hours(2));
        let metrics = compute(&list);
        let mean = metrics.mean_holding_hours.unwrap();
        assert!((5.9..6.1).contains(&mean), "mean {mean}");
        assert!(metrics.median_holding_hours.is_some());
    }
}
