//! Capital allocation across the active worker set.
//!
//! Pure and deterministic: the same input always yields the same split.
//! Percentages have one decimal place and active workers sum to exactly 100.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::WorkerSet;

/// Tenths of a percent in the whole budget
const BUDGET_UNITS: i64 = 1000;

/// One worker as seen by the allocator
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationInput {
    pub name: String,
    pub active: bool,
    /// Relative weight; `None` means 1
    pub weight: Option<Decimal>,
}

impl AllocationInput {
    pub fn new(name: &str, active: bool, weight: Option<Decimal>) -> Self {
        Self {
            name: name.to_string(),
            active,
            weight,
        }
    }

    fn effective_weight(&self) -> Decimal {
        match self.weight {
            Some(w) if w > Decimal::ZERO => w,
            _ => Decimal::ONE,
        }
    }
}

/// Worker name -> capital percent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapitalAllocation(BTreeMap<String, Decimal>);

impl CapitalAllocation {
    pub fn get(&self, name: &str) -> Decimal {
        self.0.get(name).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.0.values().copied().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write percentages into the matching worker configurations.
    /// Returns the names whose `capital_percent` changed.
    pub fn apply_to(&self, workers: &mut WorkerSet) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, config) in workers.workers.iter_mut() {
            let percent = self.get(name);
            if config.capital_percent != percent {
                config.capital_percent = percent;
                changed.push(name.clone());
            }
        }
        changed
    }
}

/// Split 100% across the active workers by weight; inactive workers get 0.
///
/// Rounds down to tenths of a percent and hands leftover tenths to the
/// largest remainders (ties broken by name).
pub fn allocate(workers: &[AllocationInput]) -> CapitalAllocation {
    let mut allocation: BTreeMap<String, Decimal> = workers
        .iter()
        .map(|w| (w.name.clone(), Decimal::ZERO))
        .collect();

    let mut active: Vec<&AllocationInput> = workers.iter().filter(|w| w.active).collect();
    if active.is_empty() {
        return CapitalAllocation(allocation);
    }
    active.sort_by(|a, b| a.name.cmp(&b.name));
    active.dedup_by(|a, b| a.name == b.name);

    let total_weight: Decimal = active.iter().map(|w| w.effective_weight()).sum();
    let budget = Decimal::from(BUDGET_UNITS);

    let mut shares: Vec<(&str, Decimal, Decimal)> = active
        .iter()
        .map(|w| {
            let exact = budget * w.effective_weight() / total_weight;
            let floor = exact.floor();
            (w.name.as_str(), floor, exact - floor)
        })
        .collect();

    let assigned: Decimal = shares.iter().map(|(_, units, _)| *units).sum();
    let mut leftover = budget - assigned;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        shares[b]
            .2
            .cmp(&shares[a].2)
            .then_with(|| shares[a].0.cmp(shares[b].0))
    });
    for idx in order.into_iter().cycle() {
        if leftover <= Decimal::ZERO {
            break;
        }
        shares[idx].1 += Decimal::ONE;
        leftover -= Decimal::ONE;
    }

    let ten = Decimal::TEN;
    for (name, units, _) in shares {
        allocation.insert(name.to_string(), units / ten);
    }
    CapitalAllocation(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs(spec: &[(&str, bool)]) -> Vec<AllocationInput> {
        spec.iter()
            .map(|(name, active)| AllocationInput::new(name, *active, None))
            .collect()
    }

    #[test]
    fn test_equal_split_sums_to_100() {
        let allocation = allocate(&inputs(&[("a", true), ("b", true), ("c", true)]));
        assert_eq!(allocation.total(), dec!(100));
        assert_eq!(allocation.get("a"), dec!(33.4));
        assert_eq!(allocation.get("b"), dec!(33.3));
        assert_eq!(allocation.get("c"), dec!(33.3));
    }

    #[test]
    fn test_inactive_get_zero() {
        let allocation = allocate(&inputs(&[("a", true), ("b", false), ("c", true)]));
        assert_eq!(allocation.get("a"), dec!(50));
        assert_eq!(allocation.get("b"), dec!(0));
        assert_eq!(allocation.get("c"), dec!(50));
        assert_eq!(allocation.len(), 3);
    }

    #[test]
    fn test_no_active_workers() {
        let allocation = allocate(&inputs(&[("a", false), ("b", false)]));
        assert_eq!(allocation.total(), dec!(0));
    }

    #[test]
    fn test_weights() {
        let workers = vec![
            AllocationInput::new("stable", true, Some(dec!(3))),
            AllocationInput::new("meme", true, Some(dec!(1))),
        ];
        let allocation = allocate(&workers);
        assert_eq!(allocation.get("stable"), dec!(75));
        assert_eq!(allocation.get("meme"), dec!(25));
    }

    #[test]
    fn test_invariant_for_many_sizes() {
        for n in 1..=13 {
            let workers: Vec<AllocationInput> = (0..n)
                .map(|i| AllocationInput::new(&format!("w{:02}", i), true, None))
                .collect();
            let allocation = allocate(&workers);
            assert_eq!(allocation.total(), dec!(100), "n = {}", n);
            for (_, pct) in allocation.iter() {
                assert_eq!(pct.round_dp(1), *pct);
            }
        }
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let forward = allocate(&inputs(&[("x", true), ("y", true), ("z", true)]));
        let reverse = allocate(&inputs(&[("z", true), ("y", true), ("x", true)]));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut set = WorkerSet::default();
        set.workers.insert("a".into(), Default::default());
        set.workers.insert("b".into(), Default::default());

        let allocation = allocate(&inputs(&[("a", true), ("b", false)]));
        let changed = allocation.apply_to(&mut set);
        assert_eq!(changed, vec!["a".to_string()]);
        assert_eq!(set.workers["a"].capital_percent, dec!(100));
    }
}
