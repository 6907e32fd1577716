use super::block::{Block, parse_value};
use serde::Serialize;
use std::collections::BTreeMap;

/// Running signed delta per address.
pub type BalanceMap = BTreeMap<String, f64>;

/// The address whose balance moved the most so far.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct MaxAccount {
    pub address: String,
    pub delta: f64,
}

impl MaxAccount {
    pub fn new(address: impl Into<String>, delta: f64) -> Self {
        Self {
            address: address.into(),
            delta,
        }
    }

    /// `|delta|`, with NaN counting as no change at all.
    pub fn magnitude(&self) -> f64 {
        magnitude(self.delta)
    }
}

/// Absolute size of a delta, with NaN counting as zero.
pub fn magnitude(delta: f64) -> f64 {
    if delta.is_nan() { 0.0 } else { delta.abs() }
}

/// Picks the candidate with the strictly largest magnitude. Among equal
/// magnitudes the earliest candidate wins; no candidates yields `None`.
pub fn most_changed<I>(candidates: I) -> Option<MaxAccount>
where
    I: IntoIterator<Item = MaxAccount>,
{
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(current) if candidate.magnitude() <= current.magnitude() => Some(current),
        _ => Some(candidate),
    })
}

/// Folds blocks into per-address deltas.
///
/// Pure bookkeeping with no I/O, so whichever task receives a block can apply
/// it synchronously.
#[derive(Debug, Default, Clone)]
pub struct BalanceAggregator {
    balances: BalanceMap,
    max_account: Option<MaxAccount>,
    amount_of_transactions: u64,
}

impl BalanceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits every recipient and debits every sender. Balances end up the
    /// same whatever order blocks are applied in; the most-changed account
    /// can differ on ties.
    pub fn apply_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            let value = parse_value(&tx.value);

            let to = self.credit(&tx.to, value);
            let from = self.credit(&tx.from, -value);
            self.amount_of_transactions += 1;

            let candidates = [
                MaxAccount::new(tx.to.as_str(), to),
                MaxAccount::new(tx.from.as_str(), from),
            ];
            self.max_account = most_changed(candidates.into_iter().chain(self.max_account.take()));
        }
    }

    fn credit(&mut self, address: &str, value: f64) -> f64 {
        let balance = self.balances.entry(address.to_string()).or_insert(0.0);
        *balance += value;
        *balance
    }

    /// Deltas so far, keyed by address.
    pub fn balances(&self) -> &BalanceMap {
        &self.balances
    }

    pub fn max_account(&self) -> Option<&MaxAccount> {
        self.max_account.as_ref()
    }

    /// Transactions applied, including ones with an unparsable value.
    pub fn amount_of_transactions(&self) -> u64 {
        self.amount_of_transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::block::BlockTransaction;

    fn account(address: &str, delta: f64) -> MaxAccount {
        MaxAccount::new(address, delta)
    }

    #[test]
    fn test_most_changed_positive() {
        let result = most_changed([account("a", 100.0), account("b", 200.0)]);
        assert_eq!(result, Some(account("b", 200.0)));
    }

    #[test]
    fn test_most_changed_negative() {
        let result = most_changed([account("a", -100.0), account("b", -200.0)]);
        assert_eq!(result, Some(account("b", -200.0)));
    }

    #[test]
    fn test_most_changed_mixed_sign() {
        let result = most_changed([account("a", 100.0), account("b", -200.0)]);
        assert_eq!(result, Some(account("b", -200.0)));
    }

    #[test]
    fn test_most_changed_one_zero() {
        let result = most_changed([account("a", 0.0), account("b", 200.0)]);
        assert_eq!(result, Some(account("b", 200.0)));
    }

    #[test]
    fn test_most_changed_tie_keeps_first() {
        let result = most_changed([account("a", 0.0), account("b", 0.0)]);
        assert_eq!(result.map(|m| m.address), Some("a".to_string()));

        let result = most_changed([account("a", -5.0), account("b", 5.0)]);
        assert_eq!(result, Some(account("a", -5.0)));
    }

    #[test]
    fn test_most_changed_nan_counts_as_zero() {
        let result = most_changed([account("a", f64::NAN), account("b", 200.0)]);
        assert_eq!(result, Some(account("b", 200.0)));

        let result = most_changed([account("a", f64::NAN), account("b", f64::NAN)]).unwrap();
        assert_eq!(result.address, "a");
        assert!(result.delta.is_nan());

        let result = most_changed([account("a", 0.0), account("b", f64::NAN)]).unwrap();
        assert_eq!(result.address, "a");
    }

    #[test]
    fn test_most_changed_empty() {
        assert_eq!(most_changed(Vec::new()), None);
    }

    #[test]
    fn test_apply_block_accumulates_across_blocks() {
        let mut aggregator = BalanceAggregator::new();
        aggregator.apply_block(&Block::new(vec![BlockTransaction::new("X", "Y", "10")]));
        aggregator.apply_block(&Block::new(vec![BlockTransaction::new("Y", "X", "5")]));
        aggregator.apply_block(&Block::new(vec![BlockTransaction::new("X", "Z", "100")]));

        let balances = aggregator.balances();
        assert_eq!(balances["X"], -105.0);
        assert_eq!(balances["Y"], 5.0);
        assert_eq!(balances["Z"], 100.0);
        assert_eq!(aggregator.amount_of_transactions(), 3);
        assert_eq!(aggregator.max_account(), Some(&account("X", -105.0)));
    }

    #[test]
    fn test_block_order_does_not_change_balances() {
        let blocks = [
            Block::new(vec![BlockTransaction::new("X", "Y", "10")]),
            Block::new(vec![BlockTransaction::new("Y", "X", "5")]),
            Block::new(vec![BlockTransaction::new("X", "Z", "100")]),
        ];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let folded: Vec<BalanceAggregator> = orders
            .iter()
            .map(|order| {
                let mut aggregator = BalanceAggregator::new();
                for &i in order {
                    aggregator.apply_block(&blocks[i]);
                }
                aggregator
            })
            .collect();

        for aggregator in &folded {
            assert_eq!(aggregator.balances(), folded[0].balances());
            assert_eq!(aggregator.amount_of_transactions(), 3);
        }
        assert_eq!(folded[0].balances()["X"], -105.0);
    }

    #[test]
    fn test_apply_block_prefers_recipient_on_tie() {
        let mut aggregator = BalanceAggregator::new();
        aggregator.apply_block(&Block::new(vec![BlockTransaction::new("A", "B", "7")]));

        assert_eq!(aggregator.max_account(), Some(&account("B", 7.0)));
    }

    #[test]
    fn test_apply_block_fresh_pair_wins_ties() {
        let mut aggregator = BalanceAggregator::new();
        aggregator.apply_block(&Block::new(vec![
            BlockTransaction::new("A", "B", "7"),
            BlockTransaction::new("C", "D", "7"),
        ]));

        // D ties with the holder B; the freshly touched pair is listed first.
        assert_eq!(aggregator.max_account(), Some(&account("D", 7.0)));
    }

    #[test]
    fn test_apply_block_with_unparsable_value() {
        let mut aggregator = BalanceAggregator::new();
        aggregator.apply_block(&Block::new(vec![
            BlockTransaction::new("A", "B", "3"),
            BlockTransaction::new("C", "D", "garbage"),
        ]));

        assert_eq!(aggregator.amount_of_transactions(), 2);
        assert!(aggregator.balances()["D"].is_nan());
        assert_eq!(aggregator.max_account(), Some(&account("B", 3.0)));
    }

    #[test]
    fn test_apply_empty_block() {
        let mut aggregator = BalanceAggregator::new();
        aggregator.apply_block(&Block::default());

        assert!(aggregator.balances().is_empty());
        assert_eq!(aggregator.amount_of_transactions(), 0);
        assert!(aggregator.max_account().is_none());
    }
}
