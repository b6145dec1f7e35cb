//! Discount selection and application
//!
//! Gathers eligible strategies for a settlement, applies each candidate
//! to the base amount, and picks the one yielding the lowest result.
//!
//! # Selection
//!
//! A strategy is a candidate when it is ACTIVE, the current time falls
//! inside its validity window, its kind applies to the channel, and the
//! user's usage count is below the per-user cap. Ties on the resulting
//! amount break by ascending strategy id so selection is deterministic.

use crate::types::{AppliedDiscount, DiscountChannel, DiscountStrategy};
use balance_ledger::UserId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Discount strategy engine
pub struct DiscountEngine {
    /// Strategy table, replaced wholesale by the admin collaborator
    strategies: RwLock<HashMap<Uuid, DiscountStrategy>>,

    /// Per-user usage counts
    usage: DashMap<(Uuid, UserId), u32>,
}

impl DiscountEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            usage: DashMap::new(),
        }
    }

    /// Replace the strategy set wholesale
    pub fn load_strategies(&self, strategies: Vec<DiscountStrategy>) {
        let mut table = HashMap::with_capacity(strategies.len());
        for strategy in strategies {
            table.insert(strategy.strategy_id, strategy);
        }

        let count = table.len();
        *self.strategies.write() = table;
        tracing::info!(strategies = count, "Discount strategies loaded");
    }

    /// Number of loaded strategies
    pub fn strategy_count(&self) -> usize {
        self.strategies.read().len()
    }

    /// Recorded usage of a strategy by a user
    pub fn usage_of(&self, strategy_id: Uuid, user_id: &UserId) -> u32 {
        self.usage
            .get(&(strategy_id, user_id.clone()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Apply the best eligible discount to a base amount
    ///
    /// Returns the base amount unchanged with no strategy id when no
    /// candidate applies. The result is rounded to cents and never
    /// negative. Usage is recorded for the winning strategy.
    pub fn apply_best_discount(
        &self,
        user_id: &UserId,
        base_amount: Decimal,
        channel: DiscountChannel,
        now: DateTime<Utc>,
    ) -> AppliedDiscount {
        let strategies = self.strategies.read();

        let mut best: Option<(Decimal, Uuid)> = None;
        for strategy in strategies.values() {
            if !strategy.is_live(now) || !strategy.kind.applies_to(channel) {
                continue;
            }
            if let Some(cap) = strategy.per_user_cap {
                if self.usage_of(strategy.strategy_id, user_id) >= cap {
                    continue;
                }
            }

            let amount = strategy.discounted(base_amount).round_dp(2);
            let candidate = (amount, strategy.strategy_id);
            // Lowest amount wins; ascending id breaks ties
            best = match best {
                None => Some(candidate),
                Some(current) if candidate < current => Some(candidate),
                Some(current) => Some(current),
            };
        }
        drop(strategies);

        match best {
            Some((amount, strategy_id)) => {
                *self
                    .usage
                    .entry((strategy_id, user_id.clone()))
                    .or_insert(0) += 1;

                tracing::debug!(
                    user = %user_id,
                    strategy = %strategy_id,
                    base = %base_amount,
                    discounted = %amount,
                    "Discount applied"
                );

                AppliedDiscount {
                    amount,
                    strategy_id: Some(strategy_id),
                }
            }
            None => AppliedDiscount {
                amount: base_amount,
                strategy_id: None,
            },
        }
    }
}

impl Default for DiscountEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscountRule, StrategyKind, StrategyStatus};

    fn strategy(
        id: u128,
        kind: StrategyKind,
        rule: DiscountRule,
        cap: Option<u32>,
    ) -> DiscountStrategy {
        let now = Utc::now();
        DiscountStrategy {
            strategy_id: Uuid::from_u128(id),
            kind,
            status: StrategyStatus::Active,
            rule,
            valid_from: now - chrono::Duration::days(1),
            valid_until: now + chrono::Duration::days(1),
            per_user_cap: cap,
        }
    }

    #[test]
    fn test_no_candidates_returns_base() {
        let engine = DiscountEngine::new();
        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.amount, Decimal::new(600, 2));
        assert_eq!(applied.strategy_id, None);
    }

    #[test]
    fn test_lowest_amount_wins() {
        let engine = DiscountEngine::new();
        engine.load_strategies(vec![
            strategy(
                1,
                StrategyKind::Travel,
                DiscountRule::Percentage(Decimal::new(10, 2)), // -10% => 5.40
                None,
            ),
            strategy(
                2,
                StrategyKind::Travel,
                DiscountRule::FixedAmount(Decimal::new(200, 2)), // -2.00 => 4.00
                None,
            ),
        ]);

        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.amount, Decimal::new(400, 2));
        assert_eq!(applied.strategy_id, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_tie_breaks_by_ascending_id() {
        let engine = DiscountEngine::new();
        engine.load_strategies(vec![
            strategy(
                7,
                StrategyKind::Travel,
                DiscountRule::Percentage(Decimal::new(20, 2)),
                None,
            ),
            strategy(
                3,
                StrategyKind::Travel,
                DiscountRule::Percentage(Decimal::new(20, 2)),
                None,
            ),
        ]);

        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.amount, Decimal::new(480, 2));
        assert_eq!(applied.strategy_id, Some(Uuid::from_u128(3)));
    }

    #[test]
    fn test_channel_filtering() {
        let engine = DiscountEngine::new();
        engine.load_strategies(vec![strategy(
            1,
            StrategyKind::Payment,
            DiscountRule::Percentage(Decimal::new(50, 2)),
            None,
        )]);

        // Payment-kind strategy must not touch a transit fare
        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.strategy_id, None);
    }

    #[test]
    fn test_inactive_and_expired_skipped() {
        let engine = DiscountEngine::new();
        let mut inactive = strategy(
            1,
            StrategyKind::Travel,
            DiscountRule::Percentage(Decimal::new(20, 2)),
            None,
        );
        inactive.status = StrategyStatus::Inactive;

        let mut stale = strategy(
            2,
            StrategyKind::Travel,
            DiscountRule::Percentage(Decimal::new(20, 2)),
            None,
        );
        stale.valid_until = Utc::now() - chrono::Duration::hours(1);

        engine.load_strategies(vec![inactive, stale]);

        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.strategy_id, None);
    }

    #[test]
    fn test_usage_cap_enforced() {
        let engine = DiscountEngine::new();
        engine.load_strategies(vec![strategy(
            1,
            StrategyKind::Travel,
            DiscountRule::Percentage(Decimal::new(20, 2)),
            Some(2),
        )]);
        let user = UserId::new("u1");

        for _ in 0..2 {
            let applied = engine.apply_best_discount(
                &user,
                Decimal::new(600, 2),
                DiscountChannel::Transit,
                Utc::now(),
            );
            assert_eq!(applied.strategy_id, Some(Uuid::from_u128(1)));
        }
        assert_eq!(engine.usage_of(Uuid::from_u128(1), &user), 2);

        // Cap reached: third settlement gets no discount
        let applied = engine.apply_best_discount(
            &user,
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.strategy_id, None);
        assert_eq!(applied.amount, Decimal::new(600, 2));

        // The cap is per user
        let other = UserId::new("u2");
        let applied = engine.apply_best_discount(
            &other,
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.strategy_id, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn test_never_below_zero() {
        let engine = DiscountEngine::new();
        engine.load_strategies(vec![strategy(
            1,
            StrategyKind::Travel,
            DiscountRule::FixedAmount(Decimal::new(10_000, 2)),
            None,
        )]);

        let applied = engine.apply_best_discount(
            &UserId::new("u1"),
            Decimal::new(600, 2),
            DiscountChannel::Transit,
            Utc::now(),
        );
        assert_eq!(applied.amount, Decimal::ZERO);
    }
}
