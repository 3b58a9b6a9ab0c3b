//! Quant ledger: on-hand and reserved quantities per quant key.
//!
//! The ledger is plain quantity bookkeeping. It does not know about moves or
//! master data; the warehouse validates lots/serials and keeps moves in sync.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, LotId, ProductId, Quantity, quantity};

use crate::catalog::Tracking;
use crate::error::{StockError, StockResult};
use crate::quant::{Quant, QuantFilter, QuantId, QuantKey, RemovalStrategy, Reservation};

/// Result of an `update_quantity` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantUpdate {
    /// Free quantity left at the exact key (negative when oversold).
    pub available: Quantity,
    /// Incoming date of the quant that absorbed the update.
    pub in_date: DateTime<Utc>,
}

/// A counter change recorded by the ledger, drained by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerChange {
    Quantity {
        key: QuantKey,
        delta: Quantity,
        quantity: Quantity,
    },
    Reservation {
        key: QuantKey,
        delta: Quantity,
        reserved: Quantity,
    },
}

#[derive(Debug, Clone, Default)]
pub struct QuantLedger {
    quants: BTreeMap<QuantId, Quant>,
    by_key: HashMap<QuantKey, QuantId>,
    next_id: u64,
    removal: RemovalStrategy,
    changes: Vec<LedgerChange>,
}

impl QuantLedger {
    pub fn new(removal: RemovalStrategy) -> Self {
        Self {
            removal,
            ..Self::default()
        }
    }

    pub fn removal_strategy(&self) -> RemovalStrategy {
        self.removal
    }

    pub fn quant(&self, id: QuantId) -> Option<&Quant> {
        self.quants.get(&id)
    }

    pub fn quant_at(&self, key: &QuantKey) -> Option<&Quant> {
        self.by_key.get(key).and_then(|id| self.quants.get(id))
    }

    /// All quants, in creation order.
    pub fn quants(&self) -> impl Iterator<Item = &Quant> {
        self.quants.values()
    }

    pub fn len(&self) -> usize {
        self.quants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quants.is_empty()
    }

    /// Matching quants in removal order (incoming date, then creation order).
    pub fn gather(&self, filter: &QuantFilter) -> Vec<&Quant> {
        let mut found: Vec<&Quant> = self
            .quants
            .values()
            .filter(|q| filter.matches(&q.key))
            .collect();
        found.sort_by_key(|q| (q.in_date, q.id));
        if self.removal == RemovalStrategy::Lifo {
            found.reverse();
        }
        found
    }

    /// On-hand quantity of the matching quants.
    pub fn quantity(&self, filter: &QuantFilter) -> Quantity {
        self.gather(filter).iter().map(|q| q.quantity).sum::<Decimal>()
    }

    pub fn reserved_quantity(&self, filter: &QuantFilter) -> Quantity {
        self.gather(filter)
            .iter()
            .map(|q| q.reserved_quantity)
            .sum::<Decimal>()
    }

    /// Quantity of a product summed over every location.
    pub fn total_quantity(&self, product: ProductId) -> Quantity {
        self.quants
            .values()
            .filter(|q| q.key.product_id == product)
            .map(|q| q.quantity)
            .sum::<Decimal>()
    }

    /// Quantity that can still be reserved.
    ///
    /// Untracked products net everything together. Tracked products net per
    /// lot (untracked units form their own group) and, unless negatives are
    /// allowed, lots that are not positive do not count.
    pub fn available_quantity(
        &self,
        filter: &QuantFilter,
        tracking: Tracking,
        allow_negative: bool,
    ) -> Quantity {
        let quants = self.gather(filter);

        if !tracking.is_tracked() {
            let available: Quantity = quants.iter().map(|q| q.free_quantity()).sum();
            return if allow_negative {
                available
            } else {
                quantity::non_negative(available)
            };
        }

        let mut per_lot: BTreeMap<Option<LotId>, Quantity> = BTreeMap::new();
        for q in quants {
            *per_lot.entry(q.key.lot_id).or_default() += q.free_quantity();
        }
        if allow_negative {
            per_lot.values().copied().sum()
        } else {
            per_lot.values().copied().filter(|v| quantity::is_positive(*v)).sum()
        }
    }

    /// Add `delta` to the quant stored under `key`, creating it when absent.
    ///
    /// The result may be negative. Quants left with nothing on hand and
    /// nothing reserved are dropped.
    pub fn update_quantity(
        &mut self,
        key: &QuantKey,
        delta: Quantity,
        in_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StockResult<QuantUpdate> {
        if delta.is_zero() {
            return Err(DomainError::quantity("delta cannot be zero").into());
        }

        let id = match self.by_key.get(key) {
            Some(id) => *id,
            None => self.insert(*key, in_date.unwrap_or(now)),
        };
        let quant = self
            .quants
            .get_mut(&id)
            .ok_or_else(|| DomainError::invariant(format!("{id} indexed but missing")))?;

        quant.quantity += delta;
        let update = QuantUpdate {
            available: quant.free_quantity(),
            in_date: quant.in_date,
        };
        self.changes.push(LedgerChange::Quantity {
            key: *key,
            delta,
            quantity: quant.quantity,
        });
        self.collect_if_empty(id);
        Ok(update)
    }

    /// Reserve up to `qty` from the matching quants, in removal order.
    ///
    /// Never reserves more than `available_quantity` at call time; a shortfall
    /// yields a partial (possibly empty) reservation, not an error.
    pub fn reserve(
        &mut self,
        filter: &QuantFilter,
        qty: Quantity,
        tracking: Tracking,
    ) -> StockResult<Vec<Reservation>> {
        if !quantity::is_positive(qty) {
            return Err(DomainError::quantity("reservation must be positive").into());
        }

        let available = self.available_quantity(filter, tracking, false);
        let mut remaining = qty.min(available);
        if remaining.is_zero() {
            return Ok(Vec::new());
        }

        let order: Vec<QuantId> = self.gather(filter).iter().map(|q| q.id).collect();
        let mut reserved = Vec::new();
        for id in order {
            let Some(quant) = self.quants.get_mut(&id) else {
                continue;
            };
            let free = quant.free_quantity();
            if !quantity::is_positive(free) {
                continue;
            }
            let take = free.min(remaining);
            quant.reserved_quantity += take;
            self.changes.push(LedgerChange::Reservation {
                key: quant.key,
                delta: take,
                reserved: quant.reserved_quantity,
            });
            reserved.push(Reservation {
                key: quant.key,
                quantity: take,
            });
            remaining -= take;
            if remaining.is_zero() {
                break;
            }
        }
        Ok(reserved)
    }

    /// Give back `qty` of reservation held on the matching quants.
    pub fn release(&mut self, filter: &QuantFilter, qty: Quantity) -> StockResult<Vec<Reservation>> {
        if !quantity::is_positive(qty) {
            return Err(DomainError::quantity("release must be positive").into());
        }
        let held = self.reserved_quantity(filter);
        if qty > held {
            return Err(StockError::ReleaseExceedsReserved {
                requested: qty,
                reserved: held,
            });
        }

        let order: Vec<QuantId> = self.gather(filter).iter().map(|q| q.id).collect();
        let mut remaining = qty;
        let mut released = Vec::new();
        for id in order {
            let Some(quant) = self.quants.get_mut(&id) else {
                continue;
            };
            if !quantity::is_positive(quant.reserved_quantity) {
                continue;
            }
            let take = quant.reserved_quantity.min(remaining);
            quant.reserved_quantity -= take;
            self.changes.push(LedgerChange::Reservation {
                key: quant.key,
                delta: -take,
                reserved: quant.reserved_quantity,
            });
            released.push(Reservation {
                key: quant.key,
                quantity: take,
            });
            remaining -= take;
            self.collect_if_empty(id);
            if remaining.is_zero() {
                break;
            }
        }
        Ok(released)
    }

    pub fn drain_changes(&mut self) -> Vec<LedgerChange> {
        std::mem::take(&mut self.changes)
    }

    fn insert(&mut self, key: QuantKey, in_date: DateTime<Utc>) -> QuantId {
        self.next_id += 1;
        let id = QuantId(self.next_id);
        self.quants.insert(
            id,
            Quant {
                id,
                key,
                quantity: Decimal::ZERO,
                reserved_quantity: Decimal::ZERO,
                in_date,
            },
        );
        self.by_key.insert(key, id);
        id
    }

    fn collect_if_empty(&mut self, id: QuantId) {
        if self.quants.get(&id).is_some_and(Quant::is_empty) {
            if let Some(quant) = self.quants.remove(&id) {
                self.by_key.remove(&quant.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{LocationId, OwnerId};

    fn key() -> QuantKey {
        QuantKey::new(ProductId::new(), LocationId::new())
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn first_stock_in_creates_a_quant() {
        let mut ledger = QuantLedger::default();
        let k = key();

        let update = ledger.update_quantity(&k, dec!(100), None, now()).unwrap();

        assert_eq!(update.available, dec!(100));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.quant_at(&k).unwrap().quantity(), dec!(100));
    }

    #[test]
    fn negative_update_on_empty_key_goes_negative() {
        let mut ledger = QuantLedger::default();
        let k = key();

        let update = ledger.update_quantity(&k, dec!(-3), None, now()).unwrap();

        assert_eq!(update.available, dec!(-3));
        assert_eq!(ledger.quant_at(&k).unwrap().quantity(), dec!(-3));
        let filter = QuantFilter::exact(&k);
        assert_eq!(ledger.available_quantity(&filter, Tracking::None, false), dec!(0));
        assert_eq!(ledger.available_quantity(&filter, Tracking::None, true), dec!(-3));
    }

    #[test]
    fn zero_quants_are_collected() {
        let mut ledger = QuantLedger::default();
        let k = key();
        ledger.update_quantity(&k, dec!(5), None, now()).unwrap();
        ledger.update_quantity(&k, dec!(-5), None, now()).unwrap();

        assert!(ledger.is_empty());
        assert!(ledger.quant_at(&k).is_none());
    }

    #[test]
    fn zero_delta_is_rejected() {
        let mut ledger = QuantLedger::default();
        let err = ledger.update_quantity(&key(), dec!(0), None, now()).unwrap_err();
        assert!(matches!(err, StockError::Domain(DomainError::QuantityOutOfRange(_))));
    }

    #[test]
    fn loose_availability_sums_all_matching_quants() {
        let mut ledger = QuantLedger::default();
        let base = key();
        let owned = base.with_owner(OwnerId::new());
        ledger.update_quantity(&base, dec!(10), None, now()).unwrap();
        ledger.update_quantity(&owned, dec!(4), None, now()).unwrap();

        let loose = QuantFilter::any(base.product_id, base.location_id);
        assert_eq!(ledger.available_quantity(&loose, Tracking::None, false), dec!(14));
        assert_eq!(
            ledger.available_quantity(&loose.strict(), Tracking::None, false),
            dec!(10)
        );
    }

    #[test]
    fn tracked_availability_ignores_negative_lots() {
        let mut ledger = QuantLedger::default();
        let base = key();
        let lot_a = base.with_lot(LotId::new());
        let lot_b = base.with_lot(LotId::new());
        ledger.update_quantity(&lot_a, dec!(3), None, now()).unwrap();
        ledger.update_quantity(&lot_b, dec!(-2), None, now()).unwrap();
        ledger.update_quantity(&base, dec!(1), None, now()).unwrap();

        let loose = QuantFilter::any(base.product_id, base.location_id);
        assert_eq!(ledger.available_quantity(&loose, Tracking::Lot, false), dec!(4));
        assert_eq!(ledger.available_quantity(&loose, Tracking::Lot, true), dec!(2));
        assert_eq!(ledger.available_quantity(&loose, Tracking::None, false), dec!(2));
    }

    #[test]
    fn reserve_is_partial_when_stock_is_short() {
        let mut ledger = QuantLedger::default();
        let k = key();
        ledger.update_quantity(&k, dec!(3), None, now()).unwrap();

        let filter = QuantFilter::exact(&k);
        let chunks = ledger.reserve(&filter, dec!(5), Tracking::None).unwrap();

        assert_eq!(crate::quant::total_reserved(&chunks), dec!(3));
        assert_eq!(ledger.available_quantity(&filter, Tracking::None, false), dec!(0));
        assert!(ledger.reserve(&filter, dec!(1), Tracking::None).unwrap().is_empty());
    }

    #[test]
    fn reserve_follows_fifo_then_lifo() {
        let t0 = now();
        let base = key();
        let old = base.with_lot(LotId::new());
        let new = base.with_lot(LotId::new());
        let filter = QuantFilter::any(base.product_id, base.location_id);

        let mut fifo = QuantLedger::new(RemovalStrategy::Fifo);
        fifo.update_quantity(&new, dec!(5), Some(t0 + Duration::days(1)), t0).unwrap();
        fifo.update_quantity(&old, dec!(5), Some(t0), t0).unwrap();
        let chunks = fifo.reserve(&filter, dec!(6), Tracking::Lot).unwrap();
        assert_eq!(chunks[0].key, old);
        assert_eq!(chunks[0].quantity, dec!(5));
        assert_eq!(chunks[1].key, new);
        assert_eq!(chunks[1].quantity, dec!(1));

        let mut lifo = QuantLedger::new(RemovalStrategy::Lifo);
        lifo.update_quantity(&new, dec!(5), Some(t0 + Duration::days(1)), t0).unwrap();
        lifo.update_quantity(&old, dec!(5), Some(t0), t0).unwrap();
        let chunks = lifo.reserve(&filter, dec!(6), Tracking::Lot).unwrap();
        assert_eq!(chunks[0].key, new);
        assert_eq!(chunks[1].key, old);
    }

    #[test]
    fn release_more_than_reserved_is_rejected() {
        let mut ledger = QuantLedger::default();
        let k = key();
        ledger.update_quantity(&k, dec!(4), None, now()).unwrap();
        let filter = QuantFilter::exact(&k);
        ledger.reserve(&filter, dec!(2), Tracking::None).unwrap();

        let err = ledger.release(&filter, dec!(3)).unwrap_err();
        assert_eq!(
            err,
            StockError::ReleaseExceedsReserved {
                requested: dec!(3),
                reserved: dec!(2)
            }
        );

        ledger.release(&filter, dec!(2)).unwrap();
        assert_eq!(ledger.reserved_quantity(&filter), dec!(0));
    }

    #[test]
    fn changes_record_every_counter_move() {
        let mut ledger = QuantLedger::default();
        let k = key();
        ledger.update_quantity(&k, dec!(4), None, now()).unwrap();
        ledger.reserve(&QuantFilter::exact(&k), dec!(1), Tracking::None).unwrap();

        let changes = ledger.drain_changes();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], LedgerChange::Quantity { delta, .. } if delta == dec!(4)));
        assert!(matches!(changes[1], LedgerChange::Reservation { reserved, .. } if reserved == dec!(1)));
        assert!(ledger.drain_changes().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of updates on one key, the recorded
        /// deltas sum to the final on-hand quantity.
        #[test]
        fn deltas_sum_to_final_quantity(
            deltas in prop::collection::vec((-500i64..500i64).prop_filter("non-zero", |d| *d != 0), 1..40)
        ) {
            let mut ledger = QuantLedger::default();
            let k = key();
            let t = now();
            for d in &deltas {
                ledger.update_quantity(&k, Decimal::from(*d), None, t).unwrap();
            }

            let journal_total: Decimal = ledger
                .drain_changes()
                .into_iter()
                .filter_map(|c| match c {
                    LedgerChange::Quantity { key, delta, .. } if key == k => Some(delta),
                    _ => None,
                })
                .sum();
            let final_qty = ledger.quant_at(&k).map(|q| q.quantity()).unwrap_or_default();

            prop_assert_eq!(journal_total, final_qty);
            prop_assert_eq!(final_qty, Decimal::from(deltas.iter().sum::<i64>()));
        }

        /// Property: a reservation never exceeds what was available when it
        /// was requested.
        #[test]
        fn reserve_never_exceeds_availability(
            stock in prop::collection::vec(-20i64..50i64, 1..8),
            requests in prop::collection::vec(1i64..40i64, 1..10)
        ) {
            let mut ledger = QuantLedger::default();
            let product = ProductId::new();
            let location = LocationId::new();
            let t = now();
            for (i, s) in stock.iter().enumerate() {
                if *s == 0 {
                    continue;
                }
                let k = QuantKey::new(product, location).with_owner(if i % 2 == 0 { None } else { Some(OwnerId::new()) });
                ledger.update_quantity(&k, Decimal::from(*s), None, t).unwrap();
            }

            let filter = QuantFilter::any(product, location);
            for r in requests {
                let before = ledger.available_quantity(&filter, Tracking::None, false);
                let chunks = ledger.reserve(&filter, Decimal::from(r), Tracking::None).unwrap();
                let got = crate::quant::total_reserved(&chunks);
                prop_assert!(got <= before);
                prop_assert!(got <= Decimal::from(r));
                for q in ledger.quants() {
                    prop_assert!(q.reserved_quantity() >= Decimal::ZERO);
                }
            }
        }
    }
}
