//! Checkpoints: before-images of the state an operation touches, so a failed
//! operation can be rolled back without copying the whole warehouse.

use std::collections::HashMap;
use std::hash::Hash;

use stockledger_core::{AdjustmentId, MoveId, TransferId};

use super::Warehouse;
use crate::adjustment::InventoryAdjustment;
use crate::catalog::Catalog;
use crate::ledger::QuantLedger;
use crate::stock_move::StockMove;
use crate::transfer::Transfer;

/// `None` images mark records created after the checkpoint.
#[derive(Debug, Clone, Default)]
pub(super) struct UndoLog {
    moves: HashMap<MoveId, Option<StockMove>>,
    transfers: HashMap<TransferId, Option<Transfer>>,
    adjustments: HashMap<AdjustmentId, Option<InventoryAdjustment>>,
    catalog: Option<Catalog>,
    ledger: Option<QuantLedger>,
    next_move_seq: u64,
    events: usize,
}

fn remember<K, V>(images: &mut HashMap<K, Option<V>>, live: &HashMap<K, V>, id: K)
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    images.entry(id).or_insert_with(|| live.get(&id).cloned());
}

fn restore<K: Eq + Hash, V>(live: &mut HashMap<K, V>, images: HashMap<K, Option<V>>) {
    for (id, image) in images {
        match image {
            Some(value) => {
                live.insert(id, value);
            }
            None => {
                live.remove(&id);
            }
        }
    }
}

impl Warehouse {
    /// Start recording before-images. `rollback` returns to this point,
    /// `commit` forgets it. A new checkpoint replaces an open one.
    pub fn checkpoint(&mut self) {
        self.flush_ledger();
        self.undo = Some(UndoLog {
            next_move_seq: self.next_move_seq,
            events: self.events.len(),
            ..UndoLog::default()
        });
    }

    pub fn commit(&mut self) {
        self.undo = None;
    }

    /// Undo every change since the last checkpoint, events included.
    /// Without an open checkpoint this does nothing.
    pub fn rollback(&mut self) {
        let Some(log) = self.undo.take() else {
            return;
        };
        restore(&mut self.moves, log.moves);
        restore(&mut self.transfers, log.transfers);
        restore(&mut self.adjustments, log.adjustments);
        if let Some(catalog) = log.catalog {
            self.catalog = catalog;
        }
        if let Some(ledger) = log.ledger {
            self.ledger = ledger;
        }
        self.next_move_seq = log.next_move_seq;
        self.events.truncate(log.events);
    }

    pub fn has_checkpoint(&self) -> bool {
        self.undo.is_some()
    }

    pub(super) fn touch_move(&mut self, id: MoveId) -> Option<&mut StockMove> {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.moves, &self.moves, id);
        }
        self.moves.get_mut(&id)
    }

    pub(super) fn insert_move(&mut self, id: MoveId, mv: StockMove) {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.moves, &self.moves, id);
        }
        self.moves.insert(id, mv);
    }

    pub(super) fn touch_transfer(&mut self, id: TransferId) -> Option<&mut Transfer> {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.transfers, &self.transfers, id);
        }
        self.transfers.get_mut(&id)
    }

    pub(super) fn insert_transfer(&mut self, id: TransferId, transfer: Transfer) {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.transfers, &self.transfers, id);
        }
        self.transfers.insert(id, transfer);
    }

    pub(super) fn touch_adjustment(&mut self, id: AdjustmentId) -> Option<&mut InventoryAdjustment> {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.adjustments, &self.adjustments, id);
        }
        self.adjustments.get_mut(&id)
    }

    pub(super) fn insert_adjustment(&mut self, id: AdjustmentId, adjustment: InventoryAdjustment) {
        if let Some(log) = self.undo.as_mut() {
            remember(&mut log.adjustments, &self.adjustments, id);
        }
        self.adjustments.insert(id, adjustment);
    }

    /// The ledger is imaged whole on first write; it holds live quants only.
    pub(super) fn ledger_mut(&mut self) -> &mut QuantLedger {
        if let Some(log) = self.undo.as_mut() {
            if log.ledger.is_none() {
                log.ledger = Some(self.ledger.clone());
            }
        }
        &mut self.ledger
    }

    pub(super) fn catalog_mut(&mut self) -> &mut Catalog {
        if let Some(log) = self.undo.as_mut() {
            if log.catalog.is_none() {
                log.catalog = Some(self.catalog.clone());
            }
        }
        &mut self.catalog
    }
}
