//! Latest-value store for topic-derived gauges.
//!
//! The map is guarded by a reader-writer lock that is only held long enough
//! to look up, insert or copy entries. Each cell keeps its value in a single
//! 64-bit atomic word, so writers to distinct cells never contend and readers
//! never see a half-written float.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::mapping::MetricId;

/// Bit pattern marking a cell that has never been set.
///
/// This is a NaN with a payload no `set` call can store, because `set`
/// canonicalises every NaN to `f64::NAN`.
const UNSET_BITS: u64 = 0x7ff8_0000_0000_dead;

/// A single gauge value.
#[derive(Debug)]
pub struct MetricCell {
    bits: AtomicU64,
}

impl MetricCell {
    fn new() -> Self {
        Self {
            bits: AtomicU64::new(UNSET_BITS),
        }
    }

    /// Overwrite the stored value.
    pub fn set(&self, value: f64) {
        let value = if value.is_nan() { f64::NAN } else { value };
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// The stored value, or `None` if nothing was ever set.
    pub fn get(&self) -> Option<f64> {
        let bits = self.bits.load(Ordering::Acquire);
        (bits != UNSET_BITS).then(|| f64::from_bits(bits))
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

/// Shared handle to a cell owned by a [`MetricRegistry`].
pub type CellHandle = Arc<MetricCell>;

/// Mapping from metric identifier to cell.
///
/// Cells are created at most once per identifier and never removed.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    cells: RwLock<HashMap<MetricId, CellHandle>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cell for `id`, creating an unset one if absent.
    ///
    /// Racing callers with the same identifier all receive the same cell.
    pub fn ensure(&self, id: &MetricId) -> CellHandle {
        if let Some(cell) = self.cells.read().get(id) {
            return cell.clone();
        }

        let mut cells = self.cells.write();
        cells
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(metric = %id, "Registered gauge");
                Arc::new(MetricCell::new())
            })
            .clone()
    }

    /// Overwrite the value of a cell.
    pub fn set(&self, cell: &CellHandle, value: f64) {
        cell.set(value);
    }

    /// Look up an existing cell without creating it.
    pub fn get(&self, id: &MetricId) -> Option<CellHandle> {
        self.cells.read().get(id).cloned()
    }

    /// Point-in-time copy of every cell, sorted by identifier.
    pub fn snapshot(&self) -> Vec<(MetricId, Option<f64>)> {
        let mut entries: Vec<_> = {
            let cells = self.cells.read();
            cells
                .iter()
                .map(|(id, cell)| (id.clone(), cell.get()))
                .collect()
        };

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of registered cells.
    pub fn len(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.read().is_empty()
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;
