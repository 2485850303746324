//! Incremental semi-space copying collector (Baker).
//!
//! The mutator only ever allocates into and reads from to-space. A flip turns
//! the current to-space into from-space and copies the roots across; after
//! that, cells are scanned a few at a time on every allocation. Any pointer
//! the mutator touches goes through the read barrier first, which evacuates
//! its cell on demand, so the mutator never sees a from-space address.

use std::{collections::BTreeSet, fmt};

use enum_map::{Enum, EnumMap};
use serde::{Deserialize, Serialize};

use crate::{
    config::GcConfig,
    error::EmberError,
    runtime::{CellData, CellKey, CellPayload, CellShape, HeapCell, RootSet},
    telemetry::CycleReport,
    value::{Address, SpaceId, TaggedValue},
};

/// Cells of scan work owed per allocation.
pub const SCAN_BUDGET_PER_ALLOC: usize = 2;
/// Extra work owed when an already scanned cell is queued for a rescan.
pub const SCAN_BUDGET_PER_RESCAN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum GcState {
    Ready,
    Scanning,
    Finishing,
}

impl fmt::Display for GcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcState::Ready => write!(f, "ready"),
            GcState::Scanning => write!(f, "scanning"),
            GcState::Finishing => write!(f, "finishing"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GcStats {
    pub allocations: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cells_copied: u64,
    pub cells_scanned: u64,
    pub rescans: u64,
    /// Read barrier calls that had to forward a from-space address.
    pub barrier_hits: u64,
    /// `collect` calls, by the state they found the collector in.
    pub steps: EnumMap<GcState, u64>,
}

#[derive(Debug)]
struct Semispace {
    id: SpaceId,
    cells: Vec<HeapCell>,
}

impl Semispace {
    fn new(id: SpaceId, capacity: usize) -> Self {
        Self {
            id,
            cells: Vec::with_capacity(capacity),
        }
    }
}

pub type ReportSink = Box<dyn FnMut(&CycleReport)>;

pub struct Collector {
    config: GcConfig,
    capacity: usize,
    from_space: Semispace,
    to_space: Semispace,
    state: GcState,
    /// Next to-space cell the scanner will visit.
    scan_ptr: usize,
    num_to_scan: usize,
    /// Already scanned cells that were written to during the cycle.
    rescan: BTreeSet<usize>,
    stats: GcStats,
    cycle: CycleReport,
    reports: Vec<CycleReport>,
    report_sink: Option<ReportSink>,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("from_space", &self.from_space.id)
            .field("to_space", &self.to_space.id)
            .field("active_cells", &self.to_space.cells.len())
            .field("scan_ptr", &self.scan_ptr)
            .field("num_to_scan", &self.num_to_scan)
            .field("rescan", &self.rescan)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

impl Collector {
    pub fn new(config: GcConfig) -> Self {
        let capacity = config.semispace_capacity();
        Self {
            config,
            capacity,
            from_space: Semispace::new(SpaceId(0), 0),
            to_space: Semispace::new(SpaceId(1), capacity),
            state: GcState::Ready,
            scan_ptr: 0,
            num_to_scan: 0,
            rescan: BTreeSet::new(),
            stats: GcStats::default(),
            cycle: CycleReport::default(),
            reports: Vec::new(),
            report_sink: None,
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn state(&self) -> GcState {
        self.state
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cells currently held in to-space, live or floating.
    pub fn num_active_cells(&self) -> usize {
        self.to_space.cells.len()
    }

    pub fn reports(&self) -> &[CycleReport] {
        &self.reports
    }

    pub fn set_report_sink(&mut self, sink: impl FnMut(&CycleReport) + 'static) {
        self.report_sink = Some(Box::new(sink));
    }

    // ------------------------------------------------------------------
    // Allocation and scheduling
    // ------------------------------------------------------------------

    /// Append a new cell to to-space. Pays for a slice of the in-flight
    /// cycle, or starts one once to-space is half full. The cycle is finished
    /// synchronously when the push could leave no room for cells still to be
    /// evacuated, and a new one is run when to-space is full, so a live set
    /// larger than a semi-space fails here rather than in a later read.
    pub fn alloc(
        &mut self,
        payload: CellPayload,
        roots: &mut dyn RootSet,
    ) -> Result<Address, EmberError> {
        let mut payload = payload;
        self.stats.allocations += 1;
        self.num_to_scan += SCAN_BUDGET_PER_ALLOC;

        self.close_cycle();
        if self.state == GcState::Scanning || self.past_flip_threshold() {
            self.collect(&mut (&mut *roots, &mut payload))?;
        }
        if self.state == GcState::Scanning && !self.cycle_fits_after_push() {
            // Evacuation could still overrun the slot about to be taken
            self.finish_cycle()?;
        }

        if !self.has_room() {
            self.make_room(&mut (&mut *roots, &mut payload))?;
        }

        let index = self.to_space.cells.len();
        self.to_space.cells.push(HeapCell::new(payload));
        Ok(Address::new(index, self.to_space.id))
    }

    /// One step of collection work.
    pub fn collect(&mut self, roots: &mut dyn RootSet) -> Result<(), EmberError> {
        self.stats.steps[self.state] += 1;
        match self.state {
            GcState::Ready => self.flip(roots),
            GcState::Scanning => self.scan(),
            GcState::Finishing => Ok(()),
        }
    }

    /// Stop-the-world collection: finish whatever is in flight, then run a
    /// whole new cycle.
    pub fn full_collect(&mut self, roots: &mut dyn RootSet) -> Result<(), EmberError> {
        if self.state == GcState::Scanning {
            self.finish_cycle()?;
        }
        self.flip(roots)?;
        self.finish_cycle()
    }

    fn make_room(&mut self, roots: &mut dyn RootSet) -> Result<(), EmberError> {
        log::debug!(
            "to-space {} full at {} cells, collecting synchronously",
            self.to_space.id.0,
            self.capacity
        );
        if self.state == GcState::Scanning {
            self.finish_cycle()?;
        }
        self.flip(roots)?;
        self.finish_cycle()?;

        if self.has_room() {
            Ok(())
        } else {
            log::error!(
                "out of memory: {} live cells fill a {}-cell semi-space",
                self.to_space.cells.len(),
                self.capacity
            );
            Err(EmberError::out_of_memory(
                self.to_space.cells.len(),
                self.capacity,
            ))
        }
    }

    /// A new cycle starts once to-space is half full, leaving the other half
    /// for copies and for allocations made while the cycle runs.
    fn past_flip_threshold(&self) -> bool {
        self.to_space.cells.len() * 2 >= self.capacity
    }

    /// Whether every from-space cell not yet copied this cycle would still
    /// fit once one more cell is pushed.
    fn cycle_fits_after_push(&self) -> bool {
        let uncopied = self
            .from_space
            .cells
            .len()
            .saturating_sub(self.cycle.cells_copied);
        self.to_space.cells.len() + 1 + uncopied <= self.capacity
    }

    fn has_room(&self) -> bool {
        self.to_space.cells.len() < self.capacity
    }

    fn has_pending(&self) -> bool {
        self.scan_ptr < self.to_space.cells.len() || !self.rescan.is_empty()
    }

    fn pending(&self) -> usize {
        self.to_space.cells.len().saturating_sub(self.scan_ptr) + self.rescan.len()
    }

    fn finish_cycle(&mut self) -> Result<(), EmberError> {
        while self.state == GcState::Scanning {
            self.num_to_scan = self.num_to_scan.max(self.pending());
            self.scan()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// Start a cycle: to-space becomes from-space and every root is copied
    /// into a fresh to-space.
    pub fn flip(&mut self, roots: &mut dyn RootSet) -> Result<(), EmberError> {
        match self.state {
            GcState::Scanning => {
                return Err(EmberError::scanning_incomplete(
                    self.scan_ptr,
                    self.to_space.cells.len(),
                ))
            }
            GcState::Finishing => self.close_cycle(),
            GcState::Ready => {}
        }

        let fresh = Semispace::new(self.to_space.id.next(), self.capacity);
        self.from_space = std::mem::replace(&mut self.to_space, fresh);
        self.scan_ptr = 0;
        self.num_to_scan = 0;
        self.rescan.clear();
        self.state = GcState::Scanning;
        self.stats.cycles_started += 1;
        self.cycle = CycleReport::new(self.stats.cycles_started);

        log::debug!(
            "flip: cycle {} evacuating g{} ({} cells) into g{}",
            self.cycle.cycle,
            self.from_space.id.0,
            self.from_space.cells.len(),
            self.to_space.id.0
        );

        roots.visit_roots(&mut |value: &mut TaggedValue| -> Result<(), EmberError> {
            if let TaggedValue::Pointer(Some(address)) = value {
                *address = self.resolve(*address)?;
            }
            Ok(())
        })?;

        if !self.has_pending() {
            self.complete_cycle()?;
        }
        Ok(())
    }

    /// Scan up to `num_to_scan` cells, rescans first.
    pub fn scan(&mut self) -> Result<(), EmberError> {
        if self.state != GcState::Scanning || !self.has_pending() {
            return Err(EmberError::internal(format!(
                "scan requested in state {} with nothing pending",
                self.state
            )));
        }

        let mut budget = self.num_to_scan.max(1);
        while budget > 0 {
            let index = match self.rescan.pop_first() {
                Some(index) => {
                    self.cycle.rescanned += 1;
                    index
                }
                None if self.scan_ptr < self.to_space.cells.len() => {
                    self.scan_ptr += 1;
                    self.scan_ptr - 1
                }
                None => break,
            };
            self.forward_fields(index)?;
            self.stats.cells_scanned += 1;
            self.cycle.cells_scanned += 1;
            budget -= 1;
        }
        self.num_to_scan = budget;

        log::trace!(
            "scan: {} of {} cells scanned, {} queued for rescan",
            self.scan_ptr,
            self.to_space.cells.len(),
            self.rescan.len()
        );

        if !self.has_pending() {
            self.complete_cycle()?;
        }
        Ok(())
    }

    fn complete_cycle(&mut self) -> Result<(), EmberError> {
        if self.config.debug {
            self.verify_to_space()?;
        }
        self.state = GcState::Finishing;
        self.stats.cycles_completed += 1;
        self.cycle.live_cells = self.to_space.cells.len();

        let report = self.cycle.clone();
        log::debug!(
            "cycle {} complete: {} live, {} copied, {} scanned, {} rescanned",
            report.cycle,
            report.live_cells,
            report.cells_copied,
            report.cells_scanned,
            report.rescanned
        );
        if let Some(sink) = self.report_sink.as_mut() {
            sink(&report);
        }
        self.reports.push(report);
        Ok(())
    }

    fn close_cycle(&mut self) {
        if self.state == GcState::Finishing {
            self.state = GcState::Ready;
        }
    }

    /// No to-space cell may point outside to-space once a cycle is done.
    fn verify_to_space(&self) -> Result<(), EmberError> {
        let len = self.to_space.cells.len();
        for (index, cell) in self.to_space.cells.iter().enumerate() {
            for position in 0..cell.payload.len() {
                if let Some(TaggedValue::Pointer(Some(address))) = cell.payload.get(position) {
                    if address.space != self.to_space.id || address.index >= len {
                        return Err(EmberError::internal(format!(
                            "cell {} field {} still points at {} after cycle {}",
                            index, position, address, self.cycle.cycle
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite every pointer field of a to-space cell to its to-space copy.
    fn forward_fields(&mut self, index: usize) -> Result<(), EmberError> {
        let len = self.to_cell(index)?.payload.len();
        for position in 0..len {
            let address = match self.to_cell(index)?.payload.get(position) {
                Some(TaggedValue::Pointer(Some(address))) => *address,
                _ => continue,
            };
            let resolved = self.resolve(address)?;
            if resolved != address {
                self.to_cell_mut(index)?
                    .payload
                    .update(position, TaggedValue::pointer(resolved))?;
            }
        }
        Ok(())
    }

    /// Map any address to its to-space copy, evacuating the cell if it has
    /// not been copied yet this cycle.
    fn resolve(&mut self, address: Address) -> Result<Address, EmberError> {
        if address.space == self.to_space.id {
            return if address.index < self.to_space.cells.len() {
                Ok(address)
            } else {
                Err(EmberError::invalid_address(address))
            };
        }
        if address.space != self.from_space.id {
            return Err(EmberError::invalid_address(address));
        }

        let cell = self
            .from_space
            .cells
            .get_mut(address.index)
            .ok_or_else(|| EmberError::invalid_address(address))?;
        if let Some(forward) = cell.forward_address {
            return Ok(forward);
        }
        if self.to_space.cells.len() >= self.capacity {
            log::error!(
                "out of memory evacuating {}: to-space holds {} of {} cells",
                address,
                self.to_space.cells.len(),
                self.capacity
            );
            return Err(EmberError::out_of_memory(
                self.to_space.cells.len(),
                self.capacity,
            ));
        }

        let forward = Address::new(self.to_space.cells.len(), self.to_space.id);
        let hollow = cell.payload.empty_like();
        let payload = std::mem::replace(&mut cell.payload, hollow);
        cell.forward_address = Some(forward);
        self.to_space.cells.push(HeapCell::new(payload));
        self.stats.cells_copied += 1;
        self.cycle.cells_copied += 1;
        Ok(forward)
    }

    fn resolve_value(&mut self, value: TaggedValue) -> Result<TaggedValue, EmberError> {
        match value {
            TaggedValue::Pointer(Some(address)) => Ok(TaggedValue::pointer(self.read(address)?)),
            other => Ok(other),
        }
    }

    fn to_cell(&self, index: usize) -> Result<&HeapCell, EmberError> {
        self.to_space
            .cells
            .get(index)
            .ok_or_else(|| EmberError::invalid_address(Address::new(index, self.to_space.id)))
    }

    fn to_cell_mut(&mut self, index: usize) -> Result<&mut HeapCell, EmberError> {
        let id = self.to_space.id;
        self.to_space
            .cells
            .get_mut(index)
            .ok_or_else(|| EmberError::invalid_address(Address::new(index, id)))
    }

    // ------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------

    /// Read barrier. The caller must replace its copy of `address` with the
    /// returned one.
    pub fn read(&mut self, address: Address) -> Result<Address, EmberError> {
        let resolved = self.resolve(address)?;
        if resolved != address {
            self.stats.barrier_hits += 1;
            if self.config.debug {
                log::trace!("read barrier: {} -> {}", address, resolved);
            }
        }
        Ok(resolved)
    }

    /// Write barrier: store `value` at `position` of a list or map cell.
    /// Returns the owner's current address.
    pub fn write(
        &mut self,
        address: Address,
        position: usize,
        value: TaggedValue,
    ) -> Result<Address, EmberError> {
        let owner = self.read(address)?;
        let shape = self.to_cell(owner.index)?.shape();
        if shape == CellShape::Set {
            // Positional stores would bypass member uniqueness
            return Err(EmberError::shape_mismatch(CellShape::List, shape));
        }
        let value = self.resolve_value(value)?;
        self.to_cell_mut(owner.index)?.payload.update(position, value)?;
        self.note_write(owner.index);
        Ok(owner)
    }

    fn note_write(&mut self, index: usize) {
        if self.state == GcState::Scanning && index < self.scan_ptr && self.rescan.insert(index) {
            self.num_to_scan += SCAN_BUDGET_PER_RESCAN;
            self.stats.rescans += 1;
            if self.config.debug {
                log::trace!("write barrier: cell {} queued for rescan", index);
            }
        }
    }

    /// Field at `position`, with the read barrier applied to the container
    /// and to the loaded value.
    pub fn load(&mut self, address: Address, position: usize) -> Result<TaggedValue, EmberError> {
        let owner = self.read(address)?;
        let payload = &self.to_cell(owner.index)?.payload;
        let value = payload
            .get(position)
            .cloned()
            .ok_or_else(|| EmberError::index_out_of_range(position, payload.len()))?;
        let resolved = self.resolve_value(value.clone())?;
        if resolved != value {
            self.to_cell_mut(owner.index)?
                .payload
                .update(position, resolved.clone())?;
        }
        Ok(resolved)
    }

    /// Read-barriered view of a cell.
    pub fn cell(&mut self, address: Address) -> Result<&HeapCell, EmberError> {
        let owner = self.read(address)?;
        self.to_cell(owner.index)
    }

    pub fn shape(&mut self, address: Address) -> Result<CellShape, EmberError> {
        Ok(self.cell(address)?.shape())
    }

    pub fn len(&mut self, address: Address) -> Result<usize, EmberError> {
        Ok(self.cell(address)?.payload.len())
    }

    pub fn keys(&mut self, address: Address) -> Result<Vec<CellKey>, EmberError> {
        let owner = self.read(address)?;
        self.forward_fields(owner.index)?;
        Ok(self.to_cell(owner.index)?.payload.keys())
    }

    // ------------------------------------------------------------------
    // List cells
    // ------------------------------------------------------------------

    /// Insert `values` before `at`. Returns false when there was nothing to
    /// insert.
    pub fn insert(
        &mut self,
        address: Address,
        values: Vec<TaggedValue>,
        at: usize,
    ) -> Result<bool, EmberError> {
        let owner = self.read(address)?;
        let len = self.to_cell(owner.index)?.payload.as_list()?.len();
        if at > len {
            return Err(EmberError::index_out_of_range(at, len));
        }
        if values.is_empty() {
            return Ok(false);
        }

        let values = values
            .into_iter()
            .map(|value| self.resolve_value(value))
            .collect::<Result<Vec<_>, _>>()?;
        self.to_cell_mut(owner.index)?
            .payload
            .as_list_mut()?
            .splice(at..at, values);
        self.note_write(owner.index);
        Ok(true)
    }

    /// Remove up to `count` values starting at `at` and hand them back.
    pub fn take(
        &mut self,
        address: Address,
        at: usize,
        count: usize,
    ) -> Result<Vec<TaggedValue>, EmberError> {
        let owner = self.read(address)?;
        let list = self.to_cell_mut(owner.index)?.payload.as_list_mut()?;
        if count == 0 || list.is_empty() {
            return Ok(Vec::new());
        }
        if at >= list.len() {
            return Err(EmberError::index_out_of_range(at, list.len()));
        }
        let end = at.saturating_add(count).min(list.len());
        let removed: Vec<TaggedValue> = list.drain(at..end).collect();
        removed
            .into_iter()
            .map(|value| self.resolve_value(value))
            .collect()
    }

    /// Remove `count` values starting at `at`. Returns false if nothing was
    /// removed.
    pub fn remove(&mut self, address: Address, at: usize, count: usize) -> Result<bool, EmberError> {
        Ok(!self.take(address, at, count)?.is_empty())
    }

    // ------------------------------------------------------------------
    // Map cells
    // ------------------------------------------------------------------

    pub fn set(
        &mut self,
        address: Address,
        key: &str,
        value: TaggedValue,
    ) -> Result<Option<TaggedValue>, EmberError> {
        let owner = self.read(address)?;
        self.to_cell(owner.index)?.payload.as_map()?;
        let value = self.resolve_value(value)?;
        let previous = self
            .to_cell_mut(owner.index)?
            .payload
            .as_map_mut()?
            .insert(key, value);
        self.note_write(owner.index);
        Ok(previous)
    }

    /// Value under `key`, read-barriered.
    pub fn get_field(
        &mut self,
        address: Address,
        key: &str,
    ) -> Result<Option<TaggedValue>, EmberError> {
        let owner = self.read(address)?;
        let value = self.to_cell(owner.index)?.payload.as_map()?.get(key).cloned();
        value.map(|value| self.resolve_value(value)).transpose()
    }

    /// Returns false if the key was absent.
    pub fn delete(&mut self, address: Address, key: &str) -> Result<bool, EmberError> {
        let owner = self.read(address)?;
        Ok(self
            .to_cell_mut(owner.index)?
            .payload
            .as_map_mut()?
            .remove(key)
            .is_some())
    }

    // ------------------------------------------------------------------
    // Set cells
    // ------------------------------------------------------------------

    /// Returns false if an equal member was already present.
    pub fn add_member(&mut self, address: Address, value: TaggedValue) -> Result<bool, EmberError> {
        let owner = self.read(address)?;
        self.to_cell(owner.index)?.payload.as_set()?;
        // Members compare by address, so both sides must be in to-space.
        self.forward_fields(owner.index)?;
        let value = self.resolve_value(value)?;
        let added = self
            .to_cell_mut(owner.index)?
            .payload
            .as_set_mut()?
            .insert(value);
        if added {
            self.note_write(owner.index);
        }
        Ok(added)
    }

    pub fn has_member(&mut self, address: Address, value: TaggedValue) -> Result<bool, EmberError> {
        let owner = self.read(address)?;
        self.to_cell(owner.index)?.payload.as_set()?;
        self.forward_fields(owner.index)?;
        let value = self.resolve_value(value)?;
        Ok(self.to_cell(owner.index)?.payload.as_set()?.contains(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collections::OrderedMap, error::EmberErrorType, runtime::NoRoots};

    fn collector(heap_size: usize) -> Collector {
        Collector::new(GcConfig {
            heap_size,
            debug: true,
        })
    }

    fn list(values: &[f64]) -> CellPayload {
        CellPayload::List(values.iter().map(|n| TaggedValue::number(*n)).collect())
    }

    fn numbers(gc: &mut Collector, address: Address) -> Vec<f64> {
        gc.cell(address)
            .unwrap()
            .payload
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_number().unwrap())
            .collect()
    }

    /// Two list cells pointing at each other. Returns A.
    fn make_cycle(gc: &mut Collector) -> Address {
        let a = gc
            .alloc(CellPayload::List(vec![TaggedValue::null()]), &mut NoRoots)
            .unwrap();
        let mut roots = [TaggedValue::pointer(a)];
        let b = gc
            .alloc(CellPayload::List(vec![roots[0].clone()]), &mut roots)
            .unwrap();
        let a = roots[0].as_address().unwrap();
        gc.write(a, 0, TaggedValue::pointer(b)).unwrap()
    }

    #[test]
    fn alloc_returns_distinct_addresses() {
        let mut gc = collector(64);
        let a = gc.alloc(list(&[1.0]), &mut NoRoots).unwrap();
        let b = gc.alloc(list(&[2.0]), &mut NoRoots).unwrap();
        assert_ne!(a, b);
        assert_eq!(gc.load(a, 0).unwrap(), TaggedValue::number(1.0));
        assert_eq!(gc.load(b, 0).unwrap(), TaggedValue::number(2.0));
        assert_eq!(gc.num_active_cells(), 2);
        assert_eq!(gc.state(), GcState::Ready);
    }

    #[test]
    fn unrooted_cycle_is_dropped() {
        let mut gc = collector(64);
        make_cycle(&mut gc);
        gc.collect(&mut NoRoots).unwrap();
        assert_eq!(gc.num_active_cells(), 0);
        assert_eq!(gc.state(), GcState::Finishing);
    }

    #[test]
    fn rooted_cycle_survives_incremental_collection() {
        let mut gc = collector(64);
        let a = make_cycle(&mut gc);
        let mut roots = vec![TaggedValue::pointer(a)];

        gc.collect(&mut roots).unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        while gc.state() == GcState::Scanning {
            gc.collect(&mut roots).unwrap();
        }
        assert_eq!(gc.num_active_cells(), 2);

        let a = roots[0].as_address().unwrap();
        let b = gc.load(a, 0).unwrap().as_address().unwrap();
        assert_ne!(a, b);
        assert_eq!(gc.load(b, 0).unwrap(), TaggedValue::pointer(a));
    }

    #[test]
    fn cells_are_copied_once_per_cycle() {
        let mut gc = collector(64);
        let a = make_cycle(&mut gc);
        let mut roots = vec![TaggedValue::pointer(a), TaggedValue::pointer(a)];
        gc.full_collect(&mut roots).unwrap();
        assert_eq!(roots[0], roots[1]);
        assert_eq!(gc.stats().cells_copied, 2);
        assert_eq!(gc.reports().len(), 1);
        assert_eq!(gc.reports()[0].live_cells, 2);
    }

    #[test]
    fn insert_extends_list_in_place() {
        let mut gc = collector(16);
        let cell = gc.alloc(list(&[1.0, 2.0, 3.0]), &mut NoRoots).unwrap();
        let added = gc
            .insert(cell, vec![TaggedValue::number(4.0), TaggedValue::number(5.0)], 3)
            .unwrap();
        assert!(added);
        assert_eq!(numbers(&mut gc, cell), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        assert!(!gc.insert(cell, Vec::new(), 3).unwrap());
        assert_eq!(gc.len(cell).unwrap(), 5);

        let err = gc.insert(cell, vec![TaggedValue::number(6.0)], 9).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::IndexOutOfRange { index: 9, len: 5 });
    }

    #[test]
    fn remove_reports_no_change_on_empty_list() {
        let mut gc = collector(16);
        let cell = gc.alloc(list(&[1.0, 2.0, 3.0, 4.0, 5.0]), &mut NoRoots).unwrap();
        assert!(gc.remove(cell, 4, 1).unwrap());
        assert_eq!(numbers(&mut gc, cell), vec![1.0, 2.0, 3.0, 4.0]);

        let empty = gc.alloc(list(&[]), &mut NoRoots).unwrap();
        assert!(!gc.remove(empty, 0, 1).unwrap());
        assert_eq!(gc.len(empty).unwrap(), 0);

        assert!(gc.remove(cell, 4, 1).is_err());
        assert!(!gc.remove(cell, 0, 0).unwrap());
    }

    #[test]
    fn list_operations_reject_other_shapes() {
        let mut gc = collector(16);
        let map = gc.alloc(CellPayload::Map(OrderedMap::new()), &mut NoRoots).unwrap();
        let err = gc.insert(map, vec![TaggedValue::number(1.0)], 0).unwrap_err();
        assert!(matches!(err.error_type, EmberErrorType::ShapeMismatch { .. }));
        assert!(gc.remove(map, 0, 1).is_err());

        let cell = gc.alloc(list(&[1.0]), &mut NoRoots).unwrap();
        assert!(gc.set(cell, "k", TaggedValue::number(1.0)).is_err());
        assert!(gc.delete(cell, "k").is_err());
    }

    #[test]
    fn map_set_and_delete() {
        let mut gc = collector(16);
        let map = gc.alloc(CellPayload::Map(OrderedMap::new()), &mut NoRoots).unwrap();
        assert_eq!(gc.set(map, "x", TaggedValue::number(1.0)).unwrap(), None);
        assert_eq!(
            gc.set(map, "x", TaggedValue::number(2.0)).unwrap(),
            Some(TaggedValue::number(1.0))
        );
        assert_eq!(gc.get_field(map, "x").unwrap(), Some(TaggedValue::number(2.0)));
        assert!(gc.delete(map, "x").unwrap());
        assert!(!gc.delete(map, "x").unwrap());
        assert_eq!(gc.get_field(map, "x").unwrap(), None);
    }

    #[test]
    fn set_members_compare_by_current_address() {
        let mut gc = collector(16);
        let member = gc.alloc(list(&[]), &mut NoRoots).unwrap();
        let mut roots = vec![TaggedValue::pointer(member)];
        let set = gc
            .alloc(CellPayload::Set(std::iter::once(roots[0].clone()).collect()), &mut roots)
            .unwrap();
        roots.push(TaggedValue::pointer(set));

        gc.collect(&mut roots).unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        let member = roots[0].as_address().unwrap();
        let set = roots[1].as_address().unwrap();

        assert!(gc.has_member(set, TaggedValue::pointer(member)).unwrap());
        assert!(!gc.add_member(set, TaggedValue::pointer(member)).unwrap());
        assert!(gc.add_member(set, TaggedValue::number(3.0)).unwrap());
        assert_eq!(gc.len(set).unwrap(), 2);
    }

    #[test]
    fn write_into_scanned_cell_is_rescanned() {
        let mut gc = collector(64);
        let holder = gc.alloc(list(&[0.0]), &mut NoRoots).unwrap();
        let target = gc.alloc(list(&[7.0]), &mut NoRoots).unwrap();
        let mut roots = vec![TaggedValue::pointer(holder), TaggedValue::pointer(target)];

        gc.collect(&mut roots).unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        let holder = roots[0].as_address().unwrap();
        let target = roots[1].as_address().unwrap();
        gc.scan().unwrap();
        assert_eq!(gc.scan_ptr, 1);

        gc.write(holder, 0, TaggedValue::pointer(target)).unwrap();
        assert_eq!(gc.stats().rescans, 1);
        gc.finish_cycle().unwrap();
        assert_eq!(gc.reports().last().unwrap().rescanned, 1);

        let loaded = gc.load(holder, 0).unwrap().as_address().unwrap();
        assert_eq!(gc.load(loaded, 0).unwrap(), TaggedValue::number(7.0));
    }

    #[test]
    fn allocation_during_cycle_is_scanned_in_same_cycle() {
        let mut gc = collector(64);
        let mut previous = gc.alloc(list(&[9.0]), &mut NoRoots).unwrap();
        for _ in 0..3 {
            previous = gc
                .alloc(CellPayload::List(vec![TaggedValue::pointer(previous)]), &mut NoRoots)
                .unwrap();
        }
        let mut roots = vec![TaggedValue::pointer(previous)];
        gc.collect(&mut roots).unwrap();

        let fresh = gc
            .alloc(CellPayload::List(vec![roots[0].clone()]), &mut roots)
            .unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        assert!(fresh.index >= gc.scan_ptr);

        roots.push(TaggedValue::pointer(fresh));
        gc.finish_cycle().unwrap();
        let report = gc.reports().last().unwrap();
        assert_eq!(report.live_cells, 5);
        assert_eq!(report.cells_scanned, 5);
        assert_eq!(gc.load(fresh, 0).unwrap(), roots[0]);
    }

    #[test]
    fn half_full_to_space_starts_a_cycle() {
        let mut gc = collector(8);
        let mut roots = Vec::new();
        for n in 0..2 {
            let address = gc.alloc(list(&[n as f64]), &mut roots).unwrap();
            roots.push(TaggedValue::pointer(address));
        }
        assert_eq!(gc.state(), GcState::Ready);

        gc.alloc(list(&[2.0]), &mut roots).unwrap();
        assert_eq!(gc.stats().cycles_started, 1);
        assert_eq!(gc.state(), GcState::Scanning);
    }

    #[test]
    fn full_heap_collects_before_failing() {
        let mut gc = collector(4);
        let mut roots = Vec::new();
        let keep = gc.alloc(list(&[1.0]), &mut roots).unwrap();
        roots.push(TaggedValue::pointer(keep));
        gc.alloc(list(&[2.0]), &mut roots).unwrap();
        let third = gc.alloc(list(&[3.0]), &mut roots).unwrap();

        assert_eq!(gc.num_active_cells(), 2);
        assert_eq!(gc.load(third, 0).unwrap(), TaggedValue::number(3.0));
        let keep = roots[0].as_address().unwrap();
        assert_eq!(gc.load(keep, 0).unwrap(), TaggedValue::number(1.0));
    }

    #[test]
    fn out_of_memory_is_deterministic() {
        for _ in 0..3 {
            let mut gc = collector(4);
            let a = make_cycle(&mut gc);
            let mut roots = vec![TaggedValue::pointer(a)];
            let err = gc.alloc(list(&[1.0]), &mut roots).unwrap_err();
            assert_eq!(err.error_type, EmberErrorType::OutOfMemory);
        }
    }

    #[test]
    fn pending_payload_is_a_root() {
        let mut gc = collector(4);
        let child = gc.alloc(list(&[5.0]), &mut NoRoots).unwrap();
        // Only the payload of the new cell references `child`.
        let parent = gc
            .alloc(CellPayload::List(vec![TaggedValue::pointer(child)]), &mut NoRoots)
            .unwrap();
        assert_eq!(gc.stats().cycles_started, 1);
        let child = gc.load(parent, 0).unwrap().as_address().unwrap();
        assert_eq!(gc.load(child, 0).unwrap(), TaggedValue::number(5.0));
        assert_eq!(gc.num_active_cells(), 2);
    }

    /// Lay a cell out in to-space directly, without paying for allocation.
    fn place(gc: &mut Collector, payload: CellPayload) -> Address {
        let index = gc.to_space.cells.len();
        gc.to_space.cells.push(HeapCell::new(payload));
        Address::new(index, gc.to_space.id)
    }

    #[test]
    fn alloc_fails_when_live_chain_outgrows_to_space_mid_cycle() {
        let mut gc = collector(8);
        let mut head = place(&mut gc, list(&[0.0]));
        for _ in 0..3 {
            head = place(&mut gc, CellPayload::List(vec![TaggedValue::pointer(head)]));
        }
        let mut roots = vec![TaggedValue::pointer(head)];
        gc.collect(&mut roots).unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        assert_eq!(gc.num_active_cells(), 1);

        // A free slot remains after this step's scanning, but the rest of the
        // chain still has to be copied into it.
        let err = gc.alloc(list(&[1.0]), &mut roots).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::OutOfMemory);
    }

    #[test]
    fn alloc_mid_cycle_succeeds_when_the_chain_fits() {
        let mut gc = collector(10);
        let mut head = place(&mut gc, list(&[0.0]));
        for _ in 0..3 {
            head = place(&mut gc, CellPayload::List(vec![TaggedValue::pointer(head)]));
        }
        let mut roots = vec![TaggedValue::pointer(head)];
        gc.collect(&mut roots).unwrap();

        let fresh = gc.alloc(list(&[1.0]), &mut roots).unwrap();
        assert_eq!(gc.state(), GcState::Scanning);
        assert_eq!(gc.load(fresh, 0).unwrap(), TaggedValue::number(1.0));
        let mut cursor = roots[0].as_address().unwrap();
        for _ in 0..3 {
            cursor = gc.load(cursor, 0).unwrap().as_address().unwrap();
        }
        assert_eq!(gc.load(cursor, 0).unwrap(), TaggedValue::number(0.0));
        assert_eq!(gc.num_active_cells(), 5);
    }

    #[test]
    fn positional_write_into_a_set_is_rejected() {
        let mut gc = collector(16);
        let set = gc
            .alloc(
                CellPayload::Set([TaggedValue::number(1.0), TaggedValue::number(2.0)].into_iter().collect()),
                &mut NoRoots,
            )
            .unwrap();
        let err = gc.write(set, 1, TaggedValue::number(1.0)).unwrap_err();
        assert!(matches!(err.error_type, EmberErrorType::ShapeMismatch { .. }));
        assert_eq!(gc.len(set).unwrap(), 2);
        assert!(gc.has_member(set, TaggedValue::number(2.0)).unwrap());
    }

    #[test]
    fn flip_while_scanning_is_rejected() {
        let mut gc = collector(64);
        let a = make_cycle(&mut gc);
        let mut roots = vec![TaggedValue::pointer(a)];
        gc.flip(&mut roots).unwrap();
        let err = gc.flip(&mut roots).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::ScanningIncomplete);
    }

    #[test]
    fn scan_with_nothing_pending_is_an_error() {
        let mut gc = collector(64);
        let err = gc.scan().unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::InternalConsistency);
    }

    #[test]
    fn stale_and_unknown_addresses_are_rejected() {
        let mut gc = collector(64);
        let a = gc.alloc(list(&[1.0]), &mut NoRoots).unwrap();
        let mut roots = vec![TaggedValue::pointer(a)];
        gc.full_collect(&mut roots).unwrap();
        gc.full_collect(&mut roots).unwrap();

        // Two flips later, the original generation is gone.
        let err = gc.read(a).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::InvalidAddress { address: a });

        let current = roots[0].as_address().unwrap();
        let bogus = Address::new(current.index + 10, current.space);
        assert!(gc.read(bogus).is_err());
    }

    #[test]
    fn report_sink_sees_every_cycle() {
        use std::{cell::RefCell, rc::Rc};

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut gc = collector(64);
        let sink = seen.clone();
        gc.set_report_sink(move |report| sink.borrow_mut().push(report.cycle));

        gc.full_collect(&mut NoRoots).unwrap();
        gc.full_collect(&mut NoRoots).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(gc.stats().cycles_completed, 2);
    }

    #[test]
    fn steps_are_counted_per_state() {
        let mut gc = collector(64);
        gc.collect(&mut NoRoots).unwrap();
        gc.collect(&mut NoRoots).unwrap();
        assert_eq!(gc.stats().steps[GcState::Ready], 1);
        assert_eq!(gc.stats().steps[GcState::Finishing], 1);
    }
}
