//!
//! # Cell Dependency Ordering
//!
//! Cells instantiate other cells, forming a graph that must be a DAG.
//! [order_cells] produces a dependency order (every cell after all the
//! cells it references) in a single depth-first pass, and doubles as the
//! load-time cycle check: on a cycle it reports the offending name path,
//! ending where it began.
//!

// Std-Lib
use std::collections::HashSet;

// Crates.io
use slotmap::SlotMap;

// Local imports
use crate::{Cell, CellKey};

/// Dependency-order `roots` and everything they reach. References must
/// already be resolved (`CellRef::cell` populated); unresolved ones are
/// skipped here, having been rejected earlier.
pub fn order_cells(
    cells: &SlotMap<CellKey, Cell>,
    roots: &[CellKey],
) -> Result<Vec<CellKey>, Vec<String>> {
    let mut orderer = Orderer {
        cells,
        stack: Vec::with_capacity(cells.len()),
        seen: HashSet::with_capacity(cells.len()),
        pending: Vec::new(),
    };
    for root in roots {
        orderer.push(*root)?;
    }
    Ok(orderer.stack)
}

struct Orderer<'d> {
    cells: &'d SlotMap<CellKey, Cell>,
    /// Completed cells, dependency-ordered
    stack: Vec<CellKey>,
    /// Completed set, for membership tests
    seen: HashSet<CellKey>,
    /// Open recursion frames, in order; a repeat here is a cycle
    pending: Vec<CellKey>,
}
impl<'d> Orderer<'d> {
    /// Push `key`'s dependencies, then itself, onto the ordered stack
    fn push(&mut self, key: CellKey) -> Result<(), Vec<String>> {
        if self.seen.contains(&key) {
            return Ok(());
        }
        if self.pending.contains(&key) {
            return Err(self.cycle_path(key));
        }
        self.pending.push(key);
        for r in &self.cells[key].refs {
            if let Some(target) = r.cell {
                self.push(target)?;
            }
        }
        self.pending.pop();
        self.seen.insert(key);
        self.stack.push(key);
        Ok(())
    }
    /// Name path of the detected cycle: from the first open frame of
    /// `repeat` down the pending stack, closed by repeating it.
    fn cycle_path(&self, repeat: CellKey) -> Vec<String> {
        let start = self
            .pending
            .iter()
            .position(|k| *k == repeat)
            .unwrap_or(0);
        let mut path: Vec<String> = self.pending[start..]
            .iter()
            .map(|k| self.cells[*k].name.clone())
            .collect();
        path.push(self.cells[repeat].name.clone());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellRef;
    use crate::{geom::Point, BoundBox};

    fn reference(name: &str, key: CellKey) -> CellRef {
        CellRef {
            cell_name: name.into(),
            cell: Some(key),
            origin: Point::new(0, 0),
            angle: 0.,
            reflect: false,
            mag: 1.,
            array: None,
            bbox: BoundBox::empty(),
        }
    }

    #[test]
    fn orders_dependencies_first() {
        let mut cells: SlotMap<CellKey, Cell> = SlotMap::with_key();
        let leaf = cells.insert(Cell::new("LEAF"));
        let mid = cells.insert(Cell::new("MID"));
        let top = cells.insert(Cell::new("TOP"));
        cells[mid].refs.push(reference("LEAF", leaf));
        cells[top].refs.push(reference("MID", mid));
        cells[top].refs.push(reference("LEAF", leaf));

        let order = order_cells(&cells, &[top]).unwrap();
        assert_eq!(order, vec![leaf, mid, top]);
    }

    #[test]
    fn two_cell_cycle_reports_path() {
        let mut cells: SlotMap<CellKey, Cell> = SlotMap::with_key();
        let a = cells.insert(Cell::new("A"));
        let b = cells.insert(Cell::new("B"));
        cells[a].refs.push(reference("B", b));
        cells[b].refs.push(reference("A", a));

        let err = order_cells(&cells, &[a]).unwrap_err();
        assert_eq!(err, vec!["A".to_string(), "B".into(), "A".into()]);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut cells: SlotMap<CellKey, Cell> = SlotMap::with_key();
        let a = cells.insert(Cell::new("A"));
        let r = reference("A", a);
        cells[a].refs.push(r);
        let err = order_cells(&cells, &[a]).unwrap_err();
        assert_eq!(err, vec!["A".to_string(), "A".into()]);
    }
}
