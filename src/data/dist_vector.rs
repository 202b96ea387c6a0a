//! Distributed dense vector partitioned by a [`DofLayout`].
//!
//! Each rank stores its owned block. Values set at indices owned elsewhere are
//! stashed per owner and shipped by [`DistVector::assembly_begin`];
//! [`DistVector::assembly_end`] applies them with the pass's [`InsertMode`].
//! Reductions (`norm2`, `dot`) are collective.

use std::collections::BTreeMap;

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{PendingExchange, begin_exchange, exchange_counts, send_counts};
use crate::algs::wire::WireValue;
use crate::data::dof_layout::DofLayout;
use crate::driver_error::DriverError;

/// How a value combines with what is already stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertMode {
    Add,
    Insert,
}

impl InsertMode {
    #[inline]
    fn apply(self, slot: &mut f64, value: f64) {
        match self {
            InsertMode::Add => *slot += value,
            InsertMode::Insert => *slot = value,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DistVector {
    layout: DofLayout,
    values: Vec<f64>,
    stash: BTreeMap<usize, Vec<WireValue>>,
    mode: Option<InsertMode>,
}

/// Off-process values in flight between `assembly_begin` and `assembly_end`.
pub struct VectorAssembly<C: Communicator> {
    pending: PendingExchange<C, WireValue>,
    mode: InsertMode,
}

impl DistVector {
    /// Zero vector over `layout`.
    pub fn zeros(layout: DofLayout) -> Self {
        let n = layout.owned_count();
        Self {
            layout,
            values: vec![0.0; n],
            stash: BTreeMap::new(),
            mode: None,
        }
    }

    /// Vector with the given owned block.
    pub fn from_local(layout: DofLayout, values: Vec<f64>) -> Result<Self, DriverError> {
        if values.len() != layout.owned_count() {
            return Err(DriverError::DimensionMismatch {
                context: "DistVector::from_local",
                expected: layout.owned_count(),
                got: values.len(),
            });
        }
        Ok(Self {
            layout,
            values,
            stash: BTreeMap::new(),
            mode: None,
        })
    }

    /// Zero vector with the same layout.
    pub fn duplicate(&self) -> Self {
        Self::zeros(self.layout.clone())
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn local(&self) -> &[f64] {
        &self.values
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Owned entry at global index `global`.
    pub fn get(&self, global: usize) -> Result<f64, DriverError> {
        self.layout
            .to_local(global)
            .map(|i| self.values[i])
            .ok_or(DriverError::NotOwned {
                index: global,
                rank: self.layout.rank(),
            })
    }

    /// Set values at global indices; `None` indices are skipped.
    ///
    /// Owned entries are applied immediately, others wait for assembly. All
    /// calls between two assemblies must use the same mode.
    pub fn set_values(
        &mut self,
        indices: &[Option<usize>],
        values: &[f64],
        mode: InsertMode,
    ) -> Result<(), DriverError> {
        if indices.len() != values.len() {
            return Err(DriverError::DimensionMismatch {
                context: "DistVector::set_values",
                expected: indices.len(),
                got: values.len(),
            });
        }
        match self.mode {
            Some(current) if current != mode => return Err(DriverError::MixedInsertModes),
            _ => self.mode = Some(mode),
        }
        for (&index, &value) in indices.iter().zip(values) {
            let Some(global) = index else { continue };
            if let Some(i) = self.layout.to_local(global) {
                mode.apply(&mut self.values[i], value);
            } else {
                let owner = self.layout.owner_of(global)?;
                self.stash
                    .entry(owner)
                    .or_default()
                    .push(WireValue::new(global, value));
            }
        }
        Ok(())
    }

    /// Ship stashed off-process values to their owners. Collective.
    pub fn assembly_begin<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> Result<VectorAssembly<C>, DriverError> {
        let stash = std::mem::take(&mut self.stash);
        // every rank must agree on the mode, ranks without insertions follow Add
        let mode = self.mode.take().unwrap_or(InsertMode::Add);
        let incoming = exchange_counts(comm, &send_counts(comm, &stash))?;
        let pending = begin_exchange(comm, tags::VEC_STASH, &stash, &incoming);
        Ok(VectorAssembly { pending, mode })
    }

    /// Receive and apply the values shipped by other ranks. Collective.
    pub fn assembly_end<C: Communicator>(
        &mut self,
        assembly: VectorAssembly<C>,
    ) -> Result<(), DriverError> {
        let received = assembly.pending.finish()?;
        for records in received.values() {
            for rec in records {
                let i = self
                    .layout
                    .to_local(rec.index())
                    .ok_or(DriverError::NotOwned {
                        index: rec.index(),
                        rank: self.layout.rank(),
                    })?;
                assembly.mode.apply(&mut self.values[i], rec.value());
            }
        }
        Ok(())
    }

    /// Begin and end in one call.
    pub fn assemble<C: Communicator>(&mut self, comm: &C) -> Result<(), DriverError> {
        let pending = self.assembly_begin(comm)?;
        self.assembly_end(pending)
    }

    fn check_compatible(&self, other: &Self, context: &'static str) -> Result<(), DriverError> {
        if self.layout != other.layout {
            return Err(DriverError::DimensionMismatch {
                context,
                expected: self.layout.total(),
                got: other.layout.total(),
            });
        }
        Ok(())
    }

    /// Global dot product, summed in rank order.
    pub fn dot<C: Communicator>(&self, comm: &C, other: &Self) -> Result<f64, DriverError> {
        self.check_compatible(other, "DistVector::dot")?;
        let local: f64 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        Ok(comm.allreduce_sum(local))
    }

    /// Global Euclidean norm.
    pub fn norm2<C: Communicator>(&self, comm: &C) -> f64 {
        let local: f64 = self.values.iter().map(|v| v * v).sum();
        comm.allreduce_sum(local).sqrt()
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &Self) -> Result<(), DriverError> {
        self.check_compatible(x, "DistVector::axpy")?;
        for (y, x) in self.values.iter_mut().zip(&x.values) {
            *y += alpha * x;
        }
        Ok(())
    }

    /// `self = x + beta * self`
    pub fn aypx(&mut self, beta: f64, x: &Self) -> Result<(), DriverError> {
        self.check_compatible(x, "DistVector::aypx")?;
        for (y, x) in self.values.iter_mut().zip(&x.values) {
            *y = x + beta * *y;
        }
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn copy_from(&mut self, x: &Self) -> Result<(), DriverError> {
        self.check_compatible(x, "DistVector::copy_from")?;
        self.values.copy_from_slice(&x.values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_set_and_norm() {
        let mut v = DistVector::zeros(DofLayout::serial(3));
        v.set_values(&[Some(0), None, Some(2)], &[3.0, 99.0, 4.0], InsertMode::Add)
            .unwrap();
        v.assemble(&NoComm).unwrap();
        assert_eq!(v.local(), &[3.0, 0.0, 4.0]);
        assert_eq!(v.norm2(&NoComm), 5.0);
    }

    #[test]
    fn mixing_modes_is_rejected() {
        let mut v = DistVector::zeros(DofLayout::serial(2));
        v.set_values(&[Some(0)], &[1.0], InsertMode::Add).unwrap();
        assert_eq!(
            v.set_values(&[Some(1)], &[1.0], InsertMode::Insert),
            Err(DriverError::MixedInsertModes)
        );
        v.assemble(&NoComm).unwrap();
        // a new pass may pick another mode
        v.set_values(&[Some(1)], &[2.0], InsertMode::Insert).unwrap();
        assert_eq!(v.local(), &[1.0, 2.0]);
    }

    #[test]
    fn axpy_and_aypx() {
        let layout = DofLayout::serial(2);
        let x = DistVector::from_local(layout.clone(), vec![1.0, 2.0]).unwrap();
        let mut y = DistVector::from_local(layout, vec![10.0, 20.0]).unwrap();
        y.axpy(2.0, &x).unwrap();
        assert_eq!(y.local(), &[12.0, 24.0]);
        y.aypx(0.5, &x).unwrap();
        assert_eq!(y.local(), &[7.0, 14.0]);
        assert_eq!(x.dot(&NoComm, &y).unwrap(), 35.0);
    }

    #[test]
    fn pending_stash_takes_part_in_equality() {
        let layout = DofLayout::from_ranges(0, vec![0, 2, 4]).unwrap();
        let mut a = DistVector::zeros(layout.clone());
        let b = DistVector::zeros(layout);
        a.set_values(&[Some(3)], &[1.5], InsertMode::Add).unwrap();
        assert_eq!(a.local(), b.local());
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn off_process_values_are_summed_by_the_owner() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let layout = DofLayout::from_owned_count(&comm, 2).unwrap();
                    let mut v = DistVector::zeros(layout);
                    // both ranks add 1 to global index 1 (rank 0) and 3 (rank 1)
                    v.set_values(&[Some(1), Some(3)], &[1.0, 1.0], InsertMode::Add)
                        .unwrap();
                    v.assemble(&comm).unwrap();
                    (v.local().to_vec(), v.norm2(&comm))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].0, vec![0.0, 2.0]);
        assert_eq!(results[1].0, vec![0.0, 2.0]);
        assert_eq!(results[0].1, results[1].1);
        assert!((results[0].1 - 8f64.sqrt()).abs() < 1e-15);
    }
}
