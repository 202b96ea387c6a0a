//! Index-set driven scatter from a distributed vector into a local buffer.
//!
//! A [`ScatterPlan`] is a pure pair of index lists: entry `k` copies global
//! index `from[k]` into buffer slot `to[k]`. [`ScatterContext::create`] turns a
//! plan into a communication schedule by sending each owner the indices this
//! rank needs from it (once). Afterwards every [`ScatterContext::begin`] /
//! [`ScatterContext::end`] pair moves values only.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use log::debug;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{PendingExchange, begin_exchange, sparse_exchange};
use crate::algs::wire::{WireIndex, WireScalar};
use crate::data::dist_vector::DistVector;
use crate::data::dof_layout::DofLayout;
use crate::debug_invariants::DebugInvariants;
use crate::driver_error::DriverError;
use crate::mesh::{FaceId, MeshPartition};

use super::dof_counter::DofCount;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScatterPlan {
    from: Vec<usize>,
    to: Vec<usize>,
    local_len: usize,
}

impl ScatterPlan {
    /// Plan copying `from[k]` to `to[k]` in a buffer of `local_len` slots.
    pub fn new(from: Vec<usize>, to: Vec<usize>, local_len: usize) -> Result<Self, DriverError> {
        let plan = Self { from, to, local_len };
        plan.validate_invariants()?;
        Ok(plan)
    }

    /// `from[k] = to[k] = k` for `k < n`.
    pub fn identity(n: usize) -> Self {
        Self {
            from: (0..n).collect(),
            to: (0..n).collect(),
            local_len: n,
        }
    }

    /// Gather `from` into slots `0..from.len()`.
    pub fn gather(from: Vec<usize>) -> Self {
        let n = from.len();
        Self {
            from,
            to: (0..n).collect(),
            local_len: n,
        }
    }

    pub fn scatter_from(&self) -> &[usize] {
        &self.from
    }

    pub fn scatter_to(&self) -> &[usize] {
        &self.to
    }

    pub fn local_len(&self) -> usize {
        self.local_len
    }

    pub fn len(&self) -> usize {
        self.from.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty()
    }

    /// Whether the plan maps every slot to the same global index.
    pub fn is_identity(&self) -> bool {
        self.from == self.to && self.to.iter().copied().eq(0..self.local_len)
    }

    /// Apply the plan to a fully replicated vector, without communication.
    pub fn apply_local(&self, global: &[f64], out: &mut [f64]) -> Result<(), DriverError> {
        if out.len() != self.local_len {
            return Err(DriverError::DimensionMismatch {
                context: "ScatterPlan::apply_local",
                expected: self.local_len,
                got: out.len(),
            });
        }
        for (&f, &t) in self.from.iter().zip(&self.to) {
            out[t] = *global.get(f).ok_or(DriverError::IndexOutOfRange {
                index: f,
                len: global.len(),
            })?;
        }
        Ok(())
    }
}

impl DebugInvariants for ScatterPlan {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ScatterPlan");
    }

    fn validate_invariants(&self) -> Result<(), DriverError> {
        if self.from.len() != self.to.len() {
            return Err(DriverError::InvalidScatter(format!(
                "scatter_from has {} entries, scatter_to has {}",
                self.from.len(),
                self.to.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for &t in &self.to {
            if t >= self.local_len {
                return Err(DriverError::InvalidScatter(format!(
                    "destination {t} outside a buffer of {}",
                    self.local_len
                )));
            }
            if !seen.insert(t) {
                return Err(DriverError::InvalidScatter(format!(
                    "destination {t} written twice"
                )));
            }
        }
        Ok(())
    }
}

/// Buffer position of each face's trace DOFs in the local solution buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceBufferLayout {
    offsets: BTreeMap<FaceId, usize>,
    dofs_per_face: usize,
    len: usize,
}

impl TraceBufferLayout {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dofs_per_face(&self) -> usize {
        self.dofs_per_face
    }

    /// Slice of `buffer` holding the traces of `face`.
    pub fn face_values<'a>(&self, face: FaceId, buffer: &'a [f64]) -> Option<&'a [f64]> {
        self.offsets
            .get(&face)
            .and_then(|&o| buffer.get(o..o + self.dofs_per_face))
    }
}

/// Plan gathering the traces of every numbered face of every owned element,
/// in ascending [`FaceId`] order.
pub fn build_trace_scatter(
    partition: &MeshPartition,
    count: &DofCount,
) -> Result<(ScatterPlan, TraceBufferLayout), DriverError> {
    let mut faces = BTreeSet::new();
    for element in partition.owned_elements() {
        for &face_id in &element.faces {
            if partition.face(face_id)?.is_numbered() {
                faces.insert(face_id);
            }
        }
    }
    let dofs_per_face = count.dofs_per_face();
    let mut offsets = BTreeMap::new();
    let mut from = Vec::with_capacity(faces.len() * dofs_per_face);
    for face_id in faces {
        let range = count
            .face_range(face_id)
            .ok_or(DriverError::MissingFaceOffset(face_id))?;
        offsets.insert(face_id, from.len());
        from.extend(range);
    }
    let len = from.len();
    let plan = ScatterPlan::gather(from);
    plan.debug_assert_invariants();
    Ok((
        plan,
        TraceBufferLayout {
            offsets,
            dofs_per_face,
            len,
        },
    ))
}

/// Communication schedule for one [`ScatterPlan`] over one [`DofLayout`].
pub struct ScatterContext<C: Communicator> {
    layout: DofLayout,
    local_len: usize,
    tag: CommTag,
    /// (local index in the owned block, buffer slot)
    local_copies: Vec<(usize, usize)>,
    /// owner -> buffer slots, in the order the owner sends values
    remote_slots: BTreeMap<usize, Vec<usize>>,
    /// requester -> local indices to ship, in request order
    serve: BTreeMap<usize, Vec<usize>>,
    _comm: PhantomData<C>,
}

/// A scatter between `begin` and `end`.
pub struct ScatterInFlight<C: Communicator> {
    pending: PendingExchange<C, WireScalar>,
}

impl<C: Communicator> ScatterContext<C> {
    /// Build the schedule. Collective: every rank must call it, with `tag`
    /// reserved for this context (requests use `tag`, values `tag + 1`).
    pub fn create(
        comm: &C,
        layout: &DofLayout,
        plan: &ScatterPlan,
        tag: CommTag,
    ) -> Result<Self, DriverError> {
        plan.validate_invariants()?;
        let me = comm.rank();
        let mut local_copies = Vec::new();
        let mut remote_slots: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut requests: BTreeMap<usize, Vec<WireIndex>> = BTreeMap::new();
        for (&global, &slot) in plan.scatter_from().iter().zip(plan.scatter_to()) {
            match layout.to_local(global) {
                Some(local) => local_copies.push((local, slot)),
                None => {
                    let owner = layout.owner_of(global)?;
                    remote_slots.entry(owner).or_default().push(slot);
                    requests.entry(owner).or_default().push(WireIndex::new(global));
                }
            }
        }

        let asked = sparse_exchange(comm, tag, &requests)?;
        let mut serve = BTreeMap::new();
        for (peer, indices) in asked {
            let locals = indices
                .iter()
                .map(|w| {
                    layout.to_local(w.get()).ok_or(DriverError::NotOwned {
                        index: w.get(),
                        rank: me,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            serve.insert(peer, locals);
        }

        debug!(
            "rank {me}: scatter {:#06x} with {} local copies, {} remote from {:?}, serving {:?}",
            tag.as_u16(),
            local_copies.len(),
            remote_slots.values().map(Vec::len).sum::<usize>(),
            remote_slots.keys().collect::<Vec<_>>(),
            serve.keys().collect::<Vec<_>>(),
        );

        Ok(Self {
            layout: layout.clone(),
            local_len: plan.local_len(),
            tag,
            local_copies,
            remote_slots,
            serve,
            _comm: PhantomData,
        })
    }

    /// Number of buffer slots filled from other ranks.
    pub fn remote_len(&self) -> usize {
        self.remote_slots.values().map(Vec::len).sum()
    }

    fn check_sizes(&self, owned: usize, out: usize) -> Result<(), DriverError> {
        if owned != self.layout.owned_count() {
            return Err(DriverError::DimensionMismatch {
                context: "ScatterContext source",
                expected: self.layout.owned_count(),
                got: owned,
            });
        }
        if out != self.local_len {
            return Err(DriverError::DimensionMismatch {
                context: "ScatterContext buffer",
                expected: self.local_len,
                got: out,
            });
        }
        Ok(())
    }

    /// Copy locally owned entries into `out` and ship requested values.
    pub fn begin(
        &self,
        comm: &C,
        owned: &[f64],
        out: &mut [f64],
    ) -> Result<ScatterInFlight<C>, DriverError> {
        self.check_sizes(owned.len(), out.len())?;
        let outgoing: BTreeMap<usize, Vec<WireScalar>> = self
            .serve
            .iter()
            .map(|(&peer, locals)| {
                (peer, locals.iter().map(|&i| WireScalar::new(owned[i])).collect())
            })
            .collect();
        let mut incoming = vec![0usize; comm.size().max(1)];
        for (&owner, slots) in &self.remote_slots {
            incoming[owner] = slots.len();
        }
        let pending = begin_exchange(comm, self.tag.offset(1), &outgoing, &incoming);
        for &(local, slot) in &self.local_copies {
            out[slot] = owned[local];
        }
        Ok(ScatterInFlight { pending })
    }

    /// Wait for remote values and write them into `out`.
    pub fn end(&self, in_flight: ScatterInFlight<C>, out: &mut [f64]) -> Result<(), DriverError> {
        let received = in_flight.pending.finish()?;
        for (owner, slots) in &self.remote_slots {
            let values = received.get(owner).ok_or_else(|| DriverError::CommError {
                neighbor: *owner,
                reason: "scatter values missing".into(),
            })?;
            if values.len() != slots.len() {
                return Err(DriverError::BufferSizeMismatch {
                    neighbor: *owner,
                    expected: slots.len(),
                    got: values.len(),
                });
            }
            for (&slot, value) in slots.iter().zip(values) {
                out[slot] = value.get();
            }
        }
        Ok(())
    }

    /// Scatter `x` into a fresh buffer.
    pub fn scatter(&self, comm: &C, x: &DistVector) -> Result<Vec<f64>, DriverError> {
        let mut out = vec![0.0; self.local_len];
        let in_flight = self.begin(comm, x.local(), &mut out)?;
        self.end(in_flight, &mut out)?;
        Ok(out)
    }
}
