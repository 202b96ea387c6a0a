#![allow(dead_code)]
use hdg_sieve::algs::communicator::RayonComm;
use hdg_sieve::mesh::MeshPartition;
use hdg_sieve::mesh::MeshProvider;
use hdg_sieve::mesh::interval::IntervalMesh;

/// Run `f` on every rank of a fresh in-process world and collect the
/// results in rank order.
pub fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(RayonComm) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = RayonComm::world(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}

/// Partition of the unit interval with `base << level` elements.
pub fn interval(base: usize, level: usize, rank: usize, size: usize) -> MeshPartition {
    IntervalMesh::new(0.0, 1.0, base, rank, size)
        .refine(level)
        .expect("refine")
}

/// Assert that the owned ranges `[lo, hi)` of all ranks tile `[0, total)`.
pub fn assert_tiles(ranges: &[(usize, usize)], total: usize) {
    let mut next = 0;
    for &(lo, hi) in ranges {
        assert_eq!(lo, next, "gap or overlap at {lo}: {ranges:?}");
        assert!(hi >= lo);
        next = hi;
    }
    assert_eq!(next, total);
}
