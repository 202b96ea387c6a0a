mod util;
use util::*;

use std::collections::BTreeMap;

use hdg_sieve::algs::communicator::Communicator;
use hdg_sieve::algs::dof_counter::count_dofs;
use hdg_sieve::mesh::FaceId;
use proptest::prelude::*;

type RankView = ((usize, usize), BTreeMap<FaceId, usize>, usize);

fn numbering(base: usize, level: usize, ranks: usize, order: usize) -> Vec<RankView> {
    run_world(ranks, move |comm| {
        let partition = interval(base, level, comm.rank(), comm.size());
        let count = count_dofs(&partition, order, &comm).unwrap();
        let layout = count.layout();
        (
            (layout.rows_owned_lo(), layout.rows_owned_hi()),
            count.face_offsets().clone(),
            count.global_count(),
        )
    })
}

#[test]
fn interior_faces_are_the_only_unknowns() {
    let views = numbering(2, 3, 3, 1);
    let total = views[0].2;
    assert_eq!(total, 15);
    assert!(views.iter().all(|v| v.2 == total));
    let ranges: Vec<_> = views.iter().map(|v| v.0).collect();
    assert_tiles(&ranges, total);
}

#[test]
fn connectivity_counts_match_the_tridiagonal_pattern() {
    let rows = run_world(2, |comm| {
        let partition = interval(2, 1, comm.rank(), comm.size());
        let count = count_dofs(&partition, 1, &comm).unwrap();
        (
            count.n_local_dofs_connected_to_dof().to_vec(),
            count.n_nonlocal_dofs_connected_to_dof().to_vec(),
        )
    });
    // faces 1, 2 owned by rank 0, face 3 by rank 1; face 2 couples across
    assert_eq!(rows[0], (vec![2, 2], vec![0, 1]));
    assert_eq!(rows[1], (vec![1], vec![1]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn numbering_is_a_deterministic_partition(
        base in 1usize..5,
        level in 0usize..4,
        ranks in 1usize..5,
    ) {
        let first = numbering(base, level, ranks, 1);
        let second = numbering(base, level, ranks, 1);
        prop_assert_eq!(&first, &second);

        let total = first[0].2;
        prop_assert_eq!(total, (base << level) - 1);
        let ranges: Vec<_> = first.iter().map(|v| v.0).collect();
        assert_tiles(&ranges, total);

        // every rank that sees a face agrees on its offset
        let mut seen: BTreeMap<FaceId, usize> = BTreeMap::new();
        for (_, offsets, _) in &first {
            for (face, &offset) in offsets {
                let known = *seen.entry(*face).or_insert(offset);
                prop_assert_eq!(known, offset, "face {} numbered twice", face);
            }
        }
    }
}
