//! World generation properties exercised through the public API: chunk
//! determinism and separation, seam behavior at chunk boundaries, and
//! negative-coordinate addressing.

use delveproto::kinds::{Dir, EdgeKind};
use delvecore::chunk;
use delvecore::discovery::DiscoveryStore;
use delvecore::overlay::OverlayStore;
use delvecore::oracle::{Purpose, WorldModel};

fn fresh(seed: u32) -> WorldModel {
    WorldModel::new(seed, OverlayStore::in_memory(), DiscoveryStore::in_memory())
}

#[test]
fn chunk_generation_is_bit_exact_across_invocations() {
    let a = chunk::generate(12345, 1, 0, 0);
    let b = chunk::generate(12345, 1, 0, 0);
    assert_eq!(a.east, b.east);
    assert_eq!(a.south, b.south);
}

#[test]
fn sibling_chunks_are_distinct() {
    let a = chunk::generate(12345, 1, 0, 0);
    for (level, cx, cy) in [(1, 1, 0), (1, 0, 1), (1, -1, 0), (2, 0, 0)] {
        let b = chunk::generate(12345, level, cx, cy);
        assert!(
            a.east != b.east || a.south != b.south,
            "chunk ({level},{cx},{cy}) equals chunk (1,0,0)"
        );
    }
}

#[test]
fn different_seeds_disagree_on_a_chunk() {
    let a = chunk::generate(12345, 1, 0, 0);
    let b = chunk::generate(54321, 1, 0, 0);
    assert!(a.east != b.east || a.south != b.south);
}

#[test]
fn seam_edges_agree_from_both_chunks() {
    let mut m = fresh(777);
    for y in 0..130 {
        let from_left = m.edge_type(1, 63, y, Dir::E, Purpose::Visibility, 0).unwrap();
        let from_right = m.edge_type(1, 64, y, Dir::W, Purpose::Visibility, 0).unwrap();
        assert_eq!(from_left, from_right, "east seam disagrees at y={y}");
        let expected = if y % 8 == 0 {
            EdgeKind::Open
        } else {
            EdgeKind::Wall
        };
        assert_eq!(from_left, expected, "mod-8 rule broken at y={y}");
    }
}

#[test]
fn south_seam_follows_the_same_rule() {
    let mut m = fresh(777);
    for x in -16..16 {
        let a = m.edge_type(1, x, 63, Dir::S, Purpose::Visibility, 0).unwrap();
        let b = m.edge_type(1, x, 64, Dir::N, Purpose::Visibility, 0).unwrap();
        assert_eq!(a, b);
        let expected = if x.rem_euclid(8) == 0 {
            EdgeKind::Open
        } else {
            EdgeKind::Wall
        };
        assert_eq!(a, expected, "mod-8 rule broken at x={x}");
    }
}

#[test]
fn negative_coordinates_resolve_through_euclidean_locals() {
    // (-1, -1) lives in chunk (-1, -1) at local (63, 63); its east edge is a
    // seam edge governed by the boundary rule, not the generator.
    let mut m = fresh(777);
    let k = m.edge_type(1, -1, -1, Dir::E, Purpose::Visibility, 0).unwrap();
    assert_eq!(k, EdgeKind::Wall);
    let k = m.edge_type(1, -1, -8, Dir::E, Purpose::Visibility, 0).unwrap();
    assert_eq!(k, EdgeKind::Open);

    // Interior negative cells decode from the generator identically across
    // independent models.
    let mut m2 = fresh(777);
    for (x, y, d) in [(-30, -30, Dir::E), (-30, -30, Dir::S), (-2, -40, Dir::W)] {
        let a = m.edge_type(1, x, y, d, Purpose::Visibility, 0).unwrap();
        let b = m2.edge_type(1, x, y, d, Purpose::Visibility, 0).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn oracle_answers_are_symmetric_everywhere_sampled() {
    let mut m = fresh(99);
    for x in [-65, -64, -1, 0, 7, 63, 64, 100] {
        for y in [-65, -9, 0, 8, 63, 64] {
            for d in Dir::ALL {
                let (nx, ny) = d.step(x, y);
                let a = m.edge_type(1, x, y, d, Purpose::Visibility, 0).unwrap();
                let b = m
                    .edge_type(1, nx, ny, d.opposite(), Purpose::Visibility, 0)
                    .unwrap();
                assert_eq!(a, b, "asymmetry at ({x},{y}) {d:?}");
            }
        }
    }
}
