//! Deterministic 64x64 chunk generation, variant `"maze"`.
//!
//! A chunk is two 4096-byte arrays encoding the east-going and south-going
//! edge of every local cell as {0=wall, 1=open, 2=door}. Generation is a pure
//! function of (seed, level, chunkX, chunkY): a recursive-backtracker maze,
//! then a fixed number of room placements opening interiors and a few
//! perimeter edges, then a door pass over the open edges.

use std::collections::HashMap;

use delveproto::kinds::Dir;

use crate::rng::{mix, Rng32};

pub const CHUNK_SIZE: i64 = 64;
const CELLS: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

pub const EDGE_WALL: u8 = 0;
pub const EDGE_OPEN: u8 = 1;
pub const EDGE_DOOR: u8 = 2;

/// The label stored in a world's generator-version tag for this variant.
pub const GENERATOR_VERSION: &str = "maze";

const ROOM_ATTEMPTS: u32 = 28;
const DOOR_RATE: f64 = 0.06;

/// Split a global axis coordinate into (chunk, local). Local is always the
/// Euclidean remainder, so negative coordinates land in [0, 63] too.
pub fn split_axis(v: i64) -> (i64, i64) {
    (v.div_euclid(CHUNK_SIZE), v.rem_euclid(CHUNK_SIZE))
}

#[derive(Debug, Clone)]
pub struct ChunkEdges {
    pub level: i32,
    pub cx: i64,
    pub cy: i64,
    pub east: Vec<u8>,
    pub south: Vec<u8>,
}

fn at(lx: i64, ly: i64) -> usize {
    (ly * CHUNK_SIZE + lx) as usize
}

impl ChunkEdges {
    /// Decode one edge of a local cell. West and north edges read the east and
    /// south arrays of the adjacent cell; off the low border they are walls
    /// (cross-chunk edges are the oracle's business, not the chunk's).
    pub fn edge(&self, lx: i64, ly: i64, d: Dir) -> u8 {
        debug_assert!((0..CHUNK_SIZE).contains(&lx) && (0..CHUNK_SIZE).contains(&ly));
        match d {
            Dir::E => self.east[at(lx, ly)],
            Dir::S => self.south[at(lx, ly)],
            Dir::W => {
                if lx == 0 {
                    EDGE_WALL
                } else {
                    self.east[at(lx - 1, ly)]
                }
            }
            Dir::N => {
                if ly == 0 {
                    EDGE_WALL
                } else {
                    self.south[at(lx, ly - 1)]
                }
            }
        }
    }
}

pub fn generate(seed: u32, level: i32, cx: i64, cy: i64) -> ChunkEdges {
    let mut east = vec![EDGE_WALL; CELLS];
    let mut south = vec![EDGE_WALL; CELLS];
    let mut rng = Rng32::from_seed(mix(seed, &[level, cx as i32, cy as i32], GENERATOR_VERSION));

    carve_maze(&mut rng, &mut east, &mut south);
    place_rooms(&mut rng, &mut east, &mut south);
    sprinkle_doors(&mut rng, &mut east, &mut south);

    ChunkEdges {
        level,
        cx,
        cy,
        east,
        south,
    }
}

fn open_edge(east: &mut [u8], south: &mut [u8], lx: i64, ly: i64, d: Dir) {
    match d {
        Dir::E => east[at(lx, ly)] = EDGE_OPEN,
        Dir::S => south[at(lx, ly)] = EDGE_OPEN,
        Dir::W => east[at(lx - 1, ly)] = EDGE_OPEN,
        Dir::N => south[at(lx, ly - 1)] = EDGE_OPEN,
    }
}

fn carve_maze(rng: &mut Rng32, east: &mut [u8], south: &mut [u8]) {
    let mut visited = vec![false; CELLS];
    let start = rng.int(0, CELLS as i32) as usize;
    let mut stack = vec![start];
    visited[start] = true;

    while let Some(&cur) = stack.last() {
        let (lx, ly) = ((cur as i64) % CHUNK_SIZE, (cur as i64) / CHUNK_SIZE);
        let mut dirs = Dir::ALL;
        rng.shuffle(&mut dirs);

        let mut advanced = false;
        for d in dirs {
            let (nx, ny) = d.step(lx, ly);
            if !(0..CHUNK_SIZE).contains(&nx) || !(0..CHUNK_SIZE).contains(&ny) {
                continue;
            }
            let n = at(nx, ny);
            if visited[n] {
                continue;
            }
            open_edge(east, south, lx, ly, d);
            visited[n] = true;
            stack.push(n);
            advanced = true;
            break;
        }
        if !advanced {
            stack.pop();
        }
    }
}

fn weighted_span(rng: &mut Rng32) -> i64 {
    let r = rng.float01();
    if r < 0.5 {
        2
    } else if r < 0.85 {
        3
    } else {
        4
    }
}

fn place_rooms(rng: &mut Rng32, east: &mut [u8], south: &mut [u8]) {
    for _ in 0..ROOM_ATTEMPTS {
        let w = weighted_span(rng);
        let h = weighted_span(rng);
        // One-cell margin keeps every perimeter edge inside the chunk.
        let x0 = i64::from(rng.int(1, (CHUNK_SIZE - w) as i32));
        let y0 = i64::from(rng.int(1, (CHUNK_SIZE - h) as i32));

        for ly in y0..y0 + h {
            for lx in x0..x0 + w {
                if lx + 1 < x0 + w {
                    east[at(lx, ly)] = EDGE_OPEN;
                }
                if ly + 1 < y0 + h {
                    south[at(lx, ly)] = EDGE_OPEN;
                }
            }
        }

        let mut perimeter: Vec<(i64, i64, Dir)> = Vec::with_capacity((2 * (w + h)) as usize);
        for lx in x0..x0 + w {
            perimeter.push((lx, y0, Dir::N));
            perimeter.push((lx, y0 + h - 1, Dir::S));
        }
        for ly in y0..y0 + h {
            perimeter.push((x0, ly, Dir::W));
            perimeter.push((x0 + w - 1, ly, Dir::E));
        }

        let openings = 1 + rng.int(0, 3);
        rng.shuffle(&mut perimeter);
        for &(lx, ly, d) in perimeter.iter().take(openings as usize) {
            open_edge(east, south, lx, ly, d);
        }
    }
}

fn sprinkle_doors(rng: &mut Rng32, east: &mut [u8], south: &mut [u8]) {
    for i in 0..CELLS {
        if east[i] == EDGE_OPEN && rng.float01() < DOOR_RATE {
            east[i] = EDGE_DOOR;
        }
        if south[i] == EDGE_OPEN && rng.float01() < DOOR_RATE {
            south[i] = EDGE_DOOR;
        }
    }
}

/// Pure memoization over (level, cx, cy) for one world's seed. Holds no
/// authoritative state; dropping it and regenerating is always safe.
#[derive(Debug)]
pub struct ChunkCache {
    seed: u32,
    map: HashMap<(i32, i64, i64), ChunkEdges>,
}

impl ChunkCache {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            map: HashMap::new(),
        }
    }

    pub fn get(&mut self, level: i32, cx: i64, cy: i64) -> &ChunkEdges {
        let seed = self.seed;
        self.map
            .entry((level, cx, cy))
            .or_insert_with(|| generate(seed, level, cx, cy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = generate(12345, 1, 0, 0);
        let b = generate(12345, 1, 0, 0);
        assert_eq!(a.east, b.east);
        assert_eq!(a.south, b.south);
    }

    #[test]
    fn neighbor_chunks_differ() {
        let a = generate(12345, 1, 0, 0);
        let b = generate(12345, 1, 1, 0);
        assert!(a.east != b.east || a.south != b.south);
    }

    #[test]
    fn edges_use_the_three_code_encoding() {
        let c = generate(9, 2, -1, 3);
        assert_eq!(c.east.len(), CELLS);
        assert_eq!(c.south.len(), CELLS);
        for v in c.east.iter().chain(c.south.iter()) {
            assert!(*v <= EDGE_DOOR);
        }
    }

    #[test]
    fn maze_connects_every_cell() {
        // The backtracker visits all cells and rooms only open more edges, so
        // the open/door subgraph of a chunk is fully connected.
        let c = generate(777, 1, 0, 0);
        let mut seen = vec![false; CELLS];
        let mut stack = vec![0i64];
        seen[0] = true;
        let mut count = 1usize;
        while let Some(cur) = stack.pop() {
            let (lx, ly) = (cur % CHUNK_SIZE, cur / CHUNK_SIZE);
            for d in Dir::ALL {
                let (nx, ny) = d.step(lx, ly);
                if !(0..CHUNK_SIZE).contains(&nx) || !(0..CHUNK_SIZE).contains(&ny) {
                    continue;
                }
                if c.edge(lx, ly, d) == EDGE_WALL {
                    continue;
                }
                let n = ny * CHUNK_SIZE + nx;
                if !seen[n as usize] {
                    seen[n as usize] = true;
                    count += 1;
                    stack.push(n);
                }
            }
        }
        assert_eq!(count, CELLS);
    }

    #[test]
    fn decode_mirrors_neighbor_edges() {
        let c = generate(4242, 1, 0, 0);
        for ly in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                if lx > 0 {
                    assert_eq!(c.edge(lx, ly, Dir::W), c.edge(lx - 1, ly, Dir::E));
                }
                if ly > 0 {
                    assert_eq!(c.edge(lx, ly, Dir::N), c.edge(lx, ly - 1, Dir::S));
                }
            }
        }
        assert_eq!(c.edge(0, 5, Dir::W), EDGE_WALL);
        assert_eq!(c.edge(5, 0, Dir::N), EDGE_WALL);
    }

    #[test]
    fn split_axis_uses_euclidean_remainder() {
        assert_eq!(split_axis(0), (0, 0));
        assert_eq!(split_axis(63), (0, 63));
        assert_eq!(split_axis(64), (1, 0));
        assert_eq!(split_axis(-1), (-1, 63));
        assert_eq!(split_axis(-64), (-1, 0));
        assert_eq!(split_axis(-65), (-2, 63));
    }

    #[test]
    fn cache_returns_the_generated_chunk() {
        let mut cache = ChunkCache::new(12345);
        let direct = generate(12345, 1, 2, 3);
        let cached = cache.get(1, 2, 3);
        assert_eq!(cached.east, direct.east);
        assert_eq!(cached.south, direct.south);
    }
}
