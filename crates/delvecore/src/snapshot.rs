//! Snapshot assembly: the observable view the server pushes after auth and
//! every successful action.
//!
//! Visibility walks four cardinal rays up to three cells deep; an edge must
//! read as `open` or `lever_secret` to pass sight, so doors of any kind stop
//! a ray even when they permit movement. The minimap is the discovered set
//! within radius 12, re-resolved against current edges. The `world_hash` is
//! the stable digest of {you, cooldowns, visible}.

use std::collections::HashSet;

use delveproto::kinds::Dir;
use delveproto::msg::{CellView, CooldownView, EdgeView, HubView, WorldState, YouView};
use serde_json::json;

use crate::digest::digest;
use crate::oracle::{Purpose, WorldModel};
use crate::session::Cooldowns;
use crate::store::Pose;

const VIEW_DEPTH: i64 = 3;
const MINIMAP_RADIUS: i64 = 12;
const FEET_PER_CELL: f64 = 5.0;

pub fn build_world_state(
    model: &mut WorldModel,
    pose: &Pose,
    hp: i32,
    cooldowns: &Cooldowns,
    now_ms: u64,
) -> anyhow::Result<WorldState> {
    let you = YouView {
        level: pose.level,
        x: pose.x,
        y: pose.y,
        face: pose.face,
        hp,
        status: vec![],
    };
    let cd = CooldownView {
        move_ready_at_ms: cooldowns.move_ready_at_ms,
        turn_ready_at_ms: cooldowns.turn_ready_at_ms,
    };
    let visible_cells = visible_cells(model, pose, now_ms)?;
    let minimap_cells = minimap_cells(model, pose, now_ms)?;
    let world_hash = digest(&json!({
        "you": &you,
        "cooldowns": &cd,
        "visible": &visible_cells,
    }));

    Ok(WorldState {
        now: now_ms,
        you,
        hub: hub_view(pose),
        cooldowns: cd,
        world_hash,
        visible_cells,
        minimap_cells,
    })
}

fn cell_view(
    model: &mut WorldModel,
    level: i32,
    x: i64,
    y: i64,
    purpose: Purpose,
    now_ms: u64,
) -> anyhow::Result<CellView> {
    Ok(CellView {
        x,
        y,
        edges: EdgeView {
            n: model.edge_type(level, x, y, Dir::N, purpose, now_ms)?,
            e: model.edge_type(level, x, y, Dir::E, purpose, now_ms)?,
            s: model.edge_type(level, x, y, Dir::S, purpose, now_ms)?,
            w: model.edge_type(level, x, y, Dir::W, purpose, now_ms)?,
        },
    })
}

fn visible_cells(
    model: &mut WorldModel,
    pose: &Pose,
    now_ms: u64,
) -> anyhow::Result<Vec<CellView>> {
    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut out = Vec::new();

    seen.insert((pose.x, pose.y));
    out.push(cell_view(
        model,
        pose.level,
        pose.x,
        pose.y,
        Purpose::Visibility,
        now_ms,
    )?);

    for d in Dir::ALL {
        let (mut cx, mut cy) = (pose.x, pose.y);
        for _ in 0..VIEW_DEPTH {
            let kind = model.edge_type(pose.level, cx, cy, d, Purpose::Visibility, now_ms)?;
            if !kind.see_through() {
                break;
            }
            (cx, cy) = d.step(cx, cy);
            if seen.insert((cx, cy)) {
                out.push(cell_view(
                    model,
                    pose.level,
                    cx,
                    cy,
                    Purpose::Visibility,
                    now_ms,
                )?);
            }
        }
    }
    Ok(out)
}

fn minimap_cells(
    model: &mut WorldModel,
    pose: &Pose,
    now_ms: u64,
) -> anyhow::Result<Vec<CellView>> {
    let coords = model.discovered_in_radius(pose.level, pose.x, pose.y, MINIMAP_RADIUS);
    let mut out = Vec::with_capacity(coords.len());
    for (x, y) in coords {
        out.push(cell_view(
            model,
            pose.level,
            x,
            y,
            Purpose::Minimap,
            now_ms,
        )?);
    }
    Ok(out)
}

fn hub_view(pose: &Pose) -> HubView {
    let dist = ((pose.x.pow(2) + pose.y.pow(2)) as f64).sqrt() * FEET_PER_CELL;
    HubView {
        level: pose.level,
        x: 0,
        y: 0,
        dist_feet: dist.round() as i64,
        direction: dir_to_hub(pose.x, pose.y),
    }
}

/// Dominant-axis direction from (x, y) back toward the hub at the origin,
/// with ties breaking toward east/west.
pub fn dir_to_hub(x: i64, y: i64) -> Dir {
    if x.abs() >= y.abs() {
        if x > 0 {
            Dir::W
        } else {
            Dir::E
        }
    } else if y > 0 {
        Dir::N
    } else {
        Dir::S
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delveproto::kinds::EdgeKind;
    use crate::discovery::DiscoveryStore;
    use crate::overlay::{EdgeMeta, OverlayStore};

    fn fresh(seed: u32) -> WorldModel {
        WorldModel::new(seed, OverlayStore::in_memory(), DiscoveryStore::in_memory())
    }

    fn hub_pose() -> Pose {
        Pose {
            level: 1,
            x: 0,
            y: 0,
            face: Dir::N,
        }
    }

    #[test]
    fn snapshot_hash_is_replay_stable() {
        let cd = Cooldowns {
            move_ready_at_ms: 500,
            turn_ready_at_ms: 150,
        };
        let a = build_world_state(&mut fresh(777), &hub_pose(), 20, &cd, 1_000).unwrap();
        let b = build_world_state(&mut fresh(777), &hub_pose(), 20, &cd, 1_000).unwrap();
        assert_eq!(a.world_hash, b.world_hash);
        assert_eq!(a.visible_cells, b.visible_cells);

        let moved = Pose {
            x: 1,
            ..hub_pose()
        };
        let c = build_world_state(&mut fresh(777), &moved, 20, &cd, 1_000).unwrap();
        assert_ne!(a.world_hash, c.world_hash);
    }

    #[test]
    fn hash_covers_cooldowns_but_not_now() {
        let cd = Cooldowns {
            move_ready_at_ms: 500,
            turn_ready_at_ms: 150,
        };
        let a = build_world_state(&mut fresh(777), &hub_pose(), 20, &cd, 1_000).unwrap();
        let b = build_world_state(&mut fresh(777), &hub_pose(), 20, &cd, 9_000).unwrap();
        assert_eq!(a.world_hash, b.world_hash);

        let later = Cooldowns {
            move_ready_at_ms: 600,
            turn_ready_at_ms: 150,
        };
        let c = build_world_state(&mut fresh(777), &hub_pose(), 20, &later, 1_000).unwrap();
        assert_ne!(a.world_hash, c.world_hash);
    }

    #[test]
    fn a_door_blocks_the_ray_but_not_the_cell_under_it() {
        let mut m = fresh(777);
        let pose = Pose {
            level: 1,
            x: 200,
            y: 200,
            face: Dir::N,
        };
        m.set_edge_override(
            1,
            200,
            200,
            Dir::E,
            EdgeKind::DoorUnlocked,
            EdgeMeta::default(),
            0,
        )
        .unwrap();

        let cells = visible_cells(&mut m, &pose, 0).unwrap();
        assert!(cells.iter().any(|c| (c.x, c.y) == (200, 200)));
        assert!(!cells.iter().any(|c| (c.x, c.y) == (201, 200)));
        assert_eq!(cells[0].edges.e, EdgeKind::DoorUnlocked);
    }

    #[test]
    fn rays_stop_after_three_cells() {
        let mut m = fresh(777);
        let pose = Pose {
            level: 1,
            x: 300,
            y: 300,
            face: Dir::E,
        };
        // A long open corridor east of the player.
        for x in 300..310 {
            m.set_edge_override(1, x, 300, Dir::E, EdgeKind::Open, EdgeMeta::default(), 0)
                .unwrap();
        }
        let cells = visible_cells(&mut m, &pose, 0).unwrap();
        assert!(cells.iter().any(|c| (c.x, c.y) == (303, 300)));
        assert!(!cells.iter().any(|c| (c.x, c.y) == (304, 300)));
    }

    #[test]
    fn minimap_reflects_only_discovered_cells() {
        let mut m = fresh(777);
        m.mark_discovered(1, 0, 0, 1).unwrap();
        m.mark_discovered(1, 1, 0, 2).unwrap();
        m.mark_discovered(1, 40, 0, 3).unwrap();
        m.mark_discovered(2, 0, 1, 4).unwrap();

        let cells = minimap_cells(&mut m, &hub_pose(), 10).unwrap();
        let coords: Vec<(i64, i64)> = cells.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn hub_distance_and_direction() {
        let p = Pose {
            level: 1,
            x: 3,
            y: 4,
            face: Dir::N,
        };
        let h = hub_view(&p);
        assert_eq!(h.dist_feet, 25);
        assert_eq!(h.direction, Dir::N);

        assert_eq!(dir_to_hub(0, 0), Dir::E);
        assert_eq!(dir_to_hub(5, 2), Dir::W);
        assert_eq!(dir_to_hub(-5, 2), Dir::E);
        assert_eq!(dir_to_hub(2, 5), Dir::N);
        assert_eq!(dir_to_hub(2, -5), Dir::S);
        assert_eq!(dir_to_hub(3, -3), Dir::W);
    }
}
