// Property tests for the surface tree kept by the compositor
//
// Random sequences of link/unlink/destroy operations must always leave a
// consistent forest: parents and children agree and no surface is its own
// ancestor.

use proptest::prelude::*;
use std::collections::HashSet;
use std::os::unix::net::UnixStream;

use harbor::surface::SurfaceId;
use harbor::{Compositor, HarborConfig};

#[derive(Debug, Clone)]
enum Op {
    Link(usize, usize),
    Destroy(usize),
    Create,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..12, 0usize..12).prop_map(|(a, b)| Op::Link(a, b)),
        1 => (0usize..12).prop_map(Op::Destroy),
        1 => Just(Op::Create),
    ]
}

fn assert_consistent(compositor: &Compositor) {
    let live: HashSet<SurfaceId> = compositor.surfaces().into_iter().collect();
    for id in &live {
        let surface = compositor.surface(*id).unwrap();
        if let Some(parent) = surface.parent() {
            assert!(live.contains(&parent), "{} has a dead parent", id);
            assert!(compositor.surface(parent).unwrap().children().contains(id));
        }
        for child in surface.children() {
            assert_eq!(compositor.surface(*child).unwrap().parent(), Some(*id));
        }

        let mut seen = HashSet::new();
        let mut cursor = Some(*id);
        while let Some(current) = cursor {
            assert!(seen.insert(current), "cycle through {}", id);
            cursor = compositor.surface(current).unwrap().parent();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn surface_tree_stays_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let mut compositor = Compositor::new(HarborConfig::default()).unwrap();
        let (server, _peer) = UnixStream::pair().unwrap();
        let client = compositor.add_client_stream(server).unwrap();

        let mut surfaces: Vec<SurfaceId> = (0..6)
            .map(|n| compositor.create_surface(&client, 10 + n, 4))
            .collect();
        let mut next_protocol_id = 100;

        for op in ops {
            match op {
                Op::Link(a, b) => {
                    if let (Some(child), Some(parent)) = (surfaces.get(a), surfaces.get(b)) {
                        let _ = compositor.create_subsurface(*child, *parent);
                    }
                }
                Op::Destroy(a) => {
                    if a < surfaces.len() {
                        let id = surfaces.remove(a);
                        prop_assert!(compositor.destroy_surface(id));
                    }
                }
                Op::Create => {
                    surfaces.push(compositor.create_surface(&client, next_protocol_id, 4));
                    next_protocol_id += 1;
                }
            }
            assert_consistent(&compositor);
        }
        prop_assert_eq!(compositor.surfaces().len(), surfaces.len());
    }
}
