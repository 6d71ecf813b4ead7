use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::mock_test_prelude::*;
use crate::util::test_util::RANDOM_GRAPH_TEST_REGION;

const OBJECTS: usize = 3000;
const TAG: usize = 0b01;

/// Build a random graph of leaves, nodes, tagged pointers and excluded profiles. Nodes may point
/// to any object, so the graph has cycles and shared objects.
fn random_graph(heap: &mut MockHeap, rng: &mut ChaCha8Rng) -> Vec<Address> {
    let mut objects: Vec<Address> = vec![];
    for i in 0..OBJECTS {
        let obj = match rng.random_range(0..10) {
            0..=2 => heap.leaf(i),
            3..=7 => heap.node(Address::ZERO, Address::ZERO),
            8 if !objects.is_empty() => {
                let target = objects[rng.random_range(0..objects.len())];
                heap.tagged(target, TAG)
            }
            _ => heap.profile(i),
        };
        objects.push(obj);
    }
    for &obj in &objects {
        if MockKind::of(obj) == MockKind::Node {
            for index in 1..=2 {
                if rng.random_bool(0.8) {
                    let target = objects[rng.random_range(0..objects.len())];
                    heap.set_field(obj, index, target.as_usize());
                }
            }
        }
    }
    objects
}

/// The objects reachable from `roots`, not counting excluded objects. `check` is called on every
/// pointer found.
fn reachable(roots: &[Address], mut check: impl FnMut(Address)) -> HashSet<Address> {
    let mut seen = HashSet::new();
    let mut stack: Vec<Address> = roots.to_vec();
    while let Some(obj) = stack.pop() {
        check(obj);
        let kind = MockKind::of(obj);
        if kind == MockKind::Profile || !seen.insert(obj) {
            continue;
        }
        let fields: &[usize] = match kind {
            MockKind::Node => &[1, 2],
            MockKind::Tagged => &[1],
            _ => &[],
        };
        for &index in fields {
            let target = field(obj, index) & !(BYTES_IN_WORD - 1);
            if target != 0 {
                stack.push(addr(target));
            }
        }
    }
    seen
}

#[test]
pub fn random_graph_survives_dump_and_relocation() {
    with_archive_file("random.jsa", |path| {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let mut heap = MockHeap::new();
        let objects = random_graph(&mut heap, &mut rng);
        let roots: Vec<Address> = objects
            .iter()
            .copied()
            .filter(|o| MockKind::of(*o) != MockKind::Profile && rng.random_bool(0.05))
            .collect();
        let expected = reachable(&roots, |_| {}).len();

        let mut options = test_options(&RANDOM_GRAPH_TEST_REGION);
        options.options.relocation_mode = RelocationMode::AlwaysRelocate;
        options.options.verify_shared_spaces = true;
        let mut binding =
            MockBinding::new(vec![MockRoots::new("random", RootOrder::SourceAddress, &roots)]);
        let summary = memory_manager::dump_archive(&options, &mut binding, path);
        assert_eq!(summary.copied_objects, expected);

        let mut loaded = MockBinding::empty(&["random"]);
        let archive = memory_manager::map_archive(&options, &mut loaded, path).unwrap();
        assert_ne!(archive.delta(), 0);
        let mapped_roots: Vec<Address> = (0..loaded.roots[0].len())
            .map(|i| loaded.roots[0].get(i))
            .collect();
        assert_eq!(mapped_roots.len(), roots.len());
        let mapped = reachable(&mapped_roots, |obj| {
            assert!(archive.contains(obj), "{} is not in the archive", obj);
            assert_ne!(MockKind::of(obj), MockKind::Profile);
        });
        assert_eq!(mapped.len(), expected);

        // Tags survive unless the target was excluded.
        for &obj in &mapped {
            if MockKind::of(obj) == MockKind::Tagged && field(obj, 1) != 0 {
                assert_eq!(field(obj, 1) & (BYTES_IN_WORD - 1), TAG);
            }
        }
    })
}
