use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::mock_test_prelude::*;
use crate::util::test_util::DETERMINISM_TEST_REGION;

const CLASSES: [&str; 8] = [
    "java/lang/Object",
    "java/lang/String",
    "java/lang/Integer",
    "java/util/List",
    "java/util/ArrayList",
    "java/util/Map",
    "java/util/HashMap",
    "java/io/File",
];

/// Load the same classes into a fresh heap, and root them in an order given by `seed`.
fn load_classes(heap: &mut MockHeap, seed: u64) -> MockBinding {
    let mut klasses = vec![];
    let mut super_klass = Address::ZERO;
    for name in CLASSES {
        let symbol = heap.symbol(name);
        let klass = heap.klass(symbol, super_klass);
        let leaf = heap.leaf(name.len());
        let mirror = heap.node(leaf, klass);
        heap.set_field(klass, klass_field::MIRROR, mirror.as_usize());
        klasses.push(klass);
        super_klass = klass;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    klasses.shuffle(&mut rng);
    MockBinding::new(vec![MockRoots::new("classes", RootOrder::Name, &klasses)])
}

#[test]
pub fn same_input_gives_identical_files() {
    with_archive_file("first.jsa", |first| {
        let second = first.with_file_name("second.jsa");
        let options = test_options(&DETERMINISM_TEST_REGION);

        let mut heap1 = MockHeap::new();
        let mut binding1 = load_classes(&mut heap1, 1);
        let summary1 = memory_manager::dump_archive(&options, &mut binding1, first);

        let mut heap2 = MockHeap::new();
        let mut binding2 = load_classes(&mut heap2, 2);
        let summary2 = memory_manager::dump_archive(&options, &mut binding2, &second);

        assert_eq!(summary1.copied_objects, CLASSES.len() * 4);
        assert_eq!(summary1.region_used, summary2.region_used);
        let bytes1 = std::fs::read(first).unwrap();
        let bytes2 = std::fs::read(&second).unwrap();
        assert!(bytes1 == bytes2, "archives differ");
    })
}

#[test]
pub fn roots_are_read_back_in_name_order() {
    with_archive_file("sorted.jsa", |path| {
        let options = test_options(&DETERMINISM_TEST_REGION);
        let mut heap = MockHeap::new();
        let mut binding = load_classes(&mut heap, 3);
        memory_manager::dump_archive(&options, &mut binding, path);

        let mut loaded = MockBinding::empty(&["classes"]);
        let _archive = memory_manager::map_archive(&options, &mut loaded, path).unwrap();
        let names: Vec<Vec<u8>> = (0..loaded.roots[0].len())
            .map(|i| {
                let klass = loaded.roots[0].get(i);
                symbol_bytes(addr(field(klass, klass_field::NAME)))
            })
            .collect();
        let mut expected: Vec<Vec<u8>> = CLASSES.iter().map(|n| n.as_bytes().to_vec()).collect();
        expected.sort();
        assert_eq!(names, expected);
    })
}
