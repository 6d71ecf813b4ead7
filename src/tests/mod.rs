// Mock tests dump and map archives of the mock object graph in `util::test_util::mock_graph`.
// Each test file builds its archives at its own test region, and every test runs serially.

pub(crate) mod mock_test_prelude;

mod mock_test_determinism;
mod mock_test_random_graph;
