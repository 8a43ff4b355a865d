use proptest::{
    strategy::Strategy,
    test_runner::{RngAlgorithm, TestRng, TestRunner},
};

/// A thin wrapper around a `proptest` `TestRunner`, for pulling a single
/// concrete sample out of a `Strategy` outside of a `#[proptest]`-generated
/// test function (e.g. to build one random DAG per `#[test_log::test]` case).
#[derive(Debug)]
pub struct Rvg {
    runner: TestRunner,
}

impl Rvg {
    /// Create a new sampler seeded from the OS RNG.
    pub fn new() -> Self {
        let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &rand::random::<[u8; 32]>());
        Self {
            runner: TestRunner::new_with_rng(Default::default(), rng),
        }
    }

    /// Draw a single value out of `strategy`.
    pub fn sample<S: Strategy>(&mut self, strategy: &S) -> S::Value {
        strategy
            .new_tree(&mut self.runner)
            .expect("failed to generate a value from strategy")
            .current()
    }
}

impl Default for Rvg {
    fn default() -> Self {
        Self::new()
    }
}
