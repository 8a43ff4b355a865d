#[cfg(feature = "test_utils")]
mod dag_strategy;
/// Random value generator for sampling data.
#[cfg(feature = "test_utils")]
mod rvg;
#[cfg(feature = "test_utils")]
pub use dag_strategy::*;
#[cfg(feature = "test_utils")]
pub use rvg::*;

mod blockstore_utils;
pub use blockstore_utils::*;

#[cfg(test)]
mod local_utils;
#[cfg(test)]
pub(crate) use local_utils::*;
