//! The registry plus volume reconciler: the live model of every pool,
//! replica and nexus known across the node fleet, and the algorithm that
//! composes them into volumes.

pub mod grpc;
pub mod node;
pub mod registry;
pub mod translate;
pub mod volume;

pub use node::{Node, NodeFixture};
pub use registry::Registry;
pub use volume::{Volume, VolumeManager};
