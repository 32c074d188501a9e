//! Shared domain types, identifiers, the cross-component event model,
//! and the error taxonomy used by `core` and `csi-controller`.

pub mod errors;
pub mod event;
pub mod ids;
pub mod types;

pub use errors::{NotEnough, SvcError};
pub use event::{Event, EventOp};
pub use ids::{ChildUri, NexusId, NodeId, PoolId, ReplicaId, VolumeId};
pub use types::{
    Child, ChildState, Nexus, NexusState, Node, NodeState, Pool, PoolState, Protocol, Replica,
    ReplicaState, Volume, VolumeSpec, VolumeState, VolumeStatus,
};
