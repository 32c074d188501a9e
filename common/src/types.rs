//! Domain value objects: Node, Pool, Replica, Nexus, Volume, and the
//! state/enum vocabulary shared between the registry and the CSI façade.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

use crate::ids::{ChildUri, NexusId, NodeId, PoolId, ReplicaId, VolumeId};

/// Liveness of a Node's RPC session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum NodeState {
    Online,
    Offline,
}

/// Reported state of a Pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum PoolState {
    #[strum(serialize = "POOL_ONLINE")]
    Online,
    #[strum(serialize = "POOL_DEGRADED")]
    Degraded,
    #[strum(serialize = "POOL_FAULTED")]
    Faulted,
    #[strum(serialize = "POOL_OFFLINE")]
    Offline,
}

impl PoolState {
    /// A pool is a placement candidate only while accessible.
    pub fn accessible(&self) -> bool {
        matches!(self, PoolState::Online | PoolState::Degraded)
    }

    /// Rank used by `choosePools`'s first sort key: ONLINE beats DEGRADED.
    /// Inaccessible states never reach the comparator because the filter
    /// step excludes them first.
    pub fn placement_rank(&self) -> u8 {
        match self {
            PoolState::Online => 1,
            _ => 0,
        }
    }
}

/// Reported state of a Replica.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum ReplicaState {
    Online,
    Degraded,
    Faulted,
    Offline,
}

/// Reported state of a Nexus or one of its children.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum NexusState {
    Unknown,
    Online,
    Degraded,
    Faulted,
}

/// Reported state of a single Nexus child.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum ChildState {
    Unknown,
    Online,
    Degraded,
    Faulted,
}

/// Overall state of a Volume, derived from its replicas and nexus.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum VolumeState {
    Pending,
    Online,
    Degraded,
    Faulted,
}

/// The transport a replica is reachable over from a remote nexus.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, AsRefStr, EnumString)]
pub enum Protocol {
    #[strum(serialize = "REPLICA_NONE")]
    None,
    #[strum(serialize = "REPLICA_NVMF")]
    Nvmf,
    #[strum(serialize = "REPLICA_ISCSI")]
    Iscsi,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::None
    }
}

/// A storage node: identity plus connectivity state. Pools are held by
/// the owning `core::node::Node`, not duplicated here — this struct is
/// the value snapshot handed out by query methods.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: String,
    pub state: NodeState,
}

/// A disk aggregate on one node.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Pool {
    pub node: NodeId,
    pub id: PoolId,
    pub disks: Vec<String>,
    pub state: PoolState,
    pub capacity: u64,
    pub used: u64,
}

impl Pool {
    pub fn free_bytes(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    pub fn accessible(&self) -> bool {
        self.state.accessible()
    }

    /// Only the volatile fields participate in change detection; `disks`
    /// is identity and never triggers a `mod` event on its own.
    pub fn volatile_eq(&self, other: &Pool) -> bool {
        self.state == other.state && self.capacity == other.capacity && self.used == other.used
    }
}

/// A thinly-provisioned extent of pool space; one copy of a volume.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Replica {
    pub node: NodeId,
    pub uuid: ReplicaId,
    pub pool: PoolId,
    pub thin: bool,
    pub size: u64,
    pub share: Protocol,
    pub uri: String,
    pub state: ReplicaState,
}

impl Replica {
    pub fn volatile_eq(&self, other: &Replica) -> bool {
        self.share == other.share && self.uri == other.uri && self.state == other.state
    }
}

/// One child of a Nexus, as seen by the nexus (not the pool/replica).
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Child {
    pub uri: ChildUri,
    pub state: ChildState,
    pub rebuild_progress: Option<i32>,
}

/// The logical frontend of a volume: mirrors writes across replicas and
/// exposes a single block device.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Nexus {
    pub node: NodeId,
    pub uuid: NexusId,
    pub size: u64,
    pub state: NexusState,
    pub children: Vec<Child>,
    pub device_uri: Option<String>,
    pub rebuilds: u32,
}

impl Nexus {
    pub fn volatile_eq(&self, other: &Nexus) -> bool {
        self.state == other.state
            && self.children == other.children
            && self.device_uri == other.device_uri
            && self.rebuilds == other.rebuilds
    }

    pub fn child_uris(&self) -> Vec<ChildUri> {
        self.children.iter().map(|c| c.uri.clone()).collect()
    }
}

/// User-specified shape of a Volume, as requested through the CSI façade.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    pub uuid: VolumeId,
    pub replica_count: u8,
    pub required_nodes: Vec<NodeId>,
    pub preferred_nodes: Vec<NodeId>,
    pub required_bytes: u64,
    pub limit_bytes: Option<u64>,
}

/// Derived, observed state of a Volume.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Default)]
pub struct VolumeStatus {
    pub size: Option<u64>,
    pub nexus: Option<NexusId>,
    pub state: Option<VolumeState>,
    pub reason: String,
}

/// A full snapshot of a Volume: spec plus derived status, for query
/// responses (e.g. `ListVolumes`).
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    pub spec: VolumeSpec,
    pub status: VolumeStatus,
}
