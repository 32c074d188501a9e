//! Conversions between the generated `rpc::mayastor` wire types and the
//! domain types in `common`. Node identity is not carried over the wire
//! (the node is implicit in which channel the call went over), so every
//! `to_domain` conversion here takes the owning `NodeId` as a parameter.

use common::{
    Child, ChildState, ChildUri, Nexus, NexusId, NexusState, NodeId, Pool, PoolId, PoolState,
    Protocol, Replica, ReplicaId, ReplicaState,
};
use rpc::mayastor as wire;

pub(crate) fn pool_to_domain(node: &NodeId, pool: &wire::Pool) -> Pool {
    Pool {
        node: node.clone(),
        id: PoolId::from(pool.name.as_str()),
        disks: pool.disks.clone(),
        state: pool_state_to_domain(pool.state),
        capacity: pool.capacity,
        used: pool.used,
    }
}

fn pool_state_to_domain(state: i32) -> PoolState {
    match wire::PoolState::try_from(state).unwrap_or(wire::PoolState::PoolUnknown) {
        wire::PoolState::PoolOnline => PoolState::Online,
        wire::PoolState::PoolDegraded => PoolState::Degraded,
        wire::PoolState::PoolFaulted => PoolState::Faulted,
        wire::PoolState::PoolUnknown => PoolState::Offline,
    }
}

pub(crate) fn replica_to_domain(node: &NodeId, replica: &wire::Replica) -> Replica {
    Replica {
        node: node.clone(),
        uuid: ReplicaId::from(replica.uuid.as_str()),
        pool: PoolId::from(replica.pool.as_str()),
        thin: replica.thin,
        size: replica.size,
        share: protocol_to_domain(replica.share),
        uri: replica.uri.clone(),
        state: replica_state_to_domain(replica.state),
    }
}

fn replica_state_to_domain(state: i32) -> ReplicaState {
    match wire::ReplicaState::try_from(state).unwrap_or(wire::ReplicaState::ReplicaUnknown) {
        wire::ReplicaState::ReplicaOnline => ReplicaState::Online,
        wire::ReplicaState::ReplicaDegraded => ReplicaState::Degraded,
        wire::ReplicaState::ReplicaFaulted => ReplicaState::Faulted,
        wire::ReplicaState::ReplicaUnknown => ReplicaState::Offline,
    }
}

pub(crate) fn protocol_to_domain(share: i32) -> Protocol {
    match wire::ShareProtocol::try_from(share).unwrap_or(wire::ShareProtocol::None) {
        wire::ShareProtocol::None => Protocol::None,
        wire::ShareProtocol::Nvmf => Protocol::Nvmf,
        wire::ShareProtocol::Iscsi => Protocol::Iscsi,
        wire::ShareProtocol::Nbd => Protocol::None,
    }
}

pub(crate) fn protocol_to_wire(protocol: Protocol) -> i32 {
    let wire = match protocol {
        Protocol::None => wire::ShareProtocol::None,
        Protocol::Nvmf => wire::ShareProtocol::Nvmf,
        Protocol::Iscsi => wire::ShareProtocol::Iscsi,
    };
    wire as i32
}

pub(crate) fn nexus_to_domain(node: &NodeId, nexus: &wire::Nexus) -> Nexus {
    Nexus {
        node: node.clone(),
        uuid: NexusId::from(nexus.uuid.as_str()),
        size: nexus.size,
        state: nexus_state_to_domain(nexus.state),
        children: nexus.children.iter().map(child_to_domain).collect(),
        device_uri: None,
        rebuilds: nexus.rebuilds,
    }
}

fn nexus_state_to_domain(state: i32) -> NexusState {
    match wire::NexusState::try_from(state).unwrap_or(wire::NexusState::NexusUnknown) {
        wire::NexusState::NexusOnline => NexusState::Online,
        wire::NexusState::NexusDegraded => NexusState::Degraded,
        wire::NexusState::NexusFaulted => NexusState::Faulted,
        wire::NexusState::NexusUnknown => NexusState::Unknown,
    }
}

fn child_to_domain(child: &wire::Child) -> Child {
    Child {
        uri: ChildUri::from(child.uri.as_str()),
        state: child_state_to_domain(child.state),
        rebuild_progress: if child.rebuild_progress >= 0 {
            Some(child.rebuild_progress)
        } else {
            None
        },
    }
}

fn child_state_to_domain(state: i32) -> ChildState {
    match wire::ChildState::try_from(state).unwrap_or(wire::ChildState::ChildUnknown) {
        wire::ChildState::ChildOnline => ChildState::Online,
        wire::ChildState::ChildDegraded => ChildState::Degraded,
        wire::ChildState::ChildFaulted => ChildState::Faulted,
        wire::ChildState::ChildUnknown => ChildState::Unknown,
    }
}
