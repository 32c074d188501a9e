//! The Node object (C3): owns one node's gRPC session plus the pools,
//! replicas and nexuses discovered on it, runs periodic `sync()`, and
//! emits the tagged events the rest of the system reacts to.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use common::{
    errors::GrpcRequest, Child, ChildUri, Event, EventOp, Nexus, NexusId, Node as NodeInfo,
    NodeId, NodeState, Pool, PoolId, Protocol, Replica, ReplicaId, SvcError,
};
use rpc::mayastor as wire;
use snafu::ResultExt;
use tokio::sync::RwLock;

use crate::{
    grpc::GrpcContext,
    translate::{nexus_to_domain, pool_to_domain, protocol_to_wire, replica_to_domain},
};

/// Reconnect backoff schedule: doubling from 1s up to a 30s ceiling.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

struct PoolEntry {
    pool: Pool,
    replicas: HashMap<ReplicaId, Replica>,
}

struct Inner {
    state: NodeState,
    conn_state: ConnState,
    pools: HashMap<PoolId, PoolEntry>,
    nexuses: HashMap<NexusId, Nexus>,
    backoff: Duration,
    next_attempt: Instant,
}

/// One storage node: identity, connection state machine, and the pools/
/// replicas/nexuses last observed on it.
pub struct Node {
    id: NodeId,
    endpoint: String,
    grpc_lock: Arc<tokio::sync::Mutex<()>>,
    connect_timeout: Duration,
    request_timeout: Duration,
    inner: RwLock<Inner>,
}

impl Node {
    pub fn new(id: NodeId, endpoint: String, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            id,
            endpoint,
            grpc_lock: Arc::new(tokio::sync::Mutex::new(())),
            connect_timeout,
            request_timeout,
            inner: RwLock::new(Inner {
                state: NodeState::Offline,
                conn_state: ConnState::Disconnected,
                pools: HashMap::new(),
                nexuses: HashMap::new(),
                backoff: BACKOFF_BASE,
                next_attempt: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn is_online(&self) -> bool {
        self.inner.read().await.state == NodeState::Online
    }

    pub async fn info(&self) -> NodeInfo {
        let inner = self.inner.read().await;
        NodeInfo {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            state: inner.state,
        }
    }

    fn grpc_context(&self) -> Result<GrpcContext, SvcError> {
        GrpcContext::new(
            self.grpc_lock.clone(),
            &self.id,
            &self.endpoint,
            self.connect_timeout,
            self.request_timeout,
        )
    }

    /// Whether a reconnect attempt is due, per the backoff schedule.
    pub(crate) async fn reconnect_due(&self) -> bool {
        let inner = self.inner.read().await;
        inner.conn_state == ConnState::Disconnected && Instant::now() >= inner.next_attempt
    }

    /// Drive `disconnected -> connecting -> connected`, running an
    /// initial `sync()` on success. On failure the backoff is doubled
    /// (capped) and the next attempt time is pushed out. A `node` event
    /// is emitted whenever this call actually flips the node from
    /// offline to online.
    pub async fn connect(&self) -> Result<Vec<Event>, SvcError> {
        {
            let mut inner = self.inner.write().await;
            inner.conn_state = ConnState::Connecting;
        }

        match self.grpc_context()?.connect().await {
            Ok(_) => {
                let was_online = self.inner.read().await.state == NodeState::Online;
                {
                    let mut inner = self.inner.write().await;
                    inner.conn_state = ConnState::Connected;
                    inner.state = NodeState::Online;
                    inner.backoff = BACKOFF_BASE;
                }
                let mut events = self.sync().await?;
                if !was_online {
                    events.insert(
                        0,
                        Event::Node {
                            op: EventOp::Mod,
                            object: self.info().await,
                        },
                    );
                }
                Ok(events)
            }
            Err(err) => {
                self.note_disconnect().await;
                Err(err)
            }
        }
    }

    /// Transition to `disconnected`, schedule the next reconnect attempt,
    /// and return a `node` event iff this call flips the node from
    /// online to offline (an explicit disconnect of an already-offline
    /// node is a no-op, not a transition).
    pub async fn disconnect(&self) -> Vec<Event> {
        self.note_disconnect().await
    }

    async fn note_disconnect(&self) -> Vec<Event> {
        let was_online = {
            let mut inner = self.inner.write().await;
            let was_online = inner.state == NodeState::Online;
            inner.conn_state = ConnState::Disconnected;
            inner.state = NodeState::Offline;
            inner.next_attempt = Instant::now() + inner.backoff;
            inner.backoff = std::cmp::min(inner.backoff * 2, BACKOFF_CAP);
            was_online
        };
        if was_online {
            vec![Event::Node {
                op: EventOp::Mod,
                object: self.info().await,
            }]
        } else {
            Vec::new()
        }
    }

    /// Fetch pools/replicas/nexuses and compute a three-way diff against
    /// the cache, applying it and returning one `Event` per change.
    /// `mod` events fire only when a volatile attribute differs; identity
    /// fields (e.g. a pool's `disks`) never trigger one.
    pub async fn sync(&self) -> Result<Vec<Event>, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;

        let rpc_pools = ctx
            .client
            .list_pools(wire::ListPoolsRequest {})
            .await
            .context(GrpcRequest {
                resource: "pool".to_string(),
                request: "list_pools".to_string(),
            })?
            .into_inner()
            .pools;
        let rpc_replicas = ctx
            .client
            .list_replicas(wire::ListReplicasRequest {})
            .await
            .context(GrpcRequest {
                resource: "replica".to_string(),
                request: "list_replicas".to_string(),
            })?
            .into_inner()
            .replicas;
        let rpc_nexus = ctx
            .client
            .list_nexus(wire::ListNexusRequest {})
            .await
            .context(GrpcRequest {
                resource: "nexus".to_string(),
                request: "list_nexus".to_string(),
            })?
            .into_inner()
            .nexus_list;
        drop(ctx);

        let pools: Vec<Pool> = rpc_pools.iter().map(|p| pool_to_domain(&self.id, p)).collect();
        let replicas: Vec<Replica> = rpc_replicas
            .iter()
            .map(|r| replica_to_domain(&self.id, r))
            .collect();
        let nexuses: Vec<Nexus> = rpc_nexus.iter().map(|n| nexus_to_domain(&self.id, n)).collect();

        let mut events = Vec::new();
        let mut inner = self.inner.write().await;

        diff_pools(&mut inner.pools, &pools, &replicas, &mut events);
        diff_nexuses(&mut inner.nexuses, &nexuses, &mut events);

        Ok(events)
    }

    // ---- mutators -------------------------------------------------

    pub async fn create_pool(&self, id: &PoolId, disks: Vec<String>) -> Result<Pool, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let reply = ctx
            .client
            .create_pool(wire::CreatePoolRequest {
                name: id.as_str().to_string(),
                disks,
            })
            .await
            .context(GrpcRequest {
                resource: "pool".to_string(),
                request: "create_pool".to_string(),
            })?
            .into_inner();
        let pool = pool_to_domain(&self.id, &reply);
        let mut inner = self.inner.write().await;
        inner.pools.insert(
            pool.id.clone(),
            PoolEntry {
                pool: pool.clone(),
                replicas: HashMap::new(),
            },
        );
        Ok(pool)
    }

    /// Destroy a pool. `NOT_FOUND` is swallowed: destroy is idempotent.
    pub async fn destroy_pool(&self, id: &PoolId) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .destroy_pool(wire::DestroyPoolRequest {
                name: id.as_str().to_string(),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "pool".to_string(),
                    request: "destroy_pool".to_string(),
                    source: status,
                })
            }
        }
        self.inner.write().await.pools.remove(id);
        Ok(())
    }

    pub async fn create_replica(
        &self,
        uuid: &ReplicaId,
        pool: &PoolId,
        size: u64,
    ) -> Result<Replica, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .create_replica(wire::CreateReplicaRequest {
                uuid: uuid.as_str().to_string(),
                pool: pool.as_str().to_string(),
                thin: false,
                size,
                share: wire::ShareProtocol::None as i32,
            })
            .await;
        let reply = match result {
            Ok(reply) => reply.into_inner(),
            // Adopt the existing replica only once ListReplicas confirms
            // it is actually present under this uuid/pool.
            Err(status) if status.code() == tonic::Code::AlreadyExists => {
                let existing = ctx
                    .client
                    .list_replicas(wire::ListReplicasRequest {})
                    .await
                    .context(GrpcRequest {
                        resource: "replica".to_string(),
                        request: "list_replicas".to_string(),
                    })?
                    .into_inner()
                    .replicas;
                existing
                    .into_iter()
                    .find(|r| r.uuid == uuid.as_str() && r.pool == pool.as_str())
                    .ok_or_else(|| SvcError::AlreadyExists {
                        resource: format!("replica '{}'", uuid),
                    })?
            }
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "replica".to_string(),
                    request: "create_replica".to_string(),
                    source: status,
                })
            }
        };
        let replica = replica_to_domain(&self.id, &reply);
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.pools.get_mut(pool) {
            entry.replicas.insert(replica.uuid.clone(), replica.clone());
        }
        Ok(replica)
    }

    pub async fn destroy_replica(&self, pool: &PoolId, uuid: &ReplicaId) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .destroy_replica(wire::DestroyReplicaRequest {
                uuid: uuid.as_str().to_string(),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "replica".to_string(),
                    request: "destroy_replica".to_string(),
                    source: status,
                })
            }
        }
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.pools.get_mut(pool) {
            entry.replicas.remove(uuid);
        }
        Ok(())
    }

    pub async fn share_replica(
        &self,
        pool: &PoolId,
        uuid: &ReplicaId,
        protocol: Protocol,
    ) -> Result<String, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let uri = ctx
            .client
            .share_replica(wire::ShareReplicaRequest {
                uuid: uuid.as_str().to_string(),
                share: protocol_to_wire(protocol),
            })
            .await
            .context(GrpcRequest {
                resource: "replica".to_string(),
                request: "share_replica".to_string(),
            })?
            .into_inner()
            .uri;
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.pools.get_mut(pool) {
            if let Some(replica) = entry.replicas.get_mut(uuid) {
                replica.share = protocol;
                replica.uri = uri.clone();
            }
        }
        Ok(uri)
    }

    pub async fn unshare_replica(&self, pool: &PoolId, uuid: &ReplicaId) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .unshare_replica(wire::ShareReplicaRequest {
                uuid: uuid.as_str().to_string(),
                share: protocol_to_wire(Protocol::None),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "replica".to_string(),
                    request: "unshare_replica".to_string(),
                    source: status,
                })
            }
        }
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.pools.get_mut(pool) {
            if let Some(replica) = entry.replicas.get_mut(uuid) {
                replica.share = Protocol::None;
                replica.uri.clear();
            }
        }
        Ok(())
    }

    pub async fn create_nexus(
        &self,
        uuid: &NexusId,
        size: u64,
        children: Vec<ChildUri>,
    ) -> Result<Nexus, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let reply = ctx
            .client
            .create_nexus(wire::CreateNexusRequest {
                uuid: uuid.as_str().to_string(),
                size,
                children: children.into_iter().map(String::from).collect(),
            })
            .await
            .context(GrpcRequest {
                resource: "nexus".to_string(),
                request: "create_nexus".to_string(),
            })?
            .into_inner();
        let nexus = nexus_to_domain(&self.id, &reply);
        self.inner.write().await.nexuses.insert(nexus.uuid.clone(), nexus.clone());
        Ok(nexus)
    }

    pub async fn destroy_nexus(&self, uuid: &NexusId) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .destroy_nexus(wire::DestroyNexusRequest {
                uuid: uuid.as_str().to_string(),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "nexus".to_string(),
                    request: "destroy_nexus".to_string(),
                    source: status,
                })
            }
        }
        self.inner.write().await.nexuses.remove(uuid);
        Ok(())
    }

    pub async fn add_child(&self, nexus: &NexusId, uri: &ChildUri) -> Result<Child, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let reply = ctx
            .client
            .add_child_nexus(wire::AddChildNexusRequest {
                uuid: nexus.as_str().to_string(),
                uri: uri.to_string(),
                norebuild: false,
            })
            .await
            .context(GrpcRequest {
                resource: "child".to_string(),
                request: "add_child_nexus".to_string(),
            })?
            .into_inner();
        let child = Child {
            uri: ChildUri::from(reply.uri.as_str()),
            state: common::ChildState::Unknown,
            rebuild_progress: None,
        };
        let mut inner = self.inner.write().await;
        if let Some(n) = inner.nexuses.get_mut(nexus) {
            n.children.push(child.clone());
        }
        Ok(child)
    }

    pub async fn remove_child(&self, nexus: &NexusId, uri: &ChildUri) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .remove_child_nexus(wire::RemoveChildNexusRequest {
                uuid: nexus.as_str().to_string(),
                uri: uri.to_string(),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "child".to_string(),
                    request: "remove_child_nexus".to_string(),
                    source: status,
                })
            }
        }
        let mut inner = self.inner.write().await;
        if let Some(n) = inner.nexuses.get_mut(nexus) {
            n.children.retain(|c| &c.uri != uri);
        }
        Ok(())
    }

    pub async fn publish_nexus(&self, uuid: &NexusId, protocol: Protocol) -> Result<String, SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .publish_nexus(wire::PublishNexusRequest {
                uuid: uuid.as_str().to_string(),
                key: String::new(),
                share: protocol_to_wire(protocol),
            })
            .await;
        let device_uri = match result {
            Ok(reply) => reply.into_inner().device_uri,
            Err(status) if status.code() == tonic::Code::AlreadyExists => {
                let inner = self.inner.read().await;
                inner
                    .nexuses
                    .get(uuid)
                    .and_then(|n| n.device_uri.clone())
                    .unwrap_or_default()
            }
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "nexus".to_string(),
                    request: "publish_nexus".to_string(),
                    source: status,
                })
            }
        };
        let mut inner = self.inner.write().await;
        if let Some(n) = inner.nexuses.get_mut(uuid) {
            n.device_uri = Some(device_uri.clone());
        }
        Ok(device_uri)
    }

    pub async fn unpublish_nexus(&self, uuid: &NexusId) -> Result<(), SvcError> {
        let mut ctx = self.grpc_context()?.connect_locked().await?;
        let result = ctx
            .client
            .unpublish_nexus(wire::UnpublishNexusRequest {
                uuid: uuid.as_str().to_string(),
            })
            .await;
        match result {
            Ok(_) => {}
            Err(status) if status.code() == tonic::Code::NotFound => {}
            Err(status) => {
                return Err(SvcError::GrpcRequest {
                    resource: "nexus".to_string(),
                    request: "unpublish_nexus".to_string(),
                    source: status,
                })
            }
        }
        let mut inner = self.inner.write().await;
        if let Some(n) = inner.nexuses.get_mut(uuid) {
            n.device_uri = None;
        }
        Ok(())
    }

    // ---- query surface used by the Registry ------------------------

    pub async fn pools(&self) -> Vec<Pool> {
        self.inner.read().await.pools.values().map(|e| e.pool.clone()).collect()
    }

    pub async fn pool(&self, id: &PoolId) -> Option<Pool> {
        self.inner.read().await.pools.get(id).map(|e| e.pool.clone())
    }

    pub async fn replicas_of(&self, pool: &PoolId) -> Vec<Replica> {
        self.inner
            .read()
            .await
            .pools
            .get(pool)
            .map(|e| e.replicas.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn replicas(&self) -> Vec<Replica> {
        self.inner
            .read()
            .await
            .pools
            .values()
            .flat_map(|e| e.replicas.values().cloned())
            .collect()
    }

    pub async fn nexus(&self, uuid: &NexusId) -> Option<Nexus> {
        self.inner.read().await.nexuses.get(uuid).cloned()
    }

    pub async fn nexuses(&self) -> Vec<Nexus> {
        self.inner.read().await.nexuses.values().cloned().collect()
    }
}

fn diff_pools(
    cache: &mut HashMap<PoolId, PoolEntry>,
    pools: &[Pool],
    replicas: &[Replica],
    events: &mut Vec<Event>,
) {
    let seen: std::collections::HashSet<&PoolId> = pools.iter().map(|p| &p.id).collect();

    // new / mod
    for pool in pools {
        let pool_replicas: HashMap<ReplicaId, Replica> = replicas
            .iter()
            .filter(|r| r.pool == pool.id)
            .map(|r| (r.uuid.clone(), r.clone()))
            .collect();

        match cache.get_mut(&pool.id) {
            None => {
                events.push(Event::Pool {
                    op: EventOp::New,
                    object: pool.clone(),
                });
                for replica in pool_replicas.values() {
                    events.push(Event::Replica {
                        op: EventOp::New,
                        object: replica.clone(),
                    });
                }
                cache.insert(
                    pool.id.clone(),
                    PoolEntry {
                        pool: pool.clone(),
                        replicas: pool_replicas,
                    },
                );
            }
            Some(entry) => {
                if !entry.pool.volatile_eq(pool) {
                    events.push(Event::Pool {
                        op: EventOp::Mod,
                        object: pool.clone(),
                    });
                }
                entry.pool = pool.clone();
                diff_replicas(&mut entry.replicas, pool_replicas, events);
            }
        }
    }

    // del: any cached pool not seen this pass
    let gone: Vec<PoolId> = cache
        .keys()
        .filter(|id| !seen.contains(id))
        .cloned()
        .collect();
    for id in gone {
        if let Some(entry) = cache.remove(&id) {
            for replica in entry.replicas.into_values() {
                events.push(Event::Replica {
                    op: EventOp::Del,
                    object: replica,
                });
            }
            events.push(Event::Pool {
                op: EventOp::Del,
                object: entry.pool,
            });
        }
    }
}

fn diff_replicas(
    cache: &mut HashMap<ReplicaId, Replica>,
    fresh: HashMap<ReplicaId, Replica>,
    events: &mut Vec<Event>,
) {
    for (uuid, replica) in &fresh {
        match cache.get(uuid) {
            None => events.push(Event::Replica {
                op: EventOp::New,
                object: replica.clone(),
            }),
            Some(existing) if !existing.volatile_eq(replica) => events.push(Event::Replica {
                op: EventOp::Mod,
                object: replica.clone(),
            }),
            Some(_) => {}
        }
    }
    let gone: Vec<ReplicaId> = cache.keys().filter(|id| !fresh.contains_key(*id)).cloned().collect();
    for id in gone {
        if let Some(replica) = cache.remove(&id) {
            events.push(Event::Replica {
                op: EventOp::Del,
                object: replica,
            });
        }
    }
    *cache = fresh;
}

fn diff_nexuses(cache: &mut HashMap<NexusId, Nexus>, fresh: &[Nexus], events: &mut Vec<Event>) {
    let seen: std::collections::HashSet<&NexusId> = fresh.iter().map(|n| &n.uuid).collect();

    for nexus in fresh {
        match cache.get(&nexus.uuid) {
            None => {
                events.push(Event::Nexus {
                    op: EventOp::New,
                    object: nexus.clone(),
                });
                cache.insert(nexus.uuid.clone(), nexus.clone());
            }
            Some(existing) => {
                // Preserve a previously observed device_uri: a plain
                // ListNexus does not resurface it, only publish/unpublish do.
                let mut merged = nexus.clone();
                if merged.device_uri.is_none() {
                    merged.device_uri = existing.device_uri.clone();
                }
                if !existing.volatile_eq(&merged) {
                    events.push(Event::Nexus {
                        op: EventOp::Mod,
                        object: merged.clone(),
                    });
                }
                cache.insert(nexus.uuid.clone(), merged);
            }
        }
    }

    let gone: Vec<NexusId> = cache.keys().filter(|id| !seen.contains(id)).cloned().collect();
    for id in gone {
        if let Some(nexus) = cache.remove(&id) {
            events.push(Event::Nexus {
                op: EventOp::Del,
                object: nexus,
            });
        }
    }
}

/// Test/fake seam: lets `core`'s own unit tests and `csi-controller`'s
/// integration tests populate a `Node`'s cache without a live gRPC peer.
#[async_trait]
pub trait NodeFixture {
    async fn seed_pool(&self, pool: Pool, replicas: Vec<Replica>);
    async fn seed_nexus(&self, nexus: Nexus);
    async fn set_online(&self, online: bool);
}

#[async_trait]
impl NodeFixture for Node {
    async fn seed_pool(&self, pool: Pool, replicas: Vec<Replica>) {
        let mut inner = self.inner.write().await;
        inner.pools.insert(
            pool.id.clone(),
            PoolEntry {
                pool,
                replicas: replicas.into_iter().map(|r| (r.uuid.clone(), r)).collect(),
            },
        );
    }

    async fn seed_nexus(&self, nexus: Nexus) {
        self.inner.write().await.nexuses.insert(nexus.uuid.clone(), nexus);
    }

    async fn set_online(&self, online: bool) {
        let mut inner = self.inner.write().await;
        inner.state = if online { NodeState::Online } else { NodeState::Offline };
        inner.conn_state = if online {
            ConnState::Connected
        } else {
            ConnState::Disconnected
        };
    }
}

#[cfg(test)]
mod tests {
    use common::PoolState;

    use super::*;

    fn pool(disks: Vec<&str>, state: PoolState, used: u64) -> Pool {
        Pool {
            node: NodeId::from("n1"),
            id: PoolId::from("p1"),
            disks: disks.into_iter().map(String::from).collect(),
            state,
            capacity: 100,
            used,
        }
    }

    fn replica(share: Protocol, uri: &str, state: ReplicaState) -> Replica {
        Replica {
            node: NodeId::from("n1"),
            uuid: ReplicaId::from("r1"),
            pool: PoolId::from("p1"),
            thin: true,
            size: 64,
            share,
            uri: uri.to_string(),
            state,
        }
    }

    #[test]
    fn first_sight_of_a_pool_emits_new_not_mod() {
        let mut cache = HashMap::new();
        let mut events = Vec::new();
        diff_pools(&mut cache, &[pool(vec!["/dev/sda"], PoolState::Online, 10)], &[], &mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Pool { op: EventOp::New, .. }));
    }

    #[test]
    fn pool_mod_fires_only_on_volatile_field_change() {
        let mut cache = HashMap::new();
        let mut events = Vec::new();
        diff_pools(&mut cache, &[pool(vec!["/dev/sda"], PoolState::Online, 10)], &[], &mut events);

        // changing `disks` alone is not volatile: no second event.
        let mut events = Vec::new();
        diff_pools(&mut cache, &[pool(vec!["/dev/sda", "/dev/sdb"], PoolState::Online, 10)], &[], &mut events);
        assert!(events.is_empty(), "disk-only change must not emit a mod event");

        // changing `used` is volatile: a mod event fires.
        let mut events = Vec::new();
        diff_pools(&mut cache, &[pool(vec!["/dev/sda", "/dev/sdb"], PoolState::Online, 20)], &[], &mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Pool { op: EventOp::Mod, .. }));

        // changing `state` is volatile too.
        let mut events = Vec::new();
        diff_pools(&mut cache, &[pool(vec!["/dev/sda", "/dev/sdb"], PoolState::Degraded, 20)], &[], &mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Pool { op: EventOp::Mod, .. }));
    }

    #[test]
    fn pool_gone_from_a_sync_emits_del_for_pool_and_its_replicas() {
        let mut cache = HashMap::new();
        let mut events = Vec::new();
        let r = replica(Protocol::None, "bdev:///r1", ReplicaState::Online);
        diff_pools(&mut cache, &[pool(vec!["/dev/sda"], PoolState::Online, 10)], &[r], &mut events);

        let mut events = Vec::new();
        diff_pools(&mut cache, &[], &[], &mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(e, Event::Replica { op: EventOp::Del, .. })));
        assert!(events.iter().any(|e| matches!(e, Event::Pool { op: EventOp::Del, .. })));
    }

    #[test]
    fn replica_mod_fires_on_share_uri_or_state_change_only() {
        let mut cache = HashMap::new();
        let mut events = Vec::new();
        let r = replica(Protocol::None, "bdev:///r1", ReplicaState::Online);
        diff_pools(&mut cache, &[pool(vec!["/dev/sda"], PoolState::Online, 10)], &[r], &mut events);

        let mut events = Vec::new();
        let shared = replica(Protocol::Nvmf, "nvmf://1.2.3.4/r1", ReplicaState::Online);
        diff_pools(&mut cache, &[pool(vec!["/dev/sda"], PoolState::Online, 10)], &[shared], &mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Replica { op: EventOp::Mod, .. }));
    }
}
