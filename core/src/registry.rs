//! The Registry (C4): the set of known nodes, the read-only query surface
//! over their pools/replicas/nexuses, and the pool-selection algorithm
//! that underpins volume placement.

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{
    Event, Nexus, NexusId, Node as NodeInfo, NodeId, Pool, PoolId, Replica, ReplicaId, SvcError,
};
use tokio::sync::{broadcast, RwLock};

use crate::node::Node;

/// How many relayed events a lagging subscriber may miss before its
/// receiver reports `Lagged` and resynchronises from a fresh query.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// The in-memory catalog of all nodes, pools, replicas and nexuses.
///
/// Cheaply `Clone`-able: the node map and the event sender are both
/// reference-counted, so every clone observes the same live state.
#[derive(Clone)]
pub struct Registry {
    nodes: Arc<RwLock<HashMap<NodeId, Arc<Node>>>>,
    events: broadcast::Sender<Event>,
    sync_period: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Registry {
    /// Build a registry and start its background sync poller.
    pub fn new(sync_period: Duration, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Self {
            nodes: Default::default(),
            events,
            sync_period,
            connect_timeout,
            request_timeout,
        };
        registry.start();
        registry
    }

    fn start(&self) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.poller().await;
        });
    }

    /// Drive reconnects and periodic `sync()` of every known node,
    /// relaying the events each produces.
    async fn poller(&self) {
        loop {
            let nodes = self.nodes.read().await.clone();
            for node in nodes.values() {
                if node.reconnect_due().await {
                    match node.connect().await {
                        Ok(events) => self.relay(events),
                        Err(error) => {
                            tracing::warn!(node = %node.id(), %error, "reconnect attempt failed");
                        }
                    }
                    continue;
                }
                if node.is_online().await {
                    match node.sync().await {
                        Ok(events) => self.relay(events),
                        Err(error) => {
                            tracing::warn!(node = %node.id(), %error, "sync failed, marking offline");
                            self.relay(node.disconnect().await);
                        }
                    }
                }
            }
            tokio::time::sleep(self.sync_period).await;
        }
    }

    fn relay(&self, events: Vec<Event>) {
        for event in events {
            // No active subscriber is not an error; the channel just has
            // nothing to relay to yet.
            let _ = self.events.send(event);
        }
    }

    /// Subscribe to the relayed `node|pool|replica|nexus` event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Register a node by name, idempotently. If the endpoint changed,
    /// the old connection is torn down and a fresh one takes its place.
    pub async fn add_node(&self, id: NodeId, endpoint: String) -> Result<(), SvcError> {
        {
            let nodes = self.nodes.read().await;
            if let Some(existing) = nodes.get(&id) {
                if existing.endpoint() == endpoint {
                    return Ok(());
                }
            }
        }

        let mut nodes = self.nodes.write().await;
        if let Some(existing) = nodes.get(&id) {
            existing.disconnect().await;
        }
        let node = Arc::new(Node::new(
            id.clone(),
            endpoint,
            self.connect_timeout,
            self.request_timeout,
        ));
        nodes.insert(id, node.clone());
        drop(nodes);

        // Best-effort initial connect; the poller retries on failure.
        if let Ok(events) = node.connect().await {
            self.relay(events);
        }
        Ok(())
    }

    /// Deregister a node. Events subsequently produced by the old
    /// connection (if any in-flight call completes after this) are
    /// simply dropped: nothing holds a reference to relay them through.
    pub async fn remove_node(&self, id: &NodeId) {
        if let Some(node) = self.nodes.write().await.remove(id) {
            node.disconnect().await;
        }
    }

    /// Crate-internal accessor used by the volume reconciler to issue
    /// mutating calls against a specific node.
    pub(crate) async fn node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(id).cloned()
    }

    pub async fn get_node(&self, id: &NodeId) -> Option<NodeInfo> {
        let node = self.node(id).await?;
        Some(node.info().await)
    }

    pub async fn get_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read().await.clone();
        let mut result = Vec::with_capacity(nodes.len());
        for node in nodes.values() {
            result.push(node.info().await);
        }
        result
    }

    pub async fn get_pool(&self, id: &PoolId) -> Option<Pool> {
        let nodes = self.nodes.read().await.clone();
        for node in nodes.values() {
            if let Some(pool) = node.pool(id).await {
                return Some(pool);
            }
        }
        None
    }

    pub async fn get_pools(&self) -> Vec<Pool> {
        let nodes = self.nodes.read().await.clone();
        let mut result = Vec::new();
        for node in nodes.values() {
            result.extend(node.pools().await);
        }
        result
    }

    /// All replicas sharing a volume's uuid, across every node.
    pub async fn get_replica_set(&self, uuid: &ReplicaId) -> Vec<Replica> {
        let nodes = self.nodes.read().await.clone();
        let mut result = Vec::new();
        for node in nodes.values() {
            result.extend(node.replicas().await.into_iter().filter(|r| &r.uuid == uuid));
        }
        result
    }

    pub async fn get_replicas(&self) -> Vec<Replica> {
        let nodes = self.nodes.read().await.clone();
        let mut result = Vec::new();
        for node in nodes.values() {
            result.extend(node.replicas().await);
        }
        result
    }

    pub async fn get_nexus(&self, uuid: &NexusId) -> Option<Nexus> {
        let nodes = self.nodes.read().await.clone();
        for node in nodes.values() {
            if let Some(nexus) = node.nexus(uuid).await {
                return Some(nexus);
            }
        }
        None
    }

    pub async fn get_nexuses(&self) -> Vec<Nexus> {
        let nodes = self.nodes.read().await.clone();
        let mut result = Vec::new();
        for node in nodes.values() {
            result.extend(node.nexuses().await);
        }
        result
    }

    /// Sum of `freeBytes` over accessible pools, scoped to one node when
    /// given, otherwise over the whole fleet.
    pub async fn get_capacity(&self, node: Option<&NodeId>) -> u64 {
        let nodes = self.nodes.read().await.clone();
        let mut total = 0u64;
        for candidate in nodes.values() {
            if let Some(filter) = node {
                if candidate.id() != filter {
                    continue;
                }
            }
            for pool in candidate.pools().await {
                if pool.accessible() {
                    total += pool.free_bytes();
                }
            }
        }
        total
    }

    /// The placement algorithm (spec §4.4):
    ///
    /// 1. consider every pool across all nodes;
    /// 2. filter out inaccessible pools, pools without `required_bytes`
    ///    free, and (if `must_nodes` is non-empty) pools on other nodes;
    /// 3. sort descending by `(online-before-degraded, fewer-replicas,
    ///    more-free-bytes, should_nodes-membership)`;
    /// 4. keep at most one pool per node, greedily, in that order.
    pub async fn choose_pools(
        &self,
        required_bytes: u64,
        must_nodes: &[NodeId],
        should_nodes: &[NodeId],
    ) -> Vec<Pool> {
        let nodes = self.nodes.read().await.clone();
        let mut candidates: Vec<(Pool, usize)> = Vec::new();
        for node in nodes.values() {
            if !must_nodes.is_empty() && !must_nodes.contains(node.id()) {
                continue;
            }
            for pool in node.pools().await {
                if !pool.accessible() || pool.free_bytes() < required_bytes {
                    continue;
                }
                let replica_count = node.replicas_of(&pool.id).await.len();
                candidates.push((pool, replica_count));
            }
        }

        candidates.sort_by(|(a_pool, a_count), (b_pool, b_count)| {
            b_pool
                .state
                .placement_rank()
                .cmp(&a_pool.state.placement_rank())
                .then_with(|| a_count.cmp(b_count))
                .then_with(|| b_pool.free_bytes().cmp(&a_pool.free_bytes()))
                .then_with(|| {
                    let a_should = should_nodes.contains(&a_pool.node);
                    let b_should = should_nodes.contains(&b_pool.node);
                    b_should.cmp(&a_should)
                })
        });

        let mut seen_nodes = std::collections::HashSet::new();
        candidates
            .into_iter()
            .filter(|(pool, _)| seen_nodes.insert(pool.node.clone()))
            .map(|(pool, _)| pool)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use common::{Pool, PoolState};

    use super::*;
    use crate::node::NodeFixture;

    #[tokio::test]
    async fn placement_prefers_online_over_free_space() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        for (node_id, pool_id, state, used) in [
            ("n1", "p1", PoolState::Degraded, 10u64),
            ("n2", "p2", PoolState::Online, 25u64),
            ("n3", "p3", PoolState::Offline, 0u64),
        ] {
            let id = NodeId::from(node_id);
            let node = Arc::new(Node::new(
                id.clone(),
                "x".to_string(),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ));
            node.set_online(true).await;
            node.seed_pool(
                Pool {
                    node: id.clone(),
                    id: PoolId::from(pool_id),
                    disks: vec![],
                    state,
                    capacity: 100,
                    used,
                },
                vec![],
            )
            .await;
            registry.nodes.write().await.insert(id, node);
        }

        let chosen = registry.choose_pools(75, &[], &[]).await;
        let ids: Vec<&str> = chosen.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn required_node_filter_with_no_candidates() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        for (node_id, pool_id, state, used) in [
            ("n1", "p1", PoolState::Faulted, 0u64),
            ("n2", "p2", PoolState::Online, 26u64),
            ("n3", "p3", PoolState::Online, 10u64),
        ] {
            let id = NodeId::from(node_id);
            let node = Arc::new(Node::new(
                id.clone(),
                "x".to_string(),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ));
            node.seed_pool(
                Pool {
                    node: id.clone(),
                    id: PoolId::from(pool_id),
                    disks: vec![],
                    state,
                    capacity: 100,
                    used,
                },
                vec![],
            )
            .await;
            registry.nodes.write().await.insert(id, node);
        }

        let must = vec![NodeId::from("n1"), NodeId::from("n2")];
        let chosen = registry.choose_pools(75, &must, &[]).await;
        assert!(chosen.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_pool_per_node() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let id = NodeId::from("n1");
        let node = Arc::new(Node::new(
            id.clone(),
            "x".to_string(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        for (pool_id, used) in [("p1", 11u64), ("p2", 10u64)] {
            node.seed_pool(
                Pool {
                    node: id.clone(),
                    id: PoolId::from(pool_id),
                    disks: vec![],
                    state: PoolState::Online,
                    capacity: 100,
                    used,
                },
                vec![],
            )
            .await;
        }
        registry.nodes.write().await.insert(id, node);

        let chosen = registry.choose_pools(75, &[], &[]).await;
        assert_eq!(chosen.len(), 1);
    }

    #[tokio::test]
    async fn capacity_aggregation() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let pools = [
            ("n1", "p1", PoolState::Online, 10u64),
            ("n2", "p2", PoolState::Degraded, 25u64),
            ("n3", "p3", PoolState::Faulted, 55u64),
            ("n4", "p4", PoolState::Offline, 99u64),
        ];
        for (node_id, pool_id, state, used) in pools {
            let id = NodeId::from(node_id);
            let node = Arc::new(Node::new(
                id.clone(),
                "x".to_string(),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ));
            node.seed_pool(
                Pool {
                    node: id.clone(),
                    id: PoolId::from(pool_id),
                    disks: vec![],
                    state,
                    capacity: 100,
                    used,
                },
                vec![],
            )
            .await;
            registry.nodes.write().await.insert(id, node);
        }

        assert_eq!(registry.get_capacity(None).await, 165);
        assert_eq!(registry.get_capacity(Some(&NodeId::from("n2"))).await, 75);
    }
}
