//! The Volume object and its manager (C5): groups replicas plus a nexus
//! under a volume uuid and runs the idempotent `ensure()` reconciler that
//! is the single place driving convergence between a `VolumeSpec` and the
//! live registry state.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use common::{
    errors::NotEnough, ChildUri, Nexus, NexusId, NexusState, NodeId, Pool, Protocol, Replica,
    ReplicaId, ReplicaState, SvcError, Volume as VolumeInfo, VolumeId, VolumeSpec, VolumeState,
    VolumeStatus,
};
use tokio::sync::{Mutex, RwLock};

use crate::registry::Registry;

/// A replica plus the tie-break score the ranking pass assigns it:
/// required-node +10, online +5, preferred-node +2, co-located-with-nexus
/// +1.
struct Ranked {
    replica: Replica,
    score: i32,
}

fn score_replica(replica: &Replica, spec: &VolumeSpec, nexus_node: Option<&NodeId>) -> i32 {
    let mut score = 0;
    if spec.required_nodes.contains(&replica.node) {
        score += 10;
    }
    if replica.state == ReplicaState::Online {
        score += 5;
    }
    if spec.preferred_nodes.contains(&replica.node) {
        score += 2;
    }
    if nexus_node == Some(&replica.node) {
        score += 1;
    }
    score
}

fn derive_state(spec: &VolumeSpec, replicas: &[Replica], nexus: Option<&Nexus>) -> VolumeState {
    match nexus {
        None => VolumeState::Pending,
        Some(nexus) if nexus.state == NexusState::Faulted => VolumeState::Faulted,
        Some(_) if replicas.len() >= spec.replica_count as usize => VolumeState::Online,
        Some(_) => VolumeState::Degraded,
    }
}

fn derive_reason(spec: &VolumeSpec, replicas: &[Replica], nexus: Option<&Nexus>) -> String {
    match nexus {
        None => "no nexus".to_string(),
        Some(_) if replicas.len() >= spec.replica_count as usize => String::new(),
        Some(_) => format!(
            "{} of {} replicas present",
            replicas.len(),
            spec.replica_count
        ),
    }
}

/// A Volume: the user's spec plus the observed status derived from the
/// registry, and the `ensure()` reconciler that closes the gap between
/// them.
pub struct Volume {
    registry: Registry,
    spec: RwLock<VolumeSpec>,
    status: RwLock<VolumeStatus>,
}

impl Volume {
    fn new(registry: Registry, spec: VolumeSpec) -> Self {
        Self {
            registry,
            spec: RwLock::new(spec),
            status: RwLock::new(VolumeStatus::default()),
        }
    }

    pub async fn spec(&self) -> VolumeSpec {
        self.spec.read().await.clone()
    }

    pub async fn status(&self) -> VolumeStatus {
        self.status.read().await.clone()
    }

    pub async fn to_info(&self) -> VolumeInfo {
        VolumeInfo {
            spec: self.spec.read().await.clone(),
            status: self.status.read().await.clone(),
        }
    }

    fn replica_id(spec: &VolumeSpec) -> ReplicaId {
        ReplicaId::from(spec.uuid.as_str())
    }

    fn nexus_id(spec: &VolumeSpec) -> NexusId {
        NexusId::from(spec.uuid.as_str())
    }

    async fn current_replicas(&self) -> Vec<Replica> {
        let spec = self.spec.read().await;
        self.registry.get_replica_set(&Self::replica_id(&spec)).await
    }

    async fn current_nexus(&self) -> Option<Nexus> {
        let spec = self.spec.read().await;
        self.registry.get_nexus(&Self::nexus_id(&spec)).await
    }

    /// Recompute `status.state`/`reason`/`nexus` from the live registry.
    /// Invoked by the manager's event handler on every relayed replica or
    /// nexus event that concerns this volume; never calls `ensure()`.
    async fn refresh_status(&self) {
        let spec = self.spec.read().await.clone();
        let replicas = self.current_replicas().await;
        let nexus = self.current_nexus().await;
        let mut status = self.status.write().await;
        status.nexus = nexus.as_ref().map(|n| n.uuid.clone());
        status.state = Some(derive_state(&spec, &replicas, nexus.as_ref()));
        status.reason = derive_reason(&spec, &replicas, nexus.as_ref());
    }

    async fn create_replica_on(
        &self,
        pool: &Pool,
        uuid: &ReplicaId,
        size: u64,
    ) -> Result<Replica, SvcError> {
        let node = self
            .registry
            .node(&pool.node)
            .await
            .ok_or_else(|| SvcError::NodeNotFound {
                node_id: pool.node.clone(),
            })?;
        node.create_replica(uuid, &pool.id, size).await
    }

    /// Replenish missing replicas, rank the surviving set, assign share
    /// protocols, reconcile the nexus's children against the ranked
    /// replicas, then trim anything left over. Idempotent: running it
    /// again with nothing to do is a no-op.
    pub async fn ensure(&self) -> Result<(), SvcError> {
        let spec = self.spec.read().await.clone();
        let replica_uuid = Self::replica_id(&spec);
        let nexus_uuid = Self::nexus_id(&spec);

        let mut replicas = self.registry.get_replica_set(&replica_uuid).await;
        let existing_nexus = self.registry.get_nexus(&nexus_uuid).await;

        // 1. Replenish.
        let missing = (spec.replica_count as usize).saturating_sub(replicas.len());
        if missing > 0 {
            let occupied: HashSet<NodeId> = replicas.iter().map(|r| r.node.clone()).collect();
            let candidates: Vec<Pool> = self
                .registry
                .choose_pools(spec.required_bytes, &spec.required_nodes, &spec.preferred_nodes)
                .await
                .into_iter()
                .filter(|pool| !occupied.contains(&pool.node))
                .collect();

            if candidates.len() < missing {
                return Err(SvcError::NotEnoughResources {
                    source: NotEnough::OfPools {
                        have: candidates.len() as u64,
                        need: missing as u64,
                    },
                });
            }

            let size = {
                let mut status = self.status.write().await;
                if status.size.is_none() {
                    let min_free = candidates
                        .iter()
                        .take(missing)
                        .map(Pool::free_bytes)
                        .min()
                        .unwrap_or(spec.required_bytes);
                    status.size = Some(min_free.min(spec.limit_bytes.unwrap_or(spec.required_bytes)));
                }
                status.size.expect("just set above")
            };

            let mut created = 0usize;
            let mut errors = Vec::new();
            for pool in candidates {
                if created == missing {
                    break;
                }
                match self.create_replica_on(&pool, &replica_uuid, size).await {
                    Ok(replica) => {
                        replicas.push(replica);
                        created += 1;
                    }
                    Err(error) => errors.push(error.to_string()),
                }
            }
            if created < missing {
                return Err(SvcError::aggregate(errors));
            }
        }

        // 2. Rank; keep the top `replica_count`, the rest are excess.
        let nexus_node = existing_nexus.as_ref().map(|n| n.node.clone());
        let mut ranked: Vec<Ranked> = replicas
            .into_iter()
            .map(|replica| {
                let score = score_replica(&replica, &spec, nexus_node.as_ref());
                Ranked { replica, score }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        let take = spec.replica_count as usize;
        let kept: Vec<Ranked> = ranked.drain(..ranked.len().min(take)).collect();

        let nexus_node_id = match &existing_nexus {
            Some(nexus) => nexus.node.clone(),
            None => kept
                .first()
                .map(|r| r.replica.node.clone())
                .ok_or_else(|| SvcError::Internal {
                    details: "no replica available to host the nexus".to_string(),
                })?,
        };

        // 3. Share protocols: local to the nexus is NONE, remote is NVMF.
        for ranked in &kept {
            let target = if ranked.replica.node == nexus_node_id {
                Protocol::None
            } else {
                Protocol::Nvmf
            };
            if ranked.replica.share != target {
                let node = self.registry.node(&ranked.replica.node).await.ok_or_else(|| {
                    SvcError::NodeNotFound {
                        node_id: ranked.replica.node.clone(),
                    }
                })?;
                node.share_replica(&ranked.replica.pool, &ranked.replica.uuid, target)
                    .await
                    .map_err(|error| SvcError::Internal {
                        details: error.to_string(),
                    })?;
            }
        }

        // Re-read replicas post-share: URIs change when share changes.
        let refreshed = self.registry.get_replica_set(&replica_uuid).await;
        let refreshed_by_node: HashMap<NodeId, Replica> =
            refreshed.iter().map(|r| (r.node.clone(), r.clone())).collect();
        let ordered_uris: Vec<ChildUri> = kept
            .iter()
            .map(|ranked| {
                let current = refreshed_by_node
                    .get(&ranked.replica.node)
                    .unwrap_or(&ranked.replica);
                ChildUri::from(current.uri.as_str())
            })
            .collect();

        // 4. Nexus: create, or reconcile existing children against the
        // ranked replica set (remove excess first and non-fatally, then
        // add anything missing, which is fatal on error).
        let nexus_host = self
            .registry
            .node(&nexus_node_id)
            .await
            .ok_or_else(|| SvcError::NodeNotFound {
                node_id: nexus_node_id.clone(),
            })?;

        let nexus = match existing_nexus {
            None => {
                let size = self.status.read().await.size.unwrap_or(spec.required_bytes);
                nexus_host
                    .create_nexus(&nexus_uuid, size, ordered_uris.clone())
                    .await
                    .map_err(|error| SvcError::Internal {
                        details: error.to_string(),
                    })?
            }
            Some(existing) => {
                let current: HashSet<ChildUri> = existing.child_uris().into_iter().collect();
                let desired: HashSet<ChildUri> = ordered_uris.iter().cloned().collect();

                for uri in current.difference(&desired) {
                    if let Err(error) = nexus_host.remove_child(&existing.uuid, uri).await {
                        tracing::warn!(%error, nexus = %existing.uuid, %uri, "failed to remove excess nexus child");
                    }
                }
                for uri in desired.difference(&current) {
                    nexus_host
                        .add_child(&existing.uuid, uri)
                        .await
                        .map_err(|error| SvcError::Internal {
                            details: error.to_string(),
                        })?;
                }
                nexus_host.nexus(&existing.uuid).await.unwrap_or(existing)
            }
        };

        // 5. Trim: any replica whose uri is no longer a nexus child is
        // destroyed. Failures here are logged, not fatal.
        let nexus_uris: HashSet<ChildUri> = nexus.child_uris().into_iter().collect();
        for replica in &refreshed {
            if !nexus_uris.contains(&ChildUri::from(replica.uri.as_str())) {
                if let Some(node) = self.registry.node(&replica.node).await {
                    if let Err(error) = node.destroy_replica(&replica.pool, &replica.uuid).await {
                        tracing::warn!(%error, replica = %replica.uuid, node = %replica.node, "failed to trim excess replica");
                    }
                }
            }
        }

        self.refresh_status().await;
        Ok(())
    }

    /// Destroy the nexus (if any) then every replica, in parallel;
    /// `NOT_FOUND` from either is swallowed by the node mutators
    /// already, so this is idempotent.
    pub async fn destroy(&self) -> Result<(), SvcError> {
        let spec = self.spec.read().await.clone();
        let nexus_uuid = Self::nexus_id(&spec);
        let replica_uuid = Self::replica_id(&spec);

        let nexus = self.registry.get_nexus(&nexus_uuid).await;
        let replicas = self.registry.get_replica_set(&replica_uuid).await;

        let mut errors = Vec::new();
        if let Some(nexus) = &nexus {
            if let Some(node) = self.registry.node(&nexus.node).await {
                if let Err(error) = node.destroy_nexus(&nexus.uuid).await {
                    errors.push(error.to_string());
                }
            }
        }

        let destroys = replicas.iter().map(|replica| {
            let registry = self.registry.clone();
            let pool = replica.pool.clone();
            let uuid = replica.uuid.clone();
            let node_id = replica.node.clone();
            async move {
                match registry.node(&node_id).await {
                    Some(node) => node.destroy_replica(&pool, &uuid).await,
                    None => Ok(()),
                }
            }
        });
        for result in futures::future::join_all(destroys).await {
            if let Err(error) = result {
                errors.push(error.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SvcError::aggregate(errors))
        }
    }

    /// Change `replica_count`, node preferences, or the byte-range hints.
    /// Shrinking `limit_bytes` below, or raising `required_bytes` above,
    /// the already-fixed `size` is rejected. Returns whether anything
    /// changed, so the caller can decide whether to re-run `ensure()`.
    pub async fn update(&self, new_spec: VolumeSpec) -> Result<bool, SvcError> {
        let size = self.status.read().await.size;
        if let Some(size) = size {
            if let Some(limit) = new_spec.limit_bytes {
                if limit < size {
                    return Err(SvcError::InvalidArguments {
                        details: format!("limitBytes {} would shrink volume below size {}", limit, size),
                    });
                }
            }
            if new_spec.required_bytes > size {
                return Err(SvcError::InvalidArguments {
                    details: format!(
                        "requiredBytes {} would grow volume above size {}",
                        new_spec.required_bytes, size
                    ),
                });
            }
        }

        let mut spec = self.spec.write().await;
        let changed = *spec != new_spec;
        *spec = new_spec;
        Ok(changed)
    }
}

/// A process-wide map of `uuid -> Volume`, serializing reconciles and
/// CSI-driven mutations per volume with a per-uuid lock.
#[derive(Clone)]
pub struct VolumeManager {
    registry: Registry,
    volumes: Arc<RwLock<HashMap<VolumeId, Arc<Volume>>>>,
    locks: Arc<RwLock<HashMap<VolumeId, Arc<Mutex<()>>>>>,
}

impl VolumeManager {
    pub fn new(registry: Registry, reconcile_period: Duration) -> Self {
        let manager = Self {
            registry,
            volumes: Default::default(),
            locks: Default::default(),
        };
        manager.start_event_handler();
        manager.start_reconcile_loop(reconcile_period);
        manager
    }

    fn start_event_handler(&self) {
        let volumes = self.volumes.clone();
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(common::Event::Replica { object, .. }) => {
                        Self::touch(&volumes, VolumeId::from(object.uuid.as_str())).await;
                    }
                    Ok(common::Event::Nexus { object, .. }) => {
                        Self::touch(&volumes, VolumeId::from(object.uuid.as_str())).await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn touch(volumes: &Arc<RwLock<HashMap<VolumeId, Arc<Volume>>>>, uuid: VolumeId) {
        if let Some(volume) = volumes.read().await.get(&uuid).cloned() {
            volume.refresh_status().await;
        }
    }

    fn start_reconcile_loop(&self, period: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let volumes: Vec<(VolumeId, Arc<Volume>)> = manager
                    .volumes
                    .read()
                    .await
                    .iter()
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect();
                for (uuid, volume) in volumes {
                    let lock = manager.lock_for(&uuid).await;
                    let _guard = lock.lock().await;
                    if let Err(error) = volume.ensure().await {
                        tracing::warn!(volume = %uuid, %error, "periodic reconcile failed");
                    }
                }
            }
        });
    }

    async fn lock_for(&self, uuid: &VolumeId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(uuid) {
            return lock.clone();
        }
        self.locks
            .write()
            .await
            .entry(uuid.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn get_or_insert(&self, spec: VolumeSpec) -> Arc<Volume> {
        let mut volumes = self.volumes.write().await;
        volumes
            .entry(spec.uuid.clone())
            .or_insert_with(|| Arc::new(Volume::new(self.registry.clone(), spec)))
            .clone()
    }

    pub async fn get(&self, uuid: &VolumeId) -> Option<Arc<Volume>> {
        self.volumes.read().await.get(uuid).cloned()
    }

    pub async fn list(&self) -> Vec<VolumeInfo> {
        let volumes: Vec<Arc<Volume>> = self.volumes.read().await.values().cloned().collect();
        let mut result = Vec::with_capacity(volumes.len());
        for volume in volumes {
            result.push(volume.to_info().await);
        }
        result
    }

    /// Create-or-update a Volume then run `ensure()` under its lock.
    /// A re-entrant call with the already-achieved spec (same replica
    /// count, nexus present) short-circuits without touching any node.
    pub async fn ensure_volume(&self, spec: VolumeSpec) -> Result<VolumeInfo, SvcError> {
        let volume = self.get_or_insert(spec.clone()).await;
        let lock = self.lock_for(&spec.uuid).await;
        let _guard = lock.lock().await;

        *volume.spec.write().await = spec.clone();

        let replica_uuid = Volume::replica_id(&spec);
        let nexus_uuid = Volume::nexus_id(&spec);
        let replicas = self.registry.get_replica_set(&replica_uuid).await;
        let nexus = self.registry.get_nexus(&nexus_uuid).await;
        if replicas.len() == spec.replica_count as usize && nexus.is_some() {
            volume.refresh_status().await;
            return Ok(volume.to_info().await);
        }

        volume.ensure().await?;
        Ok(volume.to_info().await)
    }

    /// Destroy by uuid directly against the registry: valid even for a
    /// volume this process never tracked (e.g. after a restart), since
    /// there is no persisted state to rebuild it from.
    pub async fn destroy_volume(&self, uuid: &VolumeId) -> Result<(), SvcError> {
        let lock = self.lock_for(uuid).await;
        let _guard = lock.lock().await;

        let nexus_uuid = NexusId::from(uuid.as_str());
        let replica_uuid = ReplicaId::from(uuid.as_str());
        let nexus = self.registry.get_nexus(&nexus_uuid).await;
        let replicas = self.registry.get_replica_set(&replica_uuid).await;

        let mut errors = Vec::new();
        if let Some(nexus) = &nexus {
            if let Some(node) = self.registry.node(&nexus.node).await {
                if let Err(error) = node.destroy_nexus(&nexus.uuid).await {
                    errors.push(error.to_string());
                }
            }
        }
        let destroys = replicas.iter().map(|replica| {
            let registry = self.registry.clone();
            let pool = replica.pool.clone();
            let uuid = replica.uuid.clone();
            let node_id = replica.node.clone();
            async move {
                match registry.node(&node_id).await {
                    Some(node) => node.destroy_replica(&pool, &uuid).await,
                    None => Ok(()),
                }
            }
        });
        for result in futures::future::join_all(destroys).await {
            if let Err(error) = result {
                errors.push(error.to_string());
            }
        }

        self.volumes.write().await.remove(uuid);
        self.locks.write().await.remove(uuid);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SvcError::aggregate(errors))
        }
    }

    /// Publish by uuid directly against the registry, as `destroy_volume`
    /// does: valid even for a volume this process never tracked, since a
    /// nexus discovered by `sync()` after a restart is just as publishable
    /// as one this process created.
    pub async fn publish_volume(&self, uuid: &VolumeId, protocol: Protocol) -> Result<String, SvcError> {
        let lock = self.lock_for(uuid).await;
        let _guard = lock.lock().await;

        let nexus_uuid = NexusId::from(uuid.as_str());
        let nexus = self
            .registry
            .get_nexus(&nexus_uuid)
            .await
            .ok_or_else(|| SvcError::NexusNotFound {
                nexus_id: nexus_uuid,
            })?;
        let node = self
            .registry
            .node(&nexus.node)
            .await
            .ok_or_else(|| SvcError::NodeNotFound {
                node_id: nexus.node.clone(),
            })?;
        node.publish_nexus(&nexus.uuid, protocol).await
    }

    pub async fn unpublish_volume(&self, uuid: &VolumeId) -> Result<(), SvcError> {
        let lock = self.lock_for(uuid).await;
        let _guard = lock.lock().await;

        let nexus_uuid = NexusId::from(uuid.as_str());
        let nexus = self
            .registry
            .get_nexus(&nexus_uuid)
            .await
            .ok_or_else(|| SvcError::NexusNotFound {
                nexus_id: nexus_uuid,
            })?;
        let node = self
            .registry
            .node(&nexus.node)
            .await
            .ok_or_else(|| SvcError::NodeNotFound {
                node_id: nexus.node.clone(),
            })?;
        node.unpublish_nexus(&nexus.uuid).await
    }

    pub async fn update_volume(&self, uuid: &VolumeId, new_spec: VolumeSpec) -> Result<bool, SvcError> {
        let volume = self.get(uuid).await.ok_or_else(|| SvcError::VolumeNotFound {
            volume_id: uuid.clone(),
        })?;
        let lock = self.lock_for(uuid).await;
        let _guard = lock.lock().await;
        let changed = volume.update(new_spec).await?;
        if changed {
            volume.ensure().await?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(uuid: &str, replica_count: u8) -> VolumeSpec {
        VolumeSpec {
            uuid: VolumeId::from(uuid),
            replica_count,
            required_nodes: vec![],
            preferred_nodes: vec![],
            required_bytes: 64,
            limit_bytes: None,
        }
    }

    fn replica(node: &str, uuid: &str, share: Protocol, state: ReplicaState) -> Replica {
        Replica {
            node: NodeId::from(node),
            uuid: ReplicaId::from(uuid),
            pool: common::PoolId::from("p1"),
            thin: true,
            size: 64,
            share,
            uri: format!("bdev:///{}", uuid),
            state,
        }
    }

    #[test]
    fn scoring_favors_required_online_preferred_then_colocated() {
        let s = VolumeSpec {
            uuid: VolumeId::from("11111111-1111-1111-1111-111111111111"),
            replica_count: 1,
            required_nodes: vec![NodeId::from("n1")],
            preferred_nodes: vec![NodeId::from("n2")],
            required_bytes: 1,
            limit_bytes: None,
        };
        let required = replica("n1", "r", Protocol::None, ReplicaState::Degraded);
        let preferred_online = replica("n2", "r", Protocol::None, ReplicaState::Online);
        let plain = replica("n3", "r", Protocol::None, ReplicaState::Degraded);

        assert_eq!(score_replica(&required, &s, None), 10);
        assert_eq!(score_replica(&preferred_online, &s, None), 7);
        assert_eq!(score_replica(&plain, &s, None), 0);
        assert_eq!(score_replica(&plain, &s, Some(&NodeId::from("n3"))), 1);
    }

    #[test]
    fn derive_state_pending_without_nexus() {
        let s = spec("11111111-1111-1111-1111-111111111111", 1);
        assert_eq!(derive_state(&s, &[], None), VolumeState::Pending);
    }

    #[test]
    fn derive_state_online_when_full_and_not_faulted() {
        let s = spec("11111111-1111-1111-1111-111111111111", 1);
        let r = replica("n1", "r", Protocol::None, ReplicaState::Online);
        let nexus = Nexus {
            node: NodeId::from("n1"),
            uuid: NexusId::from("11111111-1111-1111-1111-111111111111"),
            size: 64,
            state: NexusState::Online,
            children: vec![],
            device_uri: None,
            rebuilds: 0,
        };
        assert_eq!(derive_state(&s, &[r], Some(&nexus)), VolumeState::Online);
    }

    #[test]
    fn derive_state_degraded_when_short_a_replica() {
        let s = spec("11111111-1111-1111-1111-111111111111", 2);
        let r = replica("n1", "r", Protocol::None, ReplicaState::Online);
        let nexus = Nexus {
            node: NodeId::from("n1"),
            uuid: NexusId::from("11111111-1111-1111-1111-111111111111"),
            size: 64,
            state: NexusState::Degraded,
            children: vec![],
            device_uri: None,
            rebuilds: 0,
        };
        assert_eq!(derive_state(&s, &[r], Some(&nexus)), VolumeState::Degraded);
    }

    #[tokio::test]
    async fn ensure_rejects_when_not_enough_pools() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let manager = VolumeManager::new(registry, Duration::from_secs(3600));
        let result = manager
            .ensure_volume(spec("22222222-2222-2222-2222-222222222222", 2))
            .await;
        assert!(matches!(result, Err(SvcError::NotEnoughResources { .. })));
    }

    #[tokio::test]
    async fn update_rejects_growth_past_fixed_size() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let volume = Volume::new(registry, spec("33333333-3333-3333-3333-333333333333", 1));
        volume.status.write().await.size = Some(64);

        let mut grown = spec("33333333-3333-3333-3333-333333333333", 1);
        grown.required_bytes = 128;
        let result = volume.update(grown).await;
        assert!(matches!(result, Err(SvcError::InvalidArguments { .. })));

        let mut same = spec("33333333-3333-3333-3333-333333333333", 2);
        same.required_bytes = 64;
        let changed = volume.update(same).await.unwrap();
        assert!(changed);
    }
}
