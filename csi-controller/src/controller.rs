//! The CSI Controller service: volume lifecycle, publish/unpublish and
//! capacity/listing queries, translated onto `core_agent::VolumeManager`
//! and `core_agent::Registry`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use common::{NexusId, NodeId, Protocol, Volume as VolumeInfo, VolumeId, VolumeSpec, VolumeStatus};
use core_agent::{Registry, VolumeManager};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use url::Url;

use crate::csi::{
    self,
    controller_server::Controller,
    controller_service_capability::{rpc::Type as RpcKind, Rpc, Type as CapabilityKind},
    list_volumes_response::Entry,
    validate_volume_capabilities_response::Confirmed,
    volume_capability::access_mode::Mode,
    ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse, ControllerServiceCapability,
    ControllerUnpublishVolumeRequest, ControllerUnpublishVolumeResponse, CreateSnapshotRequest,
    CreateSnapshotResponse, CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest,
    DeleteSnapshotResponse, DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest,
    GetCapacityResponse, ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesRequest,
    ListVolumesResponse, TopologyRequirement, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, VolumeCapability,
};

/// The only topology segment key this plugin understands.
const HOSTNAME_KEY: &str = "kubernetes.io/hostname";

/// How long a `ListVolumes` continuation token stays valid.
const PAGE_TTL: Duration = Duration::from_secs(60);

static PVC_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^pvc-([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$",
    )
    .expect("valid regex")
});

struct Page {
    items: Vec<VolumeInfo>,
    expires_at: Instant,
}

pub struct CsiControllerSvc {
    registry: Registry,
    manager: VolumeManager,
    ready: Arc<AtomicBool>,
    pages: Mutex<HashMap<String, Page>>,
}

impl CsiControllerSvc {
    pub fn new(registry: Registry, manager: VolumeManager, ready: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            manager,
            ready,
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn check_ready(&self) -> Result<(), Status> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Status::unavailable("controller is not ready"))
        }
    }

    /// A snapshot of every volume `ListVolumes` should report: the core
    /// keeps no persisted state (spec §1, §6), so after a restart the
    /// manager's tracked-volume map is empty even though `sync()` has
    /// already rediscovered live nexuses. Seed the snapshot from the
    /// registry's nexuses (one per volume uuid, as `destroy_volume`
    /// already keys off the registry rather than the manager map), then
    /// let richer manager-tracked spec/status data override the
    /// nexus-only stub where this process also tracks the volume.
    async fn volume_snapshot(&self) -> Vec<VolumeInfo> {
        let mut by_uuid: HashMap<VolumeId, VolumeInfo> = HashMap::new();
        for nexus in self.registry.get_nexuses().await {
            let uuid = VolumeId::from(nexus.uuid.as_str());
            by_uuid.insert(
                uuid.clone(),
                VolumeInfo {
                    spec: VolumeSpec {
                        uuid,
                        replica_count: nexus.children.len().max(1) as u8,
                        required_nodes: vec![],
                        preferred_nodes: vec![],
                        required_bytes: nexus.size,
                        limit_bytes: None,
                    },
                    status: VolumeStatus {
                        size: Some(nexus.size),
                        nexus: Some(nexus.uuid.clone()),
                        state: None,
                        reason: String::new(),
                    },
                },
            );
        }
        for info in self.manager.list().await {
            by_uuid.insert(info.spec.uuid.clone(), info);
        }
        by_uuid.into_values().collect()
    }

    async fn to_csi_volume(&self, info: &VolumeInfo) -> csi::Volume {
        let mut topology = Vec::new();
        if let Some(nexus_id) = &info.status.nexus {
            if let Some(nexus) = self.registry.get_nexus(nexus_id).await {
                let mut segments = HashMap::new();
                segments.insert(HOSTNAME_KEY.to_string(), nexus.node.to_string());
                topology.push(csi::Topology { segments });
            }
        }
        csi::Volume {
            capacity_bytes: info.status.size.unwrap_or(info.spec.required_bytes) as i64,
            volume_id: info.spec.uuid.to_string(),
            volume_context: HashMap::new(),
            content_source: None,
            accessible_topology: Some(csi::AccessibleTopology { topology }),
        }
    }
}

fn validate_access_mode(capability: &VolumeCapability) -> Result<(), Status> {
    let mode = capability
        .access_mode
        .as_ref()
        .and_then(|m| Mode::from_i32(m.mode))
        .unwrap_or(Mode::Unknown);
    if mode == Mode::SingleNodeWriter {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!(
            "unsupported access mode {:?}; only SINGLE_NODE_WRITER is supported",
            mode
        )))
    }
}

fn parse_topology(req: Option<&TopologyRequirement>) -> Result<(Vec<NodeId>, Vec<NodeId>), Status> {
    let mut required = Vec::new();
    let mut preferred = Vec::new();
    let Some(req) = req else {
        return Ok((required, preferred));
    };
    for topology in &req.requisite {
        for (key, value) in &topology.segments {
            if key != HOSTNAME_KEY {
                return Err(Status::invalid_argument(format!(
                    "unsupported topology key '{}'",
                    key
                )));
            }
            required.push(NodeId::from(value.as_str()));
        }
    }
    for topology in &req.preferred {
        for (key, value) in &topology.segments {
            if key == HOSTNAME_KEY {
                preferred.push(NodeId::from(value.as_str()));
            }
        }
    }
    Ok((required, preferred))
}

fn parse_replica_count(parameters: &HashMap<String, String>) -> Result<u8, Status> {
    match parameters.get("repl") {
        None => Ok(1),
        Some(value) => value
            .parse::<u8>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| Status::invalid_argument(format!("invalid 'repl' parameter '{}'", value))),
    }
}

fn parse_node_id(value: &str) -> Result<NodeId, Status> {
    let invalid = || Status::invalid_argument(format!("invalid node id '{}'", value));
    let url = Url::parse(value).map_err(|_| invalid())?;
    if url.scheme() != "mayastor" {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?;
    Ok(NodeId::from(host))
}

/// Splits `items` into the page served now and the tail left for the
/// next `ListVolumes` call. `max_entries == 0` means "no limit".
fn paginate(mut items: Vec<VolumeInfo>, max_entries: usize) -> (Vec<VolumeInfo>, Vec<VolumeInfo>) {
    if max_entries == 0 || max_entries >= items.len() {
        return (items, Vec::new());
    }
    let rest = items.split_off(max_entries);
    (items, rest)
}

#[tonic::async_trait]
impl Controller for CsiControllerSvc {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();

        let uuid = PVC_NAME_RE
            .captures(&req.name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "volume name '{}' is not of the form pvc-<uuid>",
                    req.name
                ))
            })?;

        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument(
                "at least one volume capability is required",
            ));
        }
        for capability in &req.volume_capabilities {
            validate_access_mode(capability)?;
        }

        let (required_nodes, preferred_nodes) =
            parse_topology(req.accessibility_requirements.as_ref())?;
        let replica_count = parse_replica_count(&req.parameters)?;

        let capacity = req.capacity_range.as_ref();
        let required_bytes = capacity.map(|c| c.required_bytes).unwrap_or(0).max(0) as u64;
        if required_bytes == 0 {
            return Err(Status::invalid_argument(
                "capacity_range.required_bytes must be greater than zero",
            ));
        }
        let limit_bytes = capacity
            .map(|c| c.limit_bytes)
            .filter(|bytes| *bytes > 0)
            .map(|bytes| bytes as u64);

        let spec = VolumeSpec {
            uuid: VolumeId::from(uuid.as_str()),
            replica_count,
            required_nodes,
            preferred_nodes,
            required_bytes,
            limit_bytes,
        };

        let info = self.manager.ensure_volume(spec).await.map_err(Status::from)?;
        Ok(Response::new(CreateVolumeResponse {
            volume: Some(self.to_csi_volume(&info).await),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        let uuid = VolumeId::from(req.volume_id.as_str());
        self.manager.destroy_volume(&uuid).await.map_err(Status::from)?;
        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        if req.readonly {
            return Err(Status::invalid_argument("read-only publish is not supported"));
        }
        let uuid = VolumeId::from(req.volume_id.as_str());
        let node_id = parse_node_id(&req.node_id)?;

        let nexus_id = NexusId::from(uuid.as_str());
        let nexus = self
            .registry
            .get_nexus(&nexus_id)
            .await
            .ok_or_else(|| Status::not_found(format!("volume '{}' has no nexus to publish", uuid)))?;
        if nexus.node != node_id {
            return Err(Status::invalid_argument(format!(
                "node '{}' does not host volume '{}'; its nexus runs on '{}'",
                node_id, uuid, nexus.node
            )));
        }

        let uri = self
            .manager
            .publish_volume(&uuid, Protocol::Nvmf)
            .await
            .map_err(Status::from)?;

        let mut publish_context = HashMap::new();
        publish_context.insert("uri".to_string(), uri);
        Ok(Response::new(ControllerPublishVolumeResponse { publish_context }))
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        let uuid = VolumeId::from(req.volume_id.as_str());

        if !req.node_id.is_empty() {
            match parse_node_id(&req.node_id) {
                Ok(node_id) => {
                    let nexus_id = NexusId::from(uuid.as_str());
                    if let Some(nexus) = self.registry.get_nexus(&nexus_id).await {
                        if nexus.node != node_id {
                            tracing::warn!(
                                volume = %uuid,
                                requested = %node_id,
                                actual = %nexus.node,
                                "unpublish requested from a node other than the nexus's host"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(volume = %uuid, %error, "ignoring malformed node_id on unpublish");
                }
            }
        }

        self.manager.unpublish_volume(&uuid).await.map_err(Status::from)?;
        Ok(Response::new(ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        let supported = req
            .volume_capabilities
            .iter()
            .any(|c| validate_access_mode(c).is_ok());

        let (confirmed, message) = if supported {
            (
                Some(Confirmed {
                    volume_capabilities: req.volume_capabilities,
                }),
                String::new(),
            )
        } else {
            (
                None,
                "none of the requested capabilities support SINGLE_NODE_WRITER".to_string(),
            )
        };
        Ok(Response::new(ValidateVolumeCapabilitiesResponse { confirmed, message }))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        let max_entries = req.max_entries.max(0) as usize;

        let remaining = if req.starting_token.is_empty() {
            self.volume_snapshot().await
        } else {
            let mut pages = self.pages.lock().await;
            match pages.remove(&req.starting_token) {
                Some(page) if page.expires_at > Instant::now() => page.items,
                _ => {
                    return Err(Status::invalid_argument(format!(
                        "starting_token '{}' is invalid or has expired",
                        req.starting_token
                    )))
                }
            }
        };

        let (served, rest) = paginate(remaining, max_entries);
        let mut entries = Vec::with_capacity(served.len());
        for info in &served {
            entries.push(Entry {
                volume: Some(self.to_csi_volume(info).await),
            });
        }

        let next_token = if rest.is_empty() {
            String::new()
        } else {
            let token = uuid::Uuid::new_v4().to_string();
            self.pages.lock().await.insert(
                token.clone(),
                Page {
                    items: rest,
                    expires_at: Instant::now() + PAGE_TTL,
                },
            );
            token
        };

        Ok(Response::new(ListVolumesResponse { entries, next_token }))
    }

    async fn get_capacity(
        &self,
        request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        self.check_ready()?;
        let req = request.into_inner();
        let node = req
            .accessible_topology
            .iter()
            .find_map(|topology| topology.segments.get(HOSTNAME_KEY))
            .map(|host| NodeId::from(host.as_str()));
        let available_capacity = self.registry.get_capacity(node.as_ref()).await as i64;
        Ok(Response::new(GetCapacityResponse { available_capacity }))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        self.check_ready()?;
        let capability = |t: RpcKind| ControllerServiceCapability {
            r#type: Some(CapabilityKind::Rpc(Rpc { r#type: t as i32 })),
        };
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: vec![
                capability(RpcKind::CreateDeleteVolume),
                capability(RpcKind::PublishUnpublishVolume),
                capability(RpcKind::ListVolumes),
                capability(RpcKind::GetCapacity),
            ],
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn controller_expand_volume(
        &self,
        _request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("volume expansion is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{VolumeState, VolumeStatus};

    use super::*;

    fn topology(key: &str, value: &str) -> csi::Topology {
        let mut segments = HashMap::new();
        segments.insert(key.to_string(), value.to_string());
        csi::Topology { segments }
    }

    #[test]
    fn pvc_name_regex_extracts_uuid() {
        let m = PVC_NAME_RE
            .captures("pvc-11111111-1111-1111-1111-111111111111")
            .unwrap();
        assert_eq!(&m[1], "11111111-1111-1111-1111-111111111111");
        assert!(PVC_NAME_RE.captures("not-a-pvc-name").is_none());
    }

    #[test]
    fn access_mode_accepts_only_single_node_writer() {
        let ok = VolumeCapability {
            access_type: None,
            access_mode: Some(csi::volume_capability::AccessMode {
                mode: Mode::SingleNodeWriter as i32,
            }),
        };
        let bad = VolumeCapability {
            access_type: None,
            access_mode: Some(csi::volume_capability::AccessMode {
                mode: Mode::MultiNodeMultiWriter as i32,
            }),
        };
        assert!(validate_access_mode(&ok).is_ok());
        assert!(validate_access_mode(&bad).is_err());
    }

    #[test]
    fn topology_rejects_unknown_requisite_key() {
        let req = TopologyRequirement {
            requisite: vec![topology("topology.kubernetes.io/zone", "z1")],
            preferred: vec![],
        };
        assert!(parse_topology(Some(&req)).is_err());
    }

    #[test]
    fn topology_collects_required_and_preferred_hostnames() {
        let req = TopologyRequirement {
            requisite: vec![topology(HOSTNAME_KEY, "node-1")],
            preferred: vec![topology(HOSTNAME_KEY, "node-2")],
        };
        let (required, preferred) = parse_topology(Some(&req)).unwrap();
        assert_eq!(required, vec![NodeId::from("node-1")]);
        assert_eq!(preferred, vec![NodeId::from("node-2")]);
    }

    #[test]
    fn replica_count_defaults_to_one_and_rejects_zero() {
        assert_eq!(parse_replica_count(&HashMap::new()).unwrap(), 1);
        let mut params = HashMap::new();
        params.insert("repl".to_string(), "3".to_string());
        assert_eq!(parse_replica_count(&params).unwrap(), 3);
        params.insert("repl".to_string(), "0".to_string());
        assert!(parse_replica_count(&params).is_err());
    }

    #[test]
    fn node_id_requires_mayastor_scheme() {
        assert_eq!(parse_node_id("mayastor://node-1").unwrap(), NodeId::from("node-1"));
        assert!(parse_node_id("node-1").is_err());
        assert!(parse_node_id("nvmf://node-1").is_err());
    }

    #[test]
    fn pagination_splits_at_max_entries() {
        let items: Vec<VolumeInfo> = (0..5)
            .map(|i| VolumeInfo {
                spec: VolumeSpec {
                    uuid: VolumeId::from(format!("v{i}").as_str()),
                    replica_count: 1,
                    required_nodes: vec![],
                    preferred_nodes: vec![],
                    required_bytes: 1,
                    limit_bytes: None,
                },
                status: VolumeStatus {
                    size: None,
                    nexus: None,
                    state: Some(VolumeState::Pending),
                    reason: String::new(),
                },
            })
            .collect();

        let (served, rest) = paginate(items.clone(), 2);
        assert_eq!(served.len(), 2);
        assert_eq!(rest.len(), 3);

        let (served_all, rest_all) = paginate(items, 0);
        assert_eq!(served_all.len(), 5);
        assert!(rest_all.is_empty());
    }

    #[tokio::test]
    async fn empty_registry_lists_no_volumes_and_zero_capacity() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let manager = VolumeManager::new(registry.clone(), Duration::from_secs(3600));
        let svc = CsiControllerSvc::new(registry, manager, Arc::new(AtomicBool::new(true)));

        let response = svc
            .list_volumes(Request::new(ListVolumesRequest {
                max_entries: 0,
                starting_token: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.entries.is_empty());
        assert!(response.next_token.is_empty());

        let capacity = svc
            .get_capacity(Request::new(GetCapacityRequest {
                accessible_topology: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(capacity.available_capacity, 0);
    }

    #[tokio::test]
    async fn not_ready_rejects_controller_calls() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let manager = VolumeManager::new(registry.clone(), Duration::from_secs(3600));
        let svc = CsiControllerSvc::new(registry, manager, Arc::new(AtomicBool::new(false)));

        let err = svc
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_id: "11111111-1111-1111-1111-111111111111".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn delete_volume_is_idempotent_on_an_untracked_volume() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let manager = VolumeManager::new(registry.clone(), Duration::from_secs(3600));
        let svc = CsiControllerSvc::new(registry, manager, Arc::new(AtomicBool::new(true)));

        let req = || {
            Request::new(DeleteVolumeRequest {
                volume_id: "11111111-1111-1111-1111-111111111111".to_string(),
            })
        };
        svc.delete_volume(req()).await.unwrap();
        svc.delete_volume(req()).await.unwrap();
    }

    #[tokio::test]
    async fn publish_not_found_when_volume_has_no_nexus() {
        let registry = Registry::new(
            Duration::from_secs(3600),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let manager = VolumeManager::new(registry.clone(), Duration::from_secs(3600));
        let svc = CsiControllerSvc::new(registry, manager, Arc::new(AtomicBool::new(true)));

        let err = svc
            .controller_publish_volume(Request::new(ControllerPublishVolumeRequest {
                volume_id: "11111111-1111-1111-1111-111111111111".to_string(),
                node_id: "mayastor://n1".to_string(),
                volume_capability: None,
                readonly: false,
                volume_context: HashMap::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }
}
