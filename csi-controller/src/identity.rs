//! The CSI Identity service: plugin metadata plus the `Probe` readiness
//! check. Always served, even before the controller side is ready.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tonic::{Request, Response, Status};

use crate::csi::{
    identity_server::Identity,
    plugin_capability::{service::Type as ServiceCapability, Service, Type as CapabilityKind},
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, PluginCapability, ProbeRequest, ProbeResponse,
};

/// Name reported through `GetPluginInfo`; Kubernetes uses this to key the
/// driver in its CSI driver registry.
const PLUGIN_NAME: &str = "io.openebs.csi-mayastor";

pub struct CsiIdentitySvc {
    ready: Arc<AtomicBool>,
}

impl CsiIdentitySvc {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }
}

#[tonic::async_trait]
impl Identity for CsiIdentitySvc {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        Ok(Response::new(GetPluginInfoResponse {
            name: PLUGIN_NAME.to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            manifest: Default::default(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        let capability = |t: ServiceCapability| PluginCapability {
            r#type: Some(CapabilityKind::Service(Service { r#type: t as i32 })),
        };
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec![
                capability(ServiceCapability::ControllerService),
                capability(ServiceCapability::VolumeAccessibilityConstraints),
            ],
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        Ok(Response::new(ProbeResponse {
            ready: Some(self.ready.load(Ordering::SeqCst)),
        }))
    }
}
