//! A reconnectable gRPC session to one storage node, plus the lock that
//! serializes mutating calls against it.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use common::{NodeId, SvcError};
use rpc::mayastor::mayastor_client::MayastorClient;
use tonic::transport::Channel;

pub(crate) type MayaClient = MayastorClient<Channel>;

/// Per-node gRPC configuration: the endpoint to dial and the lock that
/// makes sure at most one mutating RPC against this node is in flight.
#[derive(Clone)]
pub(crate) struct GrpcContext {
    lock: Arc<tokio::sync::Mutex<()>>,
    node: NodeId,
    endpoint: tonic::transport::Endpoint,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl GrpcContext {
    pub(crate) fn new(
        lock: Arc<tokio::sync::Mutex<()>>,
        node: &NodeId,
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, SvcError> {
        let uri = format!("http://{}", endpoint);
        let endpoint = tonic::transport::Endpoint::from_shared(uri)
            .map_err(|source| SvcError::GrpcConnect {
                node: node.clone(),
                source,
            })?
            .timeout(request_timeout);

        Ok(Self {
            lock,
            node: node.clone(),
            endpoint,
            connect_timeout,
            request_timeout,
        })
    }

    pub(crate) async fn lock(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }

    pub(crate) async fn connect(&self) -> Result<GrpcClient, SvcError> {
        GrpcClient::new(self).await
    }

    pub(crate) async fn connect_locked(&self) -> Result<GrpcClientLocked, SvcError> {
        GrpcClientLocked::new(self).await
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// An established channel to a node's `Mayastor` RPC service.
#[derive(Clone)]
pub(crate) struct GrpcClient {
    pub(crate) client: MayaClient,
}

impl GrpcClient {
    pub(crate) async fn new(context: &GrpcContext) -> Result<Self, SvcError> {
        let client = match tokio::time::timeout(
            context.connect_timeout,
            MayaClient::connect(context.endpoint.clone()),
        )
        .await
        {
            Err(_) => Err(SvcError::GrpcConnectTimeout {
                node: context.node.clone(),
            }),
            Ok(connect) => connect.map_err(|source| SvcError::GrpcConnect {
                node: context.node.clone(),
                source,
            }),
        }?;

        Ok(Self { client })
    }
}

/// A `GrpcClient` plus the owned guard that keeps the node's mutation
/// lock held for the lifetime of this value.
pub(crate) struct GrpcClientLocked {
    _lock: tokio::sync::OwnedMutexGuard<()>,
    client: GrpcClient,
}

impl GrpcClientLocked {
    pub(crate) async fn new(context: &GrpcContext) -> Result<Self, SvcError> {
        let client = GrpcClient::new(context).await?;
        Ok(Self {
            _lock: context.lock().await,
            client,
        })
    }
}

impl Deref for GrpcClientLocked {
    type Target = GrpcClient;
    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl DerefMut for GrpcClientLocked {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}
