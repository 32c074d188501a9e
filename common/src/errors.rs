//! Error taxonomy shared by the registry, the reconciler and the CSI
//! façade. `SvcError` captures what went wrong in domain terms; callers
//! at the CSI boundary convert it to a `tonic::Status` via `From`.

use snafu::Snafu;

use crate::ids::{NexusId, NodeId, PoolId, ReplicaId, VolumeId};

/// What a placement or reconcile step didn't have enough of.
#[derive(Debug, Snafu, Clone, Eq, PartialEq)]
pub enum NotEnough {
    #[snafu(display("Not enough suitable pools: have {have}, need {need}"))]
    OfPools { have: u64, need: u64 },
    #[snafu(display("Not enough replicas: have {have}, need {need}"))]
    OfReplicas { have: u64, need: u64 },
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum SvcError {
    #[snafu(display("Timed out connecting to node '{node}'"))]
    GrpcConnectTimeout { node: NodeId },

    #[snafu(display("Failed to connect to node '{node}': {source}"))]
    GrpcConnect {
        node: NodeId,
        source: tonic::transport::Error,
    },

    #[snafu(display("gRPC request '{request}' against '{resource}' failed: {source}"))]
    GrpcRequest {
        resource: String,
        request: String,
        source: tonic::Status,
    },

    #[snafu(display("Node '{node_id}' is not online"))]
    NodeNotOnline { node_id: NodeId },

    #[snafu(display("Node '{node_id}' not found"))]
    NodeNotFound { node_id: NodeId },

    #[snafu(display("Pool '{pool_id}' not found"))]
    PoolNotFound { pool_id: PoolId },

    #[snafu(display("Replica '{replica_id}' not found"))]
    ReplicaNotFound { replica_id: ReplicaId },

    #[snafu(display("Nexus '{nexus_id}' not found"))]
    NexusNotFound { nexus_id: NexusId },

    #[snafu(display("Volume '{volume_id}' not found"))]
    VolumeNotFound { volume_id: VolumeId },

    #[snafu(display("Resource '{resource}' already exists"))]
    AlreadyExists { resource: String },

    #[snafu(display("{source}"))]
    NotEnoughResources { source: NotEnough },

    #[snafu(display("Invalid arguments: {details}"))]
    InvalidArguments { details: String },

    #[snafu(display("{details}"))]
    Internal { details: String },
}

impl SvcError {
    /// Aggregate several failures into one `Internal` error, joining
    /// their messages with `". "` as spec'd for reconcile-time failures.
    pub fn aggregate<E: std::fmt::Display>(errors: Vec<E>) -> Self {
        let details = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(". ");
        SvcError::Internal { details }
    }
}

impl From<SvcError> for tonic::Status {
    fn from(err: SvcError) -> Self {
        use tonic::Code;
        let code = match &err {
            SvcError::InvalidArguments { .. } => Code::InvalidArgument,
            SvcError::NodeNotFound { .. }
            | SvcError::PoolNotFound { .. }
            | SvcError::ReplicaNotFound { .. }
            | SvcError::NexusNotFound { .. }
            | SvcError::VolumeNotFound { .. } => Code::NotFound,
            SvcError::AlreadyExists { .. } => Code::AlreadyExists,
            SvcError::NotEnoughResources { .. } => Code::ResourceExhausted,
            SvcError::NodeNotOnline { .. } | SvcError::GrpcConnectTimeout { .. } => {
                Code::Unavailable
            }
            SvcError::GrpcConnect { .. } => Code::Unavailable,
            SvcError::GrpcRequest { source, .. } => grpc_code_passthrough(source.code()),
            SvcError::Internal { .. } => Code::Internal,
        };
        tonic::Status::new(code, err.to_string())
    }
}

/// Maps a south-bound node RPC status code onto the CSI-facing code set.
/// Anything not in the required table (§6) collapses to `Internal`.
fn grpc_code_passthrough(code: tonic::Code) -> tonic::Code {
    use tonic::Code;
    match code {
        Code::Ok
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::ResourceExhausted
        | Code::Unavailable => code,
        _ => Code::Internal,
    }
}
