//! The CSI controller façade (C6): a gRPC server exposing the CSI
//! Identity and Controller services over a unix domain socket, backed by
//! the in-memory registry and volume manager from `core_agent`.

pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod controller;
pub mod identity;
pub mod server;
pub mod shutdown;

pub use controller::CsiControllerSvc;
pub use identity::CsiIdentitySvc;
