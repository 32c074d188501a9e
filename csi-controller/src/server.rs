//! Unix-domain-socket transport for the CSI gRPC services, plus the
//! wiring that ties the Identity and Controller services into one
//! `tonic` server with graceful shutdown.

use std::{
    fs,
    io::ErrorKind,
    pin::Pin,
    sync::{atomic::AtomicBool, Arc},
    task::{Context, Poll},
};

use core_agent::{Registry, VolumeManager};
use futures::TryFutureExt;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::UnixListener,
};
use tonic::transport::{server::Connected, Server};

use crate::{
    csi::{controller_server::ControllerServer, identity_server::IdentityServer},
    controller::CsiControllerSvc,
    identity::CsiIdentitySvc,
    shutdown,
};

#[derive(Debug)]
struct UnixStream(tokio::net::UnixStream);

impl Connected for UnixStream {
    type ConnectInfo = UdsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        UdsConnectInfo {
            peer_addr: self.0.peer_addr().ok().map(Arc::new),
            peer_cred: self.0.peer_cred().ok(),
        }
    }
}

#[derive(Clone, Debug)]
#[allow(unused)]
struct UdsConnectInfo {
    peer_addr: Option<Arc<tokio::net::unix::SocketAddr>>,
    peer_cred: Option<tokio::net::unix::UCred>,
}

impl AsyncRead for UnixStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Binds `csi_socket`, removing a stale socket file left by a previous
/// run, and serves the Identity and Controller services until a
/// shutdown signal arrives.
pub async fn run(
    csi_socket: &str,
    registry: Registry,
    manager: VolumeManager,
    ready: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    match fs::remove_file(csi_socket) {
        Ok(_) => tracing::info!(socket = csi_socket, "removed stale csi socket"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(anyhow::anyhow!(
                "error removing stale csi socket {csi_socket}: {err}"
            ))
        }
    }

    tracing::debug!(socket = csi_socket, "csi rpc server listening");

    let uds = UnixListener::bind(csi_socket)?;
    if let Err(error) = fs::set_permissions(
        csi_socket,
        std::os::unix::fs::PermissionsExt::from_mode(0o777),
    ) {
        tracing::error!(%error, "failed to relax permissions on csi socket");
    }

    let incoming = async_stream::stream! {
        loop {
            let item = uds.accept().map_ok(|(stream, _)| UnixStream(stream)).await;
            yield item;
        }
    };

    Server::builder()
        .add_service(IdentityServer::new(CsiIdentitySvc::new(ready.clone())))
        .add_service(ControllerServer::new(CsiControllerSvc::new(
            registry, manager, ready,
        )))
        .serve_with_incoming_shutdown(incoming, shutdown::wait())
        .await?;
    Ok(())
}
