use crate::Networkable;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, io, marker::PhantomData, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::{
    bytes::Bytes,
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug)]
enum ServerToClientMessage<T: Debug> {
    Accepted,
    Rejected,
    Else(T),
}

#[derive(Serialize, Deserialize, Debug)]
enum ClientToServerMessage<T: Debug> {
    Hello { run_token: Option<String> },
    Else(T),
}

/// Serves requests arriving on a [`TcpServer`].
///
/// Every connection is handled on its own task, so `handle` may be called
/// concurrently from many connections.
#[async_trait]
pub trait RequestHandler<Req: Send + 'static, Resp>: Send + Sync + 'static {
    /// Decides whether a connection may send requests, based on the token it
    /// presented in its handshake.
    fn authorize(&self, peer: SocketAddr, run_token: Option<&str>) -> bool;

    async fn handle(&self, peer: SocketAddr, request: Req) -> Resp;
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("failed to bind to socket: {0}")]
    Bind(io::Error),
    #[error("failed to get local addr: {0}")]
    GetLocalAddr(io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("server rejected the run token")]
    Rejected,
    #[error("connection closed during handshake")]
    Closed,
    #[error("unexpected message during handshake")]
    UnexpectedMessage,
}

fn codec() -> LengthDelimitedCodec {
    let mut codec = LengthDelimitedCodec::new();
    codec.set_max_frame_length(MAX_FRAME_LENGTH);
    codec
}

/// Accepts framed request/response connections until dropped.
pub struct TcpServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl TcpServer {
    pub async fn start<Req, Resp, H>(
        addr: SocketAddr,
        handler: Arc<H>,
    ) -> Result<Self, ConnectError>
    where
        Req: Networkable + Debug,
        Resp: Networkable + Debug,
        H: RequestHandler<Req, Resp>,
    {
        let listener = TcpListener::bind(addr).await.map_err(ConnectError::Bind)?;
        let local_addr = listener.local_addr().map_err(ConnectError::GetLocalAddr)?;
        info!("Server listening on: {}", local_addr);

        let cancel = CancellationToken::new();

        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                loop {
                    let (stream, peer) = select! {
                        _ = cancel.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                error!("Error accepting connection: {e}");
                                continue;
                            }
                        },
                    };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection::<Req, Resp, H>(stream, peer, handler).await
                        {
                            error!("Error handling connection from {peer}: {e:?}");
                        }
                    });
                }
                debug!("Server on {local_addr} stopped accepting connections");
            }
        });

        Ok(Self { local_addr, cancel })
    }

    pub fn local_addr(&self) -> &SocketAddr {
        &self.local_addr
    }

    /// Stops accepting new connections. Connections already open are served
    /// until their peer disconnects.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn handle_connection<Req, Resp, H>(
        stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<H>,
    ) -> anyhow::Result<()>
    where
        Req: Networkable + Debug,
        Resp: Networkable + Debug,
        H: RequestHandler<Req, Resp>,
    {
        let mut framed = Framed::new(stream, codec());

        let hello = ClientToServerMessage::<Req>::from_bytes(
            &framed
                .next()
                .await
                .ok_or_else(|| anyhow!("connection closed before handshake"))??,
        )?;
        let run_token = match hello {
            ClientToServerMessage::Hello { run_token } => run_token,
            ClientToServerMessage::Else(message) => {
                bail!("Invalid client-to-server message - expected Hello, got {message:?}")
            }
        };

        if !handler.authorize(peer, run_token.as_deref()) {
            warn!(%peer, "Rejected connection with invalid run token");
            framed
                .send(Bytes::from(ServerToClientMessage::<Resp>::Rejected.to_bytes()))
                .await?;
            return Ok(());
        }
        framed
            .send(Bytes::from(ServerToClientMessage::<Resp>::Accepted.to_bytes()))
            .await?;
        debug!(%peer, "Handshake accepted");

        while let Some(frame) = framed.next().await {
            let message = ClientToServerMessage::<Req>::from_bytes(&frame?)?;
            match message {
                ClientToServerMessage::Hello { .. } => {
                    bail!("Unexpected handshake message from {peer}");
                }
                ClientToServerMessage::Else(request) => {
                    let response = handler.handle(peer, request).await;
                    framed
                        .send(Bytes::from(ServerToClientMessage::Else(response).to_bytes()))
                        .await?;
                }
            }
        }

        debug!(%peer, "Client disconnected");
        Ok(())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct TcpClient<ToServerMessage, ToClientMessage>
where
    ToServerMessage: Networkable + Debug,
    ToClientMessage: Networkable + Debug,
{
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    _phantom: PhantomData<(ToServerMessage, ToClientMessage)>,
}

impl<ToServer, ToClient> TcpClient<ToServer, ToClient>
where
    ToServer: Networkable + Debug,
    ToClient: Networkable + Debug,
{
    /// Connects and performs the run-token handshake.
    ///
    /// A rejected handshake surfaces as a [`HandshakeError::Rejected`] inside
    /// the returned error.
    pub async fn connect(addr: &str, run_token: Option<String>) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(stream, codec());

        framed
            .send(Bytes::from(
                ClientToServerMessage::<ToServer>::Hello { run_token }.to_bytes(),
            ))
            .await?;

        match Self::receive_message(&mut framed).await {
            Ok(ServerToClientMessage::Accepted) => {}
            Ok(ServerToClientMessage::Rejected) => return Err(HandshakeError::Rejected.into()),
            Ok(ServerToClientMessage::Else(_)) => {
                return Err(HandshakeError::UnexpectedMessage.into())
            }
            Err(_) => return Err(HandshakeError::Closed.into()),
        }
        info!("Connected to server at: {}", addr);

        Ok(Self {
            framed,
            _phantom: Default::default(),
        })
    }

    async fn receive_message(
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    ) -> anyhow::Result<ServerToClientMessage<ToClient>> {
        let bytes = framed
            .next()
            .await
            .ok_or_else(|| anyhow!("Connection closed"))??;
        ServerToClientMessage::from_bytes(&bytes)
    }

    /// Sends one request and waits for its response.
    pub async fn request(&mut self, message: ToServer) -> anyhow::Result<ToClient> {
        self.framed
            .send(Bytes::from(ClientToServerMessage::Else(message).to_bytes()))
            .await?;
        match Self::receive_message(&mut self.framed).await? {
            ServerToClientMessage::Else(response) => Ok(response),
            other => Err(anyhow!("Unexpected server message {other:?}")),
        }
    }
}
