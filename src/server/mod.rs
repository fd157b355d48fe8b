// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! TCP front end: one task per connection, strictly serial frames within it.
//!
//! The loop authenticates the connection once via CONNECT, then dispatches
//! each frame to the handler. Handler failures become error replies; codec
//! failures (including the peer hanging up) end the task.

use crate::auth::Authenticator;
use crate::handler::NodeHandler;
use crate::proto::codec::{FramedConn, ProtocolError};
use crate::proto::{Header, Operation, ResultCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub struct TcpNodeServer {
    auth: Arc<dyn Authenticator>,
    handler: Arc<NodeHandler>,
}

impl TcpNodeServer {
    pub fn new(auth: Arc<dyn Authenticator>, handler: Arc<NodeHandler>) -> Self {
        Self { auth, handler }
    }

    pub async fn serve(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Accept loop over an already-bound listener (lets tests bind port 0).
    pub async fn serve_on(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("storage node listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("error accepting new connection: {e}");
                    continue;
                }
            };
            tracing::debug!(%peer, "accepted connection");

            let auth = self.auth.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, auth, handler).await {
                    tracing::debug!(%peer, "connection closed: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    auth: Arc<dyn Authenticator>,
    handler: Arc<NodeHandler>,
) -> Result<(), ProtocolError> {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let mut conn = FramedConn::new(reader, writer);
    let mut authorized = false;

    loop {
        let (header, body_len) = conn.receive().await?;

        match Operation::from_code(header.operation) {
            Some(Operation::Connect) => match auth.authenticate(&header).await {
                Ok(_ctx) => {
                    authorized = true;
                    conn.send(&Header::reply(ResultCode::Success)).await?;
                }
                Err(e) => {
                    tracing::warn!("authentication rejected: {e}");
                    conn.send(
                        &Header::reply(ResultCode::Unauthorized).with_msg("authentication failed"),
                    )
                    .await?;
                    return Ok(());
                }
            },
            _ if !authorized => {
                conn.discard_body().await?;
                conn.send(
                    &Header::reply(ResultCode::Unauthorized).with_msg("authentication failed"),
                )
                .await?;
                return Ok(());
            }
            Some(Operation::Upload) => {
                let reply = {
                    let mut body = conn.body_reader();
                    handler.upload(&mut body, body_len).await
                };
                conn.send(&reply).await?;
            }
            Some(Operation::Download) => {
                let (reply, body) = handler.download(&header).await;
                match body {
                    Some((mut file, len)) => conn.send_with_body(&reply, &mut file, len).await?,
                    None => conn.send(&reply).await?,
                }
            }
            Some(Operation::Query) => {
                let reply = handler.inspect(&header).await;
                conn.send(&reply).await?;
            }
            None => {
                conn.send(
                    &Header::reply(ResultCode::UnknownOperation).with_msg("unknown operation"),
                )
                .await?;
            }
        }
    }
}
