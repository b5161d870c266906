// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};

use crate::connect_options::{ConnectType, MqttsConnect, TlsType, UdsConnect, WsConnect};
use crate::error::{Error, ErrorKind};

/// Transport stream, owned exclusively by the engine task.
///
/// The `Mem` variant is an in-process duplex pipe, used by tests and by
/// embedded brokers running in the same process.
pub enum Stream {
    None,
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Uds(UnixStream),
    Mem(DuplexStream),
}

impl Stream {
    /// Open a transport to `address` with the requested `connect_type`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be established.
    pub async fn connect(address: &SocketAddr, connect_type: &ConnectType) -> Result<Self, Error> {
        match connect_type {
            ConnectType::Mqtt => Self::new_mqtt(address).await,
            ConnectType::Mqtts(mqtts_connect) => Self::new_mqtts(address, mqtts_connect).await,
            ConnectType::Ws(ws_connect) => Self::new_ws(address, ws_connect).await,
            ConnectType::Uds(uds_connect) => Self::new_uds(uds_connect).await,
        }
    }

    async fn new_mqtt(address: &SocketAddr) -> Result<Self, Error> {
        let socket = TcpStream::connect(address).await?;
        Ok(Self::Mqtt(socket))
    }

    async fn new_mqtts(address: &SocketAddr, mqtts_connect: &MqttsConnect) -> Result<Self, Error> {
        let mut root_store = RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        if let TlsType::SelfSigned(self_signed) = &mqtts_connect.tls_type {
            let root_ca_fd = File::open(&self_signed.root_ca_pem)?;
            let mut reader = BufReader::new(root_ca_fd);
            for der in rustls_pemfile::certs(&mut reader)? {
                root_store.add(&Certificate(der)).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("Invalid root ca cert: {err}"),
                    )
                })?;
            }
        }
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let domain = ServerName::try_from(mqtts_connect.domain.as_str()).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid tls domain name: {err}"),
            )
        })?;
        let socket = TcpStream::connect(address).await?;
        let socket = connector.connect(domain, socket).await?;
        Ok(Self::Mqtts(Box::new(socket)))
    }

    async fn new_ws(address: &SocketAddr, ws_connect: &WsConnect) -> Result<Self, Error> {
        let ws_url = format!("ws://{}{}", address, &ws_connect.path);
        let socket = TcpStream::connect(address).await?;
        let (ws_stream, _response) = tokio_tungstenite::client_async(ws_url, socket)
            .await
            .map_err(Error::from)?;
        Ok(Self::Ws(Box::new(ws_stream)))
    }

    async fn new_uds(uds_connect: &UdsConnect) -> Result<Self, Error> {
        let socket = UnixStream::connect(&uds_connect.sock_path).await?;
        Ok(Self::Uds(socket))
    }

    /// Wrap an in-process duplex pipe.
    #[must_use]
    pub fn from_duplex(stream: DuplexStream) -> Self {
        Self::Mem(stream)
    }

    /// Read available bytes into `buf`. Returns 0 at end of stream.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::TransportError, "Stream is not open")),
            Self::Mqtt(socket) => Ok(socket.read_buf(buf).await?),
            Self::Mqtts(tls_socket) => Ok(tls_socket.read_buf(buf).await?),
            Self::Uds(socket) => Ok(socket.read_buf(buf).await?),
            Self::Mem(pipe) => Ok(pipe.read_buf(buf).await?),
            Self::Ws(ws) => match ws.next().await {
                Some(Ok(msg)) => {
                    let data = msg.into_data();
                    buf.extend_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(err)) => Err(err.into()),
                None => Ok(0),
            },
        }
    }

    /// Write all of `buf` to the transport.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::TransportError, "Stream is not open")),
            Self::Mqtt(socket) => Ok(socket.write_all(buf).await?),
            Self::Mqtts(tls_socket) => Ok(tls_socket.write_all(buf).await?),
            Self::Uds(socket) => Ok(socket.write_all(buf).await?),
            Self::Mem(pipe) => Ok(pipe.write_all(buf).await?),
            Self::Ws(ws) => {
                let msg = Message::binary(buf.to_vec());
                ws.send(msg).await.map_err(Error::from)
            }
        }
    }

    /// Close the transport. Errors are ignored, the connection is going away.
    pub async fn close(&mut self) {
        match self {
            Self::None => (),
            Self::Mqtt(socket) => {
                let _ = socket.shutdown().await;
            }
            Self::Mqtts(tls_socket) => {
                let _ = tls_socket.shutdown().await;
            }
            Self::Uds(socket) => {
                let _ = socket.shutdown().await;
            }
            Self::Mem(pipe) => {
                let _ = pipe.shutdown().await;
            }
            Self::Ws(ws) => {
                let _ = (**ws).close(None).await;
            }
        }
        *self = Self::None;
    }
}
