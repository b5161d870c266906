// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

#![allow(dead_code)]

use codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, ConnectReturnCode, FrameReader, Packet,
    ProtocolVersion, ReasonCode,
};
use luo::{AsyncClient, ConnectOptions, Stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

/// The broker side of a scripted exchange: reads and writes whole packets
/// over any byte stream.
pub struct PacketStream<S> {
    stream: S,
    reader: FrameReader,
    version: ProtocolVersion,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    pub fn new(stream: S, version: ProtocolVersion) -> Self {
        Self {
            stream,
            reader: FrameReader::new(256 * 1024),
            version,
        }
    }

    pub async fn read_packet(&mut self) -> Packet {
        loop {
            if let Some(frame) = self.reader.next_frame().unwrap() {
                let mut ba = ByteArray::new(&frame);
                return Packet::decode(&mut ba, self.version).unwrap();
            }
            let mut buf = vec![0_u8; 4096];
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the connection");
            self.reader.extend(&buf[..n]);
        }
    }

    pub async fn write_packet(&mut self, packet: &Packet) {
        let mut buf = Vec::new();
        packet.encode(&mut buf, self.version).unwrap();
        self.stream.write_all(&buf).await.unwrap();
    }

    /// Read the CONNECT packet and acknowledge it.
    pub async fn accept_connect(&mut self, session_present: bool) -> ConnectPacket {
        let packet = self.read_packet().await;
        let Packet::Connect(connect) = packet else {
            panic!("expected CONNECT, got {packet:?}");
        };
        let ack = match self.version {
            ProtocolVersion::V311 => {
                ConnectAckPacket::new_v3(session_present, ConnectReturnCode::Accepted)
            }
            ProtocolVersion::V5 => ConnectAckPacket::new_v5(session_present, ReasonCode::Success),
        };
        self.write_packet(&Packet::ConnectAck(ack)).await;
        connect
    }

    /// Acknowledge the CONNECT with a prepared CONNACK.
    pub async fn accept_connect_with(&mut self, ack: ConnectAckPacket) -> ConnectPacket {
        let packet = self.read_packet().await;
        let Packet::Connect(connect) = packet else {
            panic!("expected CONNECT, got {packet:?}");
        };
        self.write_packet(&Packet::ConnectAck(ack)).await;
        connect
    }
}

/// Connect a client to a scripted broker over an in-process duplex pipe.
pub async fn connect_scripted(
    mut options: ConnectOptions,
) -> (AsyncClient, PacketStream<DuplexStream>) {
    connect_scripted_with(&mut options, None).await
}

/// Same as [`connect_scripted`], with a custom CONNACK.
pub async fn connect_scripted_with(
    options: &mut ConnectOptions,
    connack: Option<ConnectAckPacket>,
) -> (AsyncClient, PacketStream<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut broker = PacketStream::new(server_io, options.version());

    let client_fut =
        AsyncClient::connect_with_stream(options.clone(), Stream::from_duplex(client_io), None);
    let broker_fut = async {
        match connack {
            Some(ack) => broker.accept_connect_with(ack).await,
            None => broker.accept_connect(false).await,
        }
    };
    let (client, _connect) = tokio::join!(client_fut, broker_fut);
    (client.unwrap(), broker)
}

/// Base options used by the scripted tests: keep alive off unless a test
/// needs it.
pub fn base_options(version: ProtocolVersion) -> ConnectOptions {
    let mut options = ConnectOptions::default();
    options
        .set_version(version)
        .set_client_id("scripted01")
        .set_keep_alive(std::time::Duration::ZERO);
    options
}
