// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use codec::{
    AuthPacket, BinaryData, ByteArray, ConnectAckPacket, ConnectPacket, DisconnectPacket,
    FrameReader, Packet, PacketId, PingRequestPacket, Property, ProtocolVersion, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    ReasonCode, StringData, StringPairData, SubscribePacket, SubscribeTopic, U16Data, U32Data,
    UnsubscribePacket, VarInt,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::alias::{AliasAssignment, TopicAliasRegistry};
use crate::auth::{AuthChallenge, AuthStep, AuthWorkflow};
use crate::commands::{ClientToEngineCmd, PublishResult};
use crate::connect_options::ConnectOptions;
use crate::dispatcher::{Dispatcher, PublishMessage};
use crate::error::{Error, ErrorKind};
use crate::inflight::QosState;
use crate::session::SessionState;
use crate::status::{CloseReason, ConnectionState};
use crate::stream::Stream;

/// Default inbound packet size ceiling when the caller sets none.
const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024 * 1024;

/// Deadline used while keep alive is disabled.
const IDLE_DEADLINE: Duration = Duration::from_secs(3600);

/// Limits reported by the server in CONNACK, constraining all subsequent
/// operations on this connection.
#[derive(Debug, Clone)]
pub(crate) struct ServerLimits {
    receive_maximum: u16,
    maximum_qos: QoS,
    retain_available: bool,
    maximum_packet_size: Option<u32>,
    topic_alias_maximum: u16,
    wildcard_subscription_available: bool,
    subscription_identifier_available: bool,
    shared_subscription_available: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            receive_maximum: Property::default_receive_maximum(),
            maximum_qos: Property::default_maximum_qos(),
            retain_available: Property::default_retain_available(),
            maximum_packet_size: None,
            topic_alias_maximum: Property::default_topic_alias_maximum(),
            wildcard_subscription_available: Property::default_wildcard_subscription_available(),
            subscription_identifier_available: Property::default_subscription_identifier_available(
            ),
            shared_subscription_available: Property::default_shared_subscription_available(),
        }
    }
}

/// Result of the CONNECT handshake, surfaced to the caller of `connect`.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    /// Effective client id. When the server assigns one, the assigned value
    /// replaces the configured id.
    pub client_id: String,

    /// The server resumed session state from a previous connection.
    pub session_present: bool,
}

/// A publish accepted from a caller but not yet admitted to the wire by the
/// flow control window.
struct QueuedPublish {
    topic: String,
    qos: QoS,
    retain: bool,
    payload: Vec<u8>,
    tx: Option<oneshot::Sender<PublishResult>>,
}

/// The per-connection protocol engine.
///
/// The engine task exclusively owns the transport stream and every piece of
/// mutable protocol state; the application talks to it through the command
/// inbox. No locks anywhere.
pub(crate) struct Engine {
    options: ConnectOptions,
    version: ProtocolVersion,
    stream: Stream,
    reader: FrameReader,
    state: ConnectionState,
    session: SessionState,
    aliases: TopicAliasRegistry,
    server: ServerLimits,
    dispatcher: Dispatcher,
    pending_publishes: VecDeque<QueuedPublish>,
    cmd_rx: mpsc::Receiver<ClientToEngineCmd>,
    auth_workflow: Option<AuthWorkflow>,

    effective_client_id: String,
    effective_keep_alive: Duration,
    session_present: bool,

    last_outbound: Instant,
    last_inbound: Instant,
    ping_sent_at: Option<Instant>,
}

impl Engine {
    pub fn new(
        options: ConnectOptions,
        stream: Stream,
        cmd_rx: mpsc::Receiver<ClientToEngineCmd>,
        auth_workflow: Option<AuthWorkflow>,
    ) -> Self {
        let max_packet_size = options
            .max_packet_size()
            .map_or(DEFAULT_MAX_PACKET_SIZE, |size| size as usize);
        let now = Instant::now();
        Self {
            version: options.version(),
            effective_client_id: options.client_id().to_string(),
            effective_keep_alive: options.keep_alive(),
            aliases: TopicAliasRegistry::new(0, options.topic_alias_maximum()),
            reader: FrameReader::new(max_packet_size),
            stream,
            state: ConnectionState::Disconnected,
            session: SessionState::new(),
            server: ServerLimits::default(),
            dispatcher: Dispatcher::new(),
            pending_publishes: VecDeque::new(),
            cmd_rx,
            auth_workflow,
            session_present: false,
            last_outbound: now,
            last_inbound: now,
            ping_sent_at: None,
            options,
        }
    }

    /// Entry point of the engine task: perform the CONNECT handshake, report
    /// the result, then run the steady state loop.
    pub async fn run(mut self, ready_tx: oneshot::Sender<Result<ConnectInfo, Error>>) {
        match self.establish(false).await {
            Ok(info) => {
                let _ = ready_tx.send(Ok(info));
            }
            Err(err) => {
                self.stream.close().await;
                self.state = ConnectionState::Closed(CloseReason::Error(err.kind()));
                let _ = ready_tx.send(Err(err));
                return;
            }
        }

        self.run_loop().await;
    }

    /// Open the transport and drive CONNECT to a final CONNACK, iterating
    /// the authentication exchange where the server requests it.
    async fn establish(&mut self, reconnect: bool) -> Result<ConnectInfo, Error> {
        self.state = ConnectionState::Connecting;
        self.reader.clear();
        self.aliases.reset();
        self.ping_sent_at = None;

        if matches!(self.stream, Stream::None) {
            self.stream =
                Stream::connect(self.options.address(), self.options.connect_type()).await?;
        }

        let connect_packet = self.build_connect(reconnect)?;
        self.send_packet(&Packet::Connect(connect_packet)).await?;

        let deadline = Instant::now() + self.options.connect_timeout();
        loop {
            let frame = tokio::time::timeout_at(deadline, self.read_frame())
                .await
                .map_err(|_elapsed| {
                    Error::new(ErrorKind::Timeout, "No CONNACK within connect timeout")
                })??;
            let mut ba = ByteArray::new(&frame);
            let packet = Packet::decode(&mut ba, self.version)?;
            match packet {
                Packet::ConnectAck(ack) => {
                    if ack.reason_code() == Some(ReasonCode::ContinueAuthentication) {
                        self.answer_auth_challenge(ack.properties().authentication_data())
                            .await?;
                        continue;
                    }
                    return self.finish_handshake(&ack).await;
                }
                Packet::Auth(auth) => {
                    if auth.reason_code() != ReasonCode::ContinueAuthentication {
                        return Err(Error::new(
                            ErrorKind::ProtocolError,
                            "Unexpected AUTH reason during handshake",
                        ));
                    }
                    self.answer_auth_challenge(auth.properties().authentication_data())
                        .await?;
                }
                _other => {
                    return Err(Error::new(
                        ErrorKind::ProtocolError,
                        "Expected CONNACK as the first packet from server",
                    ));
                }
            }
        }
    }

    /// Run one authentication workflow step and send the resulting AUTH
    /// packet, or abort the connection attempt.
    async fn answer_auth_challenge(&mut self, data: Option<&[u8]>) -> Result<(), Error> {
        let Some(method) = self.options.auth_method().map(ToString::to_string) else {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "Server requested authentication without a configured method",
            ));
        };
        let challenge = AuthChallenge {
            method: method.clone(),
            data: data.map(<[u8]>::to_vec),
        };
        let step = match self.auth_workflow.as_mut() {
            Some(workflow) => workflow(&challenge),
            None => AuthStep::Abort,
        };
        match step {
            AuthStep::Continue { data } => {
                let mut packet = AuthPacket::new(ReasonCode::ContinueAuthentication);
                packet
                    .properties_mut()
                    .push(Property::AuthenticationMethod(StringData::from(&method)?))?;
                if let Some(data) = data {
                    packet
                        .properties_mut()
                        .push(Property::AuthenticationData(BinaryData::from_slice(&data)?))?;
                }
                self.send_packet(&Packet::Auth(packet)).await
            }
            AuthStep::Abort => {
                let packet = DisconnectPacket::new_v5(ReasonCode::NotAuthorized);
                let _ = self.send_packet(&Packet::Disconnect(packet)).await;
                Err(Error::new(
                    ErrorKind::ConnectError,
                    "Authentication workflow aborted the exchange",
                ))
            }
        }
    }

    /// Apply a final CONNACK: capture server limits, adopt the assigned
    /// client id, resume or reset the session, enter `Active`.
    async fn finish_handshake(&mut self, ack: &ConnectAckPacket) -> Result<ConnectInfo, Error> {
        if !ack.accepted() {
            let message = match (ack.return_code(), ack.reason_code()) {
                (Some(return_code), _) => format!("Connection refused: {return_code:?}"),
                (_, Some(reason_code)) => format!("Connection refused: {reason_code:?}"),
                _ => "Connection refused".to_string(),
            };
            return Err(Error::from_string(ErrorKind::ConnectError, message));
        }

        self.apply_connack(ack);
        self.session_present = ack.session_present();

        if ack.session_present() {
            let packets = self.session.replay_packets()?;
            for packet in &packets {
                self.send_packet(packet).await?;
            }
            // Refresh replay transmission state.
            let ids: Vec<PacketId> = packets
                .iter()
                .filter_map(|packet| match packet {
                    Packet::PublishRelease(release) => Some(release.packet_id()),
                    _ => None,
                })
                .collect();
            for id in ids {
                self.session.outbound_mut().transition(id, QosState::ReleaseSent);
            }
        } else {
            // The server holds no state for us; pending flows cannot complete.
            self.session.reset();
        }

        let now = Instant::now();
        self.last_inbound = now;
        self.last_outbound = now;
        self.state = ConnectionState::Active { since: now.into_std() };
        log::info!(
            "engine: connected as {} (session_present={})",
            self.effective_client_id,
            ack.session_present()
        );

        Ok(ConnectInfo {
            client_id: self.effective_client_id.clone(),
            session_present: ack.session_present(),
        })
    }

    fn apply_connack(&mut self, ack: &ConnectAckPacket) {
        let props = ack.properties();
        self.server = ServerLimits {
            receive_maximum: props
                .receive_maximum()
                .unwrap_or_else(Property::default_receive_maximum),
            maximum_qos: props.maximum_qos().unwrap_or_else(Property::default_maximum_qos),
            retain_available: props
                .retain_available()
                .unwrap_or_else(Property::default_retain_available),
            maximum_packet_size: props.maximum_packet_size(),
            topic_alias_maximum: props
                .topic_alias_maximum()
                .unwrap_or_else(Property::default_topic_alias_maximum),
            wildcard_subscription_available: props
                .wildcard_subscription_available()
                .unwrap_or_else(Property::default_wildcard_subscription_available),
            subscription_identifier_available: props
                .subscription_identifier_available()
                .unwrap_or_else(Property::default_subscription_identifier_available),
            shared_subscription_available: props
                .shared_subscription_available()
                .unwrap_or_else(Property::default_shared_subscription_available),
        };
        // The Server Keep Alive overrides the value sent in CONNECT
        // [MQTT-3.2.2-21].
        if let Some(keep_alive) = props.server_keep_alive() {
            self.effective_keep_alive = Duration::from_secs(u64::from(keep_alive));
        }
        if let Some(client_id) = props.assigned_client_identifier() {
            self.effective_client_id = client_id.to_string();
        }
        self.aliases.set_outbound_max(self.server.topic_alias_maximum);
    }

    fn build_connect(&self, reconnect: bool) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(self.options.client_id())?;
        // Resuming an interrupted session must not discard server state.
        packet.set_clean_session(!reconnect && self.options.clean_session());
        #[allow(clippy::cast_possible_truncation)]
        packet.set_keep_alive(self.options.keep_alive().as_secs().min(u64::from(u16::MAX)) as u16);
        packet.set_username(self.options.username())?;
        packet.set_password(self.options.password())?;
        packet.set_will(self.options.will().cloned());

        if self.version.is_v5() {
            let props = packet.properties_mut();
            if let Some(session_expiry) = self.options.session_expiry() {
                props.push(Property::SessionExpiryInterval(U32Data::new(session_expiry)))?;
            }
            if self.options.receive_maximum() != Property::default_receive_maximum() {
                props.push(Property::ReceiveMaximum(U16Data::new(
                    self.options.receive_maximum(),
                )))?;
            }
            if let Some(max_packet_size) = self.options.max_packet_size() {
                props.push(Property::MaximumPacketSize(U32Data::new(max_packet_size)))?;
            }
            if self.options.topic_alias_maximum() > 0 {
                props.push(Property::TopicAliasMaximum(U16Data::new(
                    self.options.topic_alias_maximum(),
                )))?;
            }
            for (key, value) in self.options.user_properties() {
                props.push(Property::UserProperty(StringPairData::new(key, value)?))?;
            }
            if let Some(method) = self.options.auth_method() {
                props.push(Property::AuthenticationMethod(StringData::from(method)?))?;
                if let Some(data) = self.options.auth_data() {
                    props.push(Property::AuthenticationData(BinaryData::from_slice(data)?))?;
                }
            }
        }
        Ok(packet)
    }

    /// Steady state: multiplex the command inbox, the transport and the keep
    /// alive timers until the connection closes.
    async fn run_loop(&mut self) {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        loop {
            if self.state.is_closed() {
                return;
            }

            let deadline = self.next_deadline();
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // Every client handle is gone; drain and close.
                        self.graceful_shutdown(None).await;
                        return;
                    }
                },
                ret = self.stream.read_buf(&mut buf) => match ret {
                    Ok(0) => self.on_transport_down("Connection closed by peer").await,
                    Ok(_n) => {
                        self.last_inbound = Instant::now();
                        self.reader.extend(&buf);
                        buf.clear();
                        self.drain_frames().await;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        self.on_transport_down(&message).await;
                    }
                },
                () = tokio::time::sleep_until(deadline) => self.on_timer().await,
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let keep_alive = self.effective_keep_alive;
        if keep_alive.is_zero() {
            return Instant::now() + IDLE_DEADLINE;
        }

        // PINGREQ is due keep-alive after the last outbound packet.
        let mut deadline = self.last_outbound + keep_alive;
        if let Some(sent_at) = self.ping_sent_at {
            deadline = deadline.min(sent_at + self.options.ping_timeout());
        }
        // Grace interval: something must arrive within 1.5 keep-alives.
        deadline.min(self.last_inbound + keep_alive * 3 / 2)
    }

    async fn on_timer(&mut self) {
        let keep_alive = self.effective_keep_alive;
        if keep_alive.is_zero() {
            return;
        }
        let now = Instant::now();

        if let Some(sent_at) = self.ping_sent_at {
            if now >= sent_at + self.options.ping_timeout() {
                self.close_with_error(Error::new(
                    ErrorKind::Timeout,
                    "No PINGRESP within ping timeout",
                ))
                .await;
                return;
            }
        }
        if now >= self.last_inbound + keep_alive * 3 / 2 {
            self.close_with_error(Error::new(
                ErrorKind::Timeout,
                "No packet within keep alive grace interval",
            ))
            .await;
            return;
        }
        if self.ping_sent_at.is_none() && now >= self.last_outbound + keep_alive {
            log::debug!("engine: sending PINGREQ");
            let packet = Packet::PingRequest(PingRequestPacket::new());
            if let Err(err) = self.send_packet(&packet).await {
                let message = err.to_string();
                self.on_transport_down(&message).await;
                return;
            }
            self.ping_sent_at = Some(Instant::now());
        }
    }

    async fn handle_command(&mut self, cmd: ClientToEngineCmd) {
        match cmd {
            ClientToEngineCmd::Publish {
                topic,
                qos,
                retain,
                payload,
                tx,
            } => self.on_publish_request(topic, qos, retain, payload, tx).await,
            ClientToEngineCmd::Subscribe {
                topics,
                subscription_id,
                tx,
            } => self.on_subscribe_request(topics, subscription_id, tx).await,
            ClientToEngineCmd::Unsubscribe { topics, tx } => {
                self.on_unsubscribe_request(topics, tx).await;
            }
            ClientToEngineCmd::AddListener {
                name,
                subscription_ids,
                tx,
            } => {
                let rx = self.dispatcher.add_listener(&name, subscription_ids);
                let _ = tx.send(Ok(rx));
            }
            ClientToEngineCmd::RemoveListener { name, tx } => {
                let removed = self.dispatcher.remove_listener(&name);
                let result = if removed {
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::ConfigError, "No such listener"))
                };
                let _ = tx.send(result);
            }
            ClientToEngineCmd::Disconnect { tx } => self.graceful_shutdown(Some(tx)).await,
            ClientToEngineCmd::Status { tx } => {
                let _ = tx.send(self.state);
            }
        }
    }

    fn refuse_reason(&self) -> Option<Error> {
        match self.state {
            ConnectionState::Active { .. } => None,
            ConnectionState::ShuttingDown => Some(Error::new(
                ErrorKind::ClientShuttingDown,
                "Client is shutting down",
            )),
            _ => Some(Error::new(ErrorKind::ClientClosed, "Client is not connected")),
        }
    }

    async fn on_publish_request(
        &mut self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
        tx: oneshot::Sender<PublishResult>,
    ) {
        if let Some(err) = self.refuse_reason() {
            let _ = tx.send(Err(err));
            return;
        }
        if qos > self.server.maximum_qos {
            let _ = tx.send(Err(Error::new(
                ErrorKind::NotSupported,
                "QoS exceeds the server's Maximum QoS",
            )));
            return;
        }
        if retain && !self.server.retain_available {
            let _ = tx.send(Err(Error::new(
                ErrorKind::NotSupported,
                "Server does not support retained messages",
            )));
            return;
        }

        if qos == QoS::AtMostOnce {
            let result = self.send_qos0_publish(&topic, retain, &payload).await;
            let _ = tx.send(result.map(|()| None));
            return;
        }

        // FIFO admission keeps per-caller ordering while the flow control
        // window is full.
        self.pending_publishes.push_back(QueuedPublish {
            topic,
            qos,
            retain,
            payload,
            tx: Some(tx),
        });
        self.admit_pending().await;
    }

    async fn send_qos0_publish(
        &mut self,
        topic: &str,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut packet = PublishPacket::new(topic, QoS::AtMostOnce, payload)?;
        packet.set_retain(retain);
        let wire = self.apply_outbound_alias(&packet)?;
        let buf = self.encode_checked(&Packet::Publish(wire))?;
        self.send_encoded(&buf).await
    }

    /// Admit queued publishes while the flow control window has room.
    async fn admit_pending(&mut self) {
        while self.session.outbound_in_flight() < usize::from(self.server.receive_maximum) {
            let Some(queued) = self.pending_publishes.pop_front() else {
                break;
            };
            self.start_publish(queued).await;
        }
    }

    async fn start_publish(&mut self, mut queued: QueuedPublish) {
        let tx = queued.tx.take();
        // A caller that dropped its completion handle before transmission
        // cancelled the request; nothing was sent, nothing is owed.
        if matches!(&tx, Some(tx) if tx.is_closed()) {
            return;
        }

        let prepared = self.prepare_publish(&queued);
        let (packet_id, base, buf) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Some(tx) = tx {
                    let _ = tx.send(Err(err));
                }
                return;
            }
        };

        // The inflight entry must exist before the bytes hit the wire, so a
        // fast acknowledgement always finds it.
        self.session
            .outbound_mut()
            .insert(packet_id, base, QosState::PublishSent, tx);
        if let Err(err) = self.send_encoded(&buf).await {
            // The entry stays inflight and replays after a session resume.
            // The next transport read surfaces the failure to the reconnect
            // path.
            log::warn!("engine: publish write failed: {err}");
        }
    }

    /// Allocate an id and encode the wire form of a queued publish.
    fn prepare_publish(
        &mut self,
        queued: &QueuedPublish,
    ) -> Result<(PacketId, PublishPacket, Vec<u8>), Error> {
        let packet_id = self.session.allocator_mut().allocate()?;
        let result = (|| -> Result<(PacketId, PublishPacket, Vec<u8>), Error> {
            let mut base = PublishPacket::new(&queued.topic, queued.qos, &queued.payload)?;
            base.set_retain(queued.retain);
            base.set_packet_id(packet_id);
            let wire = self.apply_outbound_alias(&base)?;
            let buf = self.encode_checked(&Packet::Publish(wire))?;
            Ok((packet_id, base, buf))
        })();
        if result.is_err() {
            self.session.allocator_mut().release(packet_id);
        }
        result
    }

    /// Swap the topic name for a topic alias where the server allows it.
    fn apply_outbound_alias(&mut self, packet: &PublishPacket) -> Result<PublishPacket, Error> {
        let mut wire = packet.clone();
        if !self.version.is_v5() || self.server.topic_alias_maximum == 0 {
            return Ok(wire);
        }
        match self.aliases.assign_outbound(packet.topic()) {
            Some(AliasAssignment::Known(alias)) => {
                wire.clear_topic();
                wire.properties_mut()
                    .push(Property::TopicAlias(U16Data::new(alias)))?;
            }
            Some(AliasAssignment::Fresh(alias)) => {
                wire.properties_mut()
                    .push(Property::TopicAlias(U16Data::new(alias)))?;
            }
            None => {}
        }
        Ok(wire)
    }

    /// Encode a packet and enforce the server's Maximum Packet Size.
    fn encode_checked(&self, packet: &Packet) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf, self.version)?;
        if let Some(max) = self.server.maximum_packet_size {
            if buf.len() > max as usize {
                return Err(Error::new(
                    ErrorKind::PacketTooLarge,
                    "Packet exceeds the server's Maximum Packet Size",
                ));
            }
        }
        Ok(buf)
    }

    async fn on_subscribe_request(
        &mut self,
        topics: Vec<SubscribeTopic>,
        subscription_id: Option<usize>,
        tx: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    ) {
        if let Some(err) = self.refuse_reason() {
            let _ = tx.send(Err(err));
            return;
        }
        if topics.is_empty() {
            let _ = tx.send(Err(Error::new(
                ErrorKind::ConfigError,
                "Subscribe needs at least one topic filter",
            )));
            return;
        }
        if !self.server.wildcard_subscription_available
            && topics
                .iter()
                .any(|topic| topic.topic().contains(|c| c == '#' || c == '+'))
        {
            let _ = tx.send(Err(Error::new(
                ErrorKind::NotSupported,
                "Server does not support wildcard subscriptions",
            )));
            return;
        }
        if !self.server.shared_subscription_available
            && topics.iter().any(|topic| topic.topic().starts_with("$share/"))
        {
            let _ = tx.send(Err(Error::new(
                ErrorKind::NotSupported,
                "Server does not support shared subscriptions",
            )));
            return;
        }
        let mut subscription_id_value = None;
        if let Some(id) = subscription_id {
            if !self.version.is_v5() {
                let _ = tx.send(Err(Error::new(
                    ErrorKind::ConfigError,
                    "Subscription identifiers require v5",
                )));
                return;
            }
            if !self.server.subscription_identifier_available {
                let _ = tx.send(Err(Error::new(
                    ErrorKind::NotSupported,
                    "Server does not support subscription identifiers",
                )));
                return;
            }
            // The Subscription Identifier can have the value of 1 to
            // 268,435,455.
            match VarInt::from(id) {
                Ok(value) if id > 0 => subscription_id_value = Some(value),
                _ => {
                    let _ = tx.send(Err(Error::new(
                        ErrorKind::ConfigError,
                        "Subscription identifier out of range",
                    )));
                    return;
                }
            }
        }

        let packet_id = match self.session.allocator_mut().allocate() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        };
        let mut packet = SubscribePacket::with_topics(packet_id, topics);
        if let Some(value) = subscription_id_value {
            if let Err(err) = packet
                .properties_mut()
                .push(Property::SubscriptionIdentifier(value))
                .map_err(Error::from)
            {
                self.session.allocator_mut().release(packet_id);
                let _ = tx.send(Err(err));
                return;
            }
        }
        match self.encode_checked(&Packet::Subscribe(packet)) {
            Ok(buf) => {
                self.dispatcher.insert_subscribe(packet_id, tx);
                if let Err(err) = self.send_encoded(&buf).await {
                    self.dispatcher.cancel(packet_id);
                    self.session.allocator_mut().release(packet_id);
                    let message = err.to_string();
                    self.on_transport_down(&message).await;
                }
            }
            Err(err) => {
                self.session.allocator_mut().release(packet_id);
                let _ = tx.send(Err(err));
            }
        }
    }

    async fn on_unsubscribe_request(
        &mut self,
        topics: Vec<String>,
        tx: oneshot::Sender<Result<Vec<ReasonCode>, Error>>,
    ) {
        if let Some(err) = self.refuse_reason() {
            let _ = tx.send(Err(err));
            return;
        }

        let mut sub_topics = Vec::with_capacity(topics.len());
        for topic in &topics {
            match codec::SubTopic::new(topic) {
                Ok(sub_topic) => sub_topics.push(sub_topic),
                Err(err) => {
                    let _ = tx.send(Err(err.into()));
                    return;
                }
            }
        }
        if sub_topics.is_empty() {
            let _ = tx.send(Err(Error::new(
                ErrorKind::ConfigError,
                "Unsubscribe needs at least one topic filter",
            )));
            return;
        }

        let packet_id = match self.session.allocator_mut().allocate() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        };
        let packet = UnsubscribePacket::with_topics(packet_id, sub_topics);
        match self.encode_checked(&Packet::Unsubscribe(packet)) {
            Ok(buf) => {
                self.dispatcher.insert_unsubscribe(packet_id, tx);
                if let Err(err) = self.send_encoded(&buf).await {
                    self.dispatcher.cancel(packet_id);
                    self.session.allocator_mut().release(packet_id);
                    let message = err.to_string();
                    self.on_transport_down(&message).await;
                }
            }
            Err(err) => {
                self.session.allocator_mut().release(packet_id);
                let _ = tx.send(Err(err));
            }
        }
    }

    /// Decode and handle every complete frame sitting in the read buffer.
    async fn drain_frames(&mut self) {
        loop {
            if self.state.is_closed() {
                return;
            }
            let frame = match self.reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(codec::DecodeError::PacketTooLarge) => {
                    self.protocol_close(ReasonCode::PacketTooLarge, "Inbound packet too large")
                        .await;
                    return;
                }
                Err(err) => {
                    let message = format!("Malformed frame: {err:?}");
                    self.protocol_close(ReasonCode::MalformedPacket, &message).await;
                    return;
                }
            };
            self.handle_frame(&frame).await;
        }
    }

    async fn handle_frame(&mut self, frame: &Bytes) {
        let mut ba = ByteArray::new(frame);
        let packet = match Packet::decode(&mut ba, self.version) {
            Ok(packet) => packet,
            Err(err) => {
                let message = format!("Malformed packet: {err:?}");
                self.protocol_close(ReasonCode::MalformedPacket, &message).await;
                return;
            }
        };

        match packet {
            Packet::Publish(publish) => self.on_inbound_publish(publish).await,
            Packet::PublishAck(ack) => self.on_publish_ack(&ack).await,
            Packet::PublishReceived(rec) => self.on_publish_received(&rec).await,
            Packet::PublishRelease(rel) => self.on_publish_release(&rel).await,
            Packet::PublishComplete(comp) => self.on_publish_complete(&comp).await,
            Packet::SubscribeAck(ack) => {
                let packet_id = ack.packet_id();
                if self
                    .dispatcher
                    .resolve_subscribe(packet_id, Ok(ack.reasons().to_vec()))
                {
                    self.session.allocator_mut().release(packet_id);
                } else {
                    self.protocol_close(
                        ReasonCode::ProtocolError,
                        "SUBACK with unknown packet id",
                    )
                    .await;
                }
            }
            Packet::UnsubscribeAck(ack) => {
                let packet_id = ack.packet_id();
                if self
                    .dispatcher
                    .resolve_unsubscribe(packet_id, Ok(ack.reasons().to_vec()))
                {
                    self.session.allocator_mut().release(packet_id);
                } else {
                    self.protocol_close(
                        ReasonCode::ProtocolError,
                        "UNSUBACK with unknown packet id",
                    )
                    .await;
                }
            }
            Packet::PingResponse(_) => {
                self.ping_sent_at = None;
            }
            Packet::Disconnect(disconnect) => {
                let reason = disconnect.reason_code();
                log::warn!("engine: server disconnected: {reason:?}");
                let err = Error::from_string(
                    ErrorKind::ClientClosed,
                    format!("Server closed the connection: {reason:?}"),
                );
                self.fail_all_waiters(&err);
                self.stream.close().await;
                self.state = ConnectionState::Closed(CloseReason::ServerInitiated(reason));
            }
            Packet::Auth(auth) => self.on_reauth(&auth).await,
            Packet::ConnectAck(_)
            | Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingRequest(_) => {
                self.protocol_close(
                    ReasonCode::ProtocolError,
                    "Unexpected packet type from server",
                )
                .await;
            }
        }
    }

    async fn on_inbound_publish(&mut self, publish: PublishPacket) {
        let mut topic = publish.topic().to_string();
        if self.version.is_v5() {
            if let Some(alias) = publish.properties().topic_alias() {
                match self.aliases.resolve_inbound(alias, &topic) {
                    Some(resolved) => topic = resolved,
                    None => {
                        self.protocol_close(
                            ReasonCode::TopicAliasInvalid,
                            "Unknown or out-of-range inbound topic alias",
                        )
                        .await;
                        return;
                    }
                }
            } else if topic.is_empty() {
                self.protocol_close(
                    ReasonCode::ProtocolError,
                    "Empty topic without topic alias",
                )
                .await;
                return;
            }
        }

        let msg = PublishMessage {
            topic,
            payload: publish.message().to_vec(),
            qos: publish.qos(),
            retain: publish.retain(),
            dup: publish.dup(),
            properties: publish.properties().clone(),
        };

        match publish.qos() {
            QoS::AtMostOnce => self.dispatcher.deliver(&msg),
            QoS::AtLeastOnce => {
                self.dispatcher.deliver(&msg);
                let ack = if self.version.is_v5() {
                    PublishAckPacket::new_v5(publish.packet_id(), ReasonCode::Success)
                } else {
                    PublishAckPacket::new(publish.packet_id())
                };
                if let Err(err) = self.send_packet(&Packet::PublishAck(ack)).await {
                    let message = err.to_string();
                    self.on_transport_down(&message).await;
                }
            }
            QoS::ExactOnce => {
                let packet_id = publish.packet_id();
                let duplicate = !self.session.dedup_insert(packet_id);
                if duplicate {
                    // Deliver exactly once; still acknowledge the retransmission.
                    log::debug!("engine: duplicate QoS 2 publish {packet_id}");
                } else {
                    // Accepting this publish must fit our advertised window.
                    if self.session.inbound_in_flight()
                        > usize::from(self.options.receive_maximum())
                    {
                        self.session.dedup_remove(packet_id);
                        self.protocol_close(
                            ReasonCode::ReceiveMaximumExceeded,
                            "Inbound QoS 2 window exceeded",
                        )
                        .await;
                        return;
                    }
                    self.dispatcher.deliver(&msg);
                }
                let rec = if self.version.is_v5() {
                    PublishReceivedPacket::new_v5(packet_id, ReasonCode::Success)
                } else {
                    PublishReceivedPacket::new(packet_id)
                };
                if let Err(err) = self.send_packet(&Packet::PublishReceived(rec)).await {
                    let message = err.to_string();
                    self.on_transport_down(&message).await;
                }
            }
        }
    }

    async fn on_publish_ack(&mut self, ack: &PublishAckPacket) {
        let packet_id = ack.packet_id();
        let Some(mut entry) = self.session.outbound_mut().remove(packet_id) else {
            self.protocol_close(ReasonCode::ProtocolError, "PUBACK with unknown packet id")
                .await;
            return;
        };
        if entry.packet().qos() != QoS::AtLeastOnce || entry.state() != QosState::PublishSent {
            self.protocol_close(ReasonCode::ProtocolError, "PUBACK in unexpected context")
                .await;
            return;
        }

        self.session.allocator_mut().release(packet_id);
        if let Some(waiter) = entry.take_waiter() {
            let reason = ack.reason_code();
            let result = match reason {
                Some(code) if code.is_error() => Err(Error::from_string(
                    ErrorKind::OperationFailed,
                    format!("Publish rejected: {code:?}"),
                )),
                _ => Ok(reason),
            };
            let _ = waiter.send(result);
        }
        self.admit_pending().await;
    }

    async fn on_publish_received(&mut self, rec: &PublishReceivedPacket) {
        let packet_id = rec.packet_id();
        let known = matches!(
            self.session.outbound().get(packet_id),
            Some(entry)
                if entry.packet().qos() == QoS::ExactOnce
                    && entry.state() == QosState::PublishSent
        );
        if !known {
            self.protocol_close(ReasonCode::ProtocolError, "PUBREC in unexpected context")
                .await;
            return;
        }

        if let Some(code) = rec.reason_code() {
            if code.is_error() {
                // A failed PUBREC ends the flow; no PUBREL follows.
                if let Some(mut entry) = self.session.outbound_mut().remove(packet_id) {
                    self.session.allocator_mut().release(packet_id);
                    if let Some(waiter) = entry.take_waiter() {
                        let _ = waiter.send(Err(Error::from_string(
                            ErrorKind::OperationFailed,
                            format!("Publish rejected: {code:?}"),
                        )));
                    }
                }
                self.admit_pending().await;
                return;
            }
        }

        self.session
            .outbound_mut()
            .transition(packet_id, QosState::ReleaseSent);
        let rel = if self.version.is_v5() {
            PublishReleasePacket::new_v5(packet_id, ReasonCode::Success)
        } else {
            PublishReleasePacket::new(packet_id)
        };
        if let Err(err) = self.send_packet(&Packet::PublishRelease(rel)).await {
            let message = err.to_string();
            self.on_transport_down(&message).await;
        }
    }

    async fn on_publish_release(&mut self, rel: &PublishReleasePacket) {
        let packet_id = rel.packet_id();
        let comp = if self.session.dedup_remove(packet_id) {
            if self.version.is_v5() {
                PublishCompletePacket::new_v5(packet_id, ReasonCode::Success)
            } else {
                PublishCompletePacket::new(packet_id)
            }
        } else if self.version.is_v5() {
            // Unknown id answers 0x92 (Packet Identifier not found).
            PublishCompletePacket::new_v5(packet_id, ReasonCode::PacketIdentifierNotFound)
        } else {
            PublishCompletePacket::new(packet_id)
        };
        if let Err(err) = self.send_packet(&Packet::PublishComplete(comp)).await {
            let message = err.to_string();
            self.on_transport_down(&message).await;
        }
    }

    async fn on_publish_complete(&mut self, comp: &PublishCompletePacket) {
        let packet_id = comp.packet_id();
        let Some(mut entry) = self.session.outbound_mut().remove(packet_id) else {
            self.protocol_close(ReasonCode::ProtocolError, "PUBCOMP with unknown packet id")
                .await;
            return;
        };
        if entry.state() != QosState::ReleaseSent {
            self.protocol_close(ReasonCode::ProtocolError, "PUBCOMP in unexpected context")
                .await;
            return;
        }

        self.session.allocator_mut().release(packet_id);
        if let Some(waiter) = entry.take_waiter() {
            let _ = waiter.send(Ok(comp.reason_code()));
        }
        self.admit_pending().await;
    }

    /// Server-initiated re-authentication in steady state.
    async fn on_reauth(&mut self, auth: &AuthPacket) {
        if !matches!(
            auth.reason_code(),
            ReasonCode::ContinueAuthentication | ReasonCode::ReAuthenticate
        ) {
            self.protocol_close(ReasonCode::ProtocolError, "Unexpected AUTH reason code")
                .await;
            return;
        }
        match self
            .answer_auth_challenge(auth.properties().authentication_data())
            .await
        {
            Ok(()) => {}
            Err(err) => {
                self.close_with_error(err).await;
            }
        }
    }

    /// Drain inflight acknowledgements, send DISCONNECT and close.
    async fn graceful_shutdown(&mut self, tx: Option<oneshot::Sender<Result<(), Error>>>) {
        if self.state.is_closed() {
            if let Some(tx) = tx {
                let _ = tx.send(Ok(()));
            }
            return;
        }
        self.state = ConnectionState::ShuttingDown;

        // Queued publishes were never transmitted; they are cancellable.
        let refused = Error::new(ErrorKind::ClientShuttingDown, "Client is shutting down");
        while let Some(mut queued) = self.pending_publishes.pop_front() {
            if let Some(tx) = queued.tx.take() {
                let _ = tx.send(Err(refused.clone()));
            }
        }

        let deadline = Instant::now() + self.options.drain_timeout();
        while !(self.session.outbound().is_empty() && self.dispatcher.is_drained()) {
            let frame = match tokio::time::timeout_at(deadline, self.read_frame()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(_transport)) => break,
                Err(_elapsed) => {
                    log::warn!("engine: drain timeout expired with inflight packets");
                    break;
                }
            };
            self.handle_frame(&frame).await;
            if self.state.is_closed() {
                if let Some(tx) = tx {
                    let _ = tx.send(Ok(()));
                }
                return;
            }
        }

        let disconnect = if self.version.is_v5() {
            DisconnectPacket::new_v5(ReasonCode::Success)
        } else {
            DisconnectPacket::new()
        };
        let _ = self.send_packet(&Packet::Disconnect(disconnect)).await;
        self.stream.close().await;

        let leftover = Error::new(
            ErrorKind::ClientShuttingDown,
            "Connection closed before acknowledgement",
        );
        self.fail_all_waiters(&leftover);
        self.state = ConnectionState::Closed(CloseReason::Normal);
        if let Some(tx) = tx {
            let _ = tx.send(Ok(()));
        }
    }

    /// Transport failure or EOF: reconnect when the policy allows it,
    /// otherwise close.
    async fn on_transport_down(&mut self, message: &str) {
        if self.state.is_closed() {
            return;
        }
        log::warn!("engine: transport down: {message}");
        self.stream.close().await;

        // Correlated requests are not replayed; fail them now. Publish flows
        // stay inflight and replay after a session resume.
        let err = Error::new(ErrorKind::TransportError, message);
        self.dispatcher.fail_all(&err);

        let attempts = self.options.max_reconnect_attempts();
        for attempt in 1..=attempts {
            log::info!("engine: reconnect attempt {attempt}/{attempts}");
            match self.establish(true).await {
                Ok(_info) => {
                    self.admit_pending().await;
                    return;
                }
                Err(err) => {
                    log::warn!("engine: reconnect failed: {err}");
                    self.stream.close().await;
                }
            }
        }

        self.close_with_error(err).await;
    }

    /// Send DISCONNECT with `reason` (v5) and close the connection with a
    /// protocol error.
    async fn protocol_close(&mut self, reason: ReasonCode, message: &str) {
        log::error!("engine: protocol error: {message}");
        if self.version.is_v5() && !matches!(self.stream, Stream::None) {
            let packet = DisconnectPacket::new_v5(reason);
            let _ = self.send_packet(&Packet::Disconnect(packet)).await;
        }
        let kind = if reason == ReasonCode::PacketTooLarge {
            ErrorKind::PacketTooLarge
        } else {
            ErrorKind::ProtocolError
        };
        self.close_with_error(Error::new(kind, message)).await;
    }

    async fn close_with_error(&mut self, err: Error) {
        self.fail_all_waiters(&err);
        self.stream.close().await;
        self.state = ConnectionState::Closed(CloseReason::Error(err.kind()));
    }

    /// Connection death fans out to every outstanding waiter.
    fn fail_all_waiters(&mut self, err: &Error) {
        for mut entry in self.session.outbound_mut().drain() {
            if let Some(waiter) = entry.take_waiter() {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        while let Some(mut queued) = self.pending_publishes.pop_front() {
            if let Some(tx) = queued.tx.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
        self.dispatcher.fail_all(err);
    }

    /// Read bytes until one complete frame is buffered.
    async fn read_frame(&mut self) -> Result<Bytes, Error> {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        loop {
            if let Some(frame) = self.reader.next_frame()? {
                return Ok(frame);
            }
            buf.clear();
            let n = self.stream.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(Error::new(
                    ErrorKind::TransportError,
                    "Connection closed by peer",
                ));
            }
            self.last_inbound = Instant::now();
            self.reader.extend(&buf);
        }
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), Error> {
        let buf = self.encode_checked(packet)?;
        self.send_encoded(&buf).await
    }

    async fn send_encoded(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.stream.write_all(buf).await?;
        self.last_outbound = Instant::now();
        Ok(())
    }
}
