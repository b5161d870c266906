// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{QoS, SubscribeTopic};
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};

use crate::auth::AuthWorkflow;
use crate::commands::{ClientToEngineCmd, PublishResult, SubscribeResult, UnsubscribeResult};
use crate::connect_options::ConnectOptions;
use crate::dispatcher::PublishMessage;
use crate::engine::Engine;
use crate::error::Error;
use crate::status::ConnectionState;
use crate::stream::Stream;

/// Capacity of the engine command inbox.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Asynchronous MQTT client.
///
/// Every operation posts one message into the engine inbox and awaits its
/// completion handle; the engine task owns all protocol state. Handles are
/// cheap to clone and share.
#[derive(Clone)]
pub struct AsyncClient {
    cmd_tx: mpsc::Sender<ClientToEngineCmd>,
    client_id: String,
    session_present: bool,
}

impl AsyncClient {
    /// Connect to the broker described by `options`.
    ///
    /// Returns after a successful CONNACK; the engine task keeps running in
    /// the background.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, the server refuses the
    /// connection, or no CONNACK arrives within the connect timeout.
    pub async fn connect(options: ConnectOptions) -> Result<Self, Error> {
        Self::connect_with_auth(options, None).await
    }

    /// Connect with an extended authentication workflow. v5 only.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::connect`].
    pub async fn connect_with_auth(
        options: ConnectOptions,
        auth_workflow: Option<AuthWorkflow>,
    ) -> Result<Self, Error> {
        Self::start(options, Stream::None, auth_workflow).await
    }

    /// Connect over an already established transport, like an in-process
    /// duplex pipe.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::connect`].
    pub async fn connect_with_stream(
        options: ConnectOptions,
        stream: Stream,
        auth_workflow: Option<AuthWorkflow>,
    ) -> Result<Self, Error> {
        Self::start(options, stream, auth_workflow).await
    }

    async fn start(
        options: ConnectOptions,
        stream: Stream,
        auth_workflow: Option<AuthWorkflow>,
    ) -> Result<Self, Error> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let engine = Engine::new(options, stream, cmd_rx, auth_workflow);
        tokio::spawn(engine.run(ready_tx));

        let info = ready_rx.await??;
        Ok(Self {
            cmd_tx,
            client_id: info.client_id,
            session_present: info.session_present,
        })
    }

    /// Effective client id of this connection.
    ///
    /// When the server assigned one in CONNACK, the assigned value is
    /// returned instead of the configured id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The server resumed session state from a previous connection.
    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    /// Publish `payload` to `topic` without the retain flag.
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses the publish or the
    /// acknowledgement chain fails.
    pub async fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> PublishResult {
        self.publish_with(topic, qos, false, payload).await
    }

    /// Publish with full control over the retain flag.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::publish`].
    pub async fn publish_with(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> PublishResult {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::Publish {
                topic: topic.to_string(),
                qos,
                retain,
                payload: payload.to_vec(),
                tx,
            })
            .await?;
        rx.await?
    }

    /// Subscribe to a single topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if the filter is invalid or the engine refuses the
    /// request. Per-filter failures are reported in the reason code list.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> SubscribeResult {
        let subscribe_topic = SubscribeTopic::new(topic, qos).map_err(Error::from)?;
        self.subscribe_topics(vec![subscribe_topic], None).await
    }

    /// Subscribe to a list of topic filters, with an optional subscription
    /// identifier (v5 only).
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::subscribe`].
    pub async fn subscribe_topics(
        &self,
        topics: Vec<SubscribeTopic>,
        subscription_id: Option<usize>,
    ) -> SubscribeResult {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::Subscribe {
                topics,
                subscription_id,
                tx,
            })
            .await?;
        rx.await?
    }

    /// Unsubscribe from a list of topic filters.
    ///
    /// # Errors
    ///
    /// Returns error if a filter is invalid or the engine refuses the request.
    pub async fn unsubscribe(&self, topics: &[&str]) -> UnsubscribeResult {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::Unsubscribe {
                topics: topics.iter().map(ToString::to_string).collect(),
                tx,
            })
            .await?;
        rx.await?
    }

    /// Register a named publish listener.
    ///
    /// The returned channel yields every inbound publish, or only those
    /// carrying one of `subscription_ids` (v5). A listener that falls behind
    /// loses messages instead of blocking the engine.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is gone.
    pub async fn listener(
        &self,
        name: &str,
        subscription_ids: Option<HashSet<usize>>,
    ) -> Result<mpsc::Receiver<PublishMessage>, Error> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::AddListener {
                name: name.to_string(),
                subscription_ids,
                tx,
            })
            .await?;
        rx.await?
    }

    /// Remove a listener registered with [`AsyncClient::listener`].
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown or the engine is gone.
    pub async fn remove_listener(&self, name: &str) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::RemoveListener {
                name: name.to_string(),
                tx,
            })
            .await?;
        rx.await?
    }

    /// Gracefully disconnect: drain inflight acknowledgements, send
    /// DISCONNECT, close the transport.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is gone.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientToEngineCmd::Disconnect { tx })
            .await?;
        rx.await?
    }

    /// Current connection state of the engine.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is gone.
    pub async fn status(&self) -> Result<ConnectionState, Error> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(ClientToEngineCmd::Status { tx }).await?;
        Ok(rx.await?)
    }
}
