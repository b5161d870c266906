// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{QoS, ReasonCode, SubscribeTopic};
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};

use crate::dispatcher::PublishMessage;
use crate::error::Error;
use crate::status::ConnectionState;

/// Completion value of a publish request.
///
/// QoS 0 publishes resolve with `None` as soon as the bytes are written;
/// QoS 1 and 2 resolve with the acknowledgement reason code (v5) or `None`
/// (v3.1.1) when the acknowledgement chain completes.
pub type PublishResult = Result<Option<ReasonCode>, Error>;

/// Completion value of a subscribe request: one reason code per topic
/// filter, in request order.
pub type SubscribeResult = Result<Vec<ReasonCode>, Error>;

/// Completion value of an unsubscribe request. The list is empty under
/// v3.1.1, which has no UNSUBACK payload.
pub type UnsubscribeResult = Result<Vec<ReasonCode>, Error>;

/// Requests posted into the engine inbox by the client surface.
///
/// Each request carries a oneshot completion handle; the engine processes
/// the inbox in arrival order.
pub enum ClientToEngineCmd {
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
        tx: oneshot::Sender<PublishResult>,
    },

    Subscribe {
        topics: Vec<SubscribeTopic>,
        /// Subscription identifier, v5 only, range 1..=268,435,455.
        subscription_id: Option<usize>,
        tx: oneshot::Sender<SubscribeResult>,
    },

    Unsubscribe {
        topics: Vec<String>,
        tx: oneshot::Sender<UnsubscribeResult>,
    },

    /// Register a named publish listener; publishes matching the optional
    /// subscription-identifier filter are delivered to the returned channel.
    AddListener {
        name: String,
        subscription_ids: Option<HashSet<usize>>,
        tx: oneshot::Sender<Result<mpsc::Receiver<PublishMessage>, Error>>,
    },

    RemoveListener {
        name: String,
        tx: oneshot::Sender<Result<(), Error>>,
    },

    /// Graceful shutdown: drain inflight packets, send DISCONNECT, close.
    Disconnect {
        tx: oneshot::Sender<Result<(), Error>>,
    },

    /// Snapshot of the engine connection state.
    Status {
        tx: oneshot::Sender<ConnectionState>,
    },
}
