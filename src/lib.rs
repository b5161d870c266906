// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT client library supporting v3.1.1 and v5.0.
//!
//! The protocol engine runs as one task per connection, owning the transport
//! and every piece of protocol state; [`AsyncClient`] is a thin handle that
//! posts requests into the engine inbox and awaits completion.

pub mod alias;
pub mod auth;
mod client;
mod commands;
pub mod connect_options;
pub mod dispatcher;
mod engine;
pub mod error;
pub mod inflight;
pub mod packet_id;
pub mod session;
pub mod status;
pub mod stream;

pub use client::AsyncClient;
pub use commands::{PublishResult, SubscribeResult, UnsubscribeResult};
pub use connect_options::{
    ConnectOptions, ConnectType, MqttsConnect, SelfSignedTls, TlsType, UdsConnect, WsConnect,
};
pub use dispatcher::PublishMessage;
pub use error::{Error, ErrorKind};
pub use status::{CloseReason, ConnectionState};
pub use stream::Stream;

pub use auth::{AuthChallenge, AuthStep, AuthWorkflow};
pub use codec::{LastWill, ProtocolVersion, QoS, ReasonCode, SubscribeTopic};
