// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod auth;
mod base;
mod binary_data;
mod bool_data;
mod byte_array;
mod connect;
mod connect_ack;
mod disconnect;
mod error;
mod frame;
mod header;
mod packet;
mod ping_request;
mod ping_response;
mod property;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod reason_code;
mod string_data;
mod string_pair_data;
mod subscribe;
mod subscribe_ack;
pub mod topic;
mod u16_data;
mod u32_data;
mod unsubscribe;
mod unsubscribe_ack;
pub mod utils;
mod var_int;

pub use auth::{AuthPacket, AUTH_PROPERTIES, AUTH_REASONS};
pub use base::{DecodePacket, EncodePacket, PacketId, ProtocolVersion, QoS};
pub use binary_data::BinaryData;
pub use bool_data::BoolData;
pub use byte_array::{ByteArray, ByteArrayError};
pub use connect::{ConnectPacket, LastWill, CONNECT_PROPERTIES, WILL_PROPERTIES};
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode, CONNECT_ACK_PROPERTIES, CONNECT_REASONS};
pub use disconnect::{DisconnectPacket, DISCONNECT_PROPERTIES, DISCONNECT_REASONS};
pub use error::{DecodeError, EncodeError};
pub use frame::FrameReader;
pub use header::{FixedHeader, PacketType};
pub use packet::Packet;
pub use ping_request::PingRequestPacket;
pub use ping_response::PingResponsePacket;
pub use property::{
    check_property_type_list, Properties, Property, PropertyType, MULTIPLE_PROPERTIES,
};
pub use publish::{PublishPacket, PUBLISH_PROPERTIES};
pub use publish_ack::{PublishAckPacket, PUBLISH_ACK_PROPERTIES, PUBLISH_ACK_REASONS};
pub use publish_complete::{
    PublishCompletePacket, PUBLISH_COMPLETE_PROPERTIES, PUBLISH_COMPLETE_REASONS,
};
pub use publish_received::{
    PublishReceivedPacket, PUBLISH_RECEIVED_PROPERTIES, PUBLISH_RECEIVED_REASONS,
};
pub use publish_release::{
    PublishReleasePacket, PUBLISH_RELEASE_PROPERTIES, PUBLISH_RELEASE_REASONS,
};
pub use reason_code::ReasonCode;
pub use string_data::StringData;
pub use string_pair_data::StringPairData;
pub use subscribe::{RetainHandling, SubscribePacket, SubscribeTopic, SUBSCRIBE_PROPERTIES};
pub use subscribe_ack::{SubscribeAckPacket, SUBSCRIBE_ACK_PROPERTIES, SUBSCRIBE_ACK_REASONS};
pub use topic::{PubTopic, SubTopic, TopicError, TopicFilter};
pub use u16_data::U16Data;
pub use u32_data::U32Data;
pub use unsubscribe::{UnsubscribePacket, UNSUBSCRIBE_PROPERTIES};
pub use unsubscribe_ack::{
    UnsubscribeAckPacket, UNSUBSCRIBE_ACK_PROPERTIES, UNSUBSCRIBE_ACK_REASONS,
};
pub use var_int::{VarInt, VarIntError};
