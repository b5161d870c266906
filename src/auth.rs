// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

/// One step of an extended authentication exchange, as received from the
/// server in CONNACK (reason 0x18) or AUTH packets.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// The authentication method negotiated in CONNECT.
    pub method: String,

    /// Authentication data from the server, if any.
    pub data: Option<Vec<u8>>,
}

/// The client side's answer to an authentication challenge.
#[derive(Debug, Clone)]
pub enum AuthStep {
    /// Send an AUTH packet with reason 0x18 (Continue authentication) and
    /// this authentication data.
    Continue { data: Option<Vec<u8>> },

    /// Terminal failure: stop the exchange and disconnect with reason
    /// 0x87 (Not authorized).
    Abort,
}

/// Application hook driving an iterating v5 authentication exchange.
///
/// Invoked once per challenge until the server sends a final CONNACK, or
/// until the workflow yields [`AuthStep::Abort`].
pub type AuthWorkflow = Box<dyn FnMut(&AuthChallenge) -> AuthStep + Send>;
