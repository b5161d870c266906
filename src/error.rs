// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer sent something disallowed: a malformed packet, a bad reason
    /// code, a property in the wrong packet, a packet id collision, a flow
    /// control violation or an unknown topic alias.
    ///
    /// Always fatal to the connection.
    ProtocolError,

    /// CONNACK failure, authentication refused, or transport refused.
    ConnectError,

    /// Connect, ping or drain expiry. Fatal to the connection.
    Timeout,

    /// Reconnected with `Session Present` = 0 while inflight state was
    /// pending; the pending operations cannot complete.
    SessionReset,

    /// All 65,535 packet identifiers are in flight. Recoverable, retry after
    /// an acknowledgement completes.
    NoIdentifierAvailable,

    /// Outbound packet exceeds the negotiated Maximum Packet Size.
    PacketTooLarge,

    /// The client is draining inflight packets and refuses new operations.
    ClientShuttingDown,

    /// The connection is closed; the engine is gone.
    ClientClosed,

    /// Opaque I/O failure from the transport.
    TransportError,

    /// The server acknowledged the operation with a failure reason code.
    OperationFailed,

    /// The operation requires a server capability which the server reported
    /// as unavailable in CONNACK.
    NotSupported,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Invalid option or argument value.
    ConfigError,

    /// mpsc channel error.
    ChannelError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Get type of current error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get detail message of current error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::TransportError, format!("IoError {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::TransportError, format!("Websocket error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        let kind = match err {
            codec::DecodeError::PacketTooLarge => ErrorKind::PacketTooLarge,
            _ => ErrorKind::DecodeError,
        };
        Self::from_string(kind, format!("{err:?}"))
    }
}

impl From<codec::utils::StringError> for Error {
    fn from(err: codec::utils::StringError) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("{err:?}"))
    }
}

impl From<codec::TopicError> for Error {
    fn from(err: codec::TopicError) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("Invalid topic: {err:?}"))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, "Operation timed out")
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_err: oneshot::error::RecvError) -> Self {
        Self::new(ErrorKind::ClientClosed, "Engine dropped completion handle")
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_err: mpsc::error::SendError<T>) -> Self {
        Self::new(ErrorKind::ClientClosed, "Engine inbox is closed")
    }
}
