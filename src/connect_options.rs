// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use codec::utils::random_string;
use codec::{LastWill, ProtocolVersion};

#[derive(Clone, Debug)]
pub struct SelfSignedTls {
    /// Root CA pem file generated with `openssl` or other tools.
    pub root_ca_pem: PathBuf,
}

#[derive(Clone, Debug)]
pub enum TlsType {
    /// Signed by Root CA, like `Let's Encrypt`.
    CASigned,

    /// Self signed certificate, for tests and internal deployments.
    SelfSigned(SelfSignedTls),
}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    pub domain: String,
    pub tls_type: TlsType,
}

#[derive(Clone, Debug)]
pub struct WsConnect {
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct UdsConnect {
    pub sock_path: PathBuf,
}

/// Transport endpoint variants.
#[derive(Clone, Debug)]
pub enum ConnectType {
    /// Plain TCP.
    Mqtt,

    /// TCP with TLS.
    Mqtts(MqttsConnect),

    /// WebSocket upgrade over TCP.
    Ws(WsConnect),

    /// Unix domain socket.
    Uds(UdsConnect),
}

/// Client configuration.
///
/// Every option recognized by the engine lives here; the auth workflow
/// callback is passed separately to keep this struct `Clone`.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    address: SocketAddr,
    connect_type: ConnectType,
    version: ProtocolVersion,
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
    ping_timeout: Option<Duration>,
    drain_timeout: Duration,
    max_reconnect_attempts: usize,
    clean_session: bool,
    username: Option<String>,
    password: Option<Vec<u8>>,
    will: Option<LastWill>,

    // v5 options below.
    receive_maximum: u16,
    max_packet_size: Option<u32>,
    topic_alias_maximum: u16,
    session_expiry: Option<u32>,
    user_properties: Vec<(String, String)>,
    auth_method: Option<String>,
    auth_data: Option<Vec<u8>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 1883)),
            connect_type: ConnectType::Mqtt,
            version: ProtocolVersion::V311,
            client_id: random_string(8).unwrap_or_else(|_| "luo".to_string()),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            ping_timeout: None,
            drain_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 0,
            clean_session: true,
            username: None,
            password: None,
            will: None,
            receive_maximum: u16::MAX,
            max_packet_size: None,
            topic_alias_maximum: 0,
            session_expiry: None,
            user_properties: Vec::new(),
            auth_method: None,
            auth_data: None,
        }
    }
}

impl ConnectOptions {
    /// Create connect options with the first socket address of `address`.
    ///
    /// # Errors
    ///
    /// Returns error if `address` cannot be resolved.
    pub fn new<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        let mut addrs = address.to_socket_addrs()?;
        let address = addrs
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no socket address"))?;
        Ok(Self {
            address,
            ..Self::default()
        })
    }

    pub fn set_address<A: ToSocketAddrs>(&mut self, address: A) -> io::Result<&mut Self> {
        let mut addrs = address.to_socket_addrs()?;
        self.address = addrs
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no socket address"))?;
        Ok(self)
    }

    #[must_use]
    pub const fn address(&self) -> &SocketAddr {
        &self.address
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    pub fn set_version(&mut self, version: ProtocolVersion) -> &mut Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Keep alive interval; zero disables keep alive supervision.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// PINGRESP wait interval. Defaults to half the keep alive interval.
    pub fn set_ping_timeout(&mut self, ping_timeout: Duration) -> &mut Self {
        self.ping_timeout = Some(ping_timeout);
        self
    }

    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout.unwrap_or(self.keep_alive / 2)
    }

    /// How long a graceful disconnect waits for inflight acknowledgements.
    pub fn set_drain_timeout(&mut self, drain_timeout: Duration) -> &mut Self {
        self.drain_timeout = drain_timeout;
        self
    }

    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn set_max_reconnect_attempts(&mut self, attempts: usize) -> &mut Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn max_reconnect_attempts(&self) -> usize {
        self.max_reconnect_attempts
    }

    /// `Clean Session` in v3.1.1, `Clean Start` in v5.
    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_username(&mut self, username: Option<&str>) -> &mut Self {
        self.username = username.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_password(&mut self, password: Option<&[u8]>) -> &mut Self {
        self.password = password.map(<[u8]>::to_vec);
        self
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn set_will(&mut self, will: Option<LastWill>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }

    /// Flow control window advertised to the server. v5 only.
    pub fn set_receive_maximum(&mut self, receive_maximum: u16) -> &mut Self {
        self.receive_maximum = receive_maximum;
        self
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> u16 {
        self.receive_maximum
    }

    /// Reject inbound packets larger than this. v5 only.
    pub fn set_max_packet_size(&mut self, max_packet_size: Option<u32>) -> &mut Self {
        self.max_packet_size = max_packet_size;
        self
    }

    #[must_use]
    pub const fn max_packet_size(&self) -> Option<u32> {
        self.max_packet_size
    }

    /// Inbound topic alias ceiling advertised to the server. v5 only.
    pub fn set_topic_alias_maximum(&mut self, topic_alias_maximum: u16) -> &mut Self {
        self.topic_alias_maximum = topic_alias_maximum;
        self
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> u16 {
        self.topic_alias_maximum
    }

    /// Session expiry interval in seconds. v5 only.
    pub fn set_session_expiry(&mut self, session_expiry: Option<u32>) -> &mut Self {
        self.session_expiry = session_expiry;
        self
    }

    #[must_use]
    pub const fn session_expiry(&self) -> Option<u32> {
        self.session_expiry
    }

    /// User properties sent in CONNECT. v5 only.
    pub fn add_user_property(&mut self, key: &str, value: &str) -> &mut Self {
        self.user_properties.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user_properties
    }

    /// Extended authentication method name. v5 only.
    pub fn set_auth_method(&mut self, auth_method: Option<&str>) -> &mut Self {
        self.auth_method = auth_method.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn auth_method(&self) -> Option<&str> {
        self.auth_method.as_deref()
    }

    /// First authentication data sent in CONNECT. v5 only.
    pub fn set_auth_data(&mut self, auth_data: Option<&[u8]>) -> &mut Self {
        self.auth_data = auth_data.map(<[u8]>::to_vec);
        self
    }

    #[must_use]
    pub fn auth_data(&self) -> Option<&[u8]> {
        self.auth_data.as_deref()
    }
}
