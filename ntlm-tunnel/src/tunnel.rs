// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::TunnelOptions;
use crate::credential::SecureCredential;
use crate::error::Error;
use crate::framer::{Headers, HttpFramer, ResponseHead};
use crate::ntlm::{
    authorization_value, challenge_token, decode_challenge, NtlmClientContext, NtlmContext,
    NtlmHandshakeDriver,
};
use log::{debug, info, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

const HTTP_VERSION: &str = "1.1";
const PROXY_AUTH_REQUIRED: u16 = 407;
const MAX_PROXY_HEADERS: usize = 64;

/// Matched case-insensitively anywhere in the proxy's response head.
pub const CONNECTION_ESTABLISHED: &str = "200 connection established";

pub type Result<T> = core::result::Result<T, Error>;

/// TLS session spoken end to end with the target through the tunnel.
pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Progress of one tunnel attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Connected,
    NegotiateSent,
    ChallengeReceived,
    AuthenticateSent,
    Established,
    Failed,
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::Connected => "Connected",
            HandshakeState::NegotiateSent => "NegotiateSent",
            HandshakeState::ChallengeReceived => "ChallengeReceived",
            HandshakeState::AuthenticateSent => "AuthenticateSent",
            HandshakeState::Established => "Established",
            HandshakeState::Failed => "Failed",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host and port. IPv6 literals are stored without brackets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner.to_string(),
            None => host,
        };
        Endpoint { host, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// How a proxy response to CONNECT is judged successful.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuccessCheck {
    /// The head contains "200 connection established" in any case.
    #[default]
    Lenient,
    /// Any 2xx status, whatever the reason phrase.
    StatusCode,
}

impl SuccessCheck {
    fn accepts(&self, response: &ProxyResponse) -> bool {
        match self {
            SuccessCheck::Lenient => {
                String::from_utf8_lossy(&response.block)
                    .to_lowercase()
                    .contains(CONNECTION_ESTABLISHED)
            }
            SuccessCheck::StatusCode => (200..300).contains(&response.head.status_code),
        }
    }
}

/// A proxy's answer to one CONNECT request.
struct ProxyResponse {
    block: Vec<u8>,
    head: ResponseHead,
    /// Every `Proxy-Authenticate` value, in order.
    authenticate: Vec<String>,
}

impl ProxyResponse {
    /// The first `Proxy-Authenticate` value carrying an NTLM token.
    fn ntlm_challenge(&self) -> Option<&str> {
        self.authenticate.iter().find_map(|value| challenge_token(value))
    }
}

/// Establishes an NTLM authenticated CONNECT tunnel through an HTTP proxy.
///
/// A `ProxyTunnel` makes exactly one attempt: it owns the state of that
/// attempt and the socket it opens, and refuses to be opened again.
pub struct ProxyTunnel {
    proxy: Endpoint,
    target: Endpoint,
    credential: SecureCredential,
    options: TunnelOptions,
    state: HandshakeState,
}

impl ProxyTunnel {
    pub fn new(proxy: Endpoint, target: Endpoint, credential: SecureCredential) -> Self {
        ProxyTunnel {
            proxy,
            target,
            credential,
            options: TunnelOptions::default(),
            state: HandshakeState::Idle,
        }
    }

    pub fn with_options(mut self, options: TunnelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn proxy(&self) -> &Endpoint {
        &self.proxy
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    /// Opens the tunnel and starts TLS with the target, validating its
    /// certificate against the target host name.
    pub fn open(&mut self) -> Result<TlsStream> {
        let stream = self.open_raw()?;
        self.start_tls(stream).map_err(|e| {
            self.state = HandshakeState::Failed;
            e
        })
    }

    /// Opens the tunnel and returns the plain TCP stream to the target.
    pub fn open_raw(&mut self) -> Result<TcpStream> {
        self.ensure_idle()?;
        debug!("Opening tunnel to {} via {} as {}", self.target, self.proxy, self.credential);
        let mut stream = self.connect().map_err(|e| {
            self.state = HandshakeState::Failed;
            e
        })?;
        let context = NtlmClientContext::from_credential(&self.credential).map_err(|e| {
            self.state = HandshakeState::Failed;
            e
        })?;
        self.establish(&mut stream, context)?;
        Ok(stream)
    }

    /// Runs the CONNECT handshake over `stream` with `context`.
    ///
    /// The stream must already be connected to the proxy. On error the
    /// tunnel is left `Failed`.
    pub fn establish<S: Read + Write, C: NtlmContext>(
        &mut self,
        stream: &mut S,
        context: C,
    ) -> Result<()> {
        if !matches!(self.state, HandshakeState::Idle | HandshakeState::Connected) {
            return Err(self.reuse_error());
        }
        self.state = HandshakeState::Connected;
        let result = self.handshake(stream, context);
        if let Err(e) = &result {
            debug!("Tunnel to {} via {} failed in {}: {}", self.target, self.proxy, self.state, e);
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn handshake<S: Read + Write, C: NtlmContext>(
        &mut self,
        stream: &mut S,
        context: C,
    ) -> Result<()> {
        let (negotiate, awaiting) = NtlmHandshakeDriver::new(context).negotiate()?;
        self.send_connect(stream, &negotiate)?;
        self.state = HandshakeState::NegotiateSent;
        debug!("Sent NTLM negotiate for {} to {}", self.target, self.proxy);

        let first = read_proxy_response(stream, self.state)?;
        if self.options.success_check.accepts(&first) {
            return self.mark_established();
        }
        if first.head.status_code != PROXY_AUTH_REQUIRED {
            return Err(Error::protocol(
                self.state.name(),
                format!("unexpected proxy response: {}", first.head.status_line()),
            ));
        }
        let token = first.ntlm_challenge().ok_or_else(|| {
            Error::protocol(
                self.state.name(),
                format!("{} without an NTLM challenge", first.head.status_line()),
            )
        })?;
        let challenge = decode_challenge(token)?;
        self.state = HandshakeState::ChallengeReceived;
        debug!("Received NTLM challenge ({} bytes) from {}", challenge.len(), self.proxy);

        let authenticate = awaiting.authenticate(&challenge)?;
        self.send_connect(stream, &authenticate)?;
        self.state = HandshakeState::AuthenticateSent;
        debug!("Sent NTLM authenticate for {} to {}", self.target, self.proxy);

        let second = read_proxy_response(stream, self.state)?;
        if self.options.success_check.accepts(&second) {
            return self.mark_established();
        }
        Err(Error::AuthenticationError { status_line: second.head.status_line() })
    }

    fn mark_established(&mut self) -> Result<()> {
        self.state = HandshakeState::Established;
        info!("Tunnel established to {} via {}", self.target, self.proxy);
        Ok(())
    }

    fn send_connect<W: Write>(&self, stream: &mut W, token: &[u8]) -> Result<()> {
        let authority = self.target.to_string();
        let request = format!(
            "CONNECT {authority} HTTP/{HTTP_VERSION}\r\n\
             Host: {authority}\r\n\
             Proxy-Authorization: {}\r\n\
             Proxy-Connection: Keep-Alive\r\n\
             Connection: Keep-Alive\r\n\r\n",
            authorization_value(token)
        );
        stream
            .write_all(request.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| io_error(self.state.name(), e))
    }

    fn connect(&mut self) -> Result<TcpStream> {
        let phase = HandshakeState::Idle.name();
        let addrs = (self.proxy.host.as_str(), self.proxy.port).to_socket_addrs().map_err(|e| {
            Error::connection(phase, format!("cannot resolve proxy {}: {}", self.proxy, e))
        })?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = match self.options.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.options.read_timeout)?;
                    stream.set_write_timeout(self.options.write_timeout)?;
                    self.state = HandshakeState::Connected;
                    debug!("Connected to proxy {} at {}", self.proxy, addr);
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        let detail = last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string());
        Err(Error::connection(phase, format!("cannot connect to proxy {}: {}", self.proxy, detail)))
    }

    fn start_tls(&self, stream: TcpStream) -> Result<TlsStream> {
        let phase = HandshakeState::Established.name();
        let server_name = ServerName::try_from(self.target.host.clone()).map_err(|e| {
            Error::ConfigurationError(format!("invalid TLS server name {}: {}", self.target.host, e))
        })?;
        let connection = ClientConnection::new(self.options.tls_config.clone(), server_name)
            .map_err(|e| Error::connection(phase, format!("cannot start TLS: {}", e)))?;
        let mut tls = StreamOwned::new(connection, stream);
        // Certificate failures surface here rather than on the first request.
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock).map_err(|e| {
                Error::connection(phase, format!("TLS handshake with {} failed: {}", self.target, e))
            })?;
        }
        debug!("TLS session with {} started", self.target);
        Ok(tls)
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            HandshakeState::Idle => Ok(()),
            _ => Err(self.reuse_error()),
        }
    }

    fn reuse_error(&self) -> Error {
        Error::ConfigurationError(format!(
            "tunnel to {} via {} was already used (state {})",
            self.target, self.proxy, self.state
        ))
    }
}

/// Reads one proxy response head and drains its `Content-Length` body, if
/// the response is not a success.
fn read_proxy_response<S: Read>(stream: &mut S, state: HandshakeState) -> Result<ProxyResponse> {
    let mut framer = HttpFramer::new(&mut *stream);
    let block = framer.read_head_block()?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_PROXY_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&block) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::protocol(state.name(), "incomplete proxy response head"))
        }
        Err(e) => {
            return Err(Error::protocol(state.name(), format!("malformed proxy response: {}", e)))
        }
    }

    let mut header_map = Headers::new();
    let mut authenticate = Vec::new();
    for header in response.headers.iter() {
        let value = String::from_utf8_lossy(header.value).trim().to_string();
        if header.name.eq_ignore_ascii_case("Proxy-Authenticate") {
            authenticate.push(value.clone());
        }
        header_map.insert(header.name.to_string(), value);
    }
    let head = ResponseHead {
        version: format!("HTTP/1.{}", response.version.unwrap_or(1)),
        status_code: response.code.unwrap_or_default(),
        reason: response.reason.unwrap_or_default().to_string(),
        headers: header_map,
    };
    debug!("Proxy answered {} in {}", head.status_line(), state);

    if !(200..300).contains(&head.status_code) {
        if let Some(length) = head.content_length().filter(|length| *length > 0) {
            framer.read_up_to(length)?;
        }
    }
    if framer.buffered() > 0 {
        warn!("Discarding {} unexpected bytes after proxy response", framer.buffered());
    }

    Ok(ProxyResponse { block: block.to_vec(), head, authenticate })
}

pub(crate) fn io_error(phase: &'static str, e: io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            Error::connection(phase, format!("write timed out: {}", e))
        }
        _ => Error::IoError(e),
    }
}
