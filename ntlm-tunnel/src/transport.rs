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

//! Request transport over NTLM tunnels.
//!
//! Every `send` opens its own tunnel, runs a full handshake, writes one
//! HTTP/1.1 request and reads one response. Nothing is pooled.

use crate::config::{ProxyConfig, TunnelOptions};
use crate::credential::SecureCredential;
use crate::error::Error;
use crate::framer::HttpFramer;
use crate::response::RawHttpResponse;
use crate::tunnel::{io_error, Endpoint, ProxyTunnel};
use http::header::{CONTENT_LENGTH, HOST};
use http::Request;
use log::{debug, info};
use std::io::{self, Read, Write};

const DEFAULT_HTTPS_PORT: u16 = 443;

pub type Result<T> = core::result::Result<T, Error>;

/// Sends one request and returns its response.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request<Vec<u8>>) -> Result<RawHttpResponse>;

    /// Releases resources held between calls.
    fn close(&self) {}
}

/// A [`Transport`] that reaches HTTPS targets through an NTLM proxy.
#[derive(Clone, Debug)]
pub struct TunnelTransport {
    proxy: Endpoint,
    credential: SecureCredential,
    options: TunnelOptions,
}

impl TunnelTransport {
    pub fn new(proxy: Endpoint, credential: SecureCredential) -> Self {
        TunnelTransport { proxy, credential, options: TunnelOptions::default() }
    }

    /// Uses the proxy address and credentials of `config`.
    pub fn from_config(config: &ProxyConfig, domain: Option<&str>) -> Result<Self> {
        Ok(Self::new(config.endpoint.clone(), config.credential(domain)?))
    }

    pub fn with_options(mut self, options: TunnelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn proxy(&self) -> &Endpoint {
        &self.proxy
    }

    /// Writes `request` to an already established stream and reads the
    /// response.
    pub fn exchange<S: Read + Write>(
        stream: &mut S,
        request: &Request<Vec<u8>>,
    ) -> Result<RawHttpResponse> {
        write_request(stream, request).map_err(|e| io_error("send-request", e))?;
        let decoded = HttpFramer::new(&mut *stream).decode()?;
        Ok(RawHttpResponse::new(decoded, request.method().as_str(), request.uri().to_string()))
    }
}

impl Transport for TunnelTransport {
    fn send(&self, request: &Request<Vec<u8>>) -> Result<RawHttpResponse> {
        let target = target_endpoint(request)?;
        let mut tunnel = ProxyTunnel::new(self.proxy.clone(), target, self.credential.clone())
            .with_options(self.options.clone());
        let mut stream = tunnel.open()?;
        let response = Self::exchange(&mut stream, request)?;
        info!(
            "{} {} -> {} {}",
            response.method, response.url, response.status_code, response.reason
        );
        Ok(response)
    }

    fn close(&self) {
        debug!("Closing transport via {}: no pooled connections", self.proxy);
    }
}

/// The tunnel target of an `https` request.
fn target_endpoint(request: &Request<Vec<u8>>) -> Result<Endpoint> {
    let uri = request.uri();
    if uri.scheme_str() != Some("https") {
        return Err(Error::ConfigurationError(format!(
            "only https targets can be tunneled, got {}",
            uri
        )));
    }
    let host = uri
        .host()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::ConfigurationError(format!("no host in {}", uri)))?;
    Ok(Endpoint::new(host, uri.port_u16().unwrap_or(DEFAULT_HTTPS_PORT)))
}

/// Writes the request line, `Host`, the caller's headers and the body.
pub fn write_request<W: Write>(writer: &mut W, request: &Request<Vec<u8>>) -> io::Result<()> {
    let uri = request.uri();
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), path).into_bytes();

    if !request.headers().contains_key(HOST) {
        let host = uri.host().unwrap_or_default();
        match uri.port_u16() {
            Some(port) if port != DEFAULT_HTTPS_PORT => {
                head.extend_from_slice(format!("Host: {}:{}\r\n", host, port).as_bytes())
            }
            _ => head.extend_from_slice(format!("Host: {}\r\n", host).as_bytes()),
        }
    }
    for (name, value) in request.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    let body = request.body();
    if !body.is_empty() && !request.headers().contains_key(CONTENT_LENGTH) {
        head.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    writer.write_all(&head)?;
    writer.write_all(body)?;
    writer.flush()
}
