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

use base64::{engine::general_purpose, Engine as _};
use flate2::write::GzEncoder;
use flate2::Compression;
use ntlm_tunnel::{
    Endpoint, Error, HandshakeState, ProxyTunnel, SecureCredential, Transport, TunnelOptions,
    TunnelTransport,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig, ServerConnection, StreamOwned};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ESTABLISHED: &str = "HTTP/1.1 200 Connection established\r\n\r\n";

/// Runs `script` against the first connection made to a local listener.
fn spawn_proxy<F>(script: F) -> (Endpoint, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    ntlm_common::util::ntlm_logger::init_for_test();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        script(stream);
    });
    (Endpoint::new("127.0.0.1", port), handle)
}

fn credential() -> SecureCredential {
    SecureCredential::with_plaintext("jdoe", "p@ss").unwrap().with_domain("CORP")
}

fn options() -> TunnelOptions {
    TunnelOptions::default()
        .with_timeouts(Some(Duration::from_secs(5)), Some(Duration::from_secs(10)))
}

fn tunnel(proxy: Endpoint) -> ProxyTunnel {
    ProxyTunnel::new(proxy, Endpoint::new("api.example.com", 443), credential())
        .with_options(options())
}

/// Server and client TLS configs sharing a self-signed `localhost` certificate.
fn localhost_tls() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
    let key_der = PrivateKeyDer::Pkcs8(cert.serialize_private_key_der().into());
    let server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();
    let mut roots = RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    (Arc::new(server), Arc::new(client))
}

fn read_head<S: Read>(stream: &mut S) -> String {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        data.push(byte[0]);
    }
    String::from_utf8(data).unwrap()
}

fn read_rest(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    rest
}

/// Decodes the token of `Proxy-Authorization: NTLM <token>` and checks
/// the NTLMSSP message type.
fn ntlm_message(head: &str, message_type: u32) -> Vec<u8> {
    let value = head
        .lines()
        .find_map(|line| line.strip_prefix("Proxy-Authorization: NTLM "))
        .expect("no NTLM authorization header");
    let message = general_purpose::STANDARD.decode(value).unwrap();
    assert_eq!(&message[0..8], b"NTLMSSP\0");
    assert_eq!(&message[8..12], &message_type.to_le_bytes());
    message
}

/// A Type 2 message with Unicode and NTLM flags and no target info.
fn challenge_header() -> String {
    let mut msg = Vec::new();
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&2u32.to_le_bytes());
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(&56u32.to_le_bytes());
    msg.extend_from_slice(&0x0000_0201u32.to_le_bytes());
    msg.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    msg.extend_from_slice(&[0; 8]);
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(&56u32.to_le_bytes());
    msg.extend_from_slice(&[0; 8]);
    format!("Proxy-Authenticate: NTLM {}\r\n", general_purpose::STANDARD.encode(msg))
}

fn challenge_response() -> String {
    let body = "<html>Access denied</html>";
    format!(
        "HTTP/1.1 407 Proxy Authentication Required\r\n\
         Proxy-Authenticate: Negotiate\r\n\
         {}Content-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        challenge_header(),
        body.len(),
        body
    )
}

fn gzip_chunked(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    let compressed = encoder.finish().unwrap();
    let mut out = Vec::new();
    for chunk in compressed.chunks(16) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[test]
fn ntlm_handshake_then_request() {
    let (proxy, handle) = spawn_proxy(|mut stream| {
        let first = read_head(&mut stream);
        assert!(first.starts_with("CONNECT api.example.com:443 HTTP/1.1\r\n"));
        assert!(first.contains("Host: api.example.com:443\r\n"));
        assert!(first.contains("Proxy-Connection: Keep-Alive\r\n"));
        ntlm_message(&first, 1);
        stream.write_all(challenge_response().as_bytes()).unwrap();

        let second = read_head(&mut stream);
        assert!(second.starts_with("CONNECT api.example.com:443 HTTP/1.1\r\n"));
        ntlm_message(&second, 3);
        stream.write_all(ESTABLISHED.as_bytes()).unwrap();

        // The target side of the tunnel.
        let request = read_head(&mut stream);
        assert_eq!(request, "GET /v1/status?full=1 HTTP/1.1\r\nHost: api.example.com\r\n\r\n");
        let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
            Content-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n"
            .to_vec();
        response.extend_from_slice(&gzip_chunked(b"{\"status\": \"ok\"}"));
        stream.write_all(&response).unwrap();
    });

    let mut tunnel = tunnel(proxy);
    let mut stream = tunnel.open_raw().unwrap();
    assert_eq!(tunnel.state(), HandshakeState::Established);

    let request = http::Request::get("https://api.example.com/v1/status?full=1")
        .body(Vec::new())
        .unwrap();
    let response = TunnelTransport::exchange(&mut stream, &request).unwrap();
    handle.join().unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "{\"status\": \"ok\"}");
    assert_eq!(response.encoding.as_deref(), Some("utf-8"));
    assert_eq!(response.header("transfer-encoding"), Some("chunked"));
    assert_eq!(response.url, "https://api.example.com/v1/status?full=1");
}

#[test]
fn established_without_challenge() {
    let (proxy, handle) = spawn_proxy(|mut stream| {
        let first = read_head(&mut stream);
        ntlm_message(&first, 1);
        stream.write_all(ESTABLISHED.as_bytes()).unwrap();
        assert!(read_rest(&mut stream).is_empty());
    });

    let mut tunnel = tunnel(proxy);
    let stream = tunnel.open_raw().unwrap();
    assert_eq!(tunnel.state(), HandshakeState::Established);
    drop(stream);
    handle.join().unwrap();
}

#[test]
fn missing_challenge_sends_no_second_request() {
    let (proxy, handle) = spawn_proxy(|mut stream| {
        read_head(&mut stream);
        stream
            .write_all(
                b"HTTP/1.1 407 Proxy Authentication Required\r\n\
                  Proxy-Authenticate: Negotiate\r\nContent-Length: 4\r\n\r\ndeny",
            )
            .unwrap();
        assert!(read_rest(&mut stream).is_empty());
    });

    let mut tunnel = tunnel(proxy);
    let err = tunnel.open_raw().unwrap_err();
    assert!(matches!(err, Error::ProtocolError { phase: "NegotiateSent", .. }), "{}", err);
    assert_eq!(tunnel.state(), HandshakeState::Failed);
    drop(tunnel);
    handle.join().unwrap();
}

#[test]
fn rejected_credentials() {
    let (proxy, handle) = spawn_proxy(|mut stream| {
        read_head(&mut stream);
        stream.write_all(challenge_response().as_bytes()).unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut tunnel = tunnel(proxy);
    let err = tunnel.open_raw().unwrap_err();
    assert!(err.is_authentication(), "{}", err);
    assert!(err.to_string().contains("407 Proxy Authentication Required"));
    assert!(!err.to_string().contains("p@ss"));
    assert_eq!(tunnel.state(), HandshakeState::Failed);
    handle.join().unwrap();
}

#[test]
fn proxy_closes_mid_handshake() {
    let (proxy, handle) = spawn_proxy(|mut stream| {
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 407 Proxy Auth").unwrap();
    });

    let mut tunnel = tunnel(proxy);
    let err = tunnel.open_raw().unwrap_err();
    assert!(matches!(err, Error::ConnectionError { .. }), "{}", err);
    handle.join().unwrap();
}

#[test]
fn unreachable_proxy() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut tunnel = tunnel(Endpoint::new("127.0.0.1", port));
    let err = tunnel.open().unwrap_err();
    assert!(matches!(err, Error::ConnectionError { phase: "Idle", .. }), "{}", err);
    assert_eq!(tunnel.state(), HandshakeState::Failed);
    assert!(matches!(tunnel.open(), Err(Error::ConfigurationError(_))));
}

#[test]
fn transport_sends_over_tls() {
    let (server_config, client_config) = localhost_tls();
    let (proxy, handle) = spawn_proxy(move |mut stream| {
        let first = read_head(&mut stream);
        assert!(first.starts_with("CONNECT localhost:443 HTTP/1.1\r\n"));
        ntlm_message(&first, 1);
        stream.write_all(challenge_response().as_bytes()).unwrap();
        ntlm_message(&read_head(&mut stream), 3);
        stream.write_all(ESTABLISHED.as_bytes()).unwrap();

        let connection = ServerConnection::new(server_config).unwrap();
        let mut tls = StreamOwned::new(connection, stream);
        let request = read_head(&mut tls);
        assert_eq!(request, "GET /v1/status HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(tls.conn.server_name(), Some("localhost"));
        tls.write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\n\
              Content-Length: 5\r\n\r\nhello",
        )
        .unwrap();
        tls.flush().unwrap();
    });

    let transport = TunnelTransport::new(proxy, credential())
        .with_options(options().with_tls_config(client_config));
    let request = http::Request::get("https://localhost/v1/status").body(Vec::new()).unwrap();
    let response = transport.send(&request).unwrap();
    handle.join().unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.encoding.as_deref(), Some("utf-8"));
    assert_eq!(response.text(), "hello");
    assert_eq!(response.url, "https://localhost/v1/status");
}

#[test]
fn tls_certificate_must_match_target() {
    let (server_config, client_config) = localhost_tls();
    let (proxy, handle) = spawn_proxy(move |mut stream| {
        ntlm_message(&read_head(&mut stream), 1);
        stream.write_all(ESTABLISHED.as_bytes()).unwrap();
        let mut connection = ServerConnection::new(server_config).unwrap();
        while connection.is_handshaking() {
            if connection.complete_io(&mut stream).is_err() {
                break;
            }
        }
    });

    // The certificate names localhost, the tunnel targets api.example.com.
    let mut tunnel = tunnel(proxy).with_options(options().with_tls_config(client_config));
    let err = tunnel.open().unwrap_err();
    assert!(matches!(err, Error::ConnectionError { phase: "Established", .. }), "{}", err);
    assert!(err.to_string().contains("TLS handshake with api.example.com:443 failed"), "{}", err);
    assert_eq!(tunnel.state(), HandshakeState::Failed);
    drop(tunnel);
    handle.join().unwrap();
}

#[test]
fn transport_rejects_plain_http() {
    let transport = TunnelTransport::new(Endpoint::new("127.0.0.1", 9), credential());
    let request = http::Request::get("http://api.example.com/").body(Vec::new()).unwrap();
    assert!(matches!(transport.send(&request), Err(Error::ConfigurationError(_))));
}
