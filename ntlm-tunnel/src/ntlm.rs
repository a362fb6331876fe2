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

//! # NTLM handshake sequencing
//!
//! The NTLM message formats and cryptography live behind the
//! [`NtlmContext`] trait. [`NtlmClientContext`] is the default
//! implementation, backed by the `ntlmclient` crate.
//!
//! [`NtlmHandshakeDriver`] only enforces the order of the two calls:
//! `negotiate` consumes the driver and hands back an
//! [`AwaitingChallenge`], whose `authenticate` consumes it in turn. Calling
//! them out of order, or twice, does not compile.

use crate::credential::SecureCredential;
use crate::error::Error;
use base64::{engine::general_purpose, Engine as _};
use ntlmclient::{Credentials, Flags, Message, NegotiateMessage};
use zeroize::Zeroizing;

pub type Result<T> = core::result::Result<T, Error>;

/// Authorization scheme token used in `Proxy-Authorization` and
/// `Proxy-Authenticate` header values.
pub const NTLM_SCHEME: &str = "NTLM";

/// Producer of the client side NTLM messages.
pub trait NtlmContext {
    /// Returns the Type 1 (Negotiate) message.
    fn negotiate(&mut self) -> Result<Vec<u8>>;

    /// Returns the Type 3 (Authenticate) message for a Type 2 (Challenge).
    fn authenticate(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// Default context computing NTLMv2 responses with `ntlmclient`.
pub struct NtlmClientContext {
    username: String,
    password: Zeroizing<String>,
    domain: String,
    workstation: String,
}

impl NtlmClientContext {
    pub fn new(
        username: impl Into<String>,
        password: Zeroizing<String>,
        domain: impl Into<String>,
        workstation: impl Into<String>,
    ) -> Self {
        NtlmClientContext {
            username: username.into(),
            password,
            domain: domain.into(),
            workstation: workstation.into(),
        }
    }

    /// Reveals the credential's secret into a context owned by one handshake.
    pub fn from_credential(credential: &SecureCredential) -> Result<Self> {
        Ok(Self::new(
            credential.username(),
            credential.reveal()?,
            credential.domain().unwrap_or_default(),
            credential.workstation(),
        ))
    }
}

impl NtlmContext for NtlmClientContext {
    fn negotiate(&mut self) -> Result<Vec<u8>> {
        let flags = Flags::NEGOTIATE_UNICODE
            | Flags::NEGOTIATE_OEM
            | Flags::REQUEST_TARGET
            | Flags::NEGOTIATE_NTLM
            | Flags::NEGOTIATE_ALWAYS_SIGN
            | Flags::NEGOTIATE_NTLM2_KEY;
        let message = Message::Negotiate(NegotiateMessage {
            flags,
            supplied_domain: String::new(),
            supplied_workstation: String::new(),
            os_version: Default::default(),
        });
        message
            .to_bytes()
            .map_err(|e| Error::protocol("negotiate", format!("cannot encode Type 1 message: {}", e)))
    }

    fn authenticate(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        let challenge = match Message::try_from(challenge) {
            Ok(Message::Challenge(challenge)) => challenge,
            Ok(other) => {
                return Err(Error::protocol(
                    "authenticate",
                    format!("expected NTLM Type 2 message, got type {}", other.message_number()),
                ))
            }
            Err(e) => {
                return Err(Error::protocol(
                    "authenticate",
                    format!("cannot parse NTLM challenge: {}", e),
                ))
            }
        };
        let target_info: Vec<u8> =
            challenge.target_information.iter().flat_map(|entry| entry.to_bytes()).collect();

        let credentials = Credentials {
            username: self.username.clone(),
            password: self.password.to_string(),
            domain: self.domain.clone(),
        };
        let response = ntlmclient::respond_challenge_ntlm_v2(
            challenge.challenge,
            &target_info,
            ntlmclient::get_ntlm_time(),
            &credentials,
        );
        let message = response.to_message(
            &credentials,
            &self.workstation,
            Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM,
        );
        // `Credentials` holds a plain copy of the password.
        drop(Zeroizing::new(credentials.password));
        message.to_bytes().map_err(|e| {
            Error::protocol("authenticate", format!("cannot encode Type 3 message: {}", e))
        })
    }
}

/// First step of the handshake: nothing has been sent yet.
pub struct NtlmHandshakeDriver<C> {
    context: C,
}

/// Second step of the handshake: the Negotiate message is out.
pub struct AwaitingChallenge<C> {
    context: C,
}

impl<C: NtlmContext> NtlmHandshakeDriver<C> {
    pub fn new(context: C) -> Self {
        NtlmHandshakeDriver { context }
    }

    /// Produces the Type 1 message.
    pub fn negotiate(mut self) -> Result<(Vec<u8>, AwaitingChallenge<C>)> {
        let token = self.context.negotiate()?;
        Ok((token, AwaitingChallenge { context: self.context }))
    }
}

impl<C: NtlmContext> AwaitingChallenge<C> {
    /// Produces the Type 3 message for the server's Type 2 `challenge`.
    pub fn authenticate(mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        self.context.authenticate(challenge)
    }
}

/// Formats a token as a `Proxy-Authorization` value: `NTLM <base64>`.
pub fn authorization_value(token: &[u8]) -> String {
    format!("{} {}", NTLM_SCHEME, general_purpose::STANDARD.encode(token))
}

/// Extracts the challenge from a `Proxy-Authenticate` value.
///
/// Returns `None` unless the value starts with the literal `NTLM`, or when
/// it carries no token (a bare `NTLM` offer).
pub fn challenge_token(header_value: &str) -> Option<&str> {
    let token = header_value.trim().strip_prefix(NTLM_SCHEME)?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Decodes a base64 challenge token.
pub fn decode_challenge(token: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(token.as_bytes())
        .map_err(|e| Error::protocol("ChallengeReceived", format!("invalid base64 challenge: {}", e)))
}
