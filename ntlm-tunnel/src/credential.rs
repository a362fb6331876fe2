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

//! # Secure credentials
//!
//! `SecretValue` keeps a secret sealed with ChaCha20-Poly1305 under a
//! key generated for that value alone. The plaintext only exists inside
//! the `Zeroizing` buffer returned by `reveal`, and every `Display` or
//! `Debug` path prints [`MASK`] instead.
//!
//! `SecureCredential` bundles the secret with the user, domain and
//! workstation names needed for NTLM.

use crate::error::Error;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

pub type Result<T> = core::result::Result<T, Error>;

/// Rendered in place of a secret by every formatting path.
pub const MASK: &str = "***********";

/// Workstation name sent in NTLM messages when the caller supplies none.
pub const DEFAULT_WORKSTATION: &str = "WORKSTATION";

struct Sealed {
    key: LessSafeKey,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// A secret encrypted in memory.
///
/// Clones share the sealed payload and key; nothing is re-encrypted and
/// the plaintext is never materialized by copying.
#[derive(Clone)]
pub struct SecretValue {
    sealed: Arc<Sealed>,
}

impl SecretValue {
    /// Seals the textual form of `secret`.
    ///
    /// Key generation only fails when the system random source is
    /// unavailable, which is reported as `Error::CredentialError`.
    pub fn new(secret: impl fmt::Display) -> Result<Self> {
        let plaintext = Zeroizing::new(secret.to_string());
        Self::seal(plaintext.as_bytes())
    }

    /// Seals an optional value; `None` is stored as the literal `"None"`.
    pub fn from_optional<T: fmt::Display>(secret: Option<T>) -> Result<Self> {
        match secret {
            Some(value) => Self::new(value),
            None => Self::new("None"),
        }
    }

    fn seal(plaintext: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        rng.fill(&mut key_bytes[..])
            .map_err(|_| Error::CredentialError("random source unavailable".to_string()))?;
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce)
            .map_err(|_| Error::CredentialError("random source unavailable".to_string()))?;

        let unbound = UnboundKey::new(&aead::CHACHA20_POLY1305, &key_bytes[..])
            .map_err(|_| Error::CredentialError("invalid key length".to_string()))?;
        let key = LessSafeKey::new(unbound);

        let mut ciphertext = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| Error::CredentialError("failed to seal secret".to_string()))?;

        Ok(SecretValue { sealed: Arc::new(Sealed { key, nonce, ciphertext }) })
    }

    /// Decrypts and returns the plaintext. The buffer is zeroed on drop.
    pub fn reveal(&self) -> Result<Zeroizing<String>> {
        let sealed = &self.sealed;
        let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
        let plaintext = sealed
            .key
            .open_in_place(Nonce::assume_unique_for_key(sealed.nonce), Aad::empty(), &mut buffer)
            .map_err(|_| Error::CredentialError("sealed secret is corrupted".to_string()))?;
        let text = std::str::from_utf8(plaintext)
            .map_err(|_| Error::CredentialError("secret is not valid UTF-8".to_string()))?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    /// True when both values share the same sealed payload.
    pub fn shares_payload_with(&self, other: &SecretValue) -> bool {
        Arc::ptr_eq(&self.sealed, &other.sealed)
    }
}

impl From<&SecretValue> for SecretValue {
    fn from(value: &SecretValue) -> Self {
        value.clone()
    }
}

impl TryFrom<&str> for SecretValue {
    type Error = Error;

    fn try_from(secret: &str) -> Result<Self> {
        Self::new(secret)
    }
}

impl TryFrom<String> for SecretValue {
    type Error = Error;

    fn try_from(secret: String) -> Result<Self> {
        let secret = Zeroizing::new(secret);
        Self::seal(secret.as_bytes())
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

/// The resolved credential tuple handed to the tunnel.
#[derive(Clone)]
pub struct SecureCredential {
    username: String,
    secret: SecretValue,
    domain: Option<String>,
    workstation: String,
}

impl SecureCredential {
    pub fn new(username: impl Into<String>, secret: impl Into<SecretValue>) -> Self {
        SecureCredential {
            username: username.into(),
            secret: secret.into(),
            domain: None,
            workstation: DEFAULT_WORKSTATION.to_string(),
        }
    }

    /// Builds a credential from a plaintext secret, sealing it right away.
    pub fn with_plaintext(username: impl Into<String>, secret: impl fmt::Display) -> Result<Self> {
        Ok(Self::new(username, SecretValue::new(secret)?))
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        self.domain = if domain.is_empty() { None } else { Some(domain) };
        self
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = workstation.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn workstation(&self) -> &str {
        &self.workstation
    }

    pub fn secret(&self) -> &SecretValue {
        &self.secret
    }

    pub fn reveal(&self) -> Result<Zeroizing<String>> {
        self.secret.reveal()
    }
}

impl fmt::Display for SecureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}\\{}:{}", domain, self.username, MASK),
            None => write!(f, "{}:{}", self.username, MASK),
        }
    }
}

impl fmt::Debug for SecureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCredential")
            .field("username", &self.username)
            .field("secret", &self.secret)
            .field("domain", &self.domain)
            .field("workstation", &self.workstation)
            .finish()
    }
}
