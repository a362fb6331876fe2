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

//! This module defines the tunnel error types.
//!
//! None of these errors are retried inside the crate. Each one carries the
//! phase it happened in (a handshake state name or a framing step) or the
//! last status line seen, so callers can log them as they are.

use std::fmt;
use std::io;

/// An enumeration of possible errors.
#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// TCP connect failure, socket timeout, TLS failure, or the peer closed
    /// before a complete header block arrived.
    ConnectionError { phase: &'static str, detail: String },
    /// The proxy or the target answered with something that cannot be used.
    ProtocolError { phase: &'static str, detail: String },
    /// Both NTLM tokens were exchanged but the proxy still refused the tunnel.
    AuthenticationError { status_line: String },
    ConfigurationError(String),
    /// Writes to a `ProxyRouteView` are never allowed.
    ReadOnlyRoutes,
    CredentialError(String),
    MalformedConfigString,
    InvalidPortNumber,
}

impl Error {
    pub(crate) fn connection(phase: &'static str, detail: impl Into<String>) -> Self {
        Error::ConnectionError { phase, detail: detail.into() }
    }

    pub(crate) fn protocol(phase: &'static str, detail: impl Into<String>) -> Self {
        Error::ProtocolError { phase, detail: detail.into() }
    }

    /// Returns true when re-prompting for credentials could fix the failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::AuthenticationError { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ConnectionError { phase, detail } => {
                write!(f, "Connection error during {}: {}", phase, detail)
            }
            Error::ProtocolError { phase, detail } => {
                write!(f, "Protocol error during {}: {}", phase, detail)
            }
            Error::AuthenticationError { status_line } => {
                write!(f, "Proxy rejected NTLM credentials: {}", status_line)
            }
            Error::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Error::ReadOnlyRoutes => write!(f, "Modification of proxy routes is not allowed"),
            Error::CredentialError(msg) => write!(f, "Credential error: {}", msg),
            Error::MalformedConfigString => {
                write!(f, "Invalid proxy configuration string")
            }
            Error::InvalidPortNumber => write!(f, "Invalid port number"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}
