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

use crate::error::Error;
use crate::transport::Transport;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub type Result<T> = core::result::Result<T, Error>;

pub const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::ConfigurationError(format!(
                "unsupported proxy scheme {:?}, expected one of {:?}",
                other, SUPPORTED_SCHEMES
            ))),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only scheme to transport mapping.
///
/// Both `http` and `https` resolve to the one wrapped transport. Any other
/// key is unknown, and the view cannot be modified.
pub struct ProxyRouteView<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: Transport + ?Sized> ProxyRouteView<T> {
    pub fn new(transport: Arc<T>) -> Self {
        ProxyRouteView { transport }
    }

    pub fn get(&self, scheme: &str) -> Option<&T> {
        scheme.parse::<Scheme>().ok().map(|_| self.transport.as_ref())
    }

    pub fn get_or<'a>(&'a self, scheme: &str, default: &'a T) -> &'a T {
        self.get(scheme).unwrap_or(default)
    }

    /// Indexed access; unknown schemes are a `ConfigurationError`.
    pub fn route(&self, scheme: &str) -> Result<&T> {
        scheme.parse::<Scheme>()?;
        Ok(self.transport.as_ref())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        scheme.parse::<Scheme>().is_ok()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> {
        SUPPORTED_SCHEMES.into_iter()
    }

    pub fn len(&self) -> usize {
        SUPPORTED_SCHEMES.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Always fails with `Error::ReadOnlyRoutes`.
    pub fn set(&mut self, _scheme: &str, _transport: Arc<T>) -> Result<()> {
        Err(Error::ReadOnlyRoutes)
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: ?Sized> Clone for ProxyRouteView<T> {
    fn clone(&self) -> Self {
        ProxyRouteView { transport: self.transport.clone() }
    }
}

impl<T: ?Sized> fmt::Debug for ProxyRouteView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRouteView").field("keys", &SUPPORTED_SCHEMES).finish()
    }
}
