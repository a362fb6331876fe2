// Copyright 2022 Google LLC
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

use clap::Parser;
use http::Request;
use ntlm_tunnel::SecretValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "ntlm-fetch", about = "Fetch an HTTPS URL through an NTLM authenticating proxy")]
pub struct FetchArgs {
    /// Target URL, https only
    pub url: String,
    /// Proxy as [scheme://][user:password@]host:port
    #[arg(long, env = "NTLM_PROXY")]
    pub proxy: String,
    /// Proxy user, optionally as DOMAIN\user
    #[arg(short, long)]
    pub user: Option<String>,
    /// Proxy password
    #[arg(long, env = "NTLM_PROXY_PASSWORD", hide_env_values = true, value_parser = parse_secret)]
    pub password: Option<SecretValue>,
    /// NTLM domain
    #[arg(long)]
    pub domain: Option<String>,
    /// Workstation name sent to the proxy
    #[arg(long)]
    pub workstation: Option<String>,
    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,
    /// Extra request header as "Name: Value", repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<HeaderArg>,
    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,
    /// Proxy connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,
    /// Socket read and write timeout in seconds
    #[arg(long)]
    pub read_timeout: Option<u64>,
    /// Accept any 2xx answer to CONNECT instead of "200 Connection established"
    #[arg(long)]
    pub strict_status: bool,
    /// Set verbose mode
    #[arg(short, long)]
    pub verbose: bool,
}

impl FetchArgs {
    pub fn build_request(&self) -> anyhow::Result<Request<Vec<u8>>> {
        let mut builder =
            Request::builder().method(self.method.to_uppercase().as_str()).uri(self.url.as_str());
        for header in &self.headers {
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }
        let body = self.data.clone().unwrap_or_default().into_bytes();
        Ok(builder.body(body)?)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout.map(Duration::from_secs)
    }
}

fn parse_secret(s: &str) -> Result<SecretValue, String> {
    SecretValue::new(s).map_err(|e| e.to_string())
}

/// A request header given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderArg {
    pub name: String,
    pub value: String,
}

impl FromStr for HeaderArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(HeaderArg { name: name.trim().to_string(), value: value.trim().to_string() })
            }
            _ => Err(format!("expected \"Name: Value\", got {:?}", s)),
        }
    }
}

impl fmt::Display for HeaderArg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}
