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

//! Command Line Interface for NTLM tunnels

pub mod args;
mod display;

use anyhow::{anyhow, Context};
use args::FetchArgs;
use log::info;
use ntlm_common::util::time_display::elapsed_display;
use ntlm_tunnel::{
    mask_url_password, ProxyConfig, ProxyRouteView, SecureCredential, SuccessCheck, Transport,
    TunnelOptions, TunnelTransport,
};
use std::io;
use std::sync::Arc;
use std::time::Instant;

/// Sends the request described by `args` and prints the response:
/// status and headers to stderr, body to stdout.
pub fn run(args: FetchArgs) -> anyhow::Result<()> {
    let config = ProxyConfig::from_string(&args.proxy)
        .with_context(|| format!("invalid --proxy {}", mask_url_password(&args.proxy)))?;
    let credential = resolve_credential(&args, &config)?;
    info!("Using proxy {} as {}", config, credential);

    let success_check =
        if args.strict_status { SuccessCheck::StatusCode } else { SuccessCheck::Lenient };
    let options = TunnelOptions::default()
        .with_timeouts(args.connect_timeout(), args.read_timeout())
        .with_success_check(success_check);
    let transport =
        TunnelTransport::new(config.endpoint.clone(), credential).with_options(options);
    let routes = ProxyRouteView::new(Arc::new(transport));

    let request = args.build_request()?;
    let scheme = request.uri().scheme_str().unwrap_or_default().to_string();
    let start = Instant::now();
    let response = routes
        .route(&scheme)?
        .send(&request)
        .with_context(|| format!("{} {} failed", request.method(), request.uri()))?;
    info!("Completed in {}", elapsed_display(start.elapsed()));
    routes.transport().close();

    display::write_head(&mut io::stderr().lock(), &response)?;
    display::write_body(&mut io::stdout().lock(), &response)?;
    Ok(())
}

/// Command line values win over those in the proxy string. A user given
/// as `DOMAIN\user` sets the domain unless `--domain` is present.
pub fn resolve_credential(
    args: &FetchArgs,
    config: &ProxyConfig,
) -> anyhow::Result<SecureCredential> {
    let user = args
        .user
        .as_deref()
        .or(config.username.as_deref())
        .ok_or_else(|| anyhow!("no proxy user: pass --user or put it in --proxy"))?;
    let password = args
        .password
        .as_ref()
        .or(config.password.as_ref())
        .ok_or_else(|| anyhow!("no proxy password: pass --password or set NTLM_PROXY_PASSWORD"))?;

    let (domain, user) = match user.split_once('\\') {
        Some((domain, user)) => (Some(domain), user),
        None => (None, user),
    };
    let domain = args.domain.as_deref().or(domain).unwrap_or_default();

    let mut credential = SecureCredential::new(user, password).with_domain(domain);
    if let Some(workstation) = &args.workstation {
        credential = credential.with_workstation(workstation.as_str());
    }
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ntlm_tunnel::DEFAULT_WORKSTATION;

    fn args(extra: &[&str]) -> FetchArgs {
        let mut argv = vec!["ntlm-fetch"];
        argv.extend_from_slice(extra);
        argv.push("https://api.example.com/");
        FetchArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_credential_from_proxy_string() {
        let args = args(&["--proxy", "http://jdoe:pw@proxy.corp:8080"]);
        let config = ProxyConfig::from_string(&args.proxy).unwrap();
        let credential = resolve_credential(&args, &config).unwrap();
        assert_eq!(credential.username(), "jdoe");
        assert_eq!(credential.domain(), None);
        assert_eq!(credential.workstation(), DEFAULT_WORKSTATION);
        assert_eq!(credential.reveal().unwrap().as_str(), "pw");
    }

    #[test]
    fn test_command_line_wins() {
        let args = args(&[
            "--proxy",
            "http://jdoe:pw@proxy.corp:8080",
            "--user",
            "CORP\\asmith",
            "--password",
            "other",
            "--workstation",
            "PC7",
        ]);
        let config = ProxyConfig::from_string(&args.proxy).unwrap();
        let credential = resolve_credential(&args, &config).unwrap();
        assert_eq!(credential.to_string(), "CORP\\asmith:***********");
        assert_eq!(credential.workstation(), "PC7");
        assert_eq!(credential.reveal().unwrap().as_str(), "other");
    }

    #[test]
    fn test_domain_flag_overrides_user_prefix() {
        let args = args(&[
            "--proxy",
            "proxy.corp:8080",
            "-u",
            "OLD\\jdoe",
            "--password",
            "pw",
            "--domain",
            "NEW",
        ]);
        let config = ProxyConfig::from_string(&args.proxy).unwrap();
        let credential = resolve_credential(&args, &config).unwrap();
        assert_eq!(credential.domain(), Some("NEW"));
        assert_eq!(credential.username(), "jdoe");
    }

    #[test]
    fn test_missing_user() {
        let args = args(&["--proxy", "proxy.corp:8080"]);
        let config = ProxyConfig::from_string(&args.proxy).unwrap();
        assert!(resolve_credential(&args, &config).is_err());
    }
}
