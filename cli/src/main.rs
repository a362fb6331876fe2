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
use log::error;
use ntlm_common::util::ntlm_logger;
use ntlm_tunnel_cli::args::FetchArgs;

fn main() {
    let args = FetchArgs::parse();
    ntlm_logger::init_with_filter("ntlm-fetch", if args.verbose { "debug" } else { "warn" });
    if let Err(e) = ntlm_tunnel_cli::run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
