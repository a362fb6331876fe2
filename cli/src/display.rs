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

use ntlm_tunnel::RawHttpResponse;
use std::io::{self, Write};

/// Writes the status line and sorted headers of `response`.
pub fn write_head<W: Write>(out: &mut W, response: &RawHttpResponse) -> io::Result<()> {
    writeln!(out, "{} {}", response.status_code, response.reason)?;
    let mut headers: Vec<_> = response.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        writeln!(out, "{}: {}", name, value)?;
    }
    Ok(())
}

/// Writes the body, re-encoded as UTF-8 when a charset is known.
pub fn write_body<W: Write>(out: &mut W, response: &RawHttpResponse) -> io::Result<()> {
    match response.encoding {
        Some(_) => out.write_all(response.text().as_bytes())?,
        None => out.write_all(&response.body)?,
    }
    out.flush()
}
