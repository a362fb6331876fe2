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

use crate::framer::{header_value, DecodedResponse, Headers};

const LATIN_1: &str = "ISO-8859-1";

/// A response read off a tunnel, with the request it answers.
#[derive(Clone, Debug)]
pub struct RawHttpResponse {
    pub status_code: u16,
    pub reason: String,
    /// Names exactly as received; the last occurrence wins.
    pub headers: Headers,
    pub body: Vec<u8>,
    pub url: String,
    pub method: String,
    /// Charset resolved from `Content-Type`, if any.
    pub encoding: Option<String>,
}

impl RawHttpResponse {
    pub fn new(decoded: DecodedResponse, method: impl Into<String>, url: impl Into<String>) -> Self {
        let encoding = encoding_from_headers(&decoded.head.headers);
        RawHttpResponse {
            status_code: decoded.head.status_code,
            reason: decoded.head.reason,
            headers: decoded.head.headers,
            body: decoded.body,
            url: url.into(),
            method: method.into(),
            encoding,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// The body decoded with `encoding`. Latin-1 maps bytes to code points;
    /// anything else is read as UTF-8 with replacement characters.
    pub fn text(&self) -> String {
        match self.encoding.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("iso-8859-1" | "latin-1" | "latin1") => {
                self.body.iter().map(|&b| b as char).collect()
            }
            _ => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Resolves the body charset: an explicit `charset` parameter, else
/// ISO-8859-1 for `text/*`, else utf-8 for JSON.
pub fn encoding_from_headers(headers: &Headers) -> Option<String> {
    let content_type = header_value(headers, "Content-Type")?;
    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("charset") {
                let charset = value.trim().trim_matches(|c| c == '"' || c == '\'');
                if !charset.is_empty() {
                    return Some(charset.to_string());
                }
            }
        }
    }

    if media_type.contains("text") {
        Some(LATIN_1.to_string())
    } else if media_type.contains("application/json") {
        Some("utf-8".to_string())
    } else {
        None
    }
}
