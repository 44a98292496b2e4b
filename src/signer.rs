//! S3 signature V2 request signing
//!
//! The benchmark's object hot path issues raw HTTP requests and signs them
//! here instead of going through the SDK. The algorithm must match what
//! S3-compatible servers compute byte for byte:
//!
//! ```text
//! StringToSign = METHOD \n Content-MD5 \n Content-Type \n \n
//!                CanonicalAmzHeaders CanonicalResource
//! Authorization: AWS <access-key>:base64(HMAC-SHA1(secret, StringToSign))
//! ```
//!
//! `X-Amz-Date` is stamped on every request right before signing, so it is
//! part of the canonical headers and replaces the `Date` line.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Request;
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Timestamp header set on every signed request
pub const AMZ_DATE_HEADER: &str = "x-amz-date";

/// `YYYYMMDDTHHMMSSZ`
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Vendor-extension header prefix included in the signature
const AMZ_HEADER_PREFIX: &str = "x-amz";

const CONTENT_MD5: &str = "content-md5";

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signed header value is not valid: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Signs raw requests with a static access/secret key pair.
#[derive(Clone)]
pub struct RequestSigner {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Stamp the current time and sign `request` in place.
    pub fn sign(&self, request: &mut Request) -> Result<(), SignError> {
        self.sign_at(request, Utc::now())
    }

    /// Stamp `at` as `X-Amz-Date` and sign `request` in place.
    pub fn sign_at(&self, request: &mut Request, at: DateTime<Utc>) -> Result<(), SignError> {
        let date = at.format(AMZ_DATE_FORMAT).to_string();
        request
            .headers_mut()
            .insert(AMZ_DATE_HEADER, HeaderValue::from_str(&date)?);

        let to_sign = string_to_sign(request.method().as_str(), request.headers(), request.url().path());
        let signature = self.signature(&to_sign)?;

        let authorization = format!("AWS {}:{}", self.access_key, signature);
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        Ok(())
    }

    /// base64(HMAC-SHA1(secret, string_to_sign))
    pub fn signature(&self, string_to_sign: &str) -> Result<String, SignError> {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Build the V2 string to sign. `escaped_path` is the URL-escaped path only.
pub fn string_to_sign(method: &str, headers: &HeaderMap, escaped_path: &str) -> String {
    format!(
        "{}\n{}\n{}\n\n{}{}",
        method,
        header_str(headers, CONTENT_MD5),
        header_str(headers, CONTENT_TYPE.as_str()),
        canonical_amz_headers(headers),
        escaped_path
    )
}

/// Serialize every `x-amz*` header as sorted `name:value` lines.
///
/// Names are compared lower-cased; only the first value of a repeated header
/// is used and embedded newlines become spaces. Each line ends in `\n`; no
/// matching headers yields an empty string.
pub fn canonical_amz_headers(headers: &HeaderMap) -> String {
    let names: BTreeSet<String> = headers
        .keys()
        .map(|name| name.as_str().trim().to_ascii_lowercase())
        .filter(|name| name.starts_with(AMZ_HEADER_PREFIX))
        .collect();

    let mut out = String::new();
    for name in names {
        out.push_str(&name);
        out.push(':');
        out.push_str(&header_str(headers, &name).replace('\n', " "));
        out.push('\n');
    }
    out
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}
