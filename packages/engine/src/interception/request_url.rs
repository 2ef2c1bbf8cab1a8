// packages/engine/src/interception/request_url.rs
//! URL decomposition for captured requests
//!
//! Parsing never fails outward: an unparsable URL yields the `unknown`
//! sentinel protocol and domain, no port, and an empty filename.

use hyper::Uri;
use tracing::debug;

/// Sentinel used for protocol and domain when a URL cannot be parsed
pub const UNKNOWN: &str = "unknown";

/// Parts of a request URL the correlator records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    pub protocol: String,
    pub domain: String,
    pub port: Option<u16>,
    pub filename: String,
}

impl RequestUrl {
    /// Decompose `url`
    ///
    /// Only the `scheme://authority` prefix goes through `Uri`, so a path
    /// or query of any length cannot turn a known host into the sentinel.
    pub fn parse(url: &str) -> Self {
        let url = url.trim();
        let Some(scheme_end) = url.find("://") else {
            debug!("URL without scheme: {:?}", truncated(url));
            return Self::unknown();
        };

        let after_scheme = &url[scheme_end + 3..];
        let authority_len = after_scheme
            .find(|c| matches!(c, '/' | '?' | '#'))
            .unwrap_or(after_scheme.len());
        let (prefix, rest) = url.split_at(scheme_end + 3 + authority_len);

        let uri: Uri = match prefix.parse() {
            Ok(uri) => uri,
            Err(e) => {
                debug!("Malformed URL {:?}: {}", truncated(url), e);
                return Self::unknown();
            }
        };

        let (Some(scheme), Some(host)) = (uri.scheme_str(), uri.host()) else {
            debug!("URL without scheme or host: {:?}", truncated(url));
            return Self::unknown();
        };

        // IPv6 hosts keep their brackets, matching how they are typed
        // into the domain filter.
        let protocol = scheme.to_ascii_lowercase();
        let domain = host.to_ascii_lowercase();
        let port = uri
            .port_u16()
            .unwrap_or(if protocol == "https" { 443 } else { 80 });

        let path = rest.split(['?', '#']).next().unwrap_or("");
        let filename = path.rsplit('/').next().unwrap_or("").to_string();

        Self {
            protocol,
            domain,
            port: Some(port),
            filename,
        }
    }

    /// Sentinel for an unparsable URL
    pub fn unknown() -> Self {
        Self {
            protocol: UNKNOWN.to_string(),
            domain: UNKNOWN.to_string(),
            port: None,
            filename: String::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.port.is_none() && self.protocol == UNKNOWN
    }
}

fn truncated(url: &str) -> &str {
    match url.char_indices().nth(200) {
        Some((at, _)) => &url[..at],
        None => url,
    }
}
