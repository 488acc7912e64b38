//! Endpoint resolution and request URL construction.
//!
//! DESIGN
//! ======
//! A connection URL is resolved once per `start()` into an [`Endpoint`]:
//! the absolute connection URL, its `scheme://host` base, the socket-scheme
//! base, and whether the target is cross-origin relative to the host.
//!
//! Request URLs are built as plain strings because the protocol appends
//! parameters in a fixed order (`transport`, `connectionId`,
//! `connectionData`, `messageId`, `groups`, caller query, `tid`) and servers
//! in the wild are sensitive to it.

use rand::Rng;
use serde_json::Value;
use url::Url;

use crate::config::escape;
use crate::error::ClientError;

// =============================================================================
// ENDPOINT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Absolute connection URL without a trailing slash.
    pub url: String,
    /// `scheme://host[:port]` of the connection URL.
    pub base_url: String,
    /// `host[:port]` of the connection URL.
    pub host: String,
    /// `ws://host[:port]` or `wss://host[:port]`.
    pub socket_base: String,
    /// Target origin differs from the hosting origin.
    pub cross_origin: bool,
}

impl Endpoint {
    /// Resolve `raw` (absolute, or relative to `origin`) into an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if the URL cannot be made absolute
    /// or is not `http`/`https`.
    pub fn resolve(raw: &str, origin: Option<&str>) -> Result<Self, ClientError> {
        let origin_url = origin
            .map(|o| Url::parse(o).map_err(|e| ClientError::InvalidUrl(format!("origin {o}: {e}"))))
            .transpose()?;

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let Some(base) = origin_url.as_ref() else {
                    return Err(ClientError::InvalidUrl(format!(
                        "{raw} is relative and no hosting origin is configured"
                    )));
                };
                base.join(raw).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?
            }
            Err(e) => return Err(ClientError::InvalidUrl(format!("{raw}: {e}"))),
        };

        let socket_scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {other} in {raw}"))),
        };
        let Some(host_name) = url.host_str() else {
            return Err(ClientError::InvalidUrl(format!("{raw} has no host")));
        };
        let host = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_owned(),
        };

        let cross_origin = origin_url.is_some_and(|o| o.origin() != url.origin());

        let mut absolute = url.clone();
        absolute.set_query(None);
        absolute.set_fragment(None);

        Ok(Self {
            url: absolute.as_str().trim_end_matches('/').to_owned(),
            base_url: format!("{}://{host}", url.scheme()),
            socket_base: format!("{socket_scheme}://{host}"),
            host,
            cross_origin,
        })
    }
}

// =============================================================================
// URL BUILDERS
// =============================================================================

/// Inputs for a transport connect URL.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams<'a> {
    pub transport: &'a str,
    pub connection_id: &'a str,
    pub connection_data: Option<&'a str>,
    pub reconnecting: bool,
    /// Reconnect requests carry the `/reconnect` suffix.
    pub append_reconnect: bool,
    pub message_id: Option<&'a str>,
    pub groups: Option<&'a Value>,
    pub query: Option<&'a str>,
}

/// `{prefix}{app_relative}{suffix}?transport=...&tid=N`.
///
/// Initial connects use the `/connect` suffix. Reconnects omit it (or use
/// `/reconnect`) and resume from `messageId` and `groups`.
#[must_use]
pub fn connect_url(prefix: &str, app_relative: &str, params: &ConnectParams<'_>) -> String {
    connect_url_with_tid(prefix, app_relative, params, random_tid())
}

pub(crate) fn connect_url_with_tid(prefix: &str, app_relative: &str, params: &ConnectParams<'_>, tid: u8) -> String {
    let mut url = format!("{prefix}{app_relative}");
    let mut qs = format!("transport={}&connectionId={}", params.transport, escape(params.connection_id));

    if let Some(data) = params.connection_data.filter(|d| !d.is_empty()) {
        qs.push_str("&connectionData=");
        qs.push_str(&escape(data));
    }

    if params.reconnecting {
        if params.append_reconnect {
            url.push_str("/reconnect");
        }
        if let Some(message_id) = params.message_id.filter(|m| !m.is_empty()) {
            qs.push_str("&messageId=");
            qs.push_str(&escape(message_id));
        }
        if let Some(groups) = params.groups.filter(|g| !g.is_null()) {
            qs.push_str("&groups=");
            qs.push_str(&escape(&groups.to_string()));
        }
    } else {
        url.push_str("/connect");
    }

    url.push('?');
    url.push_str(&qs);
    append_query(&mut url, params.query);
    url.push_str(&format!("&tid={tid}"));
    url
}

/// `{url}/negotiate`, plus the caller query.
#[must_use]
pub fn negotiate_url(url: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{url}/negotiate?{q}"),
        None => format!("{url}/negotiate"),
    }
}

/// `{url}/send?transport=...&connectionId=...`, plus the caller query.
#[must_use]
pub fn send_url(url: &str, transport: &str, connection_id: &str, query: Option<&str>) -> String {
    command_url(url, "send", transport, connection_id, query)
}

/// `{url}/abort?transport=...&connectionId=...`, plus the caller query.
#[must_use]
pub fn abort_url(url: &str, transport: &str, connection_id: &str, query: Option<&str>) -> String {
    command_url(url, "abort", transport, connection_id, query)
}

fn command_url(url: &str, command: &str, transport: &str, connection_id: &str, query: Option<&str>) -> String {
    let mut out = format!("{url}/{command}?transport={transport}&connectionId={}", escape(connection_id));
    append_query(&mut out, query);
    out
}

fn append_query(url: &mut String, query: Option<&str>) {
    if let Some(q) = query {
        url.push('&');
        url.push_str(q);
    }
}

/// Cache-busting request tag in `0..=10`.
#[must_use]
pub fn random_tid() -> u8 {
    rand::rng().random_range(0..=10)
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod tests;
