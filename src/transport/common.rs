//! HTTP helpers shared by the push transports: outgoing sends and the
//! best-effort abort notification.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::{ClientError, NetError};
use crate::events::ConnectionEvent;
use crate::net::HttpRequest;

/// Post `data` to the send endpoint in the background.
///
/// A non-empty JSON response is published as a received payload. Under JSONP
/// an unparsable response is ignored.
///
/// # Errors
///
/// Returns an error if the connection was never negotiated or has no HTTP
/// client.
pub fn ajax_send(connection: &Connection, transport: &str, data: String) -> Result<(), ClientError> {
    let url = connection.send_url(transport)?;
    let Some(http) = connection.http() else {
        return Err(ClientError::TransportUnavailable {
            transport: transport.to_owned(),
            reason: "no http client configured".into(),
        });
    };
    let jsonp = connection.jsonp();
    let request = if jsonp { HttpRequest::get(url) } else { HttpRequest::post(url) }.field("data", data);

    let weak = connection.downgrade();
    tokio::spawn(async move {
        let response = http.request(request).await;
        let Some(connection) = weak.upgrade() else {
            return;
        };
        match response {
            Ok(body) if body.trim().is_empty() => {}
            Ok(body) => match serde_json::from_str::<Value>(&body) {
                Ok(Value::Null) => {}
                Ok(value) => connection.publish(&ConnectionEvent::Received(value)),
                Err(e) if !jsonp => connection.raise_error(ClientError::Protocol(format!("send response: {e}"))),
                Err(_) => {}
            },
            Err(NetError::Cancelled) => {}
            Err(e) => connection.raise_error(ClientError::Transport(format!("send failed: {e}"))),
        }
    });
    Ok(())
}

/// Build the abort request for `transport`. Failures are logged and
/// swallowed; the request carries the configured abort timeout.
pub fn ajax_abort(connection: &Connection, transport: &str) -> Option<BoxFuture<'static, ()>> {
    let http = connection.http()?;
    let url = match connection.abort_url(transport) {
        Ok(url) => url,
        Err(e) => {
            connection.log(&format!("skipping abort: {e}"));
            return None;
        }
    };
    let request = HttpRequest::post(url).timeout(connection.config().abort_timeout);
    let key = connection.key();
    Some(
        async move {
            if let Err(e) = http.request(request).await {
                tracing::debug!(connection = key, error = %e, "abort request failed");
            }
        }
        .boxed(),
    )
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
