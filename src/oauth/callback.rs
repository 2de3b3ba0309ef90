use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::CrmAuthError;

use super::pkce::CallbackParams;

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body><h1>Connected!</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authorization failed</h1>\
    <p>Return to the terminal for details.</p></body></html>";

/// Accept a single redirect on `127.0.0.1:port` and return its parameters.
pub async fn listen_for_callback(port: u16, timeout: Duration) -> Result<CallbackParams, CrmAuthError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    tracing::debug!("Waiting for authorization callback on port {port}");

    let accept_future = async {
        let (mut stream, _) = listener.accept().await?;

        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let params = parse_callback_request(&request);

        let body = if params.code.is_some() && params.error.is_none() {
            SUCCESS_PAGE
        } else {
            FAILURE_PAGE
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;

        Ok::<CallbackParams, CrmAuthError>(params)
    };

    tokio::time::timeout(timeout, accept_future)
        .await
        .map_err(|_| CrmAuthError::CallbackTimeout(timeout))?
}

/// Extract the query of "GET /callback?code=... HTTP/1.1".
fn parse_callback_request(request: &str) -> CallbackParams {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|path| path.split_once('?'))
        .map(|(_, query)| CallbackParams::from_query(query))
        .unwrap_or_default()
}
