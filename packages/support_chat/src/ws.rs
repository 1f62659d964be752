//! WebSocket transport: drives a [`ChannelDriver`] over tokio-tungstenite.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::time::Duration;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use chat_sync::transport::ChannelDriver;
use chat_sync::{AccessToken, Connector, Endpoint, TransportChannel, TransportError};

/// Opens one WebSocket per channel against `<base_url><endpoint path>?token=…`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    base_url: String,
    connect_timeout: Option<Duration>,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>, connect_timeout: Option<Duration>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    /// Full URL for an endpoint. The backend reads the token from the query.
    pub fn endpoint_url(
        &self,
        endpoint: &Endpoint,
        token: &AccessToken,
    ) -> Result<Url, TransportError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, endpoint.path()))
            .map_err(|e| TransportError::Connect(format!("invalid url for {endpoint}: {e}")))?;
        url.query_pairs_mut().append_pair("token", token.expose());
        Ok(url)
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: Endpoint, token: &AccessToken) -> TransportChannel {
        let (channel, driver) = TransportChannel::pair(endpoint.clone());
        match self.endpoint_url(&endpoint, token) {
            Ok(url) => {
                tokio::spawn(drive(driver, url, self.connect_timeout));
            }
            Err(e) => driver.closed(Some(e)),
        }
        channel
    }
}

/// Connect, then pump frames both ways until either side closes.
async fn drive(mut driver: ChannelDriver, url: Url, connect_timeout: Option<Duration>) {
    let endpoint = driver.endpoint().clone();

    let connecting = tokio_tungstenite::connect_async(url.as_str());
    let connected = match connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, connecting).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%endpoint, "WebSocket connect timed out after {:?}", limit);
                driver.closed(Some(TransportError::ConnectTimeout(limit)));
                return;
            }
        },
        None => connecting.await,
    };

    let ws_stream = match connected {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(%endpoint, "WebSocket connect failed: {}", e);
            driver.closed(Some(TransportError::Connect(e.to_string())));
            return;
        }
    };

    info!(%endpoint, "WebSocket connected");
    driver.opened();

    let (mut ws_write, mut ws_read) = ws_stream.split();

    let error = loop {
        tokio::select! {
            outbound = driver.next_outbound() => match outbound {
                Some(payload) => {
                    if let Err(e) = ws_write.send(tungstenite::Message::Text(payload.into())).await {
                        break Some(TransportError::Send(e.to_string()));
                    }
                }
                None => {
                    debug!(%endpoint, "closing WebSocket on request");
                    let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                    break None;
                }
            },
            inbound = ws_read.next() => match inbound {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if !driver.deliver(text.as_str()) {
                        break None;
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    debug!(%endpoint, ?frame, "server closed WebSocket");
                    break None;
                }
                // Ping/pong is answered by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%endpoint, "WebSocket read error: {}", e);
                    break Some(TransportError::Receive(e.to_string()));
                }
                None => break None,
            },
        }
    };

    info!(%endpoint, "WebSocket disconnected");
    driver.closed(error);
}
