//! Upstream WebSocket transport shared by the streaming providers.
//!
//! Each streaming provider speaks its own dialect (subscription handshake,
//! message framing), but they all ride the same transport: dial, send an
//! optional handshake, then read text frames and hand them to a
//! provider-specific parser that yields canonical quotes. Everything past
//! [`QuoteStream::into_stream`] is provider-agnostic.

use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::Quote;

/// Stream of normalized ticks, provider-agnostic.
pub type TickStream = BoxStream<'static, Result<Quote, MarketDataError>>;

/// Parses one upstream text frame into a normalized quote.
///
/// The first argument is the canonical symbol the connection was opened
/// for; ticks are stamped with it so fan-out never depends on
/// provider-native identifiers. `Ok(None)` marks a control frame
/// (heartbeat, subscription ack) that carries no tick.
pub type TickParser = fn(&str, &str) -> Result<Option<Quote>, MarketDataError>;

/// Bound on dialing plus the subscription handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One live upstream streaming connection for a single symbol.
pub struct QuoteStream {
    provider: &'static str,
    symbol: String,
    parser: TickParser,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl QuoteStream {
    /// Dial `url`, send the optional subscription handshake, and wrap the
    /// socket. The whole establishment is bounded by a connect timeout so
    /// a black-holed endpoint cannot stall the caller.
    pub async fn connect(
        provider: &'static str,
        symbol: &str,
        url: &str,
        handshake: Option<String>,
        parser: TickParser,
    ) -> Result<Self, MarketDataError> {
        let establish = async {
            let (mut socket, _response) =
                connect_async(url)
                    .await
                    .map_err(|e| MarketDataError::Transport {
                        provider: provider.to_string(),
                        message: format!("WebSocket connect failed: {}", e),
                    })?;

            if let Some(payload) = handshake {
                socket
                    .send(Message::Text(payload))
                    .await
                    .map_err(|e| MarketDataError::Transport {
                        provider: provider.to_string(),
                        message: format!("Subscription handshake failed: {}", e),
                    })?;
            }

            Ok::<_, MarketDataError>(socket)
        };

        let socket = tokio::time::timeout(CONNECT_TIMEOUT, establish)
            .await
            .map_err(|_| MarketDataError::Timeout {
                provider: provider.to_string(),
            })??;

        debug!(provider, symbol, url, "streaming connection established");

        Ok(Self {
            provider,
            symbol: symbol.to_string(),
            parser,
            socket,
        })
    }

    /// Read frames until the next tick.
    ///
    /// Protocol pings are answered inline, control frames are skipped, and
    /// frames the parser rejects are logged and skipped so one malformed
    /// message never kills the feed. Returns `None` once the upstream
    /// closes or the transport errors.
    pub async fn next_quote(&mut self) -> Option<Quote> {
        loop {
            let message = self.socket.next().await?;

            match message {
                Ok(Message::Text(text)) => match (self.parser)(&self.symbol, &text) {
                    Ok(Some(quote)) => return Some(quote),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(
                            provider = self.provider,
                            symbol = %self.symbol,
                            error = %e,
                            "skipping malformed frame"
                        );
                        continue;
                    }
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.socket.send(Message::Pong(payload)).await {
                        warn!(
                            provider = self.provider,
                            symbol = %self.symbol,
                            error = %e,
                            "failed to answer ping, dropping connection"
                        );
                        return None;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(
                        provider = self.provider,
                        symbol = %self.symbol,
                        ?frame,
                        "upstream closed the stream"
                    );
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(
                        provider = self.provider,
                        symbol = %self.symbol,
                        error = %e,
                        "streaming read error"
                    );
                    return None;
                }
            }
        }
    }

    /// Convert the connection into a provider-agnostic tick stream.
    pub fn into_stream(self) -> TickStream {
        futures_util::stream::unfold(self, |mut connection| async move {
            connection.next_quote().await.map(|quote| (Ok(quote), connection))
        })
        .boxed()
    }
}
