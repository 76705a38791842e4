// Ordered WebSocket channel to the notebook server.
//
// Lifecycle: Connecting -> Open -> Closed. Closed is terminal; there is no
// reconnect.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use mathnote_common::protocol::ws::{
    decode_server_message, encode_message, ClientMessage, ProtocolError, ServerMessage,
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

enum Outgoing {
    Text(String),
    Close,
}

/// Sending half of the channel plus its observable state. Inbound messages are
/// delivered on the receiver returned by [`Channel::connect`].
#[derive(Clone)]
pub struct Channel {
    state: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl Channel {
    pub async fn connect(url: &Url) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ClientError> {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let (socket, _) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(source) => {
                transition(&state_tx, ChannelState::Closed);
                return Err(ClientError::Connect { url: url.to_string(), source: Box::new(source) });
            }
        };
        let (mut write, mut read) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();
        transition(&state_tx, ChannelState::Open);
        info!(%url, "channel open");

        let state_tx = Arc::new(state_tx);

        let state_w = Arc::clone(&state_tx);
        tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                let result = match outgoing {
                    Outgoing::Text(text) => write.send(WsMessage::Text(text.into())).await,
                    Outgoing::Close => {
                        let _ = write.close().await;
                        break;
                    }
                };
                if let Err(error) = result {
                    warn!(%error, "channel write failed");
                    break;
                }
            }
            transition(&state_w, ChannelState::Closed);
        });

        let state_r = state_tx;
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let payload = match frame {
                    Ok(WsMessage::Text(text)) => text.as_str().as_bytes().to_vec(),
                    Ok(WsMessage::Binary(bytes)) => bytes.to_vec(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        warn!(%error, "channel read failed");
                        break;
                    }
                };
                match decode_server_message(&payload) {
                    Ok(message) => {
                        if in_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(error @ ProtocolError::UnknownDiscriminant(_)) => {
                        warn!(%error, "ignoring message with unknown type");
                    }
                    Err(error) => warn!(%error, "dropping malformed message"),
                }
            }
            transition(&state_r, ChannelState::Closed);
            debug!("channel reader finished");
        });

        Ok((Self { state: state_rx, outbound: out_tx }, in_rx))
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queues `message` for sending. Fails unless the channel is open.
    pub fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::ChannelClosed);
        }
        let text = encode_message(message)?;
        self.outbound.send(Outgoing::Text(text)).map_err(|_| ClientError::ChannelClosed)
    }

    /// Starts a close handshake. The state becomes `Closed` once the writer stops.
    pub fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close);
    }

    /// Resolves once the channel reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|state| *state == ChannelState::Closed).await;
    }
}

/// Moves to `next` unless already closed.
fn transition(state: &watch::Sender<ChannelState>, next: ChannelState) -> bool {
    state.send_if_modified(|current| {
        if *current == ChannelState::Closed || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

#[cfg(test)]
mod tests {
    use mathnote_common::protocol::ws::ClientMessage;
    use tokio::sync::{mpsc, watch};

    use super::{transition, Channel, ChannelState};
    use crate::error::ClientError;

    #[test]
    fn closed_is_terminal() {
        let (tx, rx) = watch::channel(ChannelState::Connecting);
        assert!(transition(&tx, ChannelState::Open));
        assert!(transition(&tx, ChannelState::Closed));
        assert!(!transition(&tx, ChannelState::Open));
        assert_eq!(*rx.borrow(), ChannelState::Closed);
    }

    #[test]
    fn send_fails_unless_open() {
        let (state_tx, state) = watch::channel(ChannelState::Connecting);
        let (outbound, mut sent) = mpsc::unbounded_channel();
        let channel = Channel { state, outbound };

        let message = ClientMessage::RefreshNotebook;
        assert!(matches!(channel.send(&message), Err(ClientError::ChannelClosed)));

        transition(&state_tx, ChannelState::Open);
        channel.send(&message).unwrap();
        assert!(sent.try_recv().is_ok());

        transition(&state_tx, ChannelState::Closed);
        assert!(matches!(channel.send(&message), Err(ClientError::ChannelClosed)));
    }

    #[tokio::test]
    async fn connect_failure_reports_url() {
        let url = url::Url::parse("ws://127.0.0.1:1/notebooks").unwrap();
        let Err(error) = Channel::connect(&url).await else {
            panic!("nothing listens on port 1");
        };
        assert!(matches!(error, ClientError::Connect { .. }));
        assert!(error.to_string().contains("127.0.0.1:1"));
    }
}
