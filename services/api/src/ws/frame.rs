//! Adapters between the two WebSocket libraries and the relay's [`Frame`].
//!
//! The browser leg is an axum socket, the upstream leg a tokio-tungstenite
//! client. Both are mapped onto streams and sinks of `Frame` so the core
//! engine never sees either library. Ping and pong stay on their own leg.

use axum::extract::ws::{self as client, Message as ClientMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame, frame::coding::CloseCode},
    Message as UpstreamMessage,
};
use voice_relay_core::{CloseReason, Frame};

pub fn from_client(message: ClientMessage) -> Option<Frame> {
    match message {
        ClientMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        ClientMessage::Binary(data) => Some(Frame::Binary(data)),
        ClientMessage::Close(close) => Some(Frame::Close(
            close.map(|c| CloseReason::new(c.code, c.reason.as_str())),
        )),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

pub fn to_client(frame: Frame) -> ClientMessage {
    match frame {
        Frame::Text(text) => ClientMessage::Text(text.into()),
        Frame::Binary(data) => ClientMessage::Binary(data),
        Frame::Close(close) => ClientMessage::Close(close.map(|c| client::CloseFrame {
            code: c.code,
            reason: c.reason.into(),
        })),
    }
}

pub fn from_upstream(message: UpstreamMessage) -> Option<Frame> {
    match message {
        UpstreamMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        UpstreamMessage::Binary(data) => Some(Frame::Binary(data)),
        UpstreamMessage::Close(close) => Some(Frame::Close(
            close.map(|c| CloseReason::new(u16::from(c.code), c.reason.as_str())),
        )),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

pub fn to_upstream(frame: Frame) -> UpstreamMessage {
    match frame {
        Frame::Text(text) => UpstreamMessage::Text(text.into()),
        Frame::Binary(data) => UpstreamMessage::Binary(data),
        Frame::Close(close) => UpstreamMessage::Close(close.map(|c| CloseFrame {
            code: CloseCode::from(c.code),
            reason: c.reason.into(),
        })),
    }
}

pub fn client_stream<S>(stream: S) -> impl Stream<Item = Result<Frame, axum::Error>> + Unpin
where
    S: Stream<Item = Result<ClientMessage, axum::Error>> + Unpin,
{
    stream.filter_map(|result| {
        future::ready(match result {
            Ok(message) => from_client(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    })
}

pub fn client_sink<S>(sink: S) -> impl Sink<Frame, Error = axum::Error> + Unpin
where
    S: Sink<ClientMessage, Error = axum::Error> + Unpin,
{
    sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_client(frame))))
}

pub fn upstream_stream<S>(stream: S) -> impl Stream<Item = Result<Frame, tungstenite::Error>> + Unpin
where
    S: Stream<Item = Result<UpstreamMessage, tungstenite::Error>> + Unpin,
{
    stream.filter_map(|result| {
        future::ready(match result {
            Ok(message) => from_upstream(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    })
}

pub fn upstream_sink<S>(sink: S) -> impl Sink<Frame, Error = tungstenite::Error> + Unpin
where
    S: Sink<UpstreamMessage, Error = tungstenite::Error> + Unpin,
{
    sink.with(|frame: Frame| future::ready(Ok::<_, tungstenite::Error>(to_upstream(frame))))
}
