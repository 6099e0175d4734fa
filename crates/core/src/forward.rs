//! Forwarding Engine
//!
//! A pump reads frames from one endpoint and writes them, unchanged and in
//! order, to the other. A session runs two pumps in their own tasks; when
//! either finishes, the shared cancellation token stops the other.

use crate::{
    error::RelayError,
    frame::{CloseReason, Frame},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Upper bound on passing a close frame on once the source has closed.
pub const CLOSE_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Which way a pump moves frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// Binary frames are logged once every this many messages.
    fn binary_log_interval(self) -> u64 {
        match self {
            Direction::ClientToUpstream => 100,
            Direction::UpstreamToClient => 10,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client→upstream"),
            Direction::UpstreamToClient => f.write_str("upstream→client"),
        }
    }
}

/// Shared open/closed flag for one socket.
///
/// Both pumps of a session see the same flag for each endpoint, so the pump
/// that observes a close can stop the other from writing into a dead peer.
#[derive(Debug, Clone)]
pub struct SocketState(Arc<AtomicBool>);

impl SocketState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether the socket was still open before this call.
    pub fn mark_closed(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for SocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the two sockets as seen by one pump.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub source: SocketState,
    pub destination: SocketState,
}

/// How a pump ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The source sent a close frame, which was passed on.
    Closed(Option<CloseReason>),
    /// The source stream ended without a close frame.
    Ended,
    /// The session was cancelled.
    Cancelled,
}

/// Moves frames from `source` to `destination` until the source closes,
/// either side fails, or `cancel` fires.
///
/// Close frames are propagated with the same status, or a normal closure
/// when the source gave none. Frames for a destination that is no longer
/// open are dropped.
pub async fn forward<Src, Dst, E>(
    source: &mut Src,
    destination: &mut Dst,
    endpoints: &Endpoints,
    direction: Direction,
    cancel: &CancellationToken,
) -> Result<PumpExit, RelayError>
where
    Src: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
    Dst: Sink<Frame> + Unpin,
    Dst::Error: fmt::Display,
{
    let mut count: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            next = source.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                endpoints.source.mark_closed();
                warn!(%direction, error = %e, "WebSocket read failed");
                return Err(RelayError::Transport {
                    direction,
                    message: e.to_string(),
                });
            }
            None => {
                endpoints.source.mark_closed();
                debug!(%direction, "Source stream ended without a close frame");
                return Ok(PumpExit::Ended);
            }
        };

        if let Frame::Close(close) = frame {
            endpoints.source.mark_closed();
            let reason = close.clone().unwrap_or_default();
            info!(%direction, %reason, "Source closed, propagating close");

            // Claiming the destination makes this pump its only closer, so
            // the send must not be abandoned when the sibling cancels.
            if endpoints.destination.mark_closed() {
                let sent = tokio::time::timeout(
                    CLOSE_PROPAGATION_TIMEOUT,
                    destination.send(Frame::Close(Some(reason))),
                )
                .await;
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(%direction, error = %e, "Destination already gone while propagating close")
                    }
                    Err(_) => debug!(%direction, "Timed out propagating close"),
                }
            }
            return Ok(PumpExit::Closed(close));
        }

        count += 1;
        let binary = frame.is_binary();
        if !binary || count % direction.binary_log_interval() == 0 {
            debug!(%direction, seq = count, binary, size = frame.len(), "Forwarding frame");
        }

        if !endpoints.destination.is_open() {
            continue;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            sent = destination.send(frame) => sent,
        };

        if let Err(e) = sent {
            // Lost a race with the other pump closing this endpoint.
            if !endpoints.destination.mark_closed() {
                continue;
            }
            warn!(%direction, error = %e, "WebSocket write failed");
            return Err(RelayError::Transport {
                direction,
                message: e.to_string(),
            });
        }
    }
}

/// What a finished pump task hands back.
pub struct PumpOutput<Src, Dst> {
    pub source: Src,
    pub destination: Dst,
    pub exit: Result<PumpExit, RelayError>,
}

/// Runs [`forward`] in its own task, inside the caller's span. The task
/// cancels `cancel` on the way out, however it ends, so the sibling pump
/// stops too.
pub fn spawn_pump<Src, Dst, E>(
    mut source: Src,
    mut destination: Dst,
    endpoints: Endpoints,
    direction: Direction,
    cancel: CancellationToken,
) -> JoinHandle<PumpOutput<Src, Dst>>
where
    Src: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
    Dst: Sink<Frame> + Unpin + Send + 'static,
    Dst::Error: fmt::Display + Send,
{
    tokio::spawn(
        async move {
            let _cancel_sibling = cancel.clone().drop_guard();
            let exit = forward(&mut source, &mut destination, &endpoints, direction, &cancel).await;
            PumpOutput {
                source,
                destination,
                exit,
            }
        }
        .in_current_span(),
    )
}

/// Both directions of one session.
///
/// `CS`/`CK` are the client stream and sink, `US`/`UK` the upstream ones.
pub struct Relay<CS, CK, US, UK> {
    cancel: CancellationToken,
    client_state: SocketState,
    upstream_state: SocketState,
    outbound: JoinHandle<PumpOutput<CS, UK>>,
    inbound: JoinHandle<PumpOutput<US, CK>>,
}

/// Everything left once both pumps have unwound.
pub struct RelayOutcome<CS, CK, US, UK> {
    pub client_stream: Option<CS>,
    pub client_sink: Option<CK>,
    pub upstream_stream: Option<US>,
    pub upstream_sink: Option<UK>,
    pub client_state: SocketState,
    pub upstream_state: SocketState,
    pub outbound: Option<Result<PumpExit, RelayError>>,
    pub inbound: Option<Result<PumpExit, RelayError>>,
}

impl<CS, CK, US, UK, CE, UE> Relay<CS, CK, US, UK>
where
    CS: Stream<Item = Result<Frame, CE>> + Unpin + Send + 'static,
    CE: fmt::Display + Send + 'static,
    CK: Sink<Frame> + Unpin + Send + 'static,
    CK::Error: fmt::Display + Send,
    US: Stream<Item = Result<Frame, UE>> + Unpin + Send + 'static,
    UE: fmt::Display + Send + 'static,
    UK: Sink<Frame> + Unpin + Send + 'static,
    UK::Error: fmt::Display + Send,
{
    /// Spawns the client→upstream and upstream→client pumps.
    pub fn start(client: (CS, CK), upstream: (US, UK), cancel: CancellationToken) -> Self {
        let (client_stream, client_sink) = client;
        let (upstream_stream, upstream_sink) = upstream;
        let client_state = SocketState::new();
        let upstream_state = SocketState::new();

        let outbound = spawn_pump(
            client_stream,
            upstream_sink,
            Endpoints {
                source: client_state.clone(),
                destination: upstream_state.clone(),
            },
            Direction::ClientToUpstream,
            cancel.clone(),
        );
        let inbound = spawn_pump(
            upstream_stream,
            client_sink,
            Endpoints {
                source: upstream_state.clone(),
                destination: client_state.clone(),
            },
            Direction::UpstreamToClient,
            cancel.clone(),
        );

        Self {
            cancel,
            client_state,
            upstream_state,
            outbound,
            inbound,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for both pumps to unwind. Cancellation is a normal outcome.
    pub async fn finish(self) -> RelayOutcome<CS, CK, US, UK> {
        let (outbound, inbound) = tokio::join!(self.outbound, self.inbound);

        let (client_stream, upstream_sink, outbound) = match outbound {
            Ok(output) => (Some(output.source), Some(output.destination), Some(output.exit)),
            Err(e) => {
                error!(error = %e, direction = %Direction::ClientToUpstream, "Pump task panicked");
                (None, None, None)
            }
        };
        let (upstream_stream, client_sink, inbound) = match inbound {
            Ok(output) => (Some(output.source), Some(output.destination), Some(output.exit)),
            Err(e) => {
                error!(error = %e, direction = %Direction::UpstreamToClient, "Pump task panicked");
                (None, None, None)
            }
        };

        RelayOutcome {
            client_stream,
            client_sink,
            upstream_stream,
            upstream_sink,
            client_state: self.client_state,
            upstream_state: self.upstream_state,
            outbound,
            inbound,
        }
    }
}

/// Sends a close frame to a still-open endpoint, bounded by `timeout`.
///
/// Secondary errors from a peer that is already gone are ignored. Returns
/// whether a close was actually attempted.
pub async fn close_endpoint<S>(
    sink: &mut S,
    state: &SocketState,
    reason: CloseReason,
    timeout: Duration,
) -> bool
where
    S: Sink<Frame> + Unpin,
    S::Error: fmt::Display,
{
    if !state.mark_closed() {
        return false;
    }

    match tokio::time::timeout(timeout, sink.send(Frame::Close(Some(reason)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Ignoring error while closing socket"),
        Err(_) => debug!("Timed out while closing socket"),
    }
    true
}

/// Completes a close handshake that the peer started.
///
/// The WebSocket layer queues its reply to a peer's close and only writes
/// it on a later flush or read. This flushes `sink`, then reads `stream`
/// until the transport ends, all within `timeout`.
pub async fn finish_close<St, Si, E>(stream: &mut St, sink: &mut Si, timeout: Duration)
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display,
{
    let handshake = async {
        if let Err(e) = sink.flush().await {
            debug!(error = %e, "Ignoring error while flushing close reply");
        }
        while let Some(next) = stream.next().await {
            if let Err(e) = next {
                debug!(error = %e, "Transport ended with an error after close");
                break;
            }
        }
    };

    if tokio::time::timeout(timeout, handshake).await.is_err() {
        debug!("Timed out waiting for the peer to finish closing");
    }
}
