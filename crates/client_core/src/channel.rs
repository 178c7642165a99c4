use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt, SinkExt, Stream, StreamExt};
use shared::protocol::{is_keepalive_frame, OutboundMessage};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::TransportError,
    retry::ReconnectPolicy,
    transport::{normalize_endpoint, Connector, FrameSink, TransportLink, WebSocketConnector},
};

const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MISSED_KEEPALIVES: u32 = 3;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;
/// Placeholder deadline for the liveness timer when tracking is disabled.
const IDLE_LIVENESS: Duration = Duration::from_secs(24 * 60 * 60);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    /// Closed through [`EventChannel::close`] or by dropping the handle. Terminal.
    /// A lost link goes straight from `Open` to `Reconnecting`.
    Closed,
    /// Reconnect budget exhausted. Terminal.
    Error,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting({attempt})"),
            Self::Closed => f.write_str("closed"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub reconnect: ReconnectPolicy,
    /// Interval at which the server is expected to send keepalives. `None` disables
    /// liveness tracking.
    pub keepalive_interval: Option<Duration>,
    pub missed_keepalives: u32,
    pub ack_keepalives: bool,
    pub outbound_buffer: usize,
}

impl ChannelConfig {
    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.keepalive_interval
            .map(|interval| interval.saturating_mul(self.missed_keepalives.max(1)))
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            missed_keepalives: DEFAULT_MISSED_KEEPALIVES,
            ack_keepalives: false,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    BufferFull,
    RetriesExhausted,
    ChannelClosed,
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BufferFull => "outbound buffer full",
            Self::RetriesExhausted => "reconnect attempts exhausted",
            Self::ChannelClosed => "channel closed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(String),
    StateChanged(ConnectionState),
    SendFailed { message: String, reason: SendFailure },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    Dropped(SendFailure),
}

/// Ordered stream of everything the channel observes, in receipt order. The
/// worker's last event is always a terminal [`ChannelEvent::StateChanged`].
pub struct ChannelEvents {
    rx: UnboundedReceiverStream<ChannelEvent>,
}

impl ChannelEvents {
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.next().await
    }
}

impl Stream for ChannelEvents {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

pub struct EventChannel {
    endpoint: Url,
    outbound: mpsc::Sender<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl EventChannel {
    pub fn connect(
        endpoint: &str,
        config: ChannelConfig,
    ) -> Result<(Self, ChannelEvents), TransportError> {
        Self::connect_with(endpoint, config, Arc::new(WebSocketConnector))
    }

    /// Must be called from within a tokio runtime; the worker is spawned immediately.
    pub fn connect_with(
        endpoint: &str,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, ChannelEvents), TransportError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = ChannelWorker {
            endpoint: endpoint.clone(),
            config,
            connector,
            outbound_rx,
            events: events_tx.clone(),
            state: state_tx,
            shutdown: shutdown_rx,
            pending: None,
        };
        let worker = tokio::spawn(worker.run());

        Ok((
            Self {
                endpoint,
                outbound: outbound_tx,
                events: events_tx,
                state: state_rx,
                shutdown: shutdown_tx,
                worker: Some(worker),
            },
            ChannelEvents {
                rx: UnboundedReceiverStream::new(events_rx),
            },
        ))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queues `message` for delivery. Never blocks; a message that cannot be queued
    /// is logged and reported as [`ChannelEvent::SendFailed`].
    pub fn send(&self, message: impl Into<String>) -> SendOutcome {
        let message = message.into();
        let refused = match self.state() {
            ConnectionState::Error => Some(SendFailure::RetriesExhausted),
            ConnectionState::Closed => Some(SendFailure::ChannelClosed),
            _ => None,
        };
        if let Some(reason) = refused {
            return self.fail_send(message, reason);
        }
        match self.outbound.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(message)) => self.fail_send(message, SendFailure::BufferFull),
            Err(TrySendError::Closed(message)) => {
                self.fail_send(message, SendFailure::ChannelClosed)
            }
        }
    }

    pub async fn close(mut self) {
        self.shutdown.send_replace(true);
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!(endpoint = %self.endpoint, error = %err, "channel: worker ended abnormally");
            }
        }
    }

    fn fail_send(&self, message: String, reason: SendFailure) -> SendOutcome {
        warn!(endpoint = %self.endpoint, %reason, "channel: dropping outbound message");
        let _ = self
            .events
            .send(ChannelEvent::SendFailed { message, reason });
        SendOutcome::Dropped(reason)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

enum LinkExit {
    Shutdown,
    Lost(TransportError),
}

struct ChannelWorker {
    endpoint: Url,
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    outbound_rx: mpsc::Receiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    /// A message whose write failed mid-flight; retried first on the next link.
    pending: Option<String>,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut attempt = 0_u32;
        loop {
            if attempt == 0 {
                self.set_state(ConnectionState::Connecting);
            } else {
                if self.config.reconnect.is_exhausted(attempt) {
                    warn!(
                        endpoint = %self.endpoint,
                        attempts = attempt - 1,
                        "channel: reconnect attempts exhausted"
                    );
                    self.finish(ConnectionState::Error, SendFailure::RetriesExhausted);
                    return;
                }
                self.set_state(ConnectionState::Reconnecting { attempt });
                let delay = self.config.reconnect.delay_for_attempt(attempt);
                debug!(
                    endpoint = %self.endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "channel: backing off before reconnect"
                );
                tokio::select! {
                    _ = wait_for_shutdown(&mut self.shutdown) => {
                        self.shut_down();
                        return;
                    }
                    _ = time::sleep(delay) => {}
                }
            }

            let connected = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    self.shut_down();
                    return;
                }
                result = self.connector.connect(&self.endpoint) => result,
            };

            match connected {
                Ok(link) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open);
                    match self.pump(link).await {
                        LinkExit::Shutdown => {
                            self.shut_down();
                            return;
                        }
                        LinkExit::Lost(err) => {
                            warn!(endpoint = %self.endpoint, error = %err, "channel: connection lost");
                        }
                    }
                }
                Err(err) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %err, "channel: connect failed");
                }
            }
            attempt += 1;
        }
    }

    async fn pump(&mut self, link: TransportLink) -> LinkExit {
        let TransportLink { mut inbound, outbound } = link;
        let mut writer = LinkWriter::new(outbound);
        let mut ack_due = false;

        if let Some(message) = self.pending.take() {
            writer.start(message.clone(), Some(message));
        }

        let liveness_timeout = self.config.liveness_timeout();
        let liveness = time::sleep(liveness_timeout.unwrap_or(IDLE_LIVENESS));
        tokio::pin!(liveness);

        let exit = loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break LinkExit::Shutdown,
                (message, result) = writer.finished(), if writer.is_busy() => {
                    if let Err(err) = result {
                        self.pending = message;
                        return LinkExit::Lost(err);
                    }
                    if std::mem::take(&mut ack_due) {
                        if let Some(ack) = keepalive_ack() {
                            writer.start(ack, None);
                        }
                    }
                }
                frame = inbound.next() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => break LinkExit::Lost(err),
                        None => break LinkExit::Lost(TransportError::ClosedByPeer),
                    };
                    if let Some(timeout) = liveness_timeout {
                        liveness.as_mut().reset(Instant::now() + timeout);
                    }
                    if is_keepalive_frame(&text) {
                        debug!(endpoint = %self.endpoint, "channel: keepalive");
                        if self.config.ack_keepalives {
                            if writer.is_busy() {
                                ack_due = true;
                            } else if let Some(ack) = keepalive_ack() {
                                writer.start(ack, None);
                            }
                        }
                    } else {
                        let _ = self.events.send(ChannelEvent::Message(text));
                    }
                }
                queued = self.outbound_rx.recv(), if !writer.is_busy() => {
                    let Some(message) = queued else { break LinkExit::Shutdown };
                    writer.start(message.clone(), Some(message));
                }
                _ = &mut liveness, if liveness_timeout.is_some() => {
                    break LinkExit::Lost(TransportError::LivenessTimeout(
                        liveness_timeout.unwrap_or(IDLE_LIVENESS),
                    ));
                }
            }
        };

        if let Some(message) = writer.abandon() {
            debug!(endpoint = %self.endpoint, "channel: abandoning in-flight write");
            self.pending = Some(message);
        }
        if matches!(exit, LinkExit::Shutdown) {
            writer.close().await;
        }
        exit
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
        self.announce(next);
    }

    fn announce(&self, state: ConnectionState) {
        info!(endpoint = %self.endpoint, %state, "channel: state changed");
        let _ = self.events.send(ChannelEvent::StateChanged(state));
    }

    fn shut_down(&mut self) {
        self.finish(ConnectionState::Closed, SendFailure::ChannelClosed);
    }

    /// Moves to a terminal state. Sends are refused from here on; whatever was
    /// still queued is failed before the terminal state is announced last.
    fn finish(&mut self, terminal: ConnectionState, reason: SendFailure) {
        self.state.send_replace(terminal);
        self.fail_queued(reason);
        self.announce(terminal);
    }

    fn fail_queued(&mut self, reason: SendFailure) {
        self.outbound_rx.close();
        let mut failed: Vec<String> = self.pending.take().into_iter().collect();
        while let Ok(message) = self.outbound_rx.try_recv() {
            failed.push(message);
        }
        for message in failed {
            warn!(endpoint = %self.endpoint, %reason, "channel: failing queued message");
            let _ = self
                .events
                .send(ChannelEvent::SendFailed { message, reason });
        }
    }
}

fn keepalive_ack() -> Option<String> {
    match serde_json::to_string(&OutboundMessage::Keepalive) {
        Ok(ack) => Some(ack),
        Err(err) => {
            warn!(error = %err, "channel: failed to encode keepalive ack");
            None
        }
    }
}

type WriteFuture = BoxFuture<'static, (FrameSink, Result<(), TransportError>)>;

/// Owns the outbound half of a link. At most one write is in flight, and it is
/// polled next to the read side so a stalled peer never blocks inbound frames,
/// liveness or shutdown.
struct LinkWriter {
    idle: Option<FrameSink>,
    in_flight: Option<(Option<String>, WriteFuture)>,
}

impl LinkWriter {
    fn new(sink: FrameSink) -> Self {
        Self {
            idle: Some(sink),
            in_flight: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts writing `frame`. `message` is the caller's message to hand back if the
    /// write fails or is abandoned; keepalive acks carry none.
    fn start(&mut self, frame: String, message: Option<String>) {
        let Some(mut sink) = self.idle.take() else {
            warn!("channel: write started while another is in flight");
            return;
        };
        let write = async move {
            let result = sink.send(frame).await;
            (sink, result)
        }
        .boxed();
        self.in_flight = Some((message, write));
    }

    /// Resolves when the in-flight write completes. Cancel safe: the write stays
    /// owned by `self` if this future is dropped.
    async fn finished(&mut self) -> (Option<String>, Result<(), TransportError>) {
        let Some((_, write)) = self.in_flight.as_mut() else {
            return futures::future::pending().await;
        };
        let (sink, result) = write.await;
        self.idle = Some(sink);
        let message = self.in_flight.take().and_then(|(message, _)| message);
        (message, result)
    }

    fn abandon(&mut self) -> Option<String> {
        self.in_flight.take().and_then(|(message, _)| message)
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.idle.take() {
            if time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
                debug!("channel: sink did not close within grace period");
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
