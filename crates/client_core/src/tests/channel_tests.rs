use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{channel::mpsc, future, sink, SinkExt, StreamExt};
use tokio::{sync::Mutex, time::timeout};
use url::Url;

use crate::{
    channel::{
        ChannelConfig, ChannelEvent, ChannelEvents, ConnectionState, EventChannel, SendFailure,
        SendOutcome,
    },
    error::TransportError,
    retry::ReconnectPolicy,
    session::PlaygroundSession,
    transport::{Connector, TransportLink},
};

const ENDPOINT: &str = "ws://playground.test/ws";
const WAIT: Duration = Duration::from_secs(5);

/// Server half of an in-memory link.
struct ServerEnd {
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

fn link_pair() -> (TransportLink, ServerEnd) {
    let (to_client, inbound) = mpsc::unbounded();
    let (outbound, from_client) = mpsc::unbounded::<String>();
    let link = TransportLink {
        inbound: inbound.boxed(),
        outbound: Box::pin(outbound.sink_map_err(|_| TransportError::ClosedByPeer)),
    };
    (
        link,
        ServerEnd {
            to_client,
            from_client,
        },
    )
}

/// A link whose outbound half accepts a frame and never finishes writing it, like
/// a peer that stopped reading.
fn stalled_link() -> (TransportLink, mpsc::UnboundedSender<Result<String, TransportError>>) {
    let (to_client, inbound) = mpsc::unbounded();
    let outbound = sink::unfold((), |(), _frame: String| {
        future::pending::<Result<(), TransportError>>()
    });
    let link = TransportLink {
        inbound: inbound.boxed(),
        outbound: Box::pin(outbound),
    };
    (link, to_client)
}

enum Step {
    Refuse,
    Accept(TransportLink),
}

struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicU32,
}

impl ScriptedConnector {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            attempts: AtomicU32::new(0),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.steps.lock().await.pop_front() {
            Some(Step::Accept(link)) => Ok(link),
            Some(Step::Refuse) | None => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

fn fast_config(max_attempts: u32) -> ChannelConfig {
    ChannelConfig {
        reconnect: ReconnectPolicy::new(
            max_attempts,
            Duration::from_millis(5),
            Duration::from_millis(20),
        ),
        keepalive_interval: None,
        ..ChannelConfig::default()
    }
}

async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("channel event in time")
        .expect("channel event stream open")
}

/// Collects events up to and including the given state transition.
async fn until_state(events: &mut ChannelEvents, target: ConnectionState) -> Vec<ChannelEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let reached = event == ChannelEvent::StateChanged(target);
        seen.push(event);
        if reached {
            return seen;
        }
    }
}

async fn next_outbound(server: &mut ServerEnd) -> String {
    timeout(WAIT, server.from_client.next())
        .await
        .expect("outbound frame in time")
        .expect("client link open")
}

#[tokio::test]
async fn delivers_inbound_frames_in_receipt_order() {
    let (link, server) = link_pair();
    let connector = ScriptedConnector::new(vec![Step::Accept(link)]);
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(1), connector).expect("connect");

    let opened = until_state(&mut events, ConnectionState::Open).await;
    assert_eq!(opened[0], ChannelEvent::StateChanged(ConnectionState::Connecting));

    for n in 0..5 {
        server
            .to_client
            .unbounded_send(Ok(format!(r#"{{"type":"backup","seq":{n}}}"#)))
            .expect("push frame");
    }
    for n in 0..5 {
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Message(format!(r#"{{"type":"backup","seq":{n}}}"#))
        );
    }
    assert!(channel.state().is_open());
    channel.close().await;
}

#[tokio::test]
async fn reconnects_within_budget_and_delivers_outage_sends_in_order() {
    let (first_link, first_server) = link_pair();
    let (second_link, mut second_server) = link_pair();
    let connector = ScriptedConnector::new(vec![
        Step::Accept(first_link),
        Step::Refuse,
        Step::Accept(second_link),
    ]);
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(3), connector.clone()).expect("connect");
    until_state(&mut events, ConnectionState::Open).await;

    drop(first_server);
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::StateChanged(ConnectionState::Reconnecting { attempt: 1 })
    );
    assert_eq!(channel.send("first"), SendOutcome::Queued);
    assert_eq!(channel.send("second"), SendOutcome::Queued);

    let recovery = until_state(&mut events, ConnectionState::Open).await;
    assert!(recovery.contains(&ChannelEvent::StateChanged(ConnectionState::Reconnecting {
        attempt: 2
    })));
    assert!(!recovery
        .iter()
        .any(|event| matches!(event, ChannelEvent::SendFailed { .. })));

    assert_eq!(next_outbound(&mut second_server).await, "first");
    assert_eq!(next_outbound(&mut second_server).await, "second");
    assert_eq!(channel.state(), ConnectionState::Open);
    assert_eq!(connector.attempts(), 3);
    channel.close().await;
}

#[tokio::test]
async fn exhausted_retries_end_in_error_and_fail_queued_sends() {
    let connector = ScriptedConnector::new(Vec::new());
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(2), connector.clone()).expect("connect");
    assert_eq!(channel.send("queued"), SendOutcome::Queued);

    let history = until_state(&mut events, ConnectionState::Error).await;
    assert!(history.contains(&ChannelEvent::SendFailed {
        message: "queued".into(),
        reason: SendFailure::RetriesExhausted,
    }));
    let states: Vec<_> = history
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Reconnecting { attempt: 2 },
            ConnectionState::Error,
        ]
    );
    assert_eq!(connector.attempts(), 3);

    assert_eq!(
        channel.send("late"),
        SendOutcome::Dropped(SendFailure::RetriesExhausted)
    );
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::SendFailed { reason: SendFailure::RetriesExhausted, .. }
    ));
}

#[tokio::test]
async fn failed_write_is_retried_first_on_next_link() {
    let (first_link, first_server) = link_pair();
    let (second_link, mut second_server) = link_pair();
    let connector = ScriptedConnector::new(vec![
        Step::Accept(first_link),
        Step::Accept(second_link),
    ]);
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(2), connector).expect("connect");
    until_state(&mut events, ConnectionState::Open).await;

    let ServerEnd {
        to_client: _first_inbound,
        from_client,
    } = first_server;
    drop(from_client);
    assert_eq!(channel.send("first"), SendOutcome::Queued);
    until_state(&mut events, ConnectionState::Reconnecting { attempt: 1 }).await;
    assert_eq!(channel.send("second"), SendOutcome::Queued);

    let recovery = until_state(&mut events, ConnectionState::Open).await;
    assert!(!recovery
        .iter()
        .any(|event| matches!(event, ChannelEvent::SendFailed { .. })));
    assert_eq!(next_outbound(&mut second_server).await, "first");
    assert_eq!(next_outbound(&mut second_server).await, "second");
    channel.close().await;
}

#[tokio::test]
async fn stalled_write_does_not_block_reads_or_close() {
    let (link, to_client) = stalled_link();
    let connector = ScriptedConnector::new(vec![Step::Accept(link)]);
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(1), connector).expect("connect");
    until_state(&mut events, ConnectionState::Open).await;

    assert_eq!(channel.send("hello"), SendOutcome::Queued);
    let backup = r#"{"type":"backup","status":"ongoing"}"#;
    to_client.unbounded_send(Ok(backup.into())).expect("push frame");
    assert_eq!(next_event(&mut events).await, ChannelEvent::Message(backup.into()));

    timeout(WAIT, channel.close())
        .await
        .expect("close is not held up by the stalled write");
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::SendFailed {
            message: "hello".into(),
            reason: SendFailure::ChannelClosed,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::StateChanged(ConnectionState::Closed)
    );
}

#[tokio::test]
async fn liveness_abandons_stalled_write_and_retries_it_first() {
    let (stalled, _stalled_inbound) = stalled_link();
    let (second_link, mut second_server) = link_pair();
    let connector = ScriptedConnector::new(vec![
        Step::Accept(stalled),
        Step::Accept(second_link),
    ]);
    let config = ChannelConfig {
        keepalive_interval: Some(Duration::from_millis(50)),
        missed_keepalives: 1,
        ..fast_config(2)
    };
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, config, connector).expect("connect");
    until_state(&mut events, ConnectionState::Open).await;

    assert_eq!(channel.send("hello"), SendOutcome::Queued);
    until_state(&mut events, ConnectionState::Reconnecting { attempt: 1 }).await;
    until_state(&mut events, ConnectionState::Open).await;
    assert_eq!(next_outbound(&mut second_server).await, "hello");
    channel.close().await;
}

#[tokio::test]
async fn drive_returns_when_retries_are_exhausted() {
    let connector = ScriptedConnector::new(Vec::new());
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, fast_config(1), connector).expect("connect");
    let mut session = PlaygroundSession::new();

    timeout(WAIT, session.drive(&mut events))
        .await
        .expect("drive ends at the terminal state while the handle is alive");
    assert_eq!(session.connection().state(), ConnectionState::Error);
    assert_eq!(channel.state(), ConnectionState::Error);
}

#[tokio::test]
async fn keepalives_are_swallowed_and_acknowledged() {
    let (link, mut server) = link_pair();
    let connector = ScriptedConnector::new(vec![Step::Accept(link)]);
    let config = ChannelConfig {
        ack_keepalives: true,
        ..fast_config(1)
    };
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, config, connector).expect("connect");
    until_state(&mut events, ConnectionState::Open).await;

    let backup = r#"{"type":"backup","status":"ongoing"}"#;
    server
        .to_client
        .unbounded_send(Ok(r#"{"type":"keepalive"}"#.into()))
        .expect("keepalive");
    server
        .to_client
        .unbounded_send(Ok(backup.into()))
        .expect("backup");

    assert_eq!(next_event(&mut events).await, ChannelEvent::Message(backup.into()));
    assert_eq!(next_outbound(&mut server).await, r#"{"type":"keepalive"}"#);
    channel.close().await;
}

#[tokio::test]
async fn silent_server_trips_liveness_timeout() {
    let (first_link, _silent_server) = link_pair();
    let (second_link, _second_server) = link_pair();
    let connector = ScriptedConnector::new(vec![
        Step::Accept(first_link),
        Step::Accept(second_link),
    ]);
    let config = ChannelConfig {
        keepalive_interval: Some(Duration::from_millis(30)),
        missed_keepalives: 1,
        ..fast_config(2)
    };
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, config, connector).expect("connect");

    until_state(&mut events, ConnectionState::Open).await;
    until_state(&mut events, ConnectionState::Reconnecting { attempt: 1 }).await;
    until_state(&mut events, ConnectionState::Open).await;
    channel.close().await;
}

#[tokio::test]
async fn close_cancels_pending_reconnect() {
    let connector = ScriptedConnector::new(Vec::new());
    let config = ChannelConfig {
        reconnect: ReconnectPolicy::new(10, Duration::from_secs(60), Duration::from_secs(60)),
        keepalive_interval: None,
        ..ChannelConfig::default()
    };
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, config, connector.clone()).expect("connect");
    until_state(&mut events, ConnectionState::Reconnecting { attempt: 1 }).await;

    timeout(WAIT, channel.close())
        .await
        .expect("close does not wait for backoff");

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::StateChanged(ConnectionState::Closed)
    );
    assert_eq!(timeout(WAIT, events.recv()).await.expect("stream end"), None);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn full_outbound_buffer_reports_failure() {
    let connector = ScriptedConnector::new(Vec::new());
    let config = ChannelConfig {
        reconnect: ReconnectPolicy::new(10, Duration::from_secs(60), Duration::from_secs(60)),
        outbound_buffer: 1,
        keepalive_interval: None,
        ..ChannelConfig::default()
    };
    let (channel, mut events) =
        EventChannel::connect_with(ENDPOINT, config, connector).expect("connect");

    assert_eq!(channel.send("kept"), SendOutcome::Queued);
    assert_eq!(
        channel.send("overflow"),
        SendOutcome::Dropped(SendFailure::BufferFull)
    );
    let failure = loop {
        if let ChannelEvent::SendFailed { message, reason } = next_event(&mut events).await {
            break (message, reason);
        }
    };
    assert_eq!(failure, ("overflow".to_string(), SendFailure::BufferFull));
    channel.close().await;
}

#[tokio::test]
async fn rejects_invalid_endpoint() {
    let connector = ScriptedConnector::new(Vec::new());
    let result = EventChannel::connect_with("ftp://playground.test", fast_config(1), connector);
    assert!(matches!(
        result,
        Err(TransportError::InvalidEndpoint { .. })
    ));
}
