//! Engine surface and dispatch pipeline.
//!
//! One [`Manager`] owns one logical AMI connection. Three background tasks
//! drive it: a writer draining formatted blocks to the transport, a reader
//! framing raw bytes into line blocks (the single consumer of the
//! transport), and a dispatcher running parse → aggregate → route. Requests
//! are correlated to responses purely by FIFO position, so {write, ledger
//! submit} happens atomically under the shared state lock and nothing else
//! may write to the transport.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::actions::{self, OriginateRequest, RedirectRequest};
use crate::error::AmiError;
use crate::events::{BoxedCallbackFuture, EventBus, EventCallback, SubscriptionId};
use crate::ledger::ResponseLedger;
use crate::protocol::{ListAggregator, LogicalResponse, Routed};
use crate::record::{self, Record};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// A bounded read keeps the reader responsive to shutdown; a stall of one
/// interval is retried, not fatal.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_READ_TIMEOUTS: u32 = 60;
const WRITE_QUEUE_SIZE: usize = 100;
const INBOUND_QUEUE_SIZE: usize = 1024;
const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Connection lifecycle. `Closed` is terminal: pending requests are failed
/// and no further dispatch occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Closed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManagerOptions {
    pub port: u16,
    pub host: String,
    pub username: String,
    pub password: String,
    /// Ask the server to deliver unsolicited events (`Events: on|off`).
    pub events: bool,
}

/// Traffic from the reader task to the dispatcher.
enum Inbound {
    Block(Vec<String>),
    Closed(String),
}

struct InnerManager {
    state: EngineState,
    authenticated: bool,
    /// Channel for sending formatted wire blocks to the writer task.
    write_tx: Option<mpsc::Sender<String>>,
    ledger: ResponseLedger,
    bus: EventBus,
    /// Cancelled exactly once, when the engine closes.
    shutdown: CancellationToken,
    /// Unique identifier for this manager instance (for logging)
    instance_id: String,
}

#[derive(Clone)]
pub struct Manager {
    inner: Arc<Mutex<InnerManager>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self::new_with_buffer(DEFAULT_EVENT_BUFFER)
    }

    /// `buffer_size` is the capacity of the broadcast feed behind
    /// [`all_events_stream`](Self::all_events_stream).
    pub fn new_with_buffer(buffer_size: usize) -> Self {
        let instance_id = Uuid::new_v4().to_string()[..8].to_string();
        log::debug!("creating new Manager instance [{instance_id}]");
        let inner = InnerManager {
            state: EngineState::Idle,
            authenticated: false,
            write_tx: None,
            ledger: ResponseLedger::new(),
            bus: EventBus::new(buffer_size),
            shutdown: CancellationToken::new(),
            instance_id,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Connect over TCP and authenticate.
    ///
    /// Returns the login response on success. On an authentication failure
    /// the connection stays attached; callers normally [`close`](Self::close).
    pub async fn connect(&self, options: ManagerOptions) -> Result<LogicalResponse, AmiError> {
        let stream = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((options.host.as_str(), options.port)),
        )
        .await
        .map_err(|_| AmiError::Timeout)?
        .map_err(AmiError::Io)?;

        let (reader, writer) = stream.into_split();
        self.attach(reader, writer).await?;

        let response = self
            .request(actions::login(
                &options.username,
                &options.password,
                options.events,
            ))
            .await?;
        if response.is_success() {
            self.inner.lock().await.authenticated = true;
            Ok(response)
        } else {
            Err(AmiError::AuthenticationFailed(
                response.message().unwrap_or_default().to_string(),
            ))
        }
    }

    /// Attach an already-established transport and start dispatching.
    ///
    /// The transport seam: anything satisfying the tokio read/write traits
    /// works, a split `TcpStream` as well as an in-memory duplex pipe. The
    /// engine becomes the exclusive owner of both halves.
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<(), AmiError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        match inner.state {
            EngineState::Idle => {}
            EngineState::Running => {
                return Err(AmiError::Other(
                    "a transport is already attached".to_string(),
                ))
            }
            EngineState::Closed => {
                return Err(AmiError::ConnectionClosed("engine closed".to_string()))
            }
        }

        let (write_tx, write_rx) = mpsc::channel::<String>(WRITE_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE_SIZE);

        spawn_writer_task(writer, write_rx);
        spawn_reader_task(
            reader,
            inbound_tx,
            inner.shutdown.clone(),
            inner.instance_id.clone(),
        );
        spawn_dispatcher_task(self.inner.clone(), inbound_rx, inner.instance_id.clone());

        inner.write_tx = Some(write_tx);
        inner.state = EngineState::Running;
        log::debug!("[{}] transport attached, dispatch running", inner.instance_id);
        Ok(())
    }

    /// Send one action and await its response.
    ///
    /// The generic primitive every convenience action is built on. `fields`
    /// is an ordered mapping; repeated logical fields use `Name[0]`,
    /// `Name[1]`, … keys (stripped on the wire).
    pub async fn request<I, K, V>(&self, fields: I) -> Result<LogicalResponse, AmiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let block = record::format_fields(fields);

        let ticket = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                EngineState::Running => {}
                EngineState::Idle => return Err(AmiError::NotConnected),
                EngineState::Closed => {
                    return Err(AmiError::ConnectionClosed("engine closed".to_string()))
                }
            }
            let Some(write_tx) = inner.write_tx.as_ref() else {
                return Err(AmiError::NotConnected);
            };
            // The lock is held across {write, submit} so issuance order and
            // ledger order cannot diverge; responses are matched by FIFO
            // position only.
            if write_tx.send(block).await.is_err() {
                return Err(AmiError::ConnectionClosed(
                    "write channel closed".to_string(),
                ));
            }
            inner.ledger.submit()
        };

        match timeout(RESPONSE_TIMEOUT, ticket).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AmiError::ChannelError("responder dropped".to_string())),
            // The abandoned ticket keeps its FIFO slot; the ledger discards
            // its response when it eventually arrives.
            Err(_) => Err(AmiError::Timeout),
        }
    }

    /// Register an async callback for `event_name`, or for every event with
    /// [`WILDCARD`](crate::WILDCARD) (`"*"`).
    ///
    /// Callbacks run as independent spawned tasks; they cannot block the
    /// dispatch pipeline and a panic in one never reaches the others.
    pub async fn subscribe<F, Fut>(
        &self,
        event_name: impl Into<String>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventCallback =
            Arc::new(move |event| -> BoxedCallbackFuture { Box::pin(callback(event)) });
        self.inner
            .lock()
            .await
            .bus
            .subscribe(event_name.into(), callback)
    }

    /// Remove a subscription; returns whether it was still registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.lock().await.bus.unsubscribe(id)
    }

    /// Stream of every published event, independent of callback
    /// subscriptions. Lag on a slow consumer surfaces as a
    /// [`BroadcastStreamRecvError`], not as backpressure on dispatch.
    pub async fn all_events_stream(
        &self,
    ) -> impl Stream<Item = Result<Record, BroadcastStreamRecvError>> + Send + Unpin {
        let inner = self.inner.lock().await;
        BroadcastStream::new(inner.bus.stream_receiver())
    }

    /// Close the engine: fail every pending request with a terminal error,
    /// stop the background tasks, release the transport. Idempotent;
    /// `Closed` is irreversible.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        close_locked(&mut inner, "engine closed");
    }

    /// Resolves once the engine has transitioned to `Closed`, whether by
    /// [`close`](Self::close), logoff, or transport loss. Reconnection
    /// policy is the caller's concern, built on this signal.
    pub async fn closed(&self) {
        let token = self.inner.lock().await.shutdown.clone();
        token.cancelled().await;
    }

    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.lock().await.authenticated
    }

    /// Send `LogOff`, then close the engine regardless of the reply.
    pub async fn logoff(&self) -> Result<LogicalResponse, AmiError> {
        let response = self.request(actions::logoff()).await;
        self.close().await;
        response
    }

    /// `CoreShowChannels`; the reply is an aggregated `EventList` burst.
    pub async fn channels(&self) -> Result<LogicalResponse, AmiError> {
        self.request(actions::core_show_channels()).await
    }

    pub async fn originate(&self, request: &OriginateRequest) -> Result<LogicalResponse, AmiError> {
        self.request(actions::originate(request)?).await
    }

    pub async fn redirect(&self, request: &RedirectRequest) -> Result<LogicalResponse, AmiError> {
        self.request(actions::redirect(request)).await
    }

    pub async fn blind_transfer(
        &self,
        channel: &str,
        extension: &str,
        context: &str,
    ) -> Result<LogicalResponse, AmiError> {
        self.request(actions::blind_transfer(channel, extension, context))
            .await
    }
}

fn close_locked(inner: &mut InnerManager, reason: &str) {
    if inner.state == EngineState::Closed {
        return;
    }
    log::debug!("[{}] closing: {reason}", inner.instance_id);
    inner.state = EngineState::Closed;
    inner.authenticated = false;
    inner.write_tx = None;
    inner.shutdown.cancel();
    inner.ledger.fail_all(reason);
}

fn spawn_writer_task<W>(mut writer: W, mut write_rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(block) = write_rx.recv().await {
            if writer.write_all(block.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}

/// Single consumer of the transport: frames raw bytes into blocks of
/// decoded lines (blank line terminated) and forwards them in arrival
/// order. Parallelizing this would break response correlation.
fn spawn_reader_task<R>(
    reader: R,
    inbound_tx: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
    instance_id: String,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf_reader = BufReader::new(reader);
        let mut raw: Vec<u8> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut consecutive_timeouts = 0u32;

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => {
                    log::debug!("[{instance_id}] reader stopped by shutdown");
                    return;
                }
                read = timeout(READ_TIMEOUT, buf_reader.read_until(b'\n', &mut raw)) => read,
            };
            match read {
                Err(_) => {
                    // Partial bytes stay in `raw`; the next read resumes the
                    // same line.
                    consecutive_timeouts += 1;
                    if consecutive_timeouts >= MAX_CONSECUTIVE_READ_TIMEOUTS {
                        let _ = inbound_tx
                            .send(Inbound::Closed(format!(
                                "transport stalled for {consecutive_timeouts} consecutive reads"
                            )))
                            .await;
                        return;
                    }
                    log::trace!(
                        "[{instance_id}] read timeout ({consecutive_timeouts} consecutive), retrying"
                    );
                }
                Ok(Ok(0)) => {
                    let _ = inbound_tx
                        .send(Inbound::Closed("connection closed by peer".to_string()))
                        .await;
                    return;
                }
                Ok(Ok(_)) => {
                    consecutive_timeouts = 0;
                    let line = record::decode_line(&raw);
                    raw.clear();
                    if line.is_empty() {
                        if !lines.is_empty()
                            && inbound_tx
                                .send(Inbound::Block(std::mem::take(&mut lines)))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    } else {
                        lines.push(line);
                    }
                }
                Ok(Err(e)) => {
                    let _ = inbound_tx
                        .send(Inbound::Closed(format!("read failed: {e}")))
                        .await;
                    return;
                }
            }
        }
    });
}

fn spawn_dispatcher_task(
    inner: Arc<Mutex<InnerManager>>,
    mut inbound_rx: mpsc::Receiver<Inbound>,
    instance_id: String,
) {
    tokio::spawn(async move {
        let mut aggregator = ListAggregator::new();
        loop {
            match inbound_rx.recv().await {
                Some(Inbound::Block(lines)) => {
                    let parsed = record::parse_block(&lines);
                    match aggregator.offer(parsed) {
                        Some(Routed::Response(response)) => {
                            inner.lock().await.ledger.deliver(response);
                        }
                        Some(Routed::Event(event)) => {
                            inner.lock().await.bus.publish(event);
                        }
                        None => {}
                    }
                }
                Some(Inbound::Closed(reason)) => {
                    log::warn!("[{instance_id}] transport lost: {reason}");
                    close_locked(&mut *inner.lock().await, &reason);
                    return;
                }
                None => {
                    // Reader gone without a reason: shutdown already ran.
                    close_locked(&mut *inner.lock().await, "transport reader stopped");
                    return;
                }
            }
        }
    });
}
