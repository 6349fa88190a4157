//! WebSocket client for the node's JSON wRPC endpoint.
//!
//! ## Tasks
//!
//! ```text
//! callers ──call()──► pending map ──► writer task ──► socket
//! socket ──► reader task ──┬─► pending map (responses)
//!                          └─► notification queue ──► forwarder ──► NodeEventBus
//! supervisor: waits for the reader to end, reconnects with backoff,
//!             re-subscribes and queues NodeEvent::Reconnected
//! ```
//!
//! The reader never waits on the event bus. The event consumer issues
//! `get_block` calls while handling an event, and their responses travel
//! through the same reader.
//!
//! The notification queue is bounded. When it is full the reader drops the
//! notification and flags an overflow; the forwarder then discards the whole
//! backlog and publishes a single `NodeEvent::Reconnected`, whose resync
//! catches up on everything that was dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use kgi_02_dag_processing::{NodeClient, NodeError};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;
use shared_bus::{EventPublisher, NodeEvent, NodeEventBus};
use shared_types::{BlockDagInfo, BlockHash, BlocksPage, NodeInfo, RpcBlock, VirtualChainChange};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{
    map_rpc_error, methods, BlockAddedNotification, EmptyParams, GetBlockDagInfoResponse,
    GetBlockRequest, GetBlockResponse, GetBlocksRequest, GetBlocksResponse, GetInfoResponse,
    GetSinkResponse, GetVirtualChainFromBlockRequest, RpcMessage, RpcRequest,
    VirtualChainResponse,
};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, NodeError>>>;

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Notifications buffered between the socket reader and the event bus.
pub const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: usize = 10_000;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct WrpcConfig {
    /// `ws://` or `wss://` URL of the node.
    pub url: String,
    pub request_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Notifications held while the consumer is busy; beyond this the
    /// backlog collapses into one resync.
    pub notification_queue_capacity: usize,
}

impl WrpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_base_delay: RECONNECT_BASE_DELAY,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
            notification_queue_capacity: DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
        }
    }

    /// Short timeouts and delays for tests.
    pub fn for_testing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(100),
            notification_queue_capacity: 64,
        }
    }

    /// Delay before reconnection attempt number `attempts` (0-based).
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32 << attempts.min(6);
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

/// State shared by the client handle and its tasks.
pub(crate) struct Shared {
    config: WrpcConfig,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    /// Writer queue of the live connection, `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    reader: Mutex<Option<AbortHandle>>,
    /// Set when a notification was dropped on a full queue.
    overflowed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: WrpcConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Send a request and wait for its response.
    ///
    /// `hash` names the block a lookup is about, so that a "not found" reply
    /// becomes [`NodeError::NotFound`].
    async fn call<P, R>(
        &self,
        method: &'static str,
        params: P,
        hash: Option<&BlockHash>,
    ) -> Result<R, NodeError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&RpcRequest { id, method, params })
            .map_err(|e| NodeError::Rpc(format!("failed to encode {method}: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = self
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|out| out.send(Message::Text(text.into())).is_ok());
        if !sent {
            self.pending.lock().remove(&id);
            return Err(NodeError::Connection(format!(
                "not connected to {}",
                self.config.url
            )));
        }

        let result = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NodeError::Connection(format!(
                "{method} abandoned by the connection"
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(NodeError::Connection(format!(
                    "{method} timed out after {:?}",
                    self.config.request_timeout
                )))
            }
        };

        let value = result.map_err(|e| match e {
            NodeError::Rpc(message) => map_rpc_error(message, hash),
            other => other,
        })?;
        serde_json::from_value(value)
            .map_err(|e| NodeError::MalformedResponse(format!("{method}: {e}")))
    }

    /// Route one inbound text frame. Responses complete their pending
    /// request; notifications are returned for publishing.
    pub(crate) fn dispatch_text(&self, text: &str) -> Option<NodeEvent> {
        let message: RpcMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding malformed frame from node");
                return None;
            }
        };

        if let Some(id) = message.id {
            match self.pending.lock().remove(&id) {
                Some(tx) => {
                    let result = match message.error {
                        Some(error) => Err(NodeError::Rpc(error.message)),
                        None => Ok(message.params),
                    };
                    let _ = tx.send(result);
                }
                None => debug!(id, "Response for an unknown or expired request"),
            }
            return None;
        }

        match message.method.as_deref() {
            Some(methods::BLOCK_ADDED_NOTIFICATION) => {
                match serde_json::from_value::<BlockAddedNotification>(message.params) {
                    Ok(notification) => {
                        Some(NodeEvent::BlockAdded(RpcBlock::from(notification.block)))
                    }
                    Err(e) => {
                        warn!(error = %e, "Malformed block-added notification");
                        None
                    }
                }
            }
            Some(methods::VIRTUAL_CHAIN_CHANGED_NOTIFICATION) => {
                match serde_json::from_value::<VirtualChainResponse>(message.params) {
                    Ok(change) => Some(NodeEvent::VirtualChainChanged(change.into())),
                    Err(e) => {
                        warn!(error = %e, "Malformed virtual-chain-changed notification");
                        None
                    }
                }
            }
            other => {
                debug!(method = ?other, "Ignoring frame without id");
                None
            }
        }
    }

    /// Fail every in-flight request; their connection is gone.
    fn fail_pending(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(NodeError::Connection(reason.to_string())));
        }
    }

    /// Queue a notification without waiting. Returns `false` once the
    /// forwarder is gone.
    fn enqueue(&self, queue: &mpsc::Sender<NodeEvent>, event: NodeEvent) -> bool {
        match queue.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(
                        capacity = queue.max_capacity(),
                        "Notification queue full, dropping backlog until the next resync"
                    );
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn disconnect(&self) {
        self.outbound.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Open a socket, start its writer and reader, and subscribe to
/// notifications. Returns the reader task, which ends with the connection.
async fn open_session(
    shared: &Arc<Shared>,
    notifications: &mpsc::Sender<NodeEvent>,
) -> Result<JoinHandle<()>, NodeError> {
    let (socket, _) = connect_async(shared.config.url.as_str())
        .await
        .map_err(|e| NodeError::Connection(format!("{}: {e}", shared.config.url)))?;
    let (mut sink, stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Node socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    *shared.outbound.lock() = Some(out_tx.clone());
    let reader = tokio::spawn(read_loop(
        Arc::clone(shared),
        stream,
        out_tx,
        notifications.clone(),
    ));
    *shared.reader.lock() = Some(reader.abort_handle());

    let subscribed = async {
        shared
            .call::<_, IgnoredAny>(methods::SUBSCRIBE_BLOCK_ADDED, EmptyParams::default(), None)
            .await?;
        shared
            .call::<_, IgnoredAny>(
                methods::SUBSCRIBE_VIRTUAL_CHAIN_CHANGED,
                EmptyParams::default(),
                None,
            )
            .await
    };
    if let Err(e) = subscribed.await {
        shared.disconnect();
        return Err(e);
    }

    info!(url = %shared.config.url, "Connected to node");
    Ok(reader)
}

async fn read_loop(
    shared: Arc<Shared>,
    mut stream: WsReader,
    out: mpsc::UnboundedSender<Message>,
    notifications: mpsc::Sender<NodeEvent>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(event) = shared.dispatch_text(text.as_str()) {
                    if !shared.enqueue(&notifications, event) {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = out.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Node socket read failed");
                break;
            }
        }
    }
    shared.outbound.lock().take();
    shared.fail_pending("connection to node lost");
}

/// Reconnect whenever the reader ends, until the event consumer is gone.
async fn supervise(
    shared: Arc<Shared>,
    notifications: mpsc::Sender<NodeEvent>,
    mut reader: JoinHandle<()>,
) {
    loop {
        let _ = reader.await;
        if notifications.is_closed() {
            break;
        }
        warn!(url = %shared.config.url, "Connection to node lost, reconnecting");

        let mut attempts = 0u32;
        reader = loop {
            tokio::time::sleep(shared.config.backoff_delay(attempts)).await;
            match open_session(&shared, &notifications).await {
                Ok(reader) => break reader,
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!(attempts, error = %e, "Could not reconnect to node");
                }
            }
        };

        if !shared.enqueue(&notifications, NodeEvent::Reconnected) {
            break;
        }
    }
}

/// Forward queued notifications to the event bus, in arrival order. After an
/// overflow the backlog is replaced by one `Reconnected`.
async fn forward(shared: Arc<Shared>, mut queue: mpsc::Receiver<NodeEvent>, bus: NodeEventBus) {
    while let Some(event) = queue.recv().await {
        let event = if shared.overflowed.swap(false, Ordering::AcqRel) {
            let mut discarded = 1usize;
            while queue.try_recv().is_ok() {
                discarded += 1;
            }
            warn!(discarded, "Notification backlog replaced by a resync");
            NodeEvent::Reconnected
        } else {
            event
        };
        if bus.publish(event).await.is_err() {
            debug!("Event consumer gone, stopping notification forwarding");
            break;
        }
    }
}

/// [`NodeClient`] over the node's JSON wRPC endpoint.
pub struct WrpcNodeClient {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl WrpcNodeClient {
    /// Connect, subscribe to block-added and virtual-chain-changed
    /// notifications, and start publishing them to `events`.
    pub async fn connect(config: WrpcConfig, events: NodeEventBus) -> Result<Self, NodeError> {
        let (queue_tx, queue_rx) = mpsc::channel(config.notification_queue_capacity.max(1));
        let shared = Arc::new(Shared::new(config));

        let reader = open_session(&shared, &queue_tx).await?;
        let forwarder = tokio::spawn(forward(Arc::clone(&shared), queue_rx, events));
        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), queue_tx, reader));

        Ok(Self {
            shared,
            tasks: vec![forwarder, supervisor],
        })
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    /// Stop reconnecting and drop the connection.
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.shared.disconnect();
        self.shared.fail_pending("client closed");
    }
}

impl Drop for WrpcNodeClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl NodeClient for WrpcNodeClient {
    async fn get_block_dag_info(&self) -> Result<BlockDagInfo, NodeError> {
        let response: GetBlockDagInfoResponse = self
            .shared
            .call(methods::GET_BLOCK_DAG_INFO, EmptyParams::default(), None)
            .await?;
        Ok(response.into())
    }

    async fn get_block(
        &self,
        hash: &BlockHash,
        include_transactions: bool,
    ) -> Result<RpcBlock, NodeError> {
        let params = GetBlockRequest {
            hash: *hash,
            include_transactions,
        };
        let response: GetBlockResponse = self
            .shared
            .call(methods::GET_BLOCK, params, Some(hash))
            .await?;
        Ok(response.block.into())
    }

    async fn get_blocks(
        &self,
        low_hash: &BlockHash,
        include_blocks: bool,
        include_transactions: bool,
    ) -> Result<BlocksPage, NodeError> {
        let params = GetBlocksRequest {
            low_hash: *low_hash,
            include_blocks,
            include_transactions,
        };
        let response: GetBlocksResponse = self
            .shared
            .call(methods::GET_BLOCKS, params, Some(low_hash))
            .await?;
        Ok(response.into())
    }

    async fn get_selected_tip_hash(&self) -> Result<BlockHash, NodeError> {
        let response: GetSinkResponse = self
            .shared
            .call(methods::GET_SINK, EmptyParams::default(), None)
            .await?;
        Ok(response.sink)
    }

    async fn get_virtual_selected_parent_chain_from_block(
        &self,
        start_hash: &BlockHash,
    ) -> Result<VirtualChainChange, NodeError> {
        let params = GetVirtualChainFromBlockRequest {
            start_hash: *start_hash,
            include_accepted_transaction_ids: false,
        };
        let response: VirtualChainResponse = self
            .shared
            .call(methods::GET_VIRTUAL_CHAIN_FROM_BLOCK, params, Some(start_hash))
            .await?;
        Ok(response.into())
    }

    async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        let response: GetInfoResponse = self
            .shared
            .call(methods::GET_INFO, EmptyParams::default(), None)
            .await?;
        Ok(response.into())
    }
}
