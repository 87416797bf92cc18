/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Fakes shared by the subchannel and connected channel tests.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tonic::async_trait;

use crate::Status;
use crate::client::ChannelArgs;
use crate::client::ConnectivityState;
use crate::client::subchannel::ConnectivityStateWatcher;
use crate::client::subchannel::DataWatcher;
use crate::client::subchannel::InterestedParties;
use crate::client::subchannel::Subchannel;
use crate::client::subchannel::SubchannelError;
use crate::client::subchannel::WatcherId;
use crate::client::transport::ConnectedTransport;
use crate::client::transport::Connection;
use crate::client::transport::RecvBatch;
use crate::client::transport::SendBatch;
use crate::client::transport::Transport;
use crate::client::transport::TransportStream;
use crate::core::RecvMessage;
use crate::core::RequestHeaders;
use crate::core::SendMessage;
use crate::rt::GrpcRuntime;

pub(crate) const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_TEST_SHORT_TIMEOUT: Duration = Duration::from_millis(100);

/// A transport whose connection attempts are resolved by the test.  Every call
/// to `connect` is surfaced as a [`ConnectAttempt`] on the receiver returned
/// by `new`.
pub(crate) struct FakeTransport {
    tx_attempts: mpsc::UnboundedSender<ConnectAttempt>,
}

impl FakeTransport {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ConnectAttempt>) {
        let (tx_attempts, rx_attempts) = mpsc::unbounded_channel();
        (Self { tx_attempts }, rx_attempts)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        address: String,
        _runtime: GrpcRuntime,
        args: &ChannelArgs,
    ) -> Result<ConnectedTransport, String> {
        let (result_tx, result_rx) = oneshot::channel();
        self.tx_attempts
            .send(ConnectAttempt {
                address,
                args: args.clone(),
                result_tx,
            })
            .map_err(|_| "test is no longer accepting connect attempts".to_string())?;
        result_rx
            .await
            .map_err(|_| "connect attempt abandoned by test".to_string())?
    }
}

/// A pending connection attempt.  Dropping it fails the attempt.
pub(crate) struct ConnectAttempt {
    address: String,
    args: ChannelArgs,
    result_tx: oneshot::Sender<Result<ConnectedTransport, String>>,
}

impl Debug for ConnectAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectAttempt({})", self.address)
    }
}

impl ConnectAttempt {
    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn args(&self) -> &ChannelArgs {
        &self.args
    }

    /// Completes the attempt with a new connection.  The connection stays up
    /// until the returned handle is closed or dropped.
    pub(crate) fn succeed(self) -> FakeConnectionHandle {
        let connection = Arc::new(FakeConnection::default());
        let (closed_tx, closed_rx) = oneshot::channel();
        let _ = self.result_tx.send(Ok(ConnectedTransport {
            connection: connection.clone(),
            disconnection_listener: closed_rx,
        }));
        FakeConnectionHandle {
            connection,
            closed_tx: Some(closed_tx),
        }
    }

    pub(crate) fn fail(self, err: &str) {
        let _ = self.result_tx.send(Err(err.to_string()));
    }
}

pub(crate) struct FakeConnectionHandle {
    connection: Arc<FakeConnection>,
    closed_tx: Option<oneshot::Sender<Result<(), String>>>,
}

impl FakeConnectionHandle {
    pub(crate) fn connection(&self) -> &Arc<FakeConnection> {
        &self.connection
    }

    /// Simulates the peer closing the connection.
    pub(crate) fn close(mut self) {
        if let Some(tx) = self.closed_tx.take() {
            let _ = tx.send(Err("connection reset by peer".to_string()));
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeConnection {
    streams: Mutex<Vec<Arc<FakeStream>>>,
    refuse_streams: AtomicBool,
}

impl FakeConnection {
    pub(crate) fn refuse_streams(&self) {
        self.refuse_streams.store(true, Ordering::SeqCst);
    }

    pub(crate) fn streams(&self) -> Vec<Arc<FakeStream>> {
        self.streams.lock().clone()
    }
}

impl Connection for FakeConnection {
    fn new_stream(&self, headers: &RequestHeaders) -> Result<Arc<dyn TransportStream>, Status> {
        if self.refuse_streams.load(Ordering::SeqCst) {
            return Err(Status::unavailable("connection is draining"));
        }
        let stream = Arc::new(FakeStream::new(headers.clone()));
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}

/// A transport stream that records what the call sends and replays whatever
/// the test pushes as the server's response.
pub(crate) struct FakeStream {
    headers: RequestHeaders,
    sent: Mutex<Vec<SendBatch>>,
    cancelled: Mutex<Option<Status>>,
    recv_tx: mpsc::UnboundedSender<Result<RecvBatch, Status>>,
    recv_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<RecvBatch, Status>>>,
}

impl FakeStream {
    fn new(headers: RequestHeaders) -> Self {
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        Self {
            headers,
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(None),
            recv_tx,
            recv_rx: tokio::sync::Mutex::new(recv_rx),
        }
    }

    pub(crate) fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    pub(crate) fn sent(&self) -> Vec<SendBatch> {
        self.sent.lock().clone()
    }

    pub(crate) fn cancelled(&self) -> Option<Status> {
        self.cancelled.lock().clone()
    }

    /// Queues an item for the call to receive.
    pub(crate) fn push(&self, item: Result<RecvBatch, Status>) {
        let _ = self.recv_tx.send(item);
    }
}

#[async_trait]
impl TransportStream for FakeStream {
    fn send_batch(&self, batch: SendBatch) -> Result<(), Status> {
        if let Some(status) = self.cancelled.lock().clone() {
            return Err(status);
        }
        self.sent.lock().push(batch);
        Ok(())
    }

    async fn recv_batch(&self) -> Result<RecvBatch, Status> {
        // The sender lives in self, so the channel never closes.
        self.recv_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(Status::internal("fake stream closed")))
    }

    fn cancel(&self, status: Status) {
        let mut cancelled = self.cancelled.lock();
        if cancelled.is_none() {
            *cancelled = Some(status);
        }
    }
}

/// Increments a shared counter when dropped.
pub(crate) struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub(crate) fn new(count: &Arc<AtomicUsize>) -> Self {
        Self(count.clone())
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connectivity state watcher that forwards every callback to a channel and
/// fails the test if two callbacks ever overlap.
pub(crate) struct RecordingWatcher {
    tx_states: mpsc::UnboundedSender<ConnectivityState>,
    in_callback: AtomicBool,
    interested_parties: Option<InterestedParties>,
    on_change: Option<Box<dyn Fn(ConnectivityState) + Send + Sync>>,
    _drop_counter: Option<DropCounter>,
}

impl RecordingWatcher {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ConnectivityState>) {
        let (tx_states, rx_states) = mpsc::unbounded_channel();
        let watcher = Self {
            tx_states,
            in_callback: AtomicBool::new(false),
            interested_parties: None,
            on_change: None,
            _drop_counter: None,
        };
        (watcher, rx_states)
    }

    pub(crate) fn with_drop_counter(mut self, count: &Arc<AtomicUsize>) -> Self {
        self._drop_counter = Some(DropCounter::new(count));
        self
    }

    pub(crate) fn with_interested_parties(mut self, ip: InterestedParties) -> Self {
        self.interested_parties = Some(ip);
        self
    }

    /// Runs `f` inside every callback, before the state is recorded.
    pub(crate) fn with_on_change(
        mut self,
        f: impl Fn(ConnectivityState) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Box::new(f));
        self
    }
}

impl ConnectivityStateWatcher for RecordingWatcher {
    fn on_connectivity_state_change(&self, new_state: ConnectivityState) {
        assert!(
            !self.in_callback.swap(true, Ordering::SeqCst),
            "overlapping watcher callbacks"
        );
        if let Some(f) = &self.on_change {
            f(new_state);
        }
        let _ = self.tx_states.send(new_state);
        self.in_callback.store(false, Ordering::SeqCst);
    }

    fn interested_parties(&self) -> Option<InterestedParties> {
        self.interested_parties.clone()
    }
}

pub(crate) struct CountingDataWatcher {
    _drop_counter: DropCounter,
}

impl CountingDataWatcher {
    pub(crate) fn new(count: &Arc<AtomicUsize>) -> Self {
        Self {
            _drop_counter: DropCounter::new(count),
        }
    }
}

impl DataWatcher for CountingDataWatcher {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TestEvent {
    CheckConnectivityState,
    Watch(ConnectivityState),
    CancelWatch(WatcherId),
    RequestConnection,
    ResetBackoff,
    AddDataWatcher,
}

/// A subchannel whose state is set directly by the test.  Every call made on
/// it is reported as a [`TestEvent`].  State changes are delivered to the
/// watcher on the task calling `set_state`.
pub(crate) struct TestSubchannel {
    args: ChannelArgs,
    state: Mutex<ConnectivityState>,
    watcher: Mutex<Option<(WatcherId, Arc<dyn ConnectivityStateWatcher>)>>,
    data_watchers: Mutex<Vec<Box<dyn DataWatcher>>>,
    tx_events: mpsc::UnboundedSender<TestEvent>,
}

impl TestSubchannel {
    pub(crate) fn new(args: ChannelArgs) -> (Arc<Self>, mpsc::UnboundedReceiver<TestEvent>) {
        let (tx_events, rx_events) = mpsc::unbounded_channel();
        let sc = Arc::new(Self {
            args,
            state: Mutex::new(ConnectivityState::Idle),
            watcher: Mutex::new(None),
            data_watchers: Mutex::new(Vec::new()),
            tx_events,
        });
        (sc, rx_events)
    }

    pub(crate) fn set_state(&self, state: ConnectivityState) {
        *self.state.lock() = state;
        let watcher = self.watcher.lock().as_ref().map(|(_, w)| w.clone());
        if let Some(w) = watcher {
            w.on_connectivity_state_change(state);
        }
    }

    pub(crate) fn data_watcher_count(&self) -> usize {
        self.data_watchers.lock().len()
    }

    fn record(&self, event: TestEvent) {
        let _ = self.tx_events.send(event);
    }
}

impl Subchannel for TestSubchannel {
    fn check_connectivity_state(&self) -> ConnectivityState {
        self.record(TestEvent::CheckConnectivityState);
        *self.state.lock()
    }

    fn watch_connectivity_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Result<WatcherId, SubchannelError> {
        self.record(TestEvent::Watch(initial_state));
        let mut slot = self.watcher.lock();
        if let Some((id, _)) = slot.as_ref() {
            return Err(SubchannelError::WatcherAlreadyRegistered(*id));
        }
        let id = WatcherId::next();
        *slot = Some((id, Arc::from(watcher)));
        Ok(id)
    }

    fn cancel_connectivity_state_watch(&self, watcher: WatcherId) {
        self.record(TestEvent::CancelWatch(watcher));
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(|(id, _)| *id == watcher) {
            *slot = None;
        }
    }

    fn request_connection(&self) {
        self.record(TestEvent::RequestConnection);
    }

    fn reset_backoff(&self) {
        self.record(TestEvent::ResetBackoff);
    }

    fn add_data_watcher(&self, watcher: Box<dyn DataWatcher>) {
        self.record(TestEvent::AddDataWatcher);
        self.data_watchers.lock().push(watcher);
    }

    fn channel_args(&self) -> &ChannelArgs {
        &self.args
    }
}

/// A message that encodes to fixed bytes.
pub(crate) struct BytesMessage(pub(crate) Bytes);

impl SendMessage for BytesMessage {
    fn encode(&self) -> Result<Box<dyn bytes::Buf + Send + Sync>, String> {
        Ok(Box::new(self.0.clone()))
    }
}

/// A message slot that keeps the raw bytes it decodes.
#[derive(Default)]
pub(crate) struct BytesSlot(pub(crate) Vec<u8>);

impl RecvMessage for BytesSlot {
    fn decode(&mut self, data: &mut dyn bytes::Buf) -> Result<(), String> {
        self.0.clear();
        while data.has_remaining() {
            let chunk = data.chunk();
            self.0.extend_from_slice(chunk);
            let n = chunk.len();
            data.advance(n);
        }
        Ok(())
    }
}

pub(crate) async fn expect_attempt(
    rx_attempts: &mut mpsc::UnboundedReceiver<ConnectAttempt>,
) -> ConnectAttempt {
    tokio::select! {
        attempt = rx_attempts.recv() => attempt.expect("transport dropped"),
        _ = tokio::time::sleep(DEFAULT_TEST_DURATION) => panic!("timeout waiting for a connect attempt"),
    }
}

pub(crate) async fn expect_state(
    rx_states: &mut mpsc::UnboundedReceiver<ConnectivityState>,
    want: ConnectivityState,
) {
    tokio::select! {
        got = rx_states.recv() => assert_eq!(got, Some(want)),
        _ = tokio::time::sleep(DEFAULT_TEST_DURATION) => panic!("timeout waiting for {want}"),
    }
}

/// Fails the test if anything arrives on `rx` within a short window.
pub(crate) async fn verify_no_event<T: Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    tokio::select! {
        _ = tokio::time::sleep(DEFAULT_TEST_SHORT_TIMEOUT) => {}
        event = rx.recv() => panic!("unexpected event: {event:?}"),
    }
}

/// Polls until the subchannel reports `want`.
pub(crate) async fn wait_for_state(sc: &dyn Subchannel, want: ConnectivityState) {
    let poll = async {
        while sc.check_connectivity_state() != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::select! {
        _ = poll => {}
        _ = tokio::time::sleep(DEFAULT_TEST_DURATION) => panic!("timeout waiting for {want}"),
    }
}
