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

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::ConnectivityStateWatcher;
use super::DataWatcher;
use super::InterestedParties;
use super::Subchannel;
use super::SubchannelError;
use super::WatcherId;
use super::work_serializer::WorkSerializer;
use crate::client::ConnectivityState;
use crate::client::backoff::BackoffConfig;
use crate::client::backoff::ExponentialBackoff;
use crate::client::channel_args::ChannelArgs;
use crate::client::connected_channel::ConnectedChannel;
use crate::client::transport::Connection;
use crate::client::transport::Transport;
use crate::rt::BoxedTaskHandle;
use crate::rt::GrpcRuntime;

type UnregisterFn = Box<dyn FnOnce(&SubchannelKey) + Send + Sync>;

enum InternalSubchannelState {
    Idle,
    Connecting(ConnectingState),
    Ready(ReadyState),
    TransientFailure(TransientFailureState),
    Shutdown,
}

struct ConnectingState {
    attempt: u64,
    abort_handle: BoxedTaskHandle,
}

struct ReadyState {
    attempt: u64,
    disconnect_task: BoxedTaskHandle,
    connection: Arc<dyn Connection>,
}

struct TransientFailureState {
    // The attempt whose failure started the current backoff delay.
    attempt: u64,
    // Set while the backoff delay is pending.
    backoff_task: Option<BoxedTaskHandle>,
    // Set if a connection was requested since entering TransientFailure.
    connection_requested: bool,
    error: String,
}

impl InternalSubchannelState {
    fn connectivity_state(&self) -> ConnectivityState {
        match self {
            Self::Idle => ConnectivityState::Idle,
            Self::Connecting(_) => ConnectivityState::Connecting,
            Self::Ready(_) => ConnectivityState::Ready,
            Self::TransientFailure(_) => ConnectivityState::TransientFailure,
            Self::Shutdown => ConnectivityState::Shutdown,
        }
    }
}

impl Debug for InternalSubchannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.connectivity_state())
    }
}

impl Drop for InternalSubchannelState {
    fn drop(&mut self) {
        match self {
            Self::Idle | Self::Shutdown => {}
            Self::Connecting(st) => st.abort_handle.abort(),
            Self::Ready(st) => st.disconnect_task.abort(),
            Self::TransientFailure(st) => {
                if let Some(task) = &st.backoff_task {
                    task.abort();
                }
            }
        }
    }
}

enum SubchannelStateMachineEvent {
    ConnectionRequested,
    BackoffReset,
    ConnectionSucceeded(
        u64,
        Arc<dyn Connection>,
        oneshot::Receiver<Result<(), String>>,
    ),
    ConnectionTimedOut(u64),
    ConnectionFailed(u64, String),
    ConnectionTerminated(u64),
    BackoffExpired(u64),
}

impl Debug for SubchannelStateMachineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRequested => write!(f, "ConnectionRequested"),
            Self::BackoffReset => write!(f, "BackoffReset"),
            Self::ConnectionSucceeded(a, _, _) => write!(f, "ConnectionSucceeded({a})"),
            Self::ConnectionTimedOut(a) => write!(f, "ConnectionTimedOut({a})"),
            Self::ConnectionFailed(a, e) => write!(f, "ConnectionFailed({a}, {e})"),
            Self::ConnectionTerminated(a) => write!(f, "ConnectionTerminated({a})"),
            Self::BackoffExpired(a) => write!(f, "BackoffExpired({a})"),
        }
    }
}

struct WatcherEntry {
    id: WatcherId,
    watcher: Arc<dyn ConnectivityStateWatcher>,
    // The last state this watcher has seen, starting with the state it
    // registered with.
    last_state: ConnectivityState,
    interested_parties: Option<InterestedParties>,
}

struct InnerSubchannel {
    state: InternalSubchannelState,
    watcher: Option<WatcherEntry>,
    data_watchers: Vec<Box<dyn DataWatcher>>,
    backoff: ExponentialBackoff,
    // Number of connection attempts started so far.  Used to discard outcomes
    // of superseded attempts.
    attempts: u64,
}

/// A subchannel backed by real connections made through a [`Transport`].
///
/// State transitions are driven by a state machine task fed by intents
/// (`request_connection`, `reset_backoff`) and by connection outcomes reported
/// by the transport:
///
/// - Subchannels start Idle.
///
/// - Idle transitions to Connecting when a connection is requested.
///
/// - Connecting transitions to Ready on success or TransientFailure on error
///   or when the connect timeout expires.
///
/// - Ready transitions to Idle when the connection is lost.
///
/// - TransientFailure transitions to Connecting once the backoff delay has
///   elapsed and a connection has been requested.  The backoff sequence
///   grows exponentially and is reset when the subchannel becomes Ready.
///
/// - Any state transitions to Shutdown on `shutdown()`.
///
/// When the last handle is dropped, pending work is aborted and the watcher
/// and data watchers are dropped without any further callback.
pub struct InternalSubchannel {
    key: SubchannelKey,
    transport: Arc<dyn Transport>,
    runtime: GrpcRuntime,
    state_machine_event_sender: mpsc::UnboundedSender<SubchannelStateMachineEvent>,
    serializer: WorkSerializer,
    weak_self: Weak<InternalSubchannel>,
    unregister_fn: Option<UnregisterFn>,
    inner: Mutex<InnerSubchannel>,
}

impl InternalSubchannel {
    /// Creates a new subchannel in Idle state.  Must be called from within
    /// the runtime's context.
    pub fn new(
        key: SubchannelKey,
        transport: Arc<dyn Transport>,
        runtime: GrpcRuntime,
    ) -> Arc<InternalSubchannel> {
        Self::new_with_unregister_fn(key, transport, runtime, None)
    }

    fn new_with_unregister_fn(
        key: SubchannelKey,
        transport: Arc<dyn Transport>,
        runtime: GrpcRuntime,
        unregister_fn: Option<UnregisterFn>,
    ) -> Arc<InternalSubchannel> {
        debug!("creating new internal subchannel for: {key:?}");
        let backoff = ExponentialBackoff::new(BackoffConfig::from_channel_args(&key.args))
            .unwrap_or_else(|err| {
                error!("invalid backoff config for {key}: {err}; using defaults");
                ExponentialBackoff::default()
            });
        let (tx, mut rx) = mpsc::unbounded_channel::<SubchannelStateMachineEvent>();
        let isc = Arc::new_cyclic(|weak_self| Self {
            key: key.clone(),
            transport,
            runtime: runtime.clone(),
            state_machine_event_sender: tx,
            serializer: WorkSerializer::new(&runtime),
            weak_self: weak_self.clone(),
            unregister_fn,
            inner: Mutex::new(InnerSubchannel {
                state: InternalSubchannelState::Idle,
                watcher: None,
                data_watchers: Vec::new(),
                backoff,
                attempts: 0,
            }),
        });

        // This task implements the subchannel state machine.  It holds only a
        // weak reference, and exits once the subchannel is dropped and every
        // sender of the event channel is gone.
        let weak = Arc::downgrade(&isc);
        runtime.spawn(Box::pin(async move {
            while let Some(event) = rx.recv().await {
                let Some(isc) = weak.upgrade() else {
                    break;
                };
                trace!("subchannel {} received event {:?}", isc.key, event);
                isc.handle_event(event);
            }
            trace!("exiting state machine task for subchannel {key}");
        }));
        isc
    }

    pub fn key(&self) -> &SubchannelKey {
        &self.key
    }

    /// Returns the error that caused the most recent transition to
    /// TransientFailure, if the subchannel is currently in that state.
    pub fn last_connection_error(&self) -> Option<String> {
        match &self.inner.lock().state {
            InternalSubchannelState::TransientFailure(st) => Some(st.error.clone()),
            _ => None,
        }
    }

    /// Returns a ConnectedChannel bound to the current connection, or None if
    /// the subchannel is not Ready.
    pub fn connected_channel(&self) -> Option<ConnectedChannel> {
        match &self.inner.lock().state {
            InternalSubchannelState::Ready(st) => Some(ConnectedChannel::new(
                st.connection.clone(),
                self.runtime.clone(),
            )),
            _ => None,
        }
    }

    /// Moves the subchannel to Shutdown, closing any connection and aborting
    /// pending attempts.  The watcher receives Shutdown as its final
    /// callback.  Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, InternalSubchannelState::Shutdown) {
            return;
        }
        self.set_state(&mut inner, InternalSubchannelState::Shutdown);
    }

    fn send_event(&self, event: SubchannelStateMachineEvent) {
        // The receiver lives as long as any handle to the subchannel does.
        let _ = self.state_machine_event_sender.send(event);
    }

    fn handle_event(&self, event: SubchannelStateMachineEvent) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, InternalSubchannelState::Shutdown) {
            trace!("subchannel {} is shut down; ignoring {event:?}", self.key);
            return;
        }
        match event {
            SubchannelStateMachineEvent::ConnectionRequested => {
                let connect_now = match &mut inner.state {
                    InternalSubchannelState::Idle => true,
                    InternalSubchannelState::TransientFailure(st) => {
                        if st.backoff_task.is_some() {
                            debug!(
                                "subchannel {} in backoff; deferring connection attempt",
                                self.key
                            );
                            st.connection_requested = true;
                            false
                        } else {
                            true
                        }
                    }
                    _ => false,
                };
                if connect_now {
                    self.move_to_connecting(&mut inner);
                }
            }
            SubchannelStateMachineEvent::BackoffReset => {
                inner.backoff.reset();
                let connect_now = match &mut inner.state {
                    InternalSubchannelState::TransientFailure(st) => {
                        if let Some(task) = st.backoff_task.take() {
                            task.abort();
                        }
                        st.connection_requested
                    }
                    _ => false,
                };
                if connect_now {
                    self.move_to_connecting(&mut inner);
                }
            }
            SubchannelStateMachineEvent::ConnectionSucceeded(attempt, connection, closed_rx) => {
                if self.is_current_attempt(&inner, attempt) {
                    inner.backoff.reset();
                    self.move_to_ready(&mut inner, attempt, connection, closed_rx);
                }
                self.wake_interested_parties(&inner);
            }
            SubchannelStateMachineEvent::ConnectionTimedOut(attempt) => {
                if self.is_current_attempt(&inner, attempt) {
                    self.move_to_transient_failure(
                        &mut inner,
                        attempt,
                        "connect timeout expired".to_string(),
                    );
                }
                self.wake_interested_parties(&inner);
            }
            SubchannelStateMachineEvent::ConnectionFailed(attempt, err) => {
                if self.is_current_attempt(&inner, attempt) {
                    self.move_to_transient_failure(&mut inner, attempt, err);
                }
                self.wake_interested_parties(&inner);
            }
            SubchannelStateMachineEvent::ConnectionTerminated(attempt) => {
                if matches!(&inner.state, InternalSubchannelState::Ready(st) if st.attempt == attempt)
                {
                    self.set_state(&mut inner, InternalSubchannelState::Idle);
                }
                self.wake_interested_parties(&inner);
            }
            SubchannelStateMachineEvent::BackoffExpired(attempt) => {
                let connect_now = match &mut inner.state {
                    InternalSubchannelState::TransientFailure(st)
                        if st.attempt == attempt && st.backoff_task.is_some() =>
                    {
                        st.backoff_task = None;
                        st.connection_requested
                    }
                    _ => false,
                };
                if connect_now {
                    self.move_to_connecting(&mut inner);
                }
            }
        }
    }

    fn is_current_attempt(&self, inner: &InnerSubchannel, attempt: u64) -> bool {
        match &inner.state {
            InternalSubchannelState::Connecting(st) if st.attempt == attempt => true,
            _ => {
                trace!(
                    "subchannel {} ignoring outcome of superseded attempt {attempt}",
                    self.key
                );
                false
            }
        }
    }

    fn move_to_connecting(&self, inner: &mut InnerSubchannel) {
        inner.attempts += 1;
        let attempt = inner.attempts;
        let min_connect_timeout = inner.backoff.min_connect_timeout();
        let transport = self.transport.clone();
        let address = self.key.address.clone();
        let args = self.key.args.clone();
        let state_machine_tx = self.state_machine_event_sender.clone();
        let runtime = self.runtime.clone();

        let connect_task = self.runtime.spawn(Box::pin(async move {
            tokio::select! {
                _ = runtime.sleep(min_connect_timeout) => {
                    let _ = state_machine_tx.send(SubchannelStateMachineEvent::ConnectionTimedOut(attempt));
                }
                result = transport.connect(address, runtime.clone(), &args) => {
                    let event = match result {
                        Ok(ct) => SubchannelStateMachineEvent::ConnectionSucceeded(
                            attempt,
                            ct.connection,
                            ct.disconnection_listener,
                        ),
                        Err(e) => SubchannelStateMachineEvent::ConnectionFailed(attempt, e),
                    };
                    let _ = state_machine_tx.send(event);
                }
            }
        }));
        self.set_state(
            inner,
            InternalSubchannelState::Connecting(ConnectingState {
                attempt,
                abort_handle: connect_task,
            }),
        );
    }

    fn move_to_ready(
        &self,
        inner: &mut InnerSubchannel,
        attempt: u64,
        connection: Arc<dyn Connection>,
        closed_rx: oneshot::Receiver<Result<(), String>>,
    ) {
        let state_machine_tx = self.state_machine_event_sender.clone();
        let key = self.key.clone();
        let disconnect_task = self.runtime.spawn(Box::pin(async move {
            match closed_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("transport for subchannel {key} closed with error: {e}"),
                Err(_) => trace!("transport for subchannel {key} dropped its close notifier"),
            }
            let _ = state_machine_tx.send(SubchannelStateMachineEvent::ConnectionTerminated(attempt));
        }));
        self.set_state(
            inner,
            InternalSubchannelState::Ready(ReadyState {
                attempt,
                disconnect_task,
                connection,
            }),
        );
    }

    fn move_to_transient_failure(&self, inner: &mut InnerSubchannel, attempt: u64, err: String) {
        let delay = inner.backoff.backoff_duration();
        debug!(
            "subchannel {} connection attempt {attempt} failed: {err}; backing off for {delay:?}",
            self.key
        );
        let state_machine_tx = self.state_machine_event_sender.clone();
        let runtime = self.runtime.clone();
        let backoff_task = self.runtime.spawn(Box::pin(async move {
            runtime.sleep(delay).await;
            let _ = state_machine_tx.send(SubchannelStateMachineEvent::BackoffExpired(attempt));
        }));
        self.set_state(
            inner,
            InternalSubchannelState::TransientFailure(TransientFailureState {
                attempt,
                backoff_task: Some(backoff_task),
                connection_requested: false,
                error: err,
            }),
        );
    }

    // Installs the new state, which aborts any work owned by the old one, and
    // schedules delivery to the registered watcher if the connectivity state
    // changed.
    fn set_state(&self, inner: &mut InnerSubchannel, new_state: InternalSubchannelState) {
        let old = inner.state.connectivity_state();
        let new = new_state.connectivity_state();
        inner.state = new_state;
        if old == new {
            return;
        }
        debug!("subchannel {} moved from {old} to {new}", self.key);
        if let Some(entry) = &inner.watcher {
            self.schedule_delivery(entry.id, new);
        }
    }

    fn schedule_delivery(&self, id: WatcherId, state: ConnectivityState) {
        let weak = self.weak_self.clone();
        self.serializer.schedule(move || {
            // A destroyed subchannel delivers nothing.
            if let Some(isc) = weak.upgrade() {
                isc.deliver(id, state);
            }
        });
    }

    // Runs on the work serializer.  The registration check below is the
    // point at which a callback begins: cancelling after it lets the callback
    // finish, cancelling before it suppresses the callback.
    fn deliver(&self, id: WatcherId, state: ConnectivityState) {
        let watcher = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.watcher.as_mut() else {
                return;
            };
            if entry.id != id || entry.last_state == state {
                return;
            }
            entry.last_state = state;
            entry.watcher.clone()
        };
        watcher.on_connectivity_state_change(state);

        let interested_parties = watcher.interested_parties();
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.watcher.as_mut() {
            if entry.id == id {
                entry.interested_parties = interested_parties;
            }
        }
    }

    fn wake_interested_parties(&self, inner: &InnerSubchannel) {
        if let Some(ip) = inner
            .watcher
            .as_ref()
            .and_then(|e| e.interested_parties.as_ref())
        {
            ip.wake();
        }
    }
}

impl Subchannel for InternalSubchannel {
    fn check_connectivity_state(&self) -> ConnectivityState {
        self.inner.lock().state.connectivity_state()
    }

    fn watch_connectivity_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Result<WatcherId, SubchannelError> {
        // Read before locking; the watcher may call back into the subchannel.
        let interested_parties = watcher.interested_parties();
        let mut inner = self.inner.lock();
        if matches!(inner.state, InternalSubchannelState::Shutdown) {
            error!("attempt to watch subchannel {} after shutdown", self.key);
            return Err(SubchannelError::Shutdown);
        }
        if let Some(entry) = &inner.watcher {
            error!(
                "attempt to register a second watcher on subchannel {}; {} is still registered",
                self.key, entry.id
            );
            return Err(SubchannelError::WatcherAlreadyRegistered(entry.id));
        }
        let id = WatcherId::next();
        let watcher: Arc<dyn ConnectivityStateWatcher> = Arc::from(watcher);
        inner.watcher = Some(WatcherEntry {
            id,
            watcher,
            last_state: initial_state,
            interested_parties,
        });
        // Delivered only if the current state differs from initial_state.
        self.schedule_delivery(id, inner.state.connectivity_state());
        Ok(id)
    }

    fn cancel_connectivity_state_watch(&self, watcher: WatcherId) {
        let removed = {
            let mut inner = self.inner.lock();
            match &inner.watcher {
                Some(entry) if entry.id == watcher => inner.watcher.take(),
                _ => None,
            }
        };
        // Dropped outside the lock, since a watcher's Drop may call back into
        // the subchannel.
        drop(removed);
    }

    fn request_connection(&self) {
        self.send_event(SubchannelStateMachineEvent::ConnectionRequested);
    }

    fn reset_backoff(&self) {
        self.send_event(SubchannelStateMachineEvent::BackoffReset);
    }

    fn add_data_watcher(&self, watcher: Box<dyn DataWatcher>) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, InternalSubchannelState::Shutdown) {
            drop(inner);
            debug!(
                "subchannel {} is shut down; dropping data watcher",
                self.key
            );
            drop(watcher);
            return;
        }
        inner.data_watchers.push(watcher);
    }

    fn channel_args(&self) -> &ChannelArgs {
        &self.key.args
    }
}

impl Drop for InternalSubchannel {
    fn drop(&mut self) {
        debug!("dropping internal subchannel {:?}", self.key);
        let inner = self.inner.get_mut();
        inner.state = InternalSubchannelState::Shutdown;
        drop(inner.watcher.take());
        drop(std::mem::take(&mut inner.data_watchers));
        if let Some(unregister_fn) = self.unregister_fn.take() {
            unregister_fn(&self.key);
        }
    }
}

/// SubchannelKey uniquely identifies a subchannel in the pool: the backend
/// address plus the channel args it connects with.
#[derive(PartialEq, PartialOrd, Eq, Ord, Clone)]
pub struct SubchannelKey {
    address: String,
    args: ChannelArgs,
}

impl SubchannelKey {
    pub fn new(address: impl Into<String>, args: ChannelArgs) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &ChannelArgs {
        &self.args
    }
}

impl Display for SubchannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl Debug for SubchannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.address, self.args)
    }
}

/// Shares subchannels between holders that need a connection to the same
/// address with the same args.  The pool holds subchannels weakly; an entry
/// is removed when its subchannel is dropped.
pub struct InternalSubchannelPool {
    transport: Arc<dyn Transport>,
    runtime: GrpcRuntime,
    subchannels: RwLock<BTreeMap<SubchannelKey, Weak<InternalSubchannel>>>,
}

impl InternalSubchannelPool {
    pub fn new(transport: Arc<dyn Transport>, runtime: GrpcRuntime) -> Arc<Self> {
        Arc::new(Self {
            transport,
            runtime,
            subchannels: RwLock::new(BTreeMap::new()),
        })
    }

    /// Returns the live subchannel for `key`, creating one if necessary.
    pub fn get_or_create_subchannel(self: &Arc<Self>, key: SubchannelKey) -> Arc<InternalSubchannel> {
        let mut subchannels = self.subchannels.write();
        if let Some(isc) = subchannels.get(&key).and_then(Weak::upgrade) {
            trace!("reusing pooled subchannel for: {key:?}");
            return isc;
        }
        let pool = Arc::downgrade(self);
        let unregister_fn: UnregisterFn = Box::new(move |key: &SubchannelKey| {
            if let Some(pool) = pool.upgrade() {
                pool.unregister_subchannel(key);
            }
        });
        let isc = InternalSubchannel::new_with_unregister_fn(
            key.clone(),
            self.transport.clone(),
            self.runtime.clone(),
            Some(unregister_fn),
        );
        debug!("registering subchannel for: {key:?} with the pool");
        subchannels.insert(key, Arc::downgrade(&isc));
        isc
    }

    pub fn lookup_subchannel(&self, key: &SubchannelKey) -> Option<Arc<InternalSubchannel>> {
        self.subchannels.read().get(key).and_then(Weak::upgrade)
    }

    /// Number of live subchannels in the pool.
    pub fn len(&self) -> usize {
        self.subchannels
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister_subchannel(&self, key: &SubchannelKey) {
        let mut subchannels = self.subchannels.write();
        // A newer subchannel may have been registered under the same key after
        // this one's last handle was released.  Only the strong count is
        // checked, so no handle is created (and dropped) under the lock.
        if subchannels.get(key).is_some_and(|w| w.strong_count() == 0) {
            debug!("removing subchannel for: {key:?} from the pool");
            subchannels.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::CallOptions;
    use crate::client::Invoke;
    use crate::client::test_utils::FakeTransport;
    use crate::client::test_utils::expect_attempt;
    use crate::client::test_utils::wait_for_state;
    use crate::core::RequestHeaders;
    use crate::rt::default_runtime;

    #[tokio::test]
    async fn pool_shares_subchannels_by_key() {
        let (transport, _attempts) = FakeTransport::new();
        let pool = InternalSubchannelPool::new(Arc::new(transport), default_runtime());
        let args = ChannelArgs::new().set("k", 1);

        let a = pool.get_or_create_subchannel(SubchannelKey::new("10.0.0.1:80", args.clone()));
        let b = pool.get_or_create_subchannel(SubchannelKey::new("10.0.0.1:80", args.clone()));
        let c = pool.get_or_create_subchannel(SubchannelKey::new("10.0.0.1:80", ChannelArgs::new()));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn pool_entry_removed_when_last_handle_dropped() {
        let (transport, _attempts) = FakeTransport::new();
        let pool = InternalSubchannelPool::new(Arc::new(transport), default_runtime());
        let key = SubchannelKey::new("10.0.0.1:80", ChannelArgs::new());

        let a = pool.get_or_create_subchannel(key.clone());
        let b = a.clone();
        drop(a);
        assert!(pool.lookup_subchannel(&key).is_some());
        drop(b);
        assert!(pool.lookup_subchannel(&key).is_none());
        assert!(pool.is_empty());

        let c = pool.get_or_create_subchannel(key.clone());
        assert_eq!(c.check_connectivity_state(), ConnectivityState::Idle);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn connected_channel_only_when_ready() {
        let (transport, mut attempts) = FakeTransport::new();
        let isc = InternalSubchannel::new(
            SubchannelKey::new("10.0.0.1:80", ChannelArgs::new()),
            Arc::new(transport),
            default_runtime(),
        );
        assert!(isc.connected_channel().is_none());

        isc.request_connection();
        let attempt = expect_attempt(&mut attempts).await;
        assert_eq!(attempt.address(), "10.0.0.1:80");
        let conn = attempt.succeed();
        wait_for_state(&*isc, ConnectivityState::Ready).await;

        let channel = isc.connected_channel().unwrap();
        let (_tx, _rx) = channel.invoke(
            RequestHeaders::new().with_method_name("/svc/Method"),
            CallOptions::default(),
        );
        let streams = conn.connection().streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].headers().method_name(), "/svc/Method");

        conn.close();
        wait_for_state(&*isc, ConnectivityState::Idle).await;
        assert!(isc.connected_channel().is_none());
    }

    #[tokio::test]
    async fn last_connection_error_reported_in_transient_failure() {
        let (transport, mut attempts) = FakeTransport::new();
        let isc = InternalSubchannel::new(
            SubchannelKey::new("10.0.0.1:80", ChannelArgs::new()),
            Arc::new(transport),
            default_runtime(),
        );
        assert_eq!(isc.last_connection_error(), None);

        isc.request_connection();
        expect_attempt(&mut attempts).await.fail("connection refused");
        wait_for_state(&*isc, ConnectivityState::TransientFailure).await;
        assert_eq!(
            isc.last_connection_error().as_deref(),
            Some("connection refused")
        );
    }
}
