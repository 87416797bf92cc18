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

//! The subchannel interface exposed to load-balancing policies.
//!
//! A [`Subchannel`] represents a method of communicating with one backend
//! address which may be connected or disconnected many times across its
//! lifetime.  Handles are reference counted (`Arc<dyn Subchannel>`); the
//! subchannel is torn down when the last handle is released.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

use crate::client::ConnectivityState;
use crate::client::channel_args::ChannelArgs;

pub mod forwarding;
pub mod internal;
mod work_serializer;


pub use forwarding::DelegatingSubchannel;
pub use forwarding::ForwardingSubchannel;
pub use internal::InternalSubchannel;
pub use internal::InternalSubchannelPool;
pub use internal::SubchannelKey;

/// The interface for subchannels that is exposed to LB policy
/// implementations.
///
/// All methods are safe to call concurrently from any thread.  None of them
/// block on I/O, and none of them invoke a watcher on the caller's stack.
pub trait Subchannel: Send + Sync {
    /// Returns the current connectivity state of the subchannel.  Has no side
    /// effects.
    fn check_connectivity_state(&self) -> ConnectivityState;

    /// Starts watching the subchannel's connectivity state.
    ///
    /// The first callback is delivered when the subchannel's state becomes a
    /// value other than `initial_state`, which may happen immediately.  Every
    /// later change is delivered to the same watcher, in order, until the
    /// watch is cancelled.  At most one callback is in flight at a time, and
    /// callbacks run on a task owned by the subchannel.
    ///
    /// There can be only one watcher per subchannel.  Registering a second
    /// watcher without cancelling the first returns
    /// [`SubchannelError::WatcherAlreadyRegistered`].
    ///
    /// The subchannel owns the watcher; it is dropped when the watch is
    /// cancelled or the subchannel is destroyed.
    fn watch_connectivity_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Result<WatcherId, SubchannelError>;

    /// Cancels a connectivity state watch.  No callback to the watcher begins
    /// after this returns; a callback already running is allowed to finish.
    /// This is a no-op if the watcher has already been removed, and may be
    /// called from within the watcher's own callback.
    fn cancel_connectivity_state_watch(&self, watcher: WatcherId);

    /// Attempts to connect to the backend.  Has no effect if already
    /// connecting or connected.  If the subchannel is currently in backoff
    /// delay due to a previously failed attempt, the new attempt starts when
    /// the delay has elapsed.
    fn request_connection(&self);

    /// Resets the subchannel's connection backoff state.  If
    /// request_connection() has been called since the subchannel entered
    /// TransientFailure, starts a new connection attempt immediately;
    /// otherwise the next request_connection() starts one without delay.
    fn reset_backoff(&self);

    /// Attaches a data watcher whose lifetime ends with the subchannel's.
    fn add_data_watcher(&self, watcher: Box<dyn DataWatcher>);

    /// Returns the channel args the subchannel was created with.
    fn channel_args(&self) -> &ChannelArgs;
}

/// Receives connectivity state changes from a subchannel.
pub trait ConnectivityStateWatcher: Send + Sync {
    /// Invoked whenever the subchannel's connectivity state changes.  There
    /// is only one invocation of this method on a given watcher at any given
    /// time.
    fn on_connectivity_state_change(&self, new_state: ConnectivityState);

    /// Returns a handle the subchannel wakes when its connection sees I/O
    /// activity, for consumers driving their own polling loop.  The handle is
    /// read when the watch starts and again after every callback.
    fn interested_parties(&self) -> Option<InterestedParties> {
        None
    }
}

/// Opaque data attached to a subchannel.
///
/// The subchannel only holds data watchers; it drops them exactly once, when
/// the subchannel itself is destroyed.  Implementations put their teardown in
/// `Drop`.
pub trait DataWatcher: Send + Sync {}

/// A wake-up handle shared between a subchannel and a consumer's own event
/// loop.
#[derive(Clone, Debug, Default)]
pub struct InterestedParties {
    notify: Arc<Notify>,
}

impl InterestedParties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the consumer.  A wake with no consumer waiting is remembered
    /// until the next `wait`.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Waits until the subchannel reports I/O activity.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Identifies a registered connectivity state watcher.  Returned by
/// `watch_connectivity_state` and used to cancel the watch.  Ids are never
/// reused within a process.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        WatcherId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

/// Misuse of the subchannel contract.  These indicate a bug in the calling
/// policy, not a connectivity problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubchannelError {
    #[error("{0} is already watching this subchannel; cancel it before registering another")]
    WatcherAlreadyRegistered(WatcherId),
    #[error("subchannel is shut down")]
    Shutdown,
}
