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

use std::sync::Arc;

use super::ConnectivityStateWatcher;
use super::DataWatcher;
use super::Subchannel;
use super::SubchannelError;
use super::WatcherId;
use crate::client::ConnectivityState;
use crate::client::channel_args::ChannelArgs;

/// A subchannel decorator.
///
/// Implementors provide `delegate()` and override only the operations they
/// want to change; every other operation forwards to the delegate.  Any type
/// implementing this trait is a [`Subchannel`], so decorators can be stacked
/// to any depth.
pub trait ForwardingSubchannel: Send + Sync {
    /// The subchannel this decorator wraps.
    fn delegate(&self) -> &Arc<dyn Subchannel>;

    fn check_connectivity_state(&self) -> ConnectivityState {
        self.delegate().check_connectivity_state()
    }

    fn watch_connectivity_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Result<WatcherId, SubchannelError> {
        self.delegate()
            .watch_connectivity_state(initial_state, watcher)
    }

    fn cancel_connectivity_state_watch(&self, watcher: WatcherId) {
        self.delegate().cancel_connectivity_state_watch(watcher)
    }

    fn request_connection(&self) {
        self.delegate().request_connection()
    }

    fn reset_backoff(&self) {
        self.delegate().reset_backoff()
    }

    fn add_data_watcher(&self, watcher: Box<dyn DataWatcher>) {
        self.delegate().add_data_watcher(watcher)
    }

    fn channel_args(&self) -> &ChannelArgs {
        self.delegate().channel_args()
    }
}

impl<T: ForwardingSubchannel> Subchannel for T {
    fn check_connectivity_state(&self) -> ConnectivityState {
        ForwardingSubchannel::check_connectivity_state(self)
    }

    fn watch_connectivity_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Result<WatcherId, SubchannelError> {
        ForwardingSubchannel::watch_connectivity_state(self, initial_state, watcher)
    }

    fn cancel_connectivity_state_watch(&self, watcher: WatcherId) {
        ForwardingSubchannel::cancel_connectivity_state_watch(self, watcher)
    }

    fn request_connection(&self) {
        ForwardingSubchannel::request_connection(self)
    }

    fn reset_backoff(&self) {
        ForwardingSubchannel::reset_backoff(self)
    }

    fn add_data_watcher(&self, watcher: Box<dyn DataWatcher>) {
        ForwardingSubchannel::add_data_watcher(self, watcher)
    }

    fn channel_args(&self) -> &ChannelArgs {
        ForwardingSubchannel::channel_args(self)
    }
}

/// A decorator that forwards everything to the subchannel it wraps.  Useful
/// on its own as a handle that keeps the wrapped subchannel alive, and as a
/// field in decorators that override a few operations.
pub struct DelegatingSubchannel {
    wrapped: Arc<dyn Subchannel>,
}

impl DelegatingSubchannel {
    pub fn new(wrapped: Arc<dyn Subchannel>) -> Self {
        Self { wrapped }
    }

    /// Returns the subchannel one level down.
    pub fn wrapped_subchannel(&self) -> &Arc<dyn Subchannel> {
        &self.wrapped
    }
}

impl ForwardingSubchannel for DelegatingSubchannel {
    fn delegate(&self) -> &Arc<dyn Subchannel> {
        &self.wrapped
    }
}
