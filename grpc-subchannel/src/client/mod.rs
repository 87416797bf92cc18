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

use std::fmt::Display;
use std::time::Instant;

use crate::core::ClientResponseStreamItem;
use crate::core::RecvMessage;
use crate::core::RequestHeaders;
use crate::core::SendMessage;

pub mod backoff;
pub mod channel_args;
pub mod connected_channel;
pub mod subchannel;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use channel_args::ChannelArgs;

/// The connectivity state of a subchannel.
///
/// A subchannel begins in the Idle state.  When a connection is requested it
/// moves to Connecting, and from there to Ready on success or TransientFailure
/// on error.  A Ready subchannel returns to Idle when its connection is lost.
/// These states are not a linear progression; the only terminal state is
/// Shutdown, entered when the subchannel is torn down.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Idle => write!(f, "Idle"),
            ConnectivityState::Connecting => write!(f, "Connecting"),
            ConnectivityState::Ready => write!(f, "Ready"),
            ConnectivityState::TransientFailure => write!(f, "TransientFailure"),
            ConnectivityState::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Contains settings to configure an RPC.
#[derive(Default, Clone, Debug)]
#[non_exhaustive]
pub struct CallOptions {
    /// The deadline for the call.  If unset, the call may run indefinitely.
    pub deadline: Option<Instant>,
}

impl CallOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A trait which may be implemented by types to start calls.
///
/// Note that invoke is synchronous, which implies no pushback may be enforced
/// via execution flow.  If a call cannot be started, the returned SendStream
/// and RecvStream represent a locally-erroring stream instead.
pub trait Invoke: Send + Sync {
    type SendStream: SendStream + 'static;
    type RecvStream: RecvStream + 'static;

    fn invoke(
        &self,
        headers: RequestHeaders,
        options: CallOptions,
    ) -> (Self::SendStream, Self::RecvStream);
}

/// The sending side of a client stream.  When a `SendStream` is dropped, the
/// send side of the stream is closed.  Clients may continue to read from the
/// RecvStream.
#[trait_variant::make(Send)]
pub trait SendStream: Send {
    /// Sends `msg` on the stream.  If Err(()) is returned, the message could
    /// not be delivered because the stream was closed, and the failure is
    /// reported through the RecvStream.
    async fn send(&mut self, msg: &dyn SendMessage, options: SendOptions) -> Result<(), ()>;
}

/// Contains settings to configure a send operation on a SendStream.
#[derive(Default, Clone, Debug)]
#[non_exhaustive]
pub struct SendOptions {
    /// Closes the stream immediately after sending this message.
    pub final_msg: bool,
}

/// The receiving side of a client stream.  When a `RecvStream` is dropped, the
/// associated call is cancelled if the server has not already terminated the
/// stream.
#[trait_variant::make(Send)]
pub trait RecvStream: Send {
    /// Returns the next item on the stream.  If that item represents a message,
    /// `msg` has been updated directly to contain the received message.
    async fn next(&mut self, msg: &mut dyn RecvMessage) -> ClientResponseStreamItem;
}
