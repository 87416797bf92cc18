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

//! Interfaces to the transport that performs the actual network I/O for a
//! subchannel.  Implementations live outside this crate.

use std::sync::Arc;

use tonic::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::Status;
use crate::client::channel_args::ChannelArgs;
use crate::core::RequestHeaders;
use crate::core::ResponseHeaders;
use crate::core::Trailers;
use crate::rt::GrpcRuntime;

/// The result of a successful connection attempt.
pub struct ConnectedTransport {
    pub connection: Arc<dyn Connection>,
    /// Completes when the connection is closed.  An `Err` carries the reason
    /// for an abnormal close.
    pub disconnection_listener: oneshot::Receiver<Result<(), String>>,
}

/// Establishes connections to backend addresses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        address: String,
        runtime: GrpcRuntime,
        args: &ChannelArgs,
    ) -> Result<ConnectedTransport, String>;
}

/// An established connection capable of carrying calls.
pub trait Connection: Send + Sync {
    /// Creates a new stream for a call.  Fails if the connection can no longer
    /// accept streams.
    fn new_stream(&self, headers: &RequestHeaders) -> Result<Arc<dyn TransportStream>, Status>;
}

/// A batch of outgoing operations for a stream.
#[derive(Debug, Clone, Default)]
pub struct SendBatch {
    /// An encoded message to send, if any.
    pub message: Option<Bytes>,
    /// Half-closes the stream after `message` is sent.
    pub end_of_stream: bool,
}

/// An incoming event on a stream.
#[derive(Debug, Clone)]
pub enum RecvBatch {
    Headers(ResponseHeaders),
    Message(Bytes),
    Trailers(Trailers),
}

/// One call's bidirectional stream on a connection.
#[async_trait]
pub trait TransportStream: Send + Sync {
    /// Queues a batch for sending.  An `Err` means the stream has failed and
    /// carries the reason.
    fn send_batch(&self, batch: SendBatch) -> Result<(), Status>;

    /// Waits for the next incoming event.  An `Err` means the stream failed
    /// before the server sent trailers.
    async fn recv_batch(&self) -> Result<RecvBatch, Status>;

    /// Abandons the stream, resetting it on the wire if necessary.
    fn cancel(&self, status: Status);
}
