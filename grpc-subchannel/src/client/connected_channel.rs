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

//! Hands calls from the filter pipeline directly to an established transport
//! connection.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use bytes::Buf;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use crate::Status;
use crate::StatusCode;
use crate::client::CallOptions;
use crate::client::Invoke;
use crate::client::RecvStream;
use crate::client::SendOptions;
use crate::client::SendStream;
use crate::client::transport::Connection;
use crate::client::transport::RecvBatch;
use crate::client::transport::SendBatch;
use crate::client::transport::TransportStream;
use crate::core::ClientResponseStreamItem;
use crate::core::RecvMessage;
use crate::core::RequestHeaders;
use crate::core::ResponseStreamItem;
use crate::core::SendMessage;
use crate::core::Trailers;
use crate::rt::GrpcRuntime;

/// Identifies one call started on a [`ConnectedChannel`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CallId(u64);

impl Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

type CallRegistry = Arc<Mutex<HashMap<CallId, Arc<dyn TransportStream>>>>;

/// Runs calls over a single established connection, one transport stream per
/// call.  Every stream is finalized when its call ends, whether the call
/// completed, was cancelled, or failed in the transport.  Failures are
/// reported to the caller as trailers.
#[derive(Clone)]
pub struct ConnectedChannel {
    connection: Arc<dyn Connection>,
    runtime: GrpcRuntime,
    calls: CallRegistry,
    next_call_id: Arc<AtomicU64>,
}

impl ConnectedChannel {
    pub fn new(connection: Arc<dyn Connection>, runtime: GrpcRuntime) -> Self {
        Self {
            connection,
            runtime,
            calls: Arc::default(),
            next_call_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the transport stream carrying an active call.  For diagnostics
    /// only.
    pub fn stream_for_call(&self, call: CallId) -> Option<Arc<dyn TransportStream>> {
        self.calls.lock().get(&call).cloned()
    }

    /// Number of calls whose streams have not been finalized.
    pub fn active_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Invoke for ConnectedChannel {
    type SendStream = ConnectedSendStream;
    type RecvStream = ConnectedRecvStream;

    fn invoke(
        &self,
        headers: RequestHeaders,
        options: CallOptions,
    ) -> (Self::SendStream, Self::RecvStream) {
        let id = CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        let call = match self.connection.new_stream(&headers) {
            Ok(stream) => {
                trace!("{id} started for {}", headers.method_name());
                self.calls.lock().insert(id, stream.clone());
                ActiveCall::new(id, stream, self.calls.clone())
            }
            Err(status) => {
                debug!("{id} for {} failed to start: {status}", headers.method_name());
                ActiveCall::failed(id, status)
            }
        };
        let call = Arc::new(call);
        (
            ConnectedSendStream {
                call: call.clone(),
                half_closed: false,
            },
            ConnectedRecvStream {
                call,
                deadline: options.deadline,
                runtime: self.runtime.clone(),
                done: false,
            },
        )
    }
}

// State shared by the two halves of a call.
struct ActiveCall {
    id: CallId,
    // None if the stream could not be created.
    stream: Option<Arc<dyn TransportStream>>,
    registry: Option<CallRegistry>,
    // Set once the stream has been finalized.
    finished: AtomicBool,
    // A failure seen by the send side, reported by the receive side.
    failure: Mutex<Option<Status>>,
}

impl ActiveCall {
    fn new(id: CallId, stream: Arc<dyn TransportStream>, registry: CallRegistry) -> Self {
        Self {
            id,
            stream: Some(stream),
            registry: Some(registry),
            finished: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn failed(id: CallId, status: Status) -> Self {
        Self {
            id,
            stream: None,
            registry: None,
            finished: AtomicBool::new(true),
            failure: Mutex::new(Some(status)),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    // Marks the call finished.  Returns false if it already was.
    fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(registry) = &self.registry {
            registry.lock().remove(&self.id);
        }
        true
    }

    fn cancel(&self, status: Status) {
        if self.finish() {
            trace!("{} cancelled: {status}", self.id);
            if let Some(stream) = &self.stream {
                stream.cancel(status);
            }
        }
    }

    fn fail(&self, status: Status) {
        self.failure.lock().get_or_insert_with(|| status.clone());
        self.cancel(status);
    }

    fn take_failure(&self) -> Option<Status> {
        self.failure.lock().take()
    }
}

/// The sending half of a call on a [`ConnectedChannel`].  Dropping it
/// half-closes the stream.
pub struct ConnectedSendStream {
    call: Arc<ActiveCall>,
    half_closed: bool,
}

impl ConnectedSendStream {
    pub fn call_id(&self) -> CallId {
        self.call.id
    }
}

impl SendStream for ConnectedSendStream {
    async fn send(&mut self, msg: &dyn SendMessage, options: SendOptions) -> Result<(), ()> {
        if self.half_closed || self.call.is_finished() {
            return Err(());
        }
        let Some(stream) = self.call.stream.clone() else {
            return Err(());
        };
        let mut buf = match msg.encode() {
            Ok(buf) => buf,
            Err(e) => {
                self.call
                    .fail(Status::internal(format!("failed to encode message: {e}")));
                return Err(());
            }
        };
        let message = buf.copy_to_bytes(buf.remaining());
        let batch = SendBatch {
            message: Some(message),
            end_of_stream: options.final_msg,
        };
        if let Err(status) = stream.send_batch(batch) {
            debug!("{} failed to send: {status}", self.call.id);
            self.call.fail(status);
            return Err(());
        }
        self.half_closed = options.final_msg;
        Ok(())
    }
}

impl Drop for ConnectedSendStream {
    fn drop(&mut self) {
        if self.half_closed || self.call.is_finished() {
            return;
        }
        if let Some(stream) = &self.call.stream {
            let _ = stream.send_batch(SendBatch {
                message: None,
                end_of_stream: true,
            });
        }
    }
}

/// The receiving half of a call on a [`ConnectedChannel`].  Dropping it before
/// trailers arrive cancels the call.
pub struct ConnectedRecvStream {
    call: Arc<ActiveCall>,
    deadline: Option<Instant>,
    runtime: GrpcRuntime,
    done: bool,
}

impl ConnectedRecvStream {
    pub fn call_id(&self) -> CallId {
        self.call.id
    }

    // Ends the call with `status`, finalizing the stream if it is still open.
    fn complete(&mut self, status: Status) -> ClientResponseStreamItem {
        self.done = true;
        self.call.cancel(status.clone());
        ResponseStreamItem::Trailers(Trailers::new(status))
    }
}

impl RecvStream for ConnectedRecvStream {
    async fn next(&mut self, msg: &mut dyn RecvMessage) -> ClientResponseStreamItem {
        if self.done {
            return ResponseStreamItem::StreamClosed;
        }
        if let Some(status) = self.call.take_failure() {
            return self.complete(status);
        }
        let Some(stream) = self.call.stream.clone() else {
            return self.complete(Status::internal("call has no transport stream"));
        };

        let deadline = self
            .deadline
            .map(|d| self.runtime.sleep(d.saturating_duration_since(Instant::now())));
        let result = match deadline {
            Some(sleep) => tokio::select! {
                result = stream.recv_batch() => Some(result),
                _ = sleep => None,
            },
            None => Some(stream.recv_batch().await),
        };
        let Some(result) = result else {
            return self.complete(Status::new(
                StatusCode::DeadlineExceeded,
                "deadline exceeded",
            ));
        };

        match result {
            Ok(RecvBatch::Headers(headers)) => ResponseStreamItem::Headers(headers),
            Ok(RecvBatch::Message(mut data)) => match msg.decode(&mut data) {
                Ok(()) => ResponseStreamItem::Message(()),
                Err(e) => self.complete(Status::internal(format!("failed to decode message: {e}"))),
            },
            Ok(RecvBatch::Trailers(trailers)) => {
                self.done = true;
                self.call.finish();
                ResponseStreamItem::Trailers(trailers)
            }
            Err(status) => {
                debug!("{} failed in transport: {status}", self.call.id);
                // A send failure is usually the cause of the stream failing.
                let status = self.call.take_failure().unwrap_or(status);
                self.complete(status)
            }
        }
    }
}

impl Drop for ConnectedRecvStream {
    fn drop(&mut self) {
        if !self.done {
            self.call
                .cancel(Status::cancelled("call cancelled by client"));
        }
    }
}
