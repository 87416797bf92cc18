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

//! Call-level types exchanged between the filter pipeline and a connected
//! transport.

use bytes::Buf;
use tonic::metadata::MetadataMap;

use crate::Status;

/// An outgoing message that knows how to serialize itself.
pub trait SendMessage: Send + Sync {
    fn encode(&self) -> Result<Box<dyn Buf + Send + Sync>, String>;
}

/// An incoming message slot that knows how to deserialize itself in place.
pub trait RecvMessage: Send + Sync {
    fn decode(&mut self, data: &mut dyn Buf) -> Result<(), String>;
}

/// One item of a response stream as seen by the client.
///
/// A well-formed response stream is:
///
/// [Headers *Message] Trailers *StreamClosed
///
/// Reads after Trailers return StreamClosed.
#[derive(Debug, Clone)]
pub enum ResponseStreamItem<M> {
    Headers(ResponseHeaders),
    Message(M),
    Trailers(Trailers),
    StreamClosed,
}

/// The client's view of a response stream item: the decoded message is written
/// into the `RecvMessage` passed to `next`, so the payload type is `()`.
pub type ClientResponseStreamItem = ResponseStreamItem<()>;

/// Headers sent by the server at the start of a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    metadata: MetadataMap,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }
}

/// Headers for the start of a call.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    /// The full (e.g. "/Service/Method") method name specified for the call.
    method_name: String,
    metadata: MetadataMap,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }
}

/// The final item of every response stream, carrying the call's status.
#[derive(Debug, Clone)]
pub struct Trailers {
    status: Status,
    metadata: MetadataMap,
}

impl Trailers {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            metadata: MetadataMap::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }
}
