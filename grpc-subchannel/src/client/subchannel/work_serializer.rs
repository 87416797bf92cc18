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

use tokio::sync::mpsc;
use tracing::trace;

use crate::rt::GrpcRuntime;

type Work = Box<dyn FnOnce() + Send>;

/// Runs scheduled closures one at a time, in scheduling order, on a single
/// task.  Work never runs on the stack of the code that scheduled it.
///
/// The task exits once the serializer is dropped and the queue has drained.
pub(super) struct WorkSerializer {
    tx: mpsc::UnboundedSender<Work>,
}

impl WorkSerializer {
    pub(super) fn new(runtime: &GrpcRuntime) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Work>();
        runtime.spawn(Box::pin(async move {
            while let Some(work) = rx.recv().await {
                work();
            }
            trace!("work serializer exiting");
        }));
        Self { tx }
    }

    pub(super) fn schedule(&self, work: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(work)).is_err() {
            trace!("work serializer closed; dropping scheduled work");
        }
    }
}
