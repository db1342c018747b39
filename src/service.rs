// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{status::Status, watcher},
    anyhow::{format_err, Error},
    futures::{
        channel::{mpsc, oneshot},
        Stream, StreamExt,
    },
};

/// Completes a shutdown request once the device handler has stopped.
#[derive(Debug)]
pub struct FshostShutdownResponder {
    done: Option<oneshot::Sender<()>>,
}

impl FshostShutdownResponder {
    /// Returns a responder along with the receiver the requester waits on.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (FshostShutdownResponder { done: Some(sender) }, receiver)
    }

    /// A responder for a requester that does not wait for shutdown to complete.
    pub fn detached() -> Self {
        FshostShutdownResponder { done: None }
    }

    pub fn close(self) -> Result<(), Error> {
        match self.done {
            Some(done) => {
                done.send(()).map_err(|()| format_err!("shutdown requester went away"))
            }
            None => Ok(()),
        }
    }
}

pub enum BlockWatcherRequest {
    Pause { responder: oneshot::Sender<Result<(), Status>> },
    Resume { responder: oneshot::Sender<Result<(), Status>> },
}

/// The client end of the block watcher control protocol.
#[derive(Clone)]
pub struct BlockWatcherProxy {
    requests: mpsc::UnboundedSender<BlockWatcherRequest>,
}

impl BlockWatcherProxy {
    /// Stops the block watcher from handling new devices until a matching `resume`.
    pub async fn pause(&self) -> Result<(), Status> {
        self.call(|responder| BlockWatcherRequest::Pause { responder }).await
    }

    /// Undoes one `pause`. Fails with `BadState` if the watcher is not paused.
    pub async fn resume(&self) -> Result<(), Status> {
        self.call(|responder| BlockWatcherRequest::Resume { responder }).await
    }

    async fn call(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<(), Status>>) -> BlockWatcherRequest,
    ) -> Result<(), Status> {
        let (responder, response) = oneshot::channel();
        self.requests.unbounded_send(request(responder)).map_err(|_| Status::BadState)?;
        response.await.map_err(|_| Status::BadState)?
    }
}

pub fn block_watcher_channel() -> (BlockWatcherProxy, mpsc::UnboundedReceiver<BlockWatcherRequest>)
{
    let (requests, stream) = mpsc::unbounded();
    (BlockWatcherProxy { requests }, stream)
}

/// Serves block watcher control requests until every proxy has been dropped.
pub async fn fshost_block_watcher(
    mut pauser: watcher::Watcher,
    stream: impl Stream<Item = BlockWatcherRequest>,
) {
    let mut stream = Box::pin(stream);
    while let Some(request) = stream.next().await {
        match request {
            BlockWatcherRequest::Pause { responder } => {
                let res = pauser.pause().await.map_err(|e| {
                    tracing::error!("block watcher service: failed to pause: {:?}", e);
                    Status::BadState
                });
                responder.send(res).unwrap_or_else(|_| {
                    tracing::error!("failed to send Pause response");
                });
            }
            BlockWatcherRequest::Resume { responder } => {
                let res = pauser.resume().await.map_err(|e| {
                    tracing::error!("block watcher service: failed to resume: {:?}", e);
                    Status::BadState
                });
                responder.send(res).unwrap_or_else(|_| {
                    tracing::error!("failed to send Resume response");
                });
            }
        }
    }
}

/// Forwards a stop request to the device handler.
pub fn handle_shutdown_request(
    shutdown: &mut mpsc::Sender<FshostShutdownResponder>,
    responder: FshostShutdownResponder,
) -> Result<(), Error> {
    shutdown
        .try_send(responder)
        .map_err(|e| format_err!("failed to send shutdown message: {:?}", e.into_send_error()))
}
