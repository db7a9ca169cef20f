//! Writer-driven streaming read-only files.
//!
//! Opening spawns a producer task that writes chunks into a bounded
//! channel; reads drain it and block until bytes arrive or the producer
//! finishes. Seeking is disallowed: the file is served direct-IO and
//! non-seekable, and every read offset must equal the bytes-read counter.

use crate::error::{EIO, FsError, FsResult};
use crate::node::{Ctx, FileHandle, HandleFlags, HandleRef, Node, NodeAttr, OpenFlags};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const CHANNEL_SIZE: usize = 1000;

type StreamFn =
    Box<dyn Fn(Ctx, mpsc::Sender<Vec<u8>>) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;

/// A read-only file whose contents are produced by a background task.
pub struct StreamFile {
    streamer: StreamFn,
}

impl StreamFile {
    pub fn new(streamer: StreamFn) -> Arc<Self> {
        Arc::new(Self { streamer })
    }
}

#[async_trait]
impl Node for StreamFile {
    async fn attr(&self, _ctx: &Ctx) -> FsResult<NodeAttr> {
        Ok(NodeAttr::readonly_file(0))
    }

    async fn open(&self, ctx: &Ctx, flags: OpenFlags) -> FsResult<HandleRef> {
        if flags.write {
            return Err(EIO);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let failure = Arc::new(std::sync::Mutex::new(None::<FsError>));

        let fut = (self.streamer)(ctx.clone(), tx);
        let producer_failure = failure.clone();
        let producer = tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(error = %err, "stream producer failed");
                *producer_failure.lock().expect("failure lock") = Some(err);
            }
        });

        Ok(Arc::new(StreamHandle {
            state: Mutex::new(StreamState {
                rx,
                pending: Vec::new(),
                bytes_read: 0,
            }),
            failure,
            producer,
        }))
    }
}

struct StreamState {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    bytes_read: u64,
}

pub struct StreamHandle {
    state: Mutex<StreamState>,
    failure: Arc<std::sync::Mutex<Option<FsError>>>,
    producer: JoinHandle<()>,
}

#[async_trait]
impl FileHandle for StreamHandle {
    fn flags(&self) -> HandleFlags {
        HandleFlags {
            direct_io: true,
            nonseekable: true,
        }
    }

    async fn read(&self, _ctx: &Ctx, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let mut state = self.state.lock().await;

        if offset != state.bytes_read {
            return Err(EIO);
        }

        if state.pending.is_empty() {
            match state.rx.recv().await {
                Some(chunk) => state.pending = chunk,
                None => {
                    // Producer finished; a recorded failure surfaces here.
                    if let Some(err) = *self.failure.lock().expect("failure lock") {
                        return Err(err);
                    }
                    return Ok(Vec::new());
                }
            }
        }

        let take = (size as usize).min(state.pending.len());
        let out: Vec<u8> = state.pending.drain(..take).collect();
        state.bytes_read += out.len() as u64;
        Ok(out)
    }

    async fn release(&self, _ctx: &Ctx, _flush: bool) -> FsResult<()> {
        self.producer.abort();
        Ok(())
    }
}
