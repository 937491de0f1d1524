//! Coordinator receive loop
//!
//! Every operation from every worker funnels into one mpsc queue. A single
//! task drains it, applies each operation to the [`Store`] to completion and
//! sends exactly one reply back on the submitting connection's channel.

use crate::common::protocol::{
    write_frame, Operation, OperationEnvelope, Rejection, ReplyEnvelope, ReplyPayload,
};
use crate::common::{Error, ProcessRole, Result};
use crate::coordinator::store::Store;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where the coordinator sends the reply for one submission.
pub type ReplySender = mpsc::UnboundedSender<ReplyEnvelope>;

/// One decoded (or rejected) operation frame plus its way back.
#[derive(Debug)]
pub struct Submission {
    pub envelope: std::result::Result<OperationEnvelope, Rejection>,
    pub reply_to: ReplySender,
}

/// Cloneable ingress to the coordinator loop.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Submission>,
}

impl CoordinatorHandle {
    pub async fn submit(&self, submission: Submission) -> Result<()> {
        self.tx
            .send(submission)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

pub struct Coordinator {
    store: Store,
    rx: mpsc::Receiver<Submission>,
}

impl Coordinator {
    /// Only the primary may own the store.
    pub fn new(role: ProcessRole, buffer: usize) -> Result<(Self, CoordinatorHandle)> {
        if !role.is_primary() {
            return Err(Error::RoleViolation(format!(
                "{} attempted to own the store; only the primary may",
                role
            )));
        }
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let coordinator = Self {
            store: Store::new(),
            rx,
        };
        Ok((coordinator, CoordinatorHandle { tx }))
    }

    /// Construct and run on a background task.
    pub fn spawn(role: ProcessRole, buffer: usize) -> Result<CoordinatorHandle> {
        let (coordinator, handle) = Self::new(role, buffer)?;
        tokio::spawn(coordinator.run());
        Ok(handle)
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!("Coordinator loop started");
        while let Some(Submission { envelope, reply_to }) = self.rx.recv().await {
            let reply = match envelope {
                Ok(envelope) => self.apply(envelope),
                Err(rejection) => {
                    warn!(
                        id = rejection.id,
                        kind = %rejection.kind,
                        reason = %rejection.reason,
                        "Rejected malformed envelope"
                    );
                    ReplyEnvelope::malformed(rejection.id, &rejection.kind)
                }
            };
            if reply_to.send(reply).is_err() {
                debug!("Reply dropped: submitting connection is gone");
            }
        }
        info!(users = self.store.len(), "Coordinator loop stopped");
    }

    /// Apply one operation to the store and build its reply.
    pub fn apply(&mut self, envelope: OperationEnvelope) -> ReplyEnvelope {
        let OperationEnvelope { id, operation } = envelope;
        let kind = operation.kind();
        debug!(id, kind, "Applying operation");

        match operation {
            Operation::List => {
                ReplyEnvelope::success(id, kind, Some(ReplyPayload::Records(self.store.list())))
            }
            Operation::GetById(user_id) => match self.store.get_by_id(&user_id) {
                Some(user) => ReplyEnvelope::success(id, kind, Some(ReplyPayload::Record(user))),
                None => ReplyEnvelope::not_found(id, kind),
            },
            Operation::Create(attributes) => {
                if let Err(e) = attributes.validate() {
                    warn!(id, error = %e, "Rejected create payload");
                    return ReplyEnvelope::malformed(id, kind);
                }
                let user = self.store.create(attributes);
                ReplyEnvelope::success(id, kind, Some(ReplyPayload::Record(user)))
            }
            Operation::Update(user) => {
                if let Err(e) = user.attributes.validate() {
                    warn!(id, error = %e, "Rejected update payload");
                    return ReplyEnvelope::malformed(id, kind);
                }
                match self.store.update(&user.id, user.attributes) {
                    Some(user) => {
                        ReplyEnvelope::success(id, kind, Some(ReplyPayload::Record(user)))
                    }
                    None => ReplyEnvelope::not_found(id, kind),
                }
            }
            Operation::Remove(user_id) => {
                if self.store.remove(&user_id) {
                    ReplyEnvelope::success(id, kind, None)
                } else {
                    ReplyEnvelope::not_found(id, kind)
                }
            }
        }
    }
}

/// Bridge one worker's byte stream to the coordinator.
///
/// Reads operation frames from `reader` until EOF and writes replies to
/// `writer` in the order the coordinator produced them.
pub async fn serve_worker_io<R, W>(reader: R, writer: W, handle: CoordinatorHandle, label: String)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyEnvelope>();

    let writer_label = label.clone();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(reply) = reply_rx.recv().await {
            let frame = match reply.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(worker = %writer_label, error = %e, "Failed to encode reply");
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(worker = %writer_label, error = %e, "Worker channel closed for writing");
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let submission = Submission {
                    envelope: OperationEnvelope::decode(&line),
                    reply_to: reply_tx.clone(),
                };
                if handle.submit(submission).await.is_err() {
                    warn!(worker = %label, "Coordinator is gone; closing worker channel");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(worker = %label, error = %e, "Worker channel read failed");
                break;
            }
        }
    }
    debug!(worker = %label, "Worker channel reached EOF");

    drop(reply_tx);
    let _ = writer_task.await;
}
