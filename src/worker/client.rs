//! Store client used by workers
//!
//! The worker never sees the store itself. Each data operation becomes one
//! envelope sent to the coordinator and one correlated reply, awaited with a
//! bounded timeout.

use crate::common::protocol::{
    write_frame, CorrelationId, Failure, Operation, OperationEnvelope, ReplyEnvelope,
    ReplyPayload,
};
use crate::common::user::{User, UserAttributes};
use crate::common::{Error, ProcessRole, Result};
use crate::coordinator::{CoordinatorHandle, Submission};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 256;

type PendingMap = HashMap<CorrelationId, oneshot::Sender<ReplyEnvelope>>;

struct Shared {
    pending: Mutex<PendingMap>,
    /// Flips to true once, when the reply stream ends
    closed: watch::Sender<bool>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

pub struct StoreClient {
    outbound: mpsc::Sender<OperationEnvelope>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

impl StoreClient {
    /// Build a client from an outbound envelope queue and the stream of
    /// replies coming back. Spawns the task that routes replies to callers.
    pub fn from_channels(
        outbound: mpsc::Sender<OperationEnvelope>,
        mut replies: mpsc::UnboundedReceiver<ReplyEnvelope>,
        reply_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: watch::Sender::new(false),
        });

        let router = shared.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                let waiter = router.pending().remove(&reply.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => tracing::warn!(
                        id = reply.id,
                        kind = %reply.kind,
                        "Reply matches no outstanding operation"
                    ),
                }
            }
            router.closed.send_replace(true);
            // Dropping the senders wakes every waiter with ChannelClosed.
            router.pending().clear();
            tracing::warn!("Coordinator reply stream ended");
        });

        Self {
            outbound,
            shared,
            next_id: AtomicU64::new(1),
            reply_timeout,
        }
    }

    /// Talk to a coordinator running in this same process.
    pub fn connect_local(handle: CoordinatorHandle, reply_timeout: Duration) -> Self {
        let (out_tx, mut out_rx) = mpsc::channel::<OperationEnvelope>(OUTBOUND_BUFFER);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let submission = Submission {
                    envelope: Ok(envelope),
                    reply_to: reply_tx.clone(),
                };
                if handle.submit(submission).await.is_err() {
                    break;
                }
            }
        });

        Self::from_channels(out_tx, reply_rx, reply_timeout)
    }

    /// Talk to a coordinator over any byte stream of newline-delimited frames.
    pub fn over_io<R, W>(reader: R, writer: W, reply_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<OperationEnvelope>(OUTBOUND_BUFFER);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(envelope) = out_rx.recv().await {
                let frame = match envelope.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(id = envelope.id, error = %e, "Failed to encode operation");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::warn!(error = %e, "Coordinator channel closed for writing");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match ReplyEnvelope::decode(&line) {
                    Ok(reply) => {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable reply frame"),
                }
            }
        });

        Self::from_channels(out_tx, reply_rx, reply_timeout)
    }

    /// Use this process's stdin/stdout, the pipe pair the primary set up when
    /// it spawned us. Fatal in the primary itself: it would be sending
    /// operations to itself.
    pub fn connect_stdio(role: ProcessRole, reply_timeout: Duration) -> Result<Self> {
        if role.is_primary() {
            return Err(Error::RoleViolation(
                "store operations must be issued by workers, not by the primary".into(),
            ));
        }
        Ok(Self::over_io(
            tokio::io::stdin(),
            tokio::io::stdout(),
            reply_timeout,
        ))
    }

    /// One round trip: send, then wait for the reply with the same id.
    pub async fn call(&self, operation: Operation) -> Result<ReplyEnvelope> {
        if self.shared.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = operation.kind();
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        // The reply stream may have ended between the check above and the insert.
        if self.shared.is_closed() {
            self.shared.pending().remove(&id);
            return Err(Error::ChannelClosed);
        }

        if self
            .outbound
            .send(OperationEnvelope::new(id, operation))
            .await
            .is_err()
        {
            self.shared.pending().remove(&id);
            return Err(Error::ChannelClosed);
        }

        let reply = match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::ChannelClosed),
            Err(_) => {
                self.shared.pending().remove(&id);
                return Err(Error::Timeout(format!(
                    "no reply to {} #{} within {:?}",
                    kind, id, self.reply_timeout
                )));
            }
        };

        if reply.kind != kind {
            return Err(Error::Rejected(format!(
                "reply #{} is '{}' but '{}' was sent",
                id, reply.kind, kind
            )));
        }
        Ok(reply)
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        match outcome(self.call(Operation::List).await?)? {
            Some(ReplyPayload::Records(users)) => Ok(users),
            _ => Err(Error::Rejected("list reply without records".into())),
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        found(self.call(Operation::GetById(id)).await?)
    }

    pub async fn create(&self, attributes: UserAttributes) -> Result<User> {
        match outcome(self.call(Operation::Create(attributes)).await?)? {
            Some(ReplyPayload::Record(user)) => Ok(user),
            _ => Err(Error::Rejected("create reply without a record".into())),
        }
    }

    pub async fn update(&self, id: Uuid, attributes: UserAttributes) -> Result<Option<User>> {
        found(self.call(Operation::Update(User { id, attributes })).await?)
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        match outcome(self.call(Operation::Remove(id)).await?) {
            Ok(_) => Ok(true),
            Err(Error::UserNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Operations sent but not yet answered
    pub fn outstanding(&self) -> usize {
        self.shared.pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the coordinator channel is gone for good.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        // The sender lives in `shared`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Split a reply into its payload or the error it stands for.
fn outcome(reply: ReplyEnvelope) -> Result<Option<ReplyPayload>> {
    match (reply.ok, reply.failure) {
        (true, _) => Ok(reply.payload),
        (false, Some(Failure::NotFound)) => Err(Error::UserNotFound),
        (false, _) => Err(Error::Rejected(format!("{} #{}", reply.kind, reply.id))),
    }
}

fn found(reply: ReplyEnvelope) -> Result<Option<User>> {
    match outcome(reply) {
        Ok(Some(ReplyPayload::Record(user))) => Ok(Some(user)),
        Ok(_) => Err(Error::Rejected("reply without a record".into())),
        Err(Error::UserNotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{serve_worker_io, Coordinator};

    fn local_client(timeout: Duration) -> StoreClient {
        let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
        StoreClient::connect_local(handle, timeout)
    }

    #[tokio::test]
    async fn test_local_round_trips() {
        let client = local_client(Duration::from_secs(2));
        let user = client
            .create(UserAttributes::new("A", 1, vec![]))
            .await
            .unwrap();

        assert_eq!(client.list().await.unwrap(), vec![user.clone()]);
        assert_eq!(client.get_by_id(user.id).await.unwrap(), Some(user.clone()));

        let updated = client
            .update(user.id, UserAttributes::new("B", 2, vec!["x".into()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, user.id);

        assert!(client.remove(user.id).await.unwrap());
        assert!(!client.remove(user.id).await.unwrap());
        assert_eq!(client.get_by_id(user.id).await.unwrap(), None);
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_correlated() {
        let client = Arc::new(local_client(Duration::from_secs(2)));
        let mut tasks = Vec::new();
        for i in 0..50u32 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("user-{}", i);
                let user = client
                    .create(UserAttributes::new(name.clone(), i, vec![]))
                    .await
                    .unwrap();
                assert_eq!(user.attributes.username, name);
                user.id
            }));
        }
        for task in tasks {
            let id = task.await.unwrap();
            assert!(client.get_by_id(id).await.unwrap().is_some());
        }
        assert_eq!(client.list().await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_timeout_when_coordinator_stalls() {
        // Replies never come: the receiving end is held but never drained.
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (_reply_tx, reply_rx) = mpsc::unbounded_channel();
        let client = StoreClient::from_channels(out_tx, reply_rx, Duration::from_millis(50));

        let err = client.list().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_closed_reply_stream_fails_fast() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ReplyEnvelope>();
        let client = StoreClient::from_channels(out_tx, reply_rx, Duration::from_secs(30));
        drop(reply_tx);

        // Let the routing task observe the closed stream.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_closed_resolves_when_peer_hangs_up() {
        let (worker_side, coord_side) = tokio::io::duplex(1024);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let client = StoreClient::over_io(worker_read, worker_write, Duration::from_secs(30));
        assert!(!client.is_closed());

        drop(coord_side);
        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.list().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_primary_cannot_use_stdio_channel() {
        let result = StoreClient::connect_stdio(ProcessRole::Primary, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::RoleViolation(_))));
    }

    #[tokio::test]
    async fn test_round_trip_over_byte_stream() {
        let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
        let (worker_side, coord_side) = tokio::io::duplex(8192);
        let (coord_read, coord_write) = tokio::io::split(coord_side);
        tokio::spawn(serve_worker_io(coord_read, coord_write, handle, "duplex".into()));

        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let client = StoreClient::over_io(worker_read, worker_write, Duration::from_secs(2));

        let user = client
            .create(UserAttributes::new("piped", 7, vec!["io".into()]))
            .await
            .unwrap();
        assert_eq!(client.get_by_id(user.id).await.unwrap(), Some(user));
        assert!(client
            .update(Uuid::new_v4(), UserAttributes::new("x", 1, vec![]))
            .await
            .unwrap()
            .is_none());
    }
}
