//! In-memory backend used by dev mode and the test suites.
//!
//! Records every write verbatim in arrival order; status-transition
//! precedence is a real backend's concern, not this one's.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use carrier_common::{
    Channel, ChannelEvent, ChannelLog, ChannelType, MsgIn, MsgOut, StatusUpdate,
};

use crate::{
    Backend, BackendError, OutgoingAssignment, Result, SendDisposition, StoredLog, WorkerToken,
};

const LOG_TTL_DAYS: u32 = 7;

pub struct MemBackend {
    channels: Mutex<HashMap<Uuid, Channel>>,
    msgs: Mutex<Vec<MsgIn>>,
    statuses: Mutex<Vec<StatusUpdate>>,
    events: Mutex<Vec<ChannelEvent>>,
    logs: Mutex<Vec<StoredLog>>,
    queue: Mutex<VecDeque<MsgOut>>,
    assignments: Mutex<HashMap<WorkerToken, MsgOut>>,
    next_token: AtomicU64,
    http: reqwest::Client,
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            msgs: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            assignments: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            http: reqwest::Client::new(),
        }
    }

    pub fn add_channel(&self, channel: Channel) {
        self.channels.lock().insert(channel.uuid, channel);
    }

    /// Queue an outbound message. High-priority messages jump the line.
    pub fn queue_msg(&self, msg: MsgOut) {
        let mut queue = self.queue.lock();
        if msg.high_priority {
            queue.push_front(msg);
        } else {
            queue.push_back(msg);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn open_assignments(&self) -> usize {
        self.assignments.lock().len()
    }

    // Recorded writes, for assertions.

    pub fn msgs(&self) -> Vec<MsgIn> {
        self.msgs.lock().clone()
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().clone()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().clone()
    }

    pub fn logs(&self) -> Vec<StoredLog> {
        self.logs.lock().clone()
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemBackend {
    async fn channel(&self, channel_type: &ChannelType, uuid: Uuid) -> Result<Channel> {
        let channel = self
            .channels
            .lock()
            .get(&uuid)
            .cloned()
            .ok_or(BackendError::ChannelNotFound)?;
        if &channel.channel_type != channel_type {
            return Err(BackendError::ChannelTypeMismatch);
        }
        Ok(channel)
    }

    async fn write_msg(&self, msg: MsgIn) -> Result<()> {
        self.msgs.lock().push(msg);
        Ok(())
    }

    async fn write_status_update(&self, status: StatusUpdate) -> Result<()> {
        self.statuses.lock().push(status);
        Ok(())
    }

    async fn write_channel_event(&self, event: ChannelEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn write_channel_log(&self, log: ChannelLog) -> Result<()> {
        let stored = StoredLog::from_log(&log, LOG_TTL_DAYS)?;
        self.logs.lock().push(stored);
        Ok(())
    }

    async fn pop_next_outgoing(&self) -> Result<Option<OutgoingAssignment>> {
        let msg = match self.queue.lock().pop_front() {
            Some(m) => m,
            None => return Ok(None),
        };
        let token = WorkerToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.assignments.lock().insert(token, msg.clone());
        Ok(Some(OutgoingAssignment { msg, token }))
    }

    async fn mark_outgoing_complete(
        &self,
        token: WorkerToken,
        disposition: SendDisposition,
    ) -> Result<()> {
        let msg = self
            .assignments
            .lock()
            .remove(&token)
            .ok_or_else(|| BackendError::Queue(format!("unknown worker token {}", token.0)))?;
        if disposition == SendDisposition::Requeue {
            self.queue.lock().push_back(msg);
        }
        Ok(())
    }

    fn redis(&self) -> Option<redis::aio::ConnectionManager> {
        None
    }

    fn http_client(&self) -> reqwest::Client {
        self.http.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_common::{MsgStatus, Urn};

    fn test_channel() -> Channel {
        Channel::new(
            Uuid::new_v4(),
            ChannelType::new("BW").unwrap(),
            "2020",
            &["tel"],
        )
    }

    #[tokio::test]
    async fn channel_lookup_checks_type() {
        let backend = MemBackend::new();
        let channel = test_channel();
        let uuid = channel.uuid;
        backend.add_channel(channel);

        let bw = ChannelType::new("BW").unwrap();
        let fb = ChannelType::new("FB").unwrap();

        assert!(backend.channel(&bw, uuid).await.is_ok());
        assert!(matches!(
            backend.channel(&fb, uuid).await,
            Err(BackendError::ChannelTypeMismatch)
        ));
        assert!(matches!(
            backend.channel(&bw, Uuid::new_v4()).await,
            Err(BackendError::ChannelNotFound)
        ));
    }

    #[tokio::test]
    async fn queue_pop_and_complete() {
        let backend = MemBackend::new();
        let channel = test_channel();
        let urn = Urn::parse("tel:+12065551234").unwrap();

        backend.queue_msg(MsgOut::new(1, &channel, urn.clone(), "first"));
        backend.queue_msg(MsgOut::new(2, &channel, urn, "second"));

        let a = backend.pop_next_outgoing().await.unwrap().unwrap();
        assert_eq!(a.msg.id, 1);
        assert_eq!(backend.open_assignments(), 1);

        backend
            .mark_outgoing_complete(a.token, SendDisposition::Completed)
            .await
            .unwrap();
        assert_eq!(backend.open_assignments(), 0);
        assert_eq!(backend.queue_len(), 1);
    }

    #[tokio::test]
    async fn requeue_puts_message_back() {
        let backend = MemBackend::new();
        let channel = test_channel();
        let urn = Urn::parse("tel:+12065551234").unwrap();
        backend.queue_msg(MsgOut::new(7, &channel, urn, "again"));

        let a = backend.pop_next_outgoing().await.unwrap().unwrap();
        backend
            .mark_outgoing_complete(a.token, SendDisposition::Requeue)
            .await
            .unwrap();

        let again = backend.pop_next_outgoing().await.unwrap().unwrap();
        assert_eq!(again.msg.id, 7);
    }

    #[tokio::test]
    async fn high_priority_pops_first() {
        let backend = MemBackend::new();
        let channel = test_channel();
        let urn = Urn::parse("tel:+12065551234").unwrap();

        backend.queue_msg(MsgOut::new(1, &channel, urn.clone(), "bulk"));
        let mut urgent = MsgOut::new(2, &channel, urn, "urgent");
        urgent.high_priority = true;
        backend.queue_msg(urgent);

        let first = backend.pop_next_outgoing().await.unwrap().unwrap();
        assert_eq!(first.msg.id, 2);
    }

    #[tokio::test]
    async fn writes_are_recorded_in_order() {
        let backend = MemBackend::new();
        let channel = test_channel();
        let urn = Urn::parse("tel:+12065551234").unwrap();

        let msg = backend.new_incoming_msg(&channel, urn.clone(), "hello");
        backend.write_msg(msg).await.unwrap();

        let status = backend.new_status_update(&channel, 9, MsgStatus::Wired);
        backend.write_status_update(status).await.unwrap();

        assert_eq!(backend.msgs().len(), 1);
        assert_eq!(backend.msgs()[0].text, "hello");
        assert_eq!(backend.statuses()[0].status, MsgStatus::Wired);
    }
}
