use crate::commitlog::{InMemoryRaftLog, RaftLogEntry, Term};
use crate::membership::MemberId;
use crate::messages::{AppendEntriesRequest, Heartbeat, LogCompactionInfo, Outbound, RaftMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub(crate) fn log_with_entries(count: u64, term: Term) -> Arc<InMemoryRaftLog> {
    let log = Arc::new(InMemoryRaftLog::new());
    append_entries(&log, count, term);
    log
}

pub(crate) fn append_entries(log: &InMemoryRaftLog, count: u64, term: Term) -> Vec<RaftLogEntry> {
    (0..count)
        .map(|i| {
            let entry = RaftLogEntry::new(term, format!("entry-{}", i).into_bytes());
            log.append(entry.clone()).expect("In-memory append can't fail");
            entry
        })
        .collect()
}

/// Outbound that hands every sent message to an `OutboundReceiver`.
pub(crate) struct RecordingOutbound {
    tx: mpsc::UnboundedSender<(MemberId, RaftMessage)>,
}

impl Outbound for RecordingOutbound {
    fn send(&self, to: &MemberId, message: RaftMessage) {
        let _ = self.tx.send((to.clone(), message));
    }
}

pub(crate) fn recording_outbound() -> (Arc<RecordingOutbound>, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingOutbound { tx }), OutboundReceiver { rx })
}

pub(crate) struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<(MemberId, RaftMessage)>,
}

impl OutboundReceiver {
    /// Next message that was already sent. Shippers send synchronously, so anything sent by a
    /// call that has returned is visible here.
    pub(crate) fn next_sent(&mut self) -> (MemberId, RaftMessage) {
        self.rx.try_recv().expect("Expected a message to have been sent")
    }

    /// Waits for a message sent from a timer task.
    pub(crate) async fn recv(&mut self) -> (MemberId, RaftMessage) {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Outbound dropped")
    }

    pub(crate) fn assert_nothing_sent(&mut self) {
        if let Ok(message) = self.rx.try_recv() {
            panic!("Expected nothing sent, got {:?}", message);
        }
    }

    pub(crate) async fn assert_nothing_received(&mut self) {
        if let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(10), self.rx.recv()).await {
            panic!("Expected nothing sent, got {:?}", message);
        }
    }

    pub(crate) fn next_append(&mut self) -> AppendEntriesRequest {
        match self.next_sent() {
            (_, RaftMessage::AppendEntriesRequest(request)) => request,
            other => panic!("Expected AppendEntriesRequest, got {:?}", other),
        }
    }

    pub(crate) fn next_heartbeat(&mut self) -> Heartbeat {
        match self.next_sent() {
            (_, RaftMessage::Heartbeat(heartbeat)) => heartbeat,
            other => panic!("Expected Heartbeat, got {:?}", other),
        }
    }

    pub(crate) fn next_compaction_info(&mut self) -> LogCompactionInfo {
        match self.next_sent() {
            (_, RaftMessage::LogCompactionInfo(info)) => info,
            other => panic!("Expected LogCompactionInfo, got {:?}", other),
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<(MemberId, RaftMessage)> {
        let mut messages = vec![];
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
