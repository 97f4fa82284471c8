//! Device status refresh
//!
//! [`StatusPoller`] fetches each device's status and reconciles it into the
//! device's status containers in a shared [`Document`]:
//! - one independent request per device, run as local tasks on the UI thread
//! - failures are logged and leave the displayed state untouched
//! - an optional per-device sequence guard drops responses that complete
//!   after a newer one was already applied

pub mod board;
pub mod client;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dom::{Document, NodeId, Selector, SelectorError, SharedDocument};
use crate::format::{parse_timestamp, TimestampFormatter};
use board::{BadgeState, BADGE_SELECTOR, CONTAINER_SELECTOR, DEVICE_ID_ATTR, LAST_PING_SELECTOR};
use client::{StatusError, StatusSource};

/// Shortest polling period accepted by [`StatusPoller::spawn_polling`]
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Server-reported status of one device. `None` fields were missing or
/// unreadable in the response and leave the display untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub entity_id: String,
    pub is_online: Option<bool>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// Build a record from a `{"is_online": .., "last_ping": ..}` body
    pub fn from_json(entity_id: &str, body: &Value) -> Result<Self, StatusError> {
        let Some(fields) = body.as_object() else {
            return Err(StatusError::Malformed("expected a JSON object".to_string()));
        };

        let is_online = fields.get("is_online").and_then(Value::as_bool);
        let last_seen_at = match fields.get("last_ping") {
            Some(Value::String(raw)) => {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    tracing::debug!("Unreadable last_ping {:?} for device {}", raw, entity_id);
                }
                parsed
            }
            _ => None,
        };

        Ok(Self {
            entity_id: entity_id.to_string(),
            is_online,
            last_seen_at,
        })
    }
}

/// Published when an applied status changes a device's badge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub entity_id: String,
    pub previous: BadgeState,
    pub current: BadgeState,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub formatter: TimestampFormatter,
    /// Drop responses older than the last one applied for the same device
    pub sequence_guard: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            formatter: TimestampFormatter::default(),
            sequence_guard: true,
        }
    }
}

#[derive(Debug, Default)]
struct SequenceBook {
    issued: HashMap<String, u64>,
    applied: HashMap<String, u64>,
}

impl SequenceBook {
    fn issue(&mut self, entity_id: &str) -> u64 {
        let next = self.issued.entry(entity_id.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    /// Record `seq` as applied unless something newer already was
    fn accept(&mut self, entity_id: &str, seq: u64) -> bool {
        let applied = self.applied.entry(entity_id.to_string()).or_insert(0);
        if seq <= *applied {
            return false;
        }
        *applied = seq;
        true
    }
}

struct PollerInner<S> {
    document: SharedDocument,
    source: S,
    options: PollerOptions,
    container: Selector,
    badge: Selector,
    last_ping: Selector,
    sequences: RefCell<SequenceBook>,
    subscribers: RefCell<Vec<UnboundedSender<StatusChange>>>,
}

impl<S> PollerInner<S> {
    fn containers_for(&self, doc: &Document, entity_id: &str) -> Vec<NodeId> {
        doc.query_selector_all(doc.root(), &self.container)
            .into_iter()
            .filter(|&c| doc.attribute(c, DEVICE_ID_ATTR) == Some(entity_id))
            .collect()
    }

    fn container_ids(&self) -> BTreeSet<String> {
        let doc = self.document.borrow();
        doc.query_selector_all(doc.root(), &self.container)
            .into_iter()
            .filter_map(|c| doc.attribute(c, DEVICE_ID_ATTR).map(str::to_string))
            .filter(|id| !id.is_empty())
            .collect()
    }

    fn apply(&self, record: &StatusRecord, seq: u64) {
        if self.options.sequence_guard
            && !self.sequences.borrow_mut().accept(&record.entity_id, seq)
        {
            tracing::debug!(
                "Discarding stale status for device {} (request #{})",
                record.entity_id,
                seq
            );
            return;
        }

        let mut change = None;
        {
            let mut doc = self.document.borrow_mut();
            let last_seen_text = record
                .last_seen_at
                .as_ref()
                .map(|instant| self.options.formatter.format(instant));

            for container in self.containers_for(&doc, &record.entity_id) {
                if let Some(is_online) = record.is_online {
                    let current = BadgeState::from_online(is_online);
                    for badge in doc.query_selector_all(container, &self.badge) {
                        let previous = BadgeState::read(&doc, badge);
                        current.render(&mut doc, badge);
                        if previous != current && change.is_none() {
                            change = Some(StatusChange {
                                entity_id: record.entity_id.clone(),
                                previous,
                                current,
                                last_seen_at: record.last_seen_at,
                            });
                        }
                    }
                }

                if let Some(text) = &last_seen_text {
                    for node in doc.query_selector_all(container, &self.last_ping) {
                        doc.set_text_content(node, text);
                    }
                }
            }
        }

        if let Some(change) = change {
            tracing::debug!(
                "Device {} went {:?} -> {:?}",
                change.entity_id,
                change.previous,
                change.current
            );
            self.subscribers
                .borrow_mut()
                .retain(|tx| tx.send(change.clone()).is_ok());
        }
    }
}

/// Keeps device status containers in sync with the status endpoint.
///
/// Refreshes spawn `tokio::task::spawn_local` tasks, so every method that
/// starts requests must run inside a [`tokio::task::LocalSet`].
pub struct StatusPoller<S> {
    inner: Rc<PollerInner<S>>,
}

impl<S> Clone for StatusPoller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: StatusSource + 'static> StatusPoller<S> {
    pub fn new(document: SharedDocument, source: S, options: PollerOptions) -> Result<Self, SelectorError> {
        Ok(Self {
            inner: Rc::new(PollerInner {
                document,
                source,
                options,
                container: Selector::parse(CONTAINER_SELECTOR)?,
                badge: Selector::parse(BADGE_SELECTOR)?,
                last_ping: Selector::parse(LAST_PING_SELECTOR)?,
                sequences: RefCell::new(SequenceBook::default()),
                subscribers: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Subscribe to badge transitions
    pub fn changes(&self) -> UnboundedReceiver<StatusChange> {
        let (tx, rx) = unbounded_channel();
        self.inner.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Start one request per id that has a status container in the document.
    /// Ids without a container are skipped.
    pub fn refresh<I, T>(&self, entity_ids: I) -> RefreshHandle
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let present = self.inner.container_ids();
        let wanted: BTreeSet<String> = entity_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();

        let mut tasks = Vec::new();
        for id in wanted {
            if !present.contains(&id) {
                tracing::debug!("No status container for device {}", id);
                continue;
            }
            tasks.push(self.spawn_fetch(id));
        }
        RefreshHandle { tasks }
    }

    /// Refresh every status container currently in the document
    pub fn refresh_visible(&self) -> RefreshHandle {
        let ids = self.inner.container_ids();
        self.refresh(ids)
    }

    fn spawn_fetch(&self, entity_id: String) -> JoinHandle<()> {
        let seq = self.inner.sequences.borrow_mut().issue(&entity_id);
        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(async move {
            match inner.source.fetch_status(&entity_id).await {
                Ok(record) => inner.apply(&record, seq),
                Err(e) => tracing::warn!("Error fetching status for device {}: {}", entity_id, e),
            }
        })
    }

    /// Refresh all visible devices every `period` until the handle is dropped.
    /// Ticks do not wait for the previous round of requests.
    pub fn spawn_polling(&self, period: Duration) -> PollingHandle {
        let period = period.max(MIN_POLL_INTERVAL);
        let poller = self.clone();
        let task = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let round = poller.refresh_visible();
                tracing::trace!("Poll tick: {} requests", round.len());
            }
        });
        PollingHandle { task }
    }
}

/// Requests started by one refresh. Dropping it does not cancel them.
#[derive(Debug)]
pub struct RefreshHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Number of requests issued
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every request has completed and been applied
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Status task failed: {}", e);
            }
        }
    }
}

/// Periodic polling; stops when dropped
#[derive(Debug)]
pub struct PollingHandle {
    task: JoinHandle<()>,
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceEntry;
    use crate::format::TimeZoneChoice;
    use board::{render_board, snapshot, DeviceCard};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    type Reply = Result<Value, String>;

    enum Scripted {
        Ready(Reply),
        Gated(oneshot::Receiver<Reply>),
    }

    /// Replays scripted replies per device, in call order
    #[derive(Default)]
    struct ScriptedSource {
        scripts: RefCell<HashMap<String, VecDeque<Scripted>>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedSource {
        fn ready(self, id: &str, reply: Reply) -> Self {
            self.push(id, Scripted::Ready(reply));
            self
        }

        fn gated(&self, id: &str) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.push(id, Scripted::Gated(rx));
            tx
        }

        fn push(&self, id: &str, step: Scripted) {
            self.scripts
                .borrow_mut()
                .entry(id.to_string())
                .or_default()
                .push_back(step);
        }
    }

    impl StatusSource for Rc<ScriptedSource> {
        async fn fetch_status(&self, entity_id: &str) -> Result<StatusRecord, StatusError> {
            self.calls.borrow_mut().push(entity_id.to_string());
            let step = self
                .scripts
                .borrow_mut()
                .get_mut(entity_id)
                .and_then(VecDeque::pop_front);
            let reply = match step {
                Some(Scripted::Ready(reply)) => reply,
                Some(Scripted::Gated(rx)) => rx.await.unwrap_or_else(|_| Err("gate dropped".to_string())),
                None => Err("no scripted reply".to_string()),
            };
            match reply {
                Ok(body) => StatusRecord::from_json(entity_id, &body),
                Err(message) => Err(StatusError::Malformed(message)),
            }
        }
    }

    fn board(ids: &[&str]) -> (SharedDocument, Vec<DeviceCard>) {
        let mut doc = Document::new();
        let root = doc.root();
        let devices: Vec<DeviceEntry> = ids
            .iter()
            .map(|id| DeviceEntry {
                id: id.to_string(),
                name: None,
            })
            .collect();
        let cards = render_board(&mut doc, root, &devices);
        (doc.into_shared(), cards)
    }

    fn utc_options(sequence_guard: bool) -> PollerOptions {
        PollerOptions {
            formatter: TimestampFormatter::new(TimeZoneChoice::Utc, "%Y-%m-%d %H:%M:%S"),
            sequence_guard,
        }
    }

    fn online(last_ping: &str) -> Reply {
        Ok(json!({"is_online": true, "last_ping": last_ping}))
    }

    fn offline(last_ping: &str) -> Reply {
        Ok(json!({"is_online": false, "last_ping": last_ping}))
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_record_from_json_tolerates_missing_fields() {
        let record = StatusRecord::from_json("5", &json!({"last_ping": 17})).unwrap();
        assert_eq!(record.is_online, None);
        assert_eq!(record.last_seen_at, None);

        let record = StatusRecord::from_json("5", &json!({"is_online": "yes", "last_ping": null})).unwrap();
        assert_eq!(record.is_online, None);

        assert!(matches!(
            StatusRecord::from_json("5", &json!([1, 2])),
            Err(StatusError::Malformed(_))
        ));
    }

    #[test]
    fn test_sequence_book() {
        let mut book = SequenceBook::default();
        let first = book.issue("a");
        let second = book.issue("a");
        assert_eq!(book.issue("b"), 1);

        assert!(book.accept("a", second));
        assert!(!book.accept("a", first));
        assert!(!book.accept("a", second));
        assert!(book.accept("b", 1));
    }

    #[tokio::test]
    async fn test_online_response_updates_badge_and_last_seen() {
        LocalSet::new()
            .run_until(async {
                let (doc, cards) = board(&["1"]);
                let source = Rc::new(ScriptedSource::default().ready("1", online("2024-01-01T00:00:00Z")));
                let poller = StatusPoller::new(Rc::clone(&doc), source, utc_options(true)).unwrap();

                poller.refresh(["1"]).wait().await;

                let snap = snapshot(&doc.borrow(), &cards[0]);
                assert_eq!(snap.status, BadgeState::Online);
                let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                assert_eq!(snap.last_seen, utc_options(true).formatter.format(&expected));
                assert_eq!(snap.last_seen, "2024-01-01 00:00:00");
            })
            .await;
    }

    #[tokio::test]
    async fn test_failure_keeps_last_known_state() {
        LocalSet::new()
            .run_until(async {
                let (doc, cards) = board(&["1"]);
                let source = Rc::new(
                    ScriptedSource::default()
                        .ready("1", offline("2024-02-02T10:00:00Z"))
                        .ready("1", Err("connection reset".to_string())),
                );
                let poller = StatusPoller::new(Rc::clone(&doc), source, utc_options(true)).unwrap();

                poller.refresh(["1"]).wait().await;
                let before = snapshot(&doc.borrow(), &cards[0]);
                assert_eq!(before.status, BadgeState::Offline);

                poller.refresh(["1"]).wait().await;
                let after = snapshot(&doc.borrow(), &cards[0]);
                assert_eq!(after.status, BadgeState::Offline);
                assert_eq!(after.last_seen, before.last_seen);
            })
            .await;
    }

    #[tokio::test]
    async fn test_missing_last_ping_leaves_text() {
        LocalSet::new()
            .run_until(async {
                let (doc, cards) = board(&["1"]);
                let source = Rc::new(
                    ScriptedSource::default()
                        .ready("1", online("2024-01-01T00:00:00Z"))
                        .ready("1", Ok(json!({"is_online": false}))),
                );
                let poller = StatusPoller::new(Rc::clone(&doc), source, utc_options(true)).unwrap();

                poller.refresh(["1"]).wait().await;
                poller.refresh(["1"]).wait().await;

                let snap = snapshot(&doc.borrow(), &cards[0]);
                assert_eq!(snap.status, BadgeState::Offline);
                assert_eq!(snap.last_seen, "2024-01-01 00:00:00");
            })
            .await;
    }

    #[tokio::test]
    async fn test_refresh_skips_unknown_ids() {
        LocalSet::new()
            .run_until(async {
                let (doc, _cards) = board(&["1", "2"]);
                let source = Rc::new(
                    ScriptedSource::default()
                        .ready("1", online("2024-01-01T00:00:00Z"))
                        .ready("2", online("2024-01-01T00:00:00Z")),
                );
                let poller =
                    StatusPoller::new(Rc::clone(&doc), Rc::clone(&source), utc_options(true)).unwrap();

                let handle = poller.refresh(["2", "ghost", "2"]);
                assert_eq!(handle.len(), 1);
                handle.wait().await;
                assert_eq!(*source.calls.borrow(), vec!["2".to_string()]);

                let handle = poller.refresh_visible();
                assert_eq!(handle.len(), 2);
                handle.wait().await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_disjoint_refreshes_are_independent() {
        LocalSet::new()
            .run_until(async {
                let (doc, cards) = board(&["1", "2"]);
                let source = Rc::new(ScriptedSource::default());
                let gate_one = source.gated("1");
                let gate_two = source.gated("2");
                let poller = StatusPoller::new(Rc::clone(&doc), source, utc_options(true)).unwrap();

                let first = poller.refresh(["1"]);
                let second = poller.refresh(["2"]);
                settle().await;

                gate_two.send(online("2024-01-01T00:00:00Z")).unwrap();
                gate_one.send(Err("timeout".to_string())).unwrap();
                first.wait().await;
                second.wait().await;

                let doc = doc.borrow();
                assert_eq!(snapshot(&doc, &cards[0]).status, BadgeState::Unknown);
                assert_eq!(snapshot(&doc, &cards[0]).last_seen, "Never");
                assert_eq!(snapshot(&doc, &cards[1]).status, BadgeState::Online);
            })
            .await;
    }

    /// Issue two overlapping refreshes for one device, complete the newer
    /// one first, and return the final badge.
    async fn overlapping_refreshes(sequence_guard: bool) -> BadgeState {
        let (doc, cards) = board(&["1"]);
        let source = Rc::new(ScriptedSource::default());
        let older = source.gated("1");
        let newer = source.gated("1");
        let poller = StatusPoller::new(Rc::clone(&doc), source, utc_options(sequence_guard)).unwrap();

        let first = poller.refresh(["1"]);
        settle().await;
        let second = poller.refresh(["1"]);
        settle().await;

        newer.send(online("2024-01-01T00:05:00Z")).unwrap();
        settle().await;
        older.send(offline("2024-01-01T00:00:00Z")).unwrap();
        first.wait().await;
        second.wait().await;

        let state = snapshot(&doc.borrow(), &cards[0]).status;
        state
    }

    #[tokio::test]
    async fn test_sequence_guard_discards_stale_response() {
        LocalSet::new()
            .run_until(async {
                assert_eq!(overlapping_refreshes(true).await, BadgeState::Online);
            })
            .await;
    }

    #[tokio::test]
    async fn test_without_guard_last_write_wins() {
        LocalSet::new()
            .run_until(async {
                assert_eq!(overlapping_refreshes(false).await, BadgeState::Offline);
            })
            .await;
    }

    #[tokio::test]
    async fn test_changes_are_published_once_per_transition() {
        LocalSet::new()
            .run_until(async {
                let (doc, _cards) = board(&["1"]);
                let source = Rc::new(
                    ScriptedSource::default()
                        .ready("1", online("2024-01-01T00:00:00Z"))
                        .ready("1", online("2024-01-01T00:00:30Z"))
                        .ready("1", offline("2024-01-01T00:01:00Z")),
                );
                let poller = StatusPoller::new(doc, source, utc_options(true)).unwrap();
                let mut changes = poller.changes();

                for _ in 0..3 {
                    poller.refresh(["1"]).wait().await;
                }

                let first = changes.try_recv().unwrap();
                assert_eq!((first.previous, first.current), (BadgeState::Unknown, BadgeState::Online));
                let second = changes.try_recv().unwrap();
                assert_eq!((second.previous, second.current), (BadgeState::Online, BadgeState::Offline));
                assert_eq!(
                    second.last_seen_at,
                    Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap())
                );
                assert!(changes.try_recv().is_err());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_when_handle_dropped() {
        LocalSet::new()
            .run_until(async {
                let (doc, _cards) = board(&["1"]);
                let source = Rc::new(ScriptedSource::default());
                for _ in 0..10 {
                    source.push("1", Scripted::Ready(online("2024-01-01T00:00:00Z")));
                }
                let poller =
                    StatusPoller::new(doc, Rc::clone(&source), utc_options(true)).unwrap();

                let polling = poller.spawn_polling(Duration::from_secs(30));
                settle().await;
                assert_eq!(source.calls.borrow().len(), 1);

                tokio::time::sleep(Duration::from_secs(61)).await;
                settle().await;
                assert_eq!(source.calls.borrow().len(), 3);

                drop(polling);
                tokio::time::sleep(Duration::from_secs(120)).await;
                settle().await;
                assert_eq!(source.calls.borrow().len(), 3);
            })
            .await;
    }
}
