//! Connection registry.
//!
//! The registry is the only state shared between connection handlers. It
//! maps each username to the connection that holds it, that connection's
//! transmit handle, and (once the handshake completes) its public key.
//!
//! ## Entry Lifecycle
//!
//! ```text
//! try_register ──► Pending ──attach_public_key──► Joining ──activate──► Active
//!                     │                              │                   │
//!                     └─────────────── remove / deregister ──────────────┴──► gone
//! ```
//!
//! Pending and Joining entries reserve a username but receive no broadcasts
//! and are absent from the key map. A Joining entry has its key bound while
//! the newcomer's first key map is delivered, so nothing another handler
//! broadcasts can overtake that map. Only activation and the removal of an
//! Active entry change membership.
//!
//! ## Locking
//!
//! All state sits behind one `std::sync::Mutex`. The lock is held only to
//! read or mutate the map and is never held across an await: broadcasts
//! snapshot their recipients under the lock and send after releasing it.
//!
//! ## Failed Sends
//!
//! A broadcast never aborts on a failed recipient. Failures are collected,
//! the failed entries are pruned after the pass, and the survivors get one
//! follow-up batch (a "lost connection" notice per departed user, then a
//! fresh key map). Failures during a follow-up feed the next follow-up, so
//! the loop runs iteratively and ends once a pass completes cleanly or
//! nobody is left to prune.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use parley_proto::{KeyMap, Message, notice};
use tokio::sync::watch;

use crate::transmit::Transmit;

/// Identifier of one accepted connection.
pub type ConnectionId = u64;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No entry under this username is held by this connection.
    #[error("{username} is not registered by this connection")]
    NotRegistered {
        /// Username the caller tried to bind.
        username: String,
    },

    /// A key is already bound to this username.
    #[error("public key already attached for {username}")]
    KeyAlreadyAttached {
        /// Username the caller tried to bind.
        username: String,
    },

    /// Activation was attempted before a key was attached.
    #[error("no public key attached for {username}")]
    NoPublicKey {
        /// Username the caller tried to activate.
        username: String,
    },

    /// The entry is already active.
    #[error("{username} is already active")]
    AlreadyActive {
        /// Username the caller tried to activate.
        username: String,
    },
}

/// Stage of a registry entry at the moment it was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Username reserved, no key yet.
    Pending,
    /// Key attached, first key map in flight; not yet visible to others.
    Joining,
    /// Visible to broadcasts and the key map.
    Active,
}

/// Why a participant left, which selects the departure notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Left with `/disconnect`.
    Left,
    /// Dropped for any other reason.
    Lost,
}

impl Departure {
    fn notice(self, username: &str) -> Message {
        match self {
            Self::Left => Message::notice(notice::user_left(username)),
            Self::Lost => Message::notice(notice::user_lost(username)),
        }
    }
}

struct Entry<T> {
    id: ConnectionId,
    transmit: Arc<T>,
    public_key: Option<Bytes>,
    visible: bool,
}

impl<T> Entry<T> {
    fn state(&self) -> EntryState {
        match (&self.public_key, self.visible) {
            (None, _) => EntryState::Pending,
            (Some(_), false) => EntryState::Joining,
            (Some(_), true) => EntryState::Active,
        }
    }
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    /// Bumped on every activation and every removal of an active entry.
    version: u64,
    shutting_down: bool,
}

impl<T> Inner<T> {
    fn take(&mut self, username: &str, id: Option<ConnectionId>) -> Option<Entry<T>> {
        let holder = self.entries.get(username)?;
        if id.is_some_and(|id| id != holder.id) {
            return None;
        }
        let entry = self.entries.remove(username)?;
        if entry.state() == EntryState::Active {
            self.version += 1;
        }
        Some(entry)
    }

    fn key_map(&self) -> KeyMap {
        self.key_map_with(None)
    }

    /// Active entries, plus `extra` if it holds a key.
    fn key_map_with(&self, extra: Option<&str>) -> KeyMap {
        let mut map = KeyMap::new(self.version);
        for (username, entry) in &self.entries {
            let included =
                entry.state() == EntryState::Active || Some(username.as_str()) == extra;
            if let (true, Some(key)) = (included, &entry.public_key) {
                map.insert(username.clone(), key);
            }
        }
        map
    }

    fn held_by(
        &mut self,
        username: &str,
        id: ConnectionId,
    ) -> Result<&mut Entry<T>, RegistryError> {
        self.entries
            .get_mut(username)
            .filter(|entry| entry.id == id)
            .ok_or_else(|| RegistryError::NotRegistered { username: username.to_string() })
    }
}

/// A recipient captured for one delivery pass.
struct Recipient<T> {
    username: String,
    id: ConnectionId,
    transmit: Arc<T>,
}

/// Username → connection directory shared by all handlers.
pub struct ConnectionRegistry<T> {
    inner: Mutex<Inner<T>>,
    shutdown: watch::Sender<bool>,
}

impl<T: Transmit> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transmit> ConnectionRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                version: 0,
                shutting_down: false,
            }),
            shutdown: watch::channel(false).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock still guards valid state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `username` for connection `id`.
    ///
    /// Returns `false` if the name is already held at any stage; the
    /// existing holder is never touched. After [`Self::close_all`] every
    /// attempt fails and the offered transmit is closed.
    pub fn try_register(&self, username: &str, id: ConnectionId, transmit: Arc<T>) -> bool {
        let mut inner = self.lock();
        if inner.shutting_down {
            transmit.close();
            return false;
        }
        if inner.entries.contains_key(username) {
            return false;
        }
        let entry = Entry { id, transmit, public_key: None, visible: false };
        inner.entries.insert(username.to_string(), entry);
        true
    }

    /// Bind `key` to the pending entry `username` held by connection `id`.
    ///
    /// The entry moves to Joining. Returns the newcomer's first key map:
    /// every active participant plus the newcomer itself, at the current
    /// version. Nobody else sees the entry until [`Self::activate`].
    pub fn attach_public_key(
        &self,
        username: &str,
        id: ConnectionId,
        key: Bytes,
    ) -> Result<KeyMap, RegistryError> {
        let mut inner = self.lock();
        let entry = inner.held_by(username, id)?;
        if entry.public_key.is_some() {
            return Err(RegistryError::KeyAlreadyAttached { username: username.to_string() });
        }
        entry.public_key = Some(key);
        Ok(inner.key_map_with(Some(username)))
    }

    /// Make the Joining entry `username` held by connection `id` visible to
    /// broadcasts and the key map.
    ///
    /// Returns the key map after the change.
    pub fn activate(&self, username: &str, id: ConnectionId) -> Result<KeyMap, RegistryError> {
        let mut inner = self.lock();
        let entry = inner.held_by(username, id)?;
        match entry.state() {
            EntryState::Pending => {
                return Err(RegistryError::NoPublicKey { username: username.to_string() });
            },
            EntryState::Active => {
                return Err(RegistryError::AlreadyActive { username: username.to_string() });
            },
            EntryState::Joining => entry.visible = true,
        }
        inner.version += 1;
        Ok(inner.key_map())
    }

    /// Remove `username` regardless of which connection holds it.
    ///
    /// Idempotent: removing an unknown name returns `None`.
    pub fn remove(&self, username: &str) -> Option<EntryState> {
        self.lock().take(username, None).map(|entry| entry.state())
    }

    /// Remove `username` only if connection `id` still holds it.
    ///
    /// A handler whose entry was already pruned (or replaced by a newer
    /// connection under the same name) gets `None` and must not announce
    /// anything.
    pub fn deregister(&self, username: &str, id: ConnectionId) -> Option<EntryState> {
        self.lock().take(username, Some(id)).map(|entry| entry.state())
    }

    /// Point-in-time copy of every active participant's key.
    pub fn snapshot_key_map(&self) -> KeyMap {
        self.lock().key_map()
    }

    /// Public key of the active participant `username`.
    pub fn public_key(&self, username: &str) -> Option<Bytes> {
        self.lock()
            .entries
            .get(username)
            .filter(|entry| entry.state() == EntryState::Active)
            .and_then(|entry| entry.public_key.clone())
    }

    /// Whether `username` is held at any stage.
    pub fn contains(&self, username: &str) -> bool {
        self.lock().entries.contains_key(username)
    }

    /// Number of active participants.
    pub fn active_count(&self) -> usize {
        self.lock().entries.values().filter(|e| e.state() == EntryState::Active).count()
    }

    /// Current membership version.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Whether [`Self::close_all`] has run.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Receiver that turns `true` once [`Self::close_all`] has run.
    ///
    /// Handlers without a registry entry wait on this to learn about
    /// shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Close every registered transmit, refuse new registrations, and fire
    /// the shutdown signal.
    ///
    /// Entries stay in place; each handler wakes, deregisters itself, and
    /// exits.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        inner.shutting_down = true;
        for entry in inner.entries.values() {
            entry.transmit.close();
        }
        self.shutdown.send_replace(true);
    }

    /// Deliver `message` to every active participant except `exclude`.
    ///
    /// Returns the usernames pruned for failed sends, including any pruned
    /// during follow-up announcements.
    pub async fn broadcast(&self, message: &Message, exclude: Option<&str>) -> Vec<String> {
        self.broadcast_batch(std::slice::from_ref(message), exclude).await
    }

    /// Deliver `batch` in order to every active participant except
    /// `exclude`. A recipient whose send fails gets nothing further from
    /// this batch.
    pub async fn broadcast_batch(&self, batch: &[Message], exclude: Option<&str>) -> Vec<String> {
        let mut departed = Vec::new();
        let mut failed = self.deliver(batch, exclude).await;

        while !failed.is_empty() {
            let pruned = self.prune(&failed);
            if pruned.is_empty() {
                break;
            }
            let follow_up =
                self.departure_batch(pruned.iter().map(|name| (name.as_str(), Departure::Lost)));
            departed.extend(pruned);
            failed = self.deliver(&follow_up, None).await;
        }

        departed
    }

    /// Announce that `username` left: departure notice, then a fresh key
    /// map, to everyone still active.
    pub async fn announce_departure(&self, username: &str, departure: Departure) -> Vec<String> {
        let batch = self.departure_batch(std::iter::once((username, departure)));
        self.broadcast_batch(&batch, None).await
    }

    fn departure_batch<'a>(
        &self,
        departures: impl Iterator<Item = (&'a str, Departure)>,
    ) -> Vec<Message> {
        let mut batch: Vec<Message> = departures.map(|(name, d)| d.notice(name)).collect();
        match Message::key_map(&self.snapshot_key_map()) {
            Ok(message) => batch.push(message),
            Err(e) => tracing::warn!("Failed to encode key map: {}", e),
        }
        batch
    }

    fn recipients(&self, exclude: Option<&str>) -> Vec<Recipient<T>> {
        self.lock()
            .entries
            .iter()
            .filter(|(username, entry)| {
                entry.state() == EntryState::Active && Some(username.as_str()) != exclude
            })
            .map(|(username, entry)| Recipient {
                username: username.clone(),
                id: entry.id,
                transmit: Arc::clone(&entry.transmit),
            })
            .collect()
    }

    async fn deliver(
        &self,
        batch: &[Message],
        exclude: Option<&str>,
    ) -> Vec<(String, ConnectionId)> {
        let mut failed = Vec::new();
        for recipient in self.recipients(exclude) {
            for message in batch {
                if let Err(e) = recipient.transmit.send(message).await {
                    tracing::warn!(
                        username = %recipient.username,
                        conn_id = recipient.id,
                        "Send failed, pruning: {}",
                        e
                    );
                    failed.push((recipient.username, recipient.id));
                    break;
                }
            }
        }
        failed
    }

    /// Remove failed entries still held by the same connection and wake
    /// their handlers. Returns the active usernames actually removed.
    fn prune(&self, failed: &[(String, ConnectionId)]) -> Vec<String> {
        let mut inner = self.lock();
        let mut pruned = Vec::new();
        for (username, id) in failed {
            if let Some(entry) = inner.take(username, Some(*id)) {
                entry.transmit.close();
                if entry.state() == EntryState::Active {
                    pruned.push(username.clone());
                }
            }
        }
        pruned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::transmit::MemoryTransmit;

    type Registry = ConnectionRegistry<MemoryTransmit>;

    fn transmit() -> (Arc<MemoryTransmit>, UnboundedReceiver<Message>) {
        let (transmit, rx) = MemoryTransmit::channel();
        (Arc::new(transmit), rx)
    }

    fn join(
        registry: &Registry,
        username: &str,
        id: ConnectionId,
    ) -> (Arc<MemoryTransmit>, UnboundedReceiver<Message>) {
        let (tx, rx) = transmit();
        assert!(registry.try_register(username, id, Arc::clone(&tx)));
        registry.attach_public_key(username, id, Bytes::from(username.to_string())).unwrap();
        registry.activate(username, id).unwrap();
        (tx, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn texts(messages: &[Message]) -> Vec<&str> {
        messages.iter().filter_map(Message::as_text).collect()
    }

    #[test]
    fn register_rejects_duplicate_without_evicting() {
        let registry = Registry::new();
        let (first, _rx1) = transmit();
        let (second, _rx2) = transmit();

        assert!(registry.try_register("alice", 1, first));
        assert!(!registry.try_register("alice", 2, Arc::clone(&second)));
        assert!(!second.is_closed());

        // The first holder still owns the name.
        registry.attach_public_key("alice", 1, Bytes::from_static(b"k")).unwrap();
        registry.activate("alice", 1).unwrap();
        assert!(registry.snapshot_key_map().contains("alice"));
    }

    #[tokio::test]
    async fn joining_entry_is_invisible_until_activated() {
        let registry = Registry::new();
        let (_a, mut rx_a) = join(&registry, "alice", 1);
        let (bob, mut rx_b) = transmit();
        registry.try_register("bob", 2, bob);

        let first = registry.attach_public_key("bob", 2, Bytes::from_static(b"bob")).unwrap();
        assert_eq!(first.usernames().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(first.version, registry.version());

        registry.broadcast(&Message::text("alice", "early"), None).await;
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(texts(&drain(&mut rx_a)), vec!["early"]);
        assert!(!registry.snapshot_key_map().contains("bob"));
        assert_eq!(registry.public_key("bob"), None);

        let map = registry.activate("bob", 2).unwrap();
        assert_eq!(map.version, first.version + 1);
        assert!(map.contains("bob"));
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn activation_requires_a_joining_entry() {
        let registry = Registry::new();
        let (tx, _rx) = transmit();
        registry.try_register("alice", 1, tx);

        assert_eq!(
            registry.activate("alice", 1),
            Err(RegistryError::NoPublicKey { username: "alice".to_string() })
        );
        assert!(matches!(registry.activate("alice", 2), Err(RegistryError::NotRegistered { .. })));

        registry.attach_public_key("alice", 1, Bytes::from_static(b"k")).unwrap();
        registry.activate("alice", 1).unwrap();
        assert_eq!(
            registry.activate("alice", 1),
            Err(RegistryError::AlreadyActive { username: "alice".to_string() })
        );
    }

    #[test]
    fn joining_removal_is_not_a_membership_change() {
        let registry = Registry::new();
        let _alice = join(&registry, "alice", 1);
        let (tx, _rx) = transmit();
        registry.try_register("bob", 2, tx);
        registry.attach_public_key("bob", 2, Bytes::from_static(b"k")).unwrap();

        let before = registry.version();
        assert_eq!(registry.deregister("bob", 2), Some(EntryState::Joining));
        assert_eq!(registry.version(), before);
    }

    #[test]
    fn attach_requires_registration_by_same_connection() {
        let registry = Registry::new();
        let (tx, _rx) = transmit();

        assert_eq!(
            registry.attach_public_key("ghost", 1, Bytes::from_static(b"k")),
            Err(RegistryError::NotRegistered { username: "ghost".to_string() })
        );

        registry.try_register("alice", 1, tx);
        assert!(matches!(
            registry.attach_public_key("alice", 2, Bytes::from_static(b"k")),
            Err(RegistryError::NotRegistered { .. })
        ));
    }

    #[test]
    fn key_binding_is_one_time() {
        let registry = Registry::new();
        let _alice = join(&registry, "alice", 1);
        assert_eq!(
            registry.attach_public_key("alice", 1, Bytes::from_static(b"other")),
            Err(RegistryError::KeyAlreadyAttached { username: "alice".to_string() })
        );
        assert_eq!(registry.public_key("alice").unwrap(), Bytes::from_static(b"alice"));
    }

    #[test]
    fn pending_entries_are_not_in_key_map() {
        let registry = Registry::new();
        let (tx, _rx) = transmit();
        registry.try_register("pending", 1, tx);
        let _alice = join(&registry, "alice", 2);

        let map = registry.snapshot_key_map();
        assert_eq!(map.usernames().collect::<Vec<_>>(), vec!["alice"]);
        assert!(registry.contains("pending"));
        assert_eq!(registry.public_key("pending"), None);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new();
        let _alice = join(&registry, "alice", 1);

        assert_eq!(registry.remove("alice"), Some(EntryState::Active));
        assert_eq!(registry.remove("alice"), None);
        assert_eq!(registry.remove("never-there"), None);
    }

    #[test]
    fn deregister_ignores_other_connections() {
        let registry = Registry::new();
        let _alice = join(&registry, "alice", 1);

        assert_eq!(registry.deregister("alice", 99), None);
        assert!(registry.contains("alice"));
        assert_eq!(registry.deregister("alice", 1), Some(EntryState::Active));
    }

    #[test]
    fn version_tracks_membership_changes() {
        let registry = Registry::new();
        let (tx, _rx) = transmit();

        registry.try_register("pending", 1, tx);
        assert_eq!(registry.version(), 0);

        let _alice = join(&registry, "alice", 2);
        assert_eq!(registry.version(), 1);

        // Pending removal is not a membership change.
        registry.remove("pending");
        assert_eq!(registry.version(), 1);

        registry.remove("alice");
        assert_eq!(registry.version(), 2);
        assert_eq!(registry.snapshot_key_map().version, 2);
    }

    #[tokio::test]
    async fn broadcast_respects_exclusion_and_pending() {
        let registry = Registry::new();
        let (_a, mut rx_a) = join(&registry, "alice", 1);
        let (_b, mut rx_b) = join(&registry, "bob", 2);
        let (pending, mut rx_p) = transmit();
        registry.try_register("carol", 3, pending);

        let pruned = registry.broadcast(&Message::text("alice", "hi"), Some("alice")).await;

        assert!(pruned.is_empty());
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(texts(&drain(&mut rx_b)), vec!["hi"]);
        assert!(drain(&mut rx_p).is_empty());
    }

    #[tokio::test]
    async fn failed_send_prunes_and_notifies_survivors_once() {
        let registry = Registry::new();
        let (_a, mut rx_a) = join(&registry, "alice", 1);
        let (bob, _rx_b) = join(&registry, "bob", 2);
        let (_c, mut rx_c) = join(&registry, "carol", 3);
        bob.set_failing(true);

        let pruned = registry.broadcast(&Message::text("alice", "hello"), None).await;

        assert_eq!(pruned, vec!["bob".to_string()]);
        assert!(bob.is_closed());
        assert!(!registry.contains("bob"));

        for rx in [&mut rx_a, &mut rx_c] {
            let received = drain(rx);
            assert_eq!(texts(&received), vec!["hello", "[!] User bob lost connection."]);
            let map = received.last().unwrap().decode_key_map().unwrap();
            assert_eq!(map.usernames().collect::<Vec<_>>(), vec!["alice", "carol"]);
        }
    }

    #[tokio::test]
    async fn follow_up_failures_are_pruned_without_recursion() {
        let registry = Registry::new();
        let (_a, mut rx_a) = join(&registry, "alice", 1);
        let (bob, _rx_b) = join(&registry, "bob", 2);
        let (carol, mut rx_c) = join(&registry, "carol", 3);
        bob.set_failing(true);

        // Carol accepts the first message, then fails on the follow-up.
        let first = registry.broadcast(&Message::notice("warmup"), None).await;
        assert_eq!(first, vec!["bob".to_string()]);
        drain(&mut rx_a);
        drain(&mut rx_c);

        carol.set_failing(true);
        let pruned = registry.broadcast(&Message::notice("again"), None).await;
        assert_eq!(pruned, vec!["carol".to_string()]);

        let received = drain(&mut rx_a);
        assert_eq!(texts(&received), vec!["again", "[!] User carol lost connection."]);
        let map = received.last().unwrap().decode_key_map().unwrap();
        assert_eq!(map.usernames().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[tokio::test]
    async fn announce_departure_sends_notice_then_map() {
        let registry = Registry::new();
        let (_a, mut rx_a) = join(&registry, "alice", 1);
        let _bob = join(&registry, "bob", 2);

        registry.deregister("bob", 2);
        registry.announce_departure("bob", Departure::Left).await;

        let received = drain(&mut rx_a);
        assert_eq!(texts(&received), vec!["[*] User bob has left the chat."]);
        assert_eq!(received.len(), 2);
        let map = received[1].decode_key_map().unwrap();
        assert!(!map.contains("bob"));
        assert_eq!(map.version, registry.version());
    }

    #[test]
    fn close_all_closes_transmits_and_refuses_registration() {
        let registry = Registry::new();
        let (alice, _rx) = join(&registry, "alice", 1);

        registry.close_all();
        assert!(alice.is_closed());
        assert!(registry.is_shutting_down());

        let (late, _rx_late) = transmit();
        assert!(!registry.try_register("late", 2, Arc::clone(&late)));
        assert!(late.is_closed());
    }

    #[tokio::test]
    async fn close_all_fires_shutdown_signal() {
        let registry = Registry::new();
        let mut before = registry.shutdown_signal();
        assert!(!*before.borrow());

        registry.close_all();

        before.wait_for(|down| *down).await.unwrap();
        assert!(*registry.shutdown_signal().borrow());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_admits_one_holder() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for id in 0..32u64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = MemoryTransmit::channel();
                registry.try_register("contested", id, Arc::new(tx))
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register { name: usize, id: ConnectionId },
        Attach { name: usize, id: ConnectionId },
        Activate { name: usize, id: ConnectionId },
        Deregister { name: usize, id: ConnectionId },
        Remove { name: usize },
    }

    const NAMES: [&str; 3] = ["alice", "bob", "carol"];

    fn op() -> impl Strategy<Value = Op> {
        let name = 0..NAMES.len();
        let id = 0..4u64;
        prop_oneof![
            (name.clone(), id.clone()).prop_map(|(name, id)| Op::Register { name, id }),
            (name.clone(), id.clone()).prop_map(|(name, id)| Op::Attach { name, id }),
            (name.clone(), id.clone()).prop_map(|(name, id)| Op::Activate { name, id }),
            (name.clone(), id).prop_map(|(name, id)| Op::Deregister { name, id }),
            name.prop_map(|name| Op::Remove { name }),
        ]
    }

    proptest! {
        #[test]
        fn prop_one_holder_per_name(ops in prop::collection::vec(op(), 0..64)) {
            let registry = Registry::new();
            // name index -> (holder id, state)
            let mut model: HashMap<usize, (ConnectionId, EntryState)> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register { name, id } => {
                        let (tx, _rx) = MemoryTransmit::channel();
                        let admitted = registry.try_register(NAMES[name], id, Arc::new(tx));
                        prop_assert_eq!(admitted, !model.contains_key(&name));
                        model.entry(name).or_insert((id, EntryState::Pending));
                    },
                    Op::Attach { name, id } => {
                        let result = registry.attach_public_key(NAMES[name], id, Bytes::from_static(b"k"));
                        match model.get_mut(&name) {
                            Some((holder, state)) if *holder == id && *state == EntryState::Pending => {
                                prop_assert!(result.is_ok());
                                *state = EntryState::Joining;
                            },
                            _ => prop_assert!(result.is_err()),
                        }
                    },
                    Op::Activate { name, id } => {
                        let result = registry.activate(NAMES[name], id);
                        match model.get_mut(&name) {
                            Some((holder, state)) if *holder == id && *state == EntryState::Joining => {
                                prop_assert!(result.is_ok());
                                *state = EntryState::Active;
                            },
                            _ => prop_assert!(result.is_err()),
                        }
                    },
                    Op::Deregister { name, id } => {
                        let removed = registry.deregister(NAMES[name], id);
                        let expected = match model.get(&name) {
                            Some(&(holder, state)) if holder == id => Some(state),
                            _ => None,
                        };
                        prop_assert_eq!(removed, expected);
                        if expected.is_some() {
                            model.remove(&name);
                        }
                    },
                    Op::Remove { name } => {
                        let removed = registry.remove(NAMES[name]);
                        prop_assert_eq!(removed, model.remove(&name).map(|(_, state)| state));
                    },
                }

                let active: Vec<&str> = NAMES
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| model.get(i).is_some_and(|(_, s)| *s == EntryState::Active))
                    .map(|(_, name)| *name)
                    .collect();
                let snapshot = registry.snapshot_key_map();
                prop_assert_eq!(snapshot.usernames().collect::<Vec<_>>(), active);
            }

            // Every name is still held by the connection that first claimed it.
            for (name, (holder, state)) in model {
                prop_assert_eq!(registry.deregister(NAMES[name], holder + 100), None);
                prop_assert_eq!(registry.deregister(NAMES[name], holder), Some(state));
            }
        }
    }
}
