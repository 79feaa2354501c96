//! Bounded undo/redo of whole-project snapshots for the active project.
//!
//! Stacks are persisted per project under the `_undo`/`_redo` keys after a
//! quiet period, and only when their serialized content changed since the last
//! successful write.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use scriptdesk_core::{HistoryEntry, KeyNamespace};
use scriptdesk_storage::DataGateway;

use crate::debounce::Debouncer;

/// What `record` did with an observed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Pushed,
    /// The mutation was an undo/redo replay and stayed off the stacks.
    Suppressed,
}

type Digests = Arc<Mutex<HashMap<String, blake3::Hash>>>;

pub struct HistoryManager {
    gateway: Arc<DataGateway>,
    keys: KeyNamespace,
    project_id: String,
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: VecDeque<HistoryEntry>,
    limit: usize,
    suppress_next: bool,
    delay: Duration,
    debouncer: Debouncer,
    persisted: Digests,
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, limit: usize) {
    stack.push_back(entry);
    while stack.len() > limit {
        stack.pop_front();
    }
}

fn encode(stack: &VecDeque<HistoryEntry>) -> Option<String> {
    serde_json::to_string(stack)
        .inspect_err(|e| warn!(error = %e, "history stack not serializable"))
        .ok()
}

/// Write `json` under `key` unless it matches the last stored digest.
async fn write_if_changed(gateway: &DataGateway, persisted: &Digests, key: &str, json: &str) {
    let digest = blake3::hash(json.as_bytes());
    if persisted.lock().get(key) == Some(&digest) {
        debug!(key = %key, "history unchanged, skipping write");
        return;
    }
    if gateway.save(key, json).await.is_stored() {
        persisted.lock().insert(key.to_string(), digest);
    }
}

impl HistoryManager {
    pub fn new(gateway: Arc<DataGateway>, project_id: &str, limit: usize, delay: Duration) -> Self {
        let keys = gateway.keys().clone();
        Self {
            gateway,
            keys,
            project_id: project_id.to_string(),
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limit,
            suppress_next: false,
            delay,
            debouncer: Debouncer::new(),
            persisted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppress_next
    }

    /// Observe a committed mutation. `previous` is the state it replaced.
    pub fn record(&mut self, previous: HistoryEntry) -> Recorded {
        if self.suppress_next {
            self.suppress_next = false;
            return Recorded::Suppressed;
        }
        push_bounded(&mut self.undo_stack, previous, self.limit);
        self.redo_stack.clear();
        self.schedule_persist();
        Recorded::Pushed
    }

    /// Pop the most recent undo entry for the caller to apply.
    pub fn undo(&mut self, current: HistoryEntry) -> Option<HistoryEntry> {
        let entry = self.undo_stack.pop_back()?;
        push_bounded(&mut self.redo_stack, current, self.limit);
        self.suppress_next = true;
        self.schedule_persist();
        Some(entry)
    }

    pub fn redo(&mut self, current: HistoryEntry) -> Option<HistoryEntry> {
        let entry = self.redo_stack.pop_back()?;
        push_bounded(&mut self.undo_stack, current, self.limit);
        self.suppress_next = true;
        self.schedule_persist();
        Some(entry)
    }

    fn stack_keys(&self) -> [(String, &VecDeque<HistoryEntry>); 2] {
        [
            (self.keys.undo(&self.project_id), &self.undo_stack),
            (self.keys.redo(&self.project_id), &self.redo_stack),
        ]
    }

    fn schedule_persist(&mut self) {
        let writes: Vec<(String, String)> = self
            .stack_keys()
            .into_iter()
            .filter_map(|(key, stack)| encode(stack).map(|json| (key, json)))
            .collect();
        for (key, json) in writes {
            let gateway = self.gateway.clone();
            let persisted = self.persisted.clone();
            let task_key = key.clone();
            self.debouncer.schedule(key, self.delay, async move {
                write_if_changed(&gateway, &persisted, &task_key, &json).await;
            });
        }
    }

    /// Cancel pending writes and persist both stacks now.
    pub async fn flush(&mut self) {
        self.debouncer.cancel_all();
        let writes: Vec<(String, String)> = self
            .stack_keys()
            .into_iter()
            .filter_map(|(key, stack)| encode(stack).map(|json| (key, json)))
            .collect();
        for (key, json) in writes {
            write_if_changed(&self.gateway, &self.persisted, &key, &json).await;
        }
    }

    async fn load_stack(&self, key: &str) -> VecDeque<HistoryEntry> {
        let Some(raw) = self.gateway.load(key).await else {
            return VecDeque::new();
        };
        match serde_json::from_str::<VecDeque<HistoryEntry>>(&raw) {
            Ok(mut stack) => {
                while stack.len() > self.limit {
                    stack.pop_front();
                }
                self.persisted
                    .lock()
                    .insert(key.to_string(), blake3::hash(raw.as_bytes()));
                stack
            }
            Err(e) => {
                warn!(key = %key, error = %e, "history unreadable, starting empty");
                VecDeque::new()
            }
        }
    }

    /// Replace the stacks with the stored history of `project_id`.
    pub async fn load(&mut self, project_id: &str) {
        self.debouncer.cancel_all();
        self.project_id = project_id.to_string();
        self.suppress_next = false;
        self.undo_stack = self.load_stack(&self.keys.undo(project_id)).await;
        self.redo_stack = self.load_stack(&self.keys.redo(project_id)).await;
        debug!(
            project = %project_id,
            undo = self.undo_stack.len(),
            redo = self.redo_stack.len(),
            "history loaded"
        );
    }

    /// Start empty stacks for `project_id`, overwriting anything stored.
    pub fn reset_for(&mut self, project_id: &str) {
        self.debouncer.cancel_all();
        self.project_id = project_id.to_string();
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.suppress_next = false;
        self.schedule_persist();
    }

    /// Move the stacks to a renamed project. Snapshots are rewritten to carry
    /// the new id and name so a replay cannot resurrect the old identity.
    pub async fn rebind(&mut self, project_id: &str, name: &str) {
        let old = self.project_id.clone();
        self.forget(&old).await;
        self.project_id = project_id.to_string();
        for entry in self.undo_stack.iter_mut().chain(self.redo_stack.iter_mut()) {
            entry.project.id = project_id.to_string();
            entry.project.name = name.to_string();
        }
        self.flush().await;
    }

    /// Drop pending writes and digests for a project's history keys. Returns
    /// once no write to either key can still land.
    pub async fn forget(&mut self, project_id: &str) {
        let undo = self.keys.undo(project_id);
        let redo = self.keys.redo(project_id);
        self.debouncer.cancel_and_wait(&undo).await;
        self.debouncer.cancel_and_wait(&redo).await;
        let mut persisted = self.persisted.lock();
        persisted.remove(&undo);
        persisted.remove(&redo);
    }

    /// Wait for scheduled writes to land.
    pub async fn settle(&mut self) {
        self.debouncer.settle().await;
    }
}
