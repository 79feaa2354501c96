//! The active project, its persistence schedule and its history.

use std::sync::Arc;

use tracing::{debug, info, warn};

use scriptdesk_core::block_ops::{self, BlockPatch, Selection};
use scriptdesk_core::keys::is_reserved_id;
use scriptdesk_core::script_ops;
use scriptdesk_core::{
    Block, BlockId, Character, CharacterGroup, CharacterId, CoreError, HistoryEntry,
    KeyNamespace, Project, SceneId,
};
use scriptdesk_storage::{DataGateway, WriteOutcome};

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::error::EngineError;
use crate::history::HistoryManager;
use crate::roster::CharacterRoster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Loading,
    Ready,
}

pub struct ProjectStore {
    config: EngineConfig,
    keys: KeyNamespace,
    gateway: Arc<DataGateway>,
    state: StoreState,
    project: Project,
    selected_scene: Option<SceneId>,
    projects: Vec<String>,
    roster: CharacterRoster,
    history: HistoryManager,
    debouncer: Debouncer,
}

impl ProjectStore {
    pub fn new(config: EngineConfig, gateway: Arc<DataGateway>) -> Self {
        let keys = gateway.keys().clone();
        let default_id = config.default_project_id.clone();
        let history = HistoryManager::new(
            gateway.clone(),
            &default_id,
            config.undo_limit,
            config.history_debounce(),
        );
        Self {
            project: Project::synthesize(&default_id, &default_id),
            config,
            keys,
            gateway,
            state: StoreState::Uninitialized,
            selected_scene: None,
            projects: Vec::new(),
            roster: CharacterRoster::default(),
            history,
            debouncer: Debouncer::new(),
        }
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<DataGateway> {
        &self.gateway
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn selected_scene(&self) -> Option<SceneId> {
        self.selected_scene
    }

    /// Project ids as last listed.
    pub fn projects(&self) -> &[String] {
        &self.projects
    }

    pub fn roster(&self) -> &CharacterRoster {
        &self.roster
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// Keys with a debounced write still waiting.
    pub fn pending_writes(&self) -> Vec<String> {
        self.debouncer.pending_keys()
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        match self.state {
            StoreState::Ready => Ok(()),
            _ => Err(EngineError::NotReady),
        }
    }

    // ---- loading ----

    pub async fn activate(&mut self) -> Result<(), EngineError> {
        if self.state == StoreState::Ready {
            return Ok(());
        }
        self.state = StoreState::Loading;

        if let Err(e) = self.gateway.resolve_save_location().await {
            warn!(error = %e, "save location unresolved, using local storage");
        }
        self.projects = self.discover_projects().await;

        let last = self.gateway.load(&self.keys.last_project()).await;
        let id = last
            .filter(|id| self.projects.contains(id))
            .or_else(|| self.projects.first().cloned())
            .unwrap_or_else(|| self.config.default_project_id.clone());

        self.project = self.read_or_heal(&id).await;
        self.remember_project(&id);
        self.selected_scene = self.resolve_scene(&self.project).await;
        self.history.load(&id).await;
        self.roster = CharacterRoster::load(&self.gateway).await;

        self.state = StoreState::Ready;
        info!(
            project = %id,
            projects = self.projects.len(),
            characters = self.roster.characters().len(),
            "project store ready"
        );
        Ok(())
    }

    async fn discover_projects(&self) -> Vec<String> {
        self.gateway
            .list_keys()
            .await
            .iter()
            .filter_map(|key| self.keys.project_id_from_key(key))
            .map(str::to_string)
            .collect()
    }

    fn remember_project(&mut self, id: &str) {
        if let Err(pos) = self.projects.binary_search_by(|p| p.as_str().cmp(id)) {
            self.projects.insert(pos, id.to_string());
        }
    }

    async fn read_project(&self, id: &str) -> Option<Project> {
        let raw = self.gateway.load(&self.keys.project(id)).await?;
        Project::from_json(&raw)
            .inspect_err(|e| warn!(project = %id, error = %e, "project record unreadable"))
            .ok()
    }

    /// Load a project, replacing a missing or unreadable record with a fresh
    /// default that is written back at once.
    async fn read_or_heal(&self, id: &str) -> Project {
        if let Some(project) = self.read_project(id).await {
            return project;
        }
        let project = Project::synthesize(id, id);
        info!(project = %id, "synthesized default project");
        self.write_project(&project).await;
        project
    }

    async fn resolve_scene(&self, project: &Project) -> Option<SceneId> {
        let stored = self.gateway.load(&self.keys.last_scene(&project.id)).await;
        stored
            .and_then(|raw| raw.parse::<SceneId>().ok())
            .filter(|id| project.scene(*id).is_some())
            .or_else(|| project.first_scene_id())
    }

    /// Read a project without switching to it.
    pub async fn load_project(&self, id: &str) -> Result<Project, EngineError> {
        self.ensure_ready()?;
        if id == self.project.id {
            return Ok(self.project.clone());
        }
        Ok(self
            .read_project(id)
            .await
            .unwrap_or_else(|| Project::synthesize(id, id)))
    }

    pub async fn list_projects(&mut self) -> Result<Vec<String>, EngineError> {
        self.ensure_ready()?;
        self.projects = self.discover_projects().await;
        let current = self.project.id.clone();
        self.remember_project(&current);
        Ok(self.projects.clone())
    }

    // ---- persistence ----

    async fn write_project(&self, project: &Project) -> WriteOutcome {
        match project.to_json() {
            Ok(json) => self.gateway.save(&self.keys.project(&project.id), &json).await,
            Err(e) => {
                warn!(project = %project.id, error = %e, "project not serializable");
                WriteOutcome::Dropped
            }
        }
    }

    fn scene_pointer(&self) -> String {
        self.selected_scene.map(|id| id.to_string()).unwrap_or_default()
    }

    async fn write_scene_pointer(&self) {
        self.gateway
            .save(&self.keys.last_scene(&self.project.id), &self.scene_pointer())
            .await;
    }

    async fn write_last_project(&self) {
        self.gateway
            .save(&self.keys.last_project(), &self.project.id)
            .await;
    }

    fn schedule_write(&mut self, key: String, value: String) {
        let gateway = self.gateway.clone();
        let task_key = key.clone();
        self.debouncer
            .schedule(key, self.config.save_debounce(), async move {
                gateway.save(&task_key, &value).await;
            });
    }

    fn schedule_save(&mut self) {
        match self.project.to_json() {
            Ok(json) => self.schedule_write(self.keys.project(&self.project.id), json),
            Err(e) => warn!(project = %self.project.id, error = %e, "project not serializable"),
        }
        self.schedule_scene_pointer();
    }

    fn schedule_scene_pointer(&mut self) {
        let key = self.keys.last_scene(&self.project.id);
        let value = self.scene_pointer();
        self.schedule_write(key, value);
    }

    fn schedule_roster(&mut self, groups: bool) {
        match self.roster.characters_json() {
            Ok(json) => self.schedule_write(self.keys.characters(), json),
            Err(e) => warn!(error = %e, "characters not serializable"),
        }
        if groups {
            match self.roster.groups_json() {
                Ok(json) => self.schedule_write(self.keys.groups(), json),
                Err(e) => warn!(error = %e, "groups not serializable"),
            }
        }
    }

    /// Returns once no scheduled write to the project's record or scene
    /// pointer can still land.
    async fn cancel_project_writes(&mut self, id: &str) {
        self.debouncer.cancel_and_wait(&self.keys.project(id)).await;
        self.debouncer.cancel_and_wait(&self.keys.last_scene(id)).await;
    }

    /// Cancel waiting writes and persist the current state now.
    pub async fn flush(&mut self) -> Result<(), EngineError> {
        self.ensure_ready()?;
        let pending = self.debouncer.pending_keys();
        for key in &pending {
            self.debouncer.cancel_and_wait(key).await;
        }
        self.debouncer.cancel_all();

        self.write_project(&self.project).await;
        self.write_scene_pointer().await;
        let roster_writes = [
            (self.keys.characters(), self.roster.characters_json()),
            (self.keys.groups(), self.roster.groups_json()),
        ];
        for (key, json) in roster_writes {
            if !pending.contains(&key) {
                continue;
            }
            match json {
                Ok(json) => {
                    self.gateway.save(&key, &json).await;
                }
                Err(e) => warn!(key = %key, error = %e, "roster not serializable"),
            }
        }
        self.history.flush().await;
        debug!(project = %self.project.id, "flushed");
        Ok(())
    }

    /// Wait for every scheduled write, including history, to land.
    pub async fn settle(&mut self) {
        self.debouncer.settle().await;
        self.history.settle().await;
    }

    // ---- project lifecycle ----

    pub async fn create_project(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        let name = name.trim();
        if name.is_empty() || is_reserved_id(name) {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        if self.projects.iter().any(|p| p == name)
            || self.gateway.load(&self.keys.project(name)).await.is_some()
        {
            return Err(EngineError::ProjectExists(name.to_string()));
        }

        self.flush().await?;
        self.project = Project::synthesize(name, name);
        self.selected_scene = self.project.first_scene_id();
        self.history.reset_for(name);

        self.write_project(&self.project).await;
        self.write_scene_pointer().await;
        self.remember_project(name);
        self.write_last_project().await;
        info!(project = %name, "project created");
        Ok(())
    }

    /// Returns false when the name is blank or unchanged.
    pub async fn rename_project(&mut self, new_name: &str) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let new_name = new_name.trim();
        if new_name.is_empty() || new_name == self.project.id {
            return Ok(false);
        }
        if is_reserved_id(new_name) {
            return Err(EngineError::InvalidName(new_name.to_string()));
        }
        if self.projects.iter().any(|p| p == new_name)
            || self.gateway.load(&self.keys.project(new_name)).await.is_some()
        {
            return Err(EngineError::ProjectExists(new_name.to_string()));
        }

        let old_id = self.project.id.clone();
        let old_name = self.project.name.clone();

        let mut next = self.project.clone();
        next.id = new_name.to_string();
        next.name = new_name.to_string();
        if let Some(script) = next
            .scenes
            .first_mut()
            .and_then(|scene| scene.scripts.first_mut())
        {
            if script.title == old_name {
                script.title = new_name.to_string();
            }
        }

        // the old family stays untouched until the new record is stored
        if !self.write_project(&next).await.is_stored() {
            warn!(from = %old_id, to = %new_name, "renamed record not stored, keeping old project");
            return Err(EngineError::PersistFailed(self.keys.project(new_name)));
        }
        self.cancel_project_writes(&old_id).await;
        self.project = next;
        self.write_scene_pointer().await;
        self.history.rebind(new_name, new_name).await;
        for key in self.keys.family(&old_id) {
            self.gateway.delete(&key).await;
        }

        self.projects.retain(|p| *p != old_id);
        self.remember_project(new_name);
        self.write_last_project().await;
        info!(from = %old_id, to = %new_name, "project renamed");
        Ok(true)
    }

    pub async fn delete_project(&mut self, id: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        if id == self.config.default_project_id {
            return Err(EngineError::ProtectedProject(id.to_string()));
        }

        let was_active = self.project.id == id;
        self.cancel_project_writes(id).await;
        self.history.forget(id).await;
        for key in self.keys.family(id) {
            self.gateway.delete(&key).await;
        }
        self.projects.retain(|p| p != id);

        if was_active {
            let default_id = self.config.default_project_id.clone();
            self.project = self.read_or_heal(&default_id).await;
            self.remember_project(&default_id);
            self.selected_scene = self.resolve_scene(&self.project).await;
            self.history.load(&default_id).await;
        }
        self.write_last_project().await;
        info!(project = %id, was_active, "project deleted");
        Ok(())
    }

    pub async fn switch_project(&mut self, id: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        if id == self.project.id {
            return Ok(());
        }
        self.flush().await?;

        self.project = self.read_or_heal(id).await;
        self.remember_project(id);
        self.selected_scene = self.resolve_scene(&self.project).await;
        self.history.load(id).await;
        self.write_last_project().await;
        info!(project = %id, "switched project");
        Ok(())
    }

    // ---- mutations ----

    /// Commit a new tree. Unchanged trees are ignored.
    fn commit(&mut self, next: Project, selected: Option<SceneId>) -> bool {
        if next == self.project && selected == self.selected_scene {
            return false;
        }
        self.install(next, selected);
        true
    }

    /// Replace the tree and notify history. Replays go through here directly so
    /// the suppression flag is always consumed.
    fn install(&mut self, next: Project, selected: Option<SceneId>) {
        let previous = HistoryEntry {
            project: std::mem::replace(&mut self.project, next),
            selected_scene_id: std::mem::replace(&mut self.selected_scene, selected),
        };
        self.history.record(previous);
        self.schedule_save();
    }

    /// Apply a pure edit to the selected scene. No scene selected is a no-op.
    pub fn apply(
        &mut self,
        edit: impl FnOnce(&Project, SceneId) -> Project,
    ) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let Some(scene) = self.selected_scene else {
            return Ok(false);
        };
        let next = edit(&self.project, scene);
        Ok(self.commit(next, Some(scene)))
    }

    /// Append a block to the selected scene. Returns its id.
    pub fn add_block(&mut self) -> Result<Option<BlockId>, EngineError> {
        let characters = self.roster.characters().to_vec();
        if !self.apply(|p, scene| block_ops::add_block(p, scene, &characters))? {
            return Ok(None);
        }
        Ok(self
            .selected_scene
            .and_then(|scene| self.project.scene(scene))
            .and_then(|scene| scene.script())
            .and_then(|script| script.blocks.last())
            .map(|block| block.id))
    }

    pub fn insert_block(&mut self, index: usize, block: Block) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::insert_block(p, scene, index, block))
    }

    pub fn delete_block(&mut self, block_id: BlockId) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::delete_block(p, scene, block_id))
    }

    pub fn delete_blocks(&mut self, selection: &Selection) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::delete_blocks(p, scene, selection))
    }

    pub fn duplicate_block(&mut self, block_id: BlockId) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::duplicate_block(p, scene, block_id))
    }

    pub fn move_block(&mut self, from: usize, to: usize) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::move_block(p, scene, from, to))
    }

    pub fn update_block(&mut self, block_id: BlockId, patch: &BlockPatch) -> Result<bool, EngineError> {
        self.apply(|p, scene| block_ops::update_block(p, scene, block_id, patch))
    }

    pub fn set_script_title(&mut self, title: &str) -> Result<bool, EngineError> {
        self.apply(|p, scene| script_ops::set_script_title(p, scene, title))
    }

    pub fn select_all(&self) -> Result<Selection, EngineError> {
        self.ensure_ready()?;
        Ok(self
            .selected_scene
            .map(|scene| block_ops::select_all(&self.project, scene))
            .unwrap_or_default())
    }

    // ---- scenes ----

    /// Append a scene and select it.
    pub fn add_scene(&mut self, name: &str) -> Result<SceneId, EngineError> {
        self.ensure_ready()?;
        let (next, id) = script_ops::add_scene(&self.project, name, self.config.max_scenes)?;
        self.commit(next, Some(id));
        Ok(id)
    }

    pub fn rename_scene(&mut self, scene_id: SceneId, name: &str) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let next = script_ops::rename_scene(&self.project, scene_id, name)?;
        Ok(self.commit(next, self.selected_scene))
    }

    /// Remove a scene and select the first remaining one.
    pub fn delete_scene(&mut self, scene_id: SceneId) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let (next, first) = script_ops::delete_scene(&self.project, scene_id);
        Ok(self.commit(next, first))
    }

    pub fn reorder_scenes(&mut self, from: usize, to: usize) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let next = script_ops::reorder_scenes(&self.project, from, to);
        Ok(self.commit(next, self.selected_scene))
    }

    /// Not a mutation; only the last-scene pointer is written.
    pub fn select_scene(&mut self, scene_id: SceneId) -> Result<(), EngineError> {
        self.ensure_ready()?;
        if self.project.scene(scene_id).is_none() {
            return Err(CoreError::SceneNotFound(scene_id.to_string()).into());
        }
        self.selected_scene = Some(scene_id);
        self.schedule_scene_pointer();
        Ok(())
    }

    // ---- history ----

    fn snapshot(&self) -> HistoryEntry {
        HistoryEntry {
            project: self.project.clone(),
            selected_scene_id: self.selected_scene,
        }
    }

    pub fn undo(&mut self) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let current = self.snapshot();
        let Some(entry) = self.history.undo(current) else {
            return Ok(false);
        };
        self.install(entry.project, entry.selected_scene_id);
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let current = self.snapshot();
        let Some(entry) = self.history.redo(current) else {
            return Ok(false);
        };
        self.install(entry.project, entry.selected_scene_id);
        Ok(true)
    }

    // ---- characters ----

    pub fn add_character(&mut self, character: Character) -> Result<CharacterId, EngineError> {
        self.ensure_ready()?;
        let id = character.id;
        self.roster.add(character);
        self.schedule_roster(false);
        Ok(id)
    }

    pub fn update_character(&mut self, character: Character) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        let updated = self.roster.update(character);
        if updated {
            self.schedule_roster(false);
        }
        Ok(updated)
    }

    pub fn remove_character(&mut self, id: CharacterId) -> Result<Option<Character>, EngineError> {
        self.ensure_ready()?;
        let removed = self.roster.remove(id);
        if removed.is_some() {
            self.schedule_roster(false);
        }
        Ok(removed)
    }

    pub fn set_groups(&mut self, groups: Vec<CharacterGroup>) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.roster.set_groups(groups);
        self.schedule_roster(true);
        Ok(())
    }
}
