//! Project → Scene → Script → Block tree and the global character roster.
//!
//! Every type here is a plain value. Edits never mutate a tree in place; the
//! functions in [`crate::block_ops`] and [`crate::script_ops`] return a new
//! root instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

pub const DEFAULT_SCENE_NAME: &str = "Scene 1";
pub const DEFAULT_EMOTION: &str = "normal";

/// Free-form layout metadata attached to a script (column widths, zoom, ...).
pub type ScriptLayout = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    pub scripts: Vec<Script>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: ScriptId,
    pub title: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub layout: ScriptLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "speakerRef", with = "speaker_ref", default)]
    pub speaker: Option<CharacterId>,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Snapshot pushed onto the undo/redo stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub project: Project,
    pub selected_scene_id: Option<SceneId>,
}

impl Project {
    /// The project every fresh install, missing record, or unreadable record
    /// falls back to: one scene holding one empty script titled after the project.
    pub fn synthesize(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            scenes: vec![Scene::new(DEFAULT_SCENE_NAME, name)],
        }
    }

    pub fn scene(&self, scene_id: SceneId) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }

    pub fn first_scene_id(&self) -> Option<SceneId> {
        self.scenes.first().map(|s| s.id)
    }

    pub fn has_scene_named(&self, name: &str) -> bool {
        self.scenes.iter().any(|s| s.name == name)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and shape-check a stored project record.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let project: Project =
            serde_json::from_str(json).map_err(|e| CoreError::Parse(e.to_string()))?;
        project.validate()?;
        Ok(project)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Parse("project id is empty".into()));
        }
        let mut seen = BTreeSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id) {
                return Err(CoreError::Parse(format!("duplicate scene id {}", scene.id)));
            }
            if scene.scripts.is_empty() {
                return Err(CoreError::Parse(format!("scene {} has no script", scene.id)));
            }
        }
        Ok(())
    }
}

impl Scene {
    pub fn new(name: &str, script_title: &str) -> Self {
        Self {
            id: SceneId::new(),
            name: name.to_string(),
            scripts: vec![Script::new(script_title)],
        }
    }

    /// The scene's active script.
    pub fn script(&self) -> Option<&Script> {
        self.scripts.first()
    }
}

impl Script {
    pub fn new(title: &str) -> Self {
        Self {
            id: ScriptId::new(),
            title: title.to_string(),
            blocks: Vec::new(),
            layout: ScriptLayout::new(),
        }
    }
}

impl Block {
    pub fn narration(text: &str) -> Self {
        Self {
            id: BlockId::new(),
            speaker: None,
            emotion: String::new(),
            text: text.to_string(),
        }
    }

    pub fn spoken(speaker: CharacterId, emotion: &str, text: &str) -> Self {
        Self {
            id: BlockId::new(),
            speaker: Some(speaker),
            emotion: emotion.to_string(),
            text: text.to_string(),
        }
    }

    pub fn is_narration(&self) -> bool {
        self.speaker.is_none()
    }
}

impl Character {
    pub fn new(name: &str) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.to_string(),
            group: None,
            icon: String::new(),
            color: String::new(),
        }
    }
}

/// `speakerRef` is stored as a string; the empty string means narration.
mod speaker_ref {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::ids::CharacterId;

    pub fn serialize<S: Serializer>(
        speaker: &Option<CharacterId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match speaker {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<CharacterId>, D::Error> {
        let raw: Option<String> = Deserialize::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
