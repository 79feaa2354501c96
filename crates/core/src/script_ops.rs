//! Pure scene-level edits: add, rename, delete, reorder, retitle.

use crate::block_ops::map_script;
use crate::error::CoreError;
use crate::ids::SceneId;
use crate::model::{Project, Scene};

pub const MAX_SCENES: usize = 30;

fn checked_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Append a scene with one empty script. Returns the new root and the scene's id.
pub fn add_scene(
    project: &Project,
    name: &str,
    max_scenes: usize,
) -> Result<(Project, SceneId), CoreError> {
    let name = checked_name(name)?;
    if project.scenes.len() >= max_scenes {
        return Err(CoreError::SceneLimit { max: max_scenes });
    }
    if project.has_scene_named(&name) {
        return Err(CoreError::DuplicateSceneName(name));
    }
    let scene = Scene::new(&name, &name);
    let id = scene.id;
    let mut next = project.clone();
    next.scenes.push(scene);
    Ok((next, id))
}

pub fn rename_scene(project: &Project, scene_id: SceneId, name: &str) -> Result<Project, CoreError> {
    let name = checked_name(name)?;
    let Some(current) = project.scene(scene_id) else {
        return Err(CoreError::SceneNotFound(scene_id.to_string()));
    };
    if current.name == name {
        return Ok(project.clone());
    }
    if project.has_scene_named(&name) {
        return Err(CoreError::DuplicateSceneName(name));
    }
    let mut next = project.clone();
    for scene in next.scenes.iter_mut().filter(|s| s.id == scene_id) {
        scene.name = name.clone();
    }
    Ok(next)
}

/// Remove a scene. Returns the new root and the scene that should be selected
/// afterwards (the first remaining one, if any).
pub fn delete_scene(project: &Project, scene_id: SceneId) -> (Project, Option<SceneId>) {
    let mut next = project.clone();
    next.scenes.retain(|s| s.id != scene_id);
    let selected = next.first_scene_id();
    (next, selected)
}

/// Move the scene at `from` to `to`. Out-of-range indices are a no-op.
pub fn reorder_scenes(project: &Project, from: usize, to: usize) -> Project {
    let len = project.scenes.len();
    if from >= len || to >= len || from == to {
        return project.clone();
    }
    let mut next = project.clone();
    let scene = next.scenes.remove(from);
    next.scenes.insert(to, scene);
    next
}

pub fn set_script_title(project: &Project, scene_id: SceneId, title: &str) -> Project {
    map_script(project, scene_id, |script| {
        let mut script = script.clone();
        script.title = title.to_string();
        script
    })
}
