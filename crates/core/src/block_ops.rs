//! Pure block-level edits on a project tree.
//!
//! Every function takes the current root by reference and returns a new root.
//! A scene id that doesn't match any scene yields an unchanged copy.

use std::collections::BTreeSet;

use crate::ids::*;
use crate::model::{Block, Character, Project, Script, DEFAULT_EMOTION};

pub const COPY_SUFFIX: &str = " (copy)";

/// Blocks currently selected in the editor.
pub type Selection = BTreeSet<BlockId>;

/// Partial update merged into a block by [`update_block`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPatch {
    /// `Some(None)` turns the block into narration.
    pub speaker: Option<Option<CharacterId>>,
    pub emotion: Option<String>,
    pub text: Option<String>,
}

impl BlockPatch {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    fn apply(&self, block: &Block) -> Block {
        Block {
            id: block.id,
            speaker: self.speaker.unwrap_or(block.speaker),
            emotion: self.emotion.clone().unwrap_or_else(|| block.emotion.clone()),
            text: self.text.clone().unwrap_or_else(|| block.text.clone()),
        }
    }
}

/// Rebuild the project with the active script of `scene_id` replaced by `edit(script)`.
pub(crate) fn map_script(
    project: &Project,
    scene_id: SceneId,
    edit: impl FnOnce(&Script) -> Script,
) -> Project {
    let mut next = project.clone();
    if let Some(scene) = next.scenes.iter_mut().find(|s| s.id == scene_id)
        && let Some(script) = scene.scripts.first_mut()
    {
        *script = edit(script);
    }
    next
}

fn with_blocks(script: &Script, blocks: Vec<Block>) -> Script {
    Script {
        blocks,
        ..script.clone()
    }
}

/// Speaker and emotion a new block should start with: those of the most recent
/// block that has a speaker, else the first known character, else narration.
pub fn infer_speaker(blocks: &[Block], characters: &[Character]) -> (Option<CharacterId>, String) {
    if let Some(last) = blocks.iter().rev().find(|b| b.speaker.is_some()) {
        let emotion = if last.emotion.is_empty() {
            DEFAULT_EMOTION.to_string()
        } else {
            last.emotion.clone()
        };
        return (last.speaker, emotion);
    }
    match characters.first() {
        Some(first) => (Some(first.id), DEFAULT_EMOTION.to_string()),
        None => (None, String::new()),
    }
}

/// Append an empty block whose speaker continues the conversation.
pub fn add_block(project: &Project, scene_id: SceneId, characters: &[Character]) -> Project {
    map_script(project, scene_id, |script| {
        let (speaker, emotion) = infer_speaker(&script.blocks, characters);
        let mut blocks = script.blocks.clone();
        blocks.push(Block {
            id: BlockId::new(),
            speaker,
            emotion,
            text: String::new(),
        });
        with_blocks(script, blocks)
    })
}

/// Insert `block` at `index`, clamped to the end of the script.
pub fn insert_block(project: &Project, scene_id: SceneId, index: usize, block: Block) -> Project {
    map_script(project, scene_id, |script| {
        let mut blocks = script.blocks.clone();
        let at = index.min(blocks.len());
        blocks.insert(at, block);
        with_blocks(script, blocks)
    })
}

pub fn delete_block(project: &Project, scene_id: SceneId, block_id: BlockId) -> Project {
    map_script(project, scene_id, |script| {
        let blocks = script
            .blocks
            .iter()
            .filter(|b| b.id != block_id)
            .cloned()
            .collect();
        with_blocks(script, blocks)
    })
}

pub fn delete_blocks(project: &Project, scene_id: SceneId, selection: &Selection) -> Project {
    map_script(project, scene_id, |script| {
        let blocks = script
            .blocks
            .iter()
            .filter(|b| !selection.contains(&b.id))
            .cloned()
            .collect();
        with_blocks(script, blocks)
    })
}

/// Copy a block to the position right after it.
pub fn duplicate_block(project: &Project, scene_id: SceneId, block_id: BlockId) -> Project {
    map_script(project, scene_id, |script| {
        let mut blocks = script.blocks.clone();
        if let Some(pos) = blocks.iter().position(|b| b.id == block_id) {
            let source = &blocks[pos];
            let copy = Block {
                id: BlockId::new(),
                speaker: source.speaker,
                emotion: source.emotion.clone(),
                text: format!("{}{COPY_SUFFIX}", source.text),
            };
            blocks.insert(pos + 1, copy);
        }
        with_blocks(script, blocks)
    })
}

/// Move the block at `from` so it ends up at `to`. Out-of-range indices are a no-op.
pub fn move_block(project: &Project, scene_id: SceneId, from: usize, to: usize) -> Project {
    map_script(project, scene_id, |script| {
        let len = script.blocks.len();
        if from >= len || to >= len || from == to {
            return script.clone();
        }
        let mut blocks = script.blocks.clone();
        let block = blocks.remove(from);
        blocks.insert(to, block);
        with_blocks(script, blocks)
    })
}

pub fn update_block(
    project: &Project,
    scene_id: SceneId,
    block_id: BlockId,
    patch: &BlockPatch,
) -> Project {
    map_script(project, scene_id, |script| {
        let blocks = script
            .blocks
            .iter()
            .map(|b| if b.id == block_id { patch.apply(b) } else { b.clone() })
            .collect();
        with_blocks(script, blocks)
    })
}

pub fn select_all(project: &Project, scene_id: SceneId) -> Selection {
    project
        .scene(scene_id)
        .and_then(|s| s.script())
        .map(|script| script.blocks.iter().map(|b| b.id).collect())
        .unwrap_or_default()
}

pub fn deselect() -> Selection {
    Selection::new()
}

pub fn toggle(selection: &Selection, block_id: BlockId) -> Selection {
    let mut next = selection.clone();
    if !next.remove(&block_id) {
        next.insert(block_id);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(texts: &[&str]) -> (Project, SceneId) {
        let mut project = Project::synthesize("P1", "P1");
        project.scenes[0].scripts[0].blocks = texts.iter().map(|t| Block::narration(t)).collect();
        let scene = project.scenes[0].id;
        (project, scene)
    }

    fn texts(project: &Project) -> Vec<String> {
        project.scenes[0].scripts[0]
            .blocks
            .iter()
            .map(|b| b.text.clone())
            .collect()
    }

    #[test]
    fn move_first_to_last() {
        let (project, scene) = project_with(&["a", "b", "c"]);
        let moved = move_block(&project, scene, 0, 2);
        assert_eq!(texts(&moved), vec!["b", "c", "a"]);
        // input untouched
        assert_eq!(texts(&project), vec!["a", "b", "c"]);
    }

    #[test]
    fn move_out_of_bounds_is_noop() {
        let (project, scene) = project_with(&["a", "b", "c"]);
        assert_eq!(move_block(&project, scene, 3, 0), project);
        assert_eq!(move_block(&project, scene, 0, 7), project);
    }

    #[test]
    fn unknown_scene_is_noop() {
        let (project, _) = project_with(&["a"]);
        let chars = vec![Character::new("A")];
        assert_eq!(add_block(&project, SceneId::new(), &chars), project);
        assert_eq!(move_block(&project, SceneId::new(), 0, 0), project);
    }

    #[test]
    fn add_block_continues_last_speaker() {
        let a = Character::new("A");
        let b = Character::new("B");
        let (mut project, scene) = project_with(&[]);
        project.scenes[0].scripts[0].blocks = vec![
            Block::spoken(b.id, "sad", "first"),
            Block::spoken(a.id, "happy", "second"),
            Block::narration("aside"),
        ];

        let next = add_block(&project, scene, &[a.clone(), b.clone()]);
        let added = next.scenes[0].scripts[0].blocks.last().unwrap();
        assert_eq!(added.speaker, Some(a.id));
        assert_eq!(added.emotion, "happy");
        assert!(added.text.is_empty());
    }

    #[test]
    fn add_block_defaults_to_first_character() {
        let a = Character::new("A");
        let b = Character::new("B");
        let (project, scene) = project_with(&["narration only"]);
        let next = add_block(&project, scene, &[a.clone(), b]);
        let added = next.scenes[0].scripts[0].blocks.last().unwrap();
        assert_eq!(added.speaker, Some(a.id));
        assert_eq!(added.emotion, DEFAULT_EMOTION);
    }

    #[test]
    fn add_block_without_characters_is_narration() {
        let (project, scene) = project_with(&[]);
        let next = add_block(&project, scene, &[]);
        assert!(next.scenes[0].scripts[0].blocks[0].is_narration());
    }

    #[test]
    fn duplicate_inserts_after_source() {
        let (project, scene) = project_with(&["a", "b"]);
        let source = project.scenes[0].scripts[0].blocks[0].id;
        let next = duplicate_block(&project, scene, source);
        assert_eq!(texts(&next), vec!["a", "a (copy)", "b"]);
        assert_ne!(next.scenes[0].scripts[0].blocks[1].id, source);
    }

    #[test]
    fn insert_clamps_index() {
        let (project, scene) = project_with(&["a"]);
        let next = insert_block(&project, scene, 99, Block::narration("z"));
        assert_eq!(texts(&next), vec!["a", "z"]);
        let next = insert_block(&next, scene, 0, Block::narration("first"));
        assert_eq!(texts(&next), vec!["first", "a", "z"]);
    }

    #[test]
    fn delete_removes_only_target() {
        let (project, scene) = project_with(&["a", "b", "c"]);
        let target = project.scenes[0].scripts[0].blocks[1].id;
        assert_eq!(texts(&delete_block(&project, scene, target)), vec!["a", "c"]);
    }

    #[test]
    fn update_merges_partial_fields() {
        let speaker = CharacterId::new();
        let (mut project, scene) = project_with(&[]);
        project.scenes[0].scripts[0].blocks = vec![Block::spoken(speaker, "calm", "hello")];
        let id = project.scenes[0].scripts[0].blocks[0].id;

        let next = update_block(&project, scene, id, &BlockPatch::text("goodbye"));
        let block = &next.scenes[0].scripts[0].blocks[0];
        assert_eq!(block.text, "goodbye");
        assert_eq!(block.speaker, Some(speaker));
        assert_eq!(block.emotion, "calm");

        let patch = BlockPatch {
            speaker: Some(None),
            ..BlockPatch::default()
        };
        let next = update_block(&next, scene, id, &patch);
        assert!(next.scenes[0].scripts[0].blocks[0].is_narration());
    }

    #[test]
    fn selection_helpers() {
        let (project, scene) = project_with(&["a", "b", "c"]);
        let all = select_all(&project, scene);
        assert_eq!(all.len(), 3);

        let first = project.scenes[0].scripts[0].blocks[0].id;
        let without_first = toggle(&all, first);
        assert_eq!(without_first.len(), 2);
        assert!(!without_first.contains(&first));
        assert!(toggle(&without_first, first).contains(&first));

        assert!(deselect().is_empty());
        assert!(select_all(&project, SceneId::new()).is_empty());

        let trimmed = delete_blocks(&project, scene, &without_first);
        assert_eq!(texts(&trimmed), vec!["a"]);
    }
}
