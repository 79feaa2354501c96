//! Storage key namespace shared by every tier.
//!
//! Keys are deterministic from the project id, so a project's whole key family
//! can be derived without reading storage.

const PROJECT_SEGMENT: &str = "_project_";
const LAST_SCENE_SUFFIX: &str = "_lastScene";
const UNDO_SUFFIX: &str = "_undo";
const REDO_SUFFIX: &str = "_redo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    app: String,
}

impl KeyNamespace {
    pub fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn project_prefix(&self) -> String {
        format!("{}{PROJECT_SEGMENT}", self.app)
    }

    pub fn project(&self, id: &str) -> String {
        format!("{}{id}", self.project_prefix())
    }

    pub fn last_scene(&self, id: &str) -> String {
        format!("{}{LAST_SCENE_SUFFIX}", self.project(id))
    }

    pub fn undo(&self, id: &str) -> String {
        format!("{}{UNDO_SUFFIX}", self.project(id))
    }

    pub fn redo(&self, id: &str) -> String {
        format!("{}{REDO_SUFFIX}", self.project(id))
    }

    /// Main record, last-scene pointer, undo and redo keys of one project.
    pub fn family(&self, id: &str) -> [String; 4] {
        [
            self.project(id),
            self.last_scene(id),
            self.undo(id),
            self.redo(id),
        ]
    }

    pub fn last_project(&self) -> String {
        format!("{}_lastProject", self.app)
    }

    pub fn characters(&self) -> String {
        format!("{}_characters", self.app)
    }

    pub fn groups(&self) -> String {
        format!("{}_groups", self.app)
    }

    pub fn migration_marker(&self) -> String {
        format!("{}_migration_complete", self.app)
    }

    /// Extract the project id from a main-record key. Returns `None` for
    /// foreign keys and for the pointer/history keys of a project.
    pub fn project_id_from_key<'k>(&self, key: &'k str) -> Option<&'k str> {
        let id = key.strip_prefix(&self.project_prefix())?;
        if id.is_empty() || is_family_suffixed(id) {
            return None;
        }
        Some(id)
    }

    /// History keys may be discarded to free key-value capacity.
    pub fn is_expendable(&self, key: &str) -> bool {
        key.starts_with(&self.project_prefix())
            && (key.ends_with(UNDO_SUFFIX) || key.ends_with(REDO_SUFFIX))
    }
}

/// A project id ending in a family suffix would collide with another
/// project's pointer or history key.
pub fn is_reserved_id(id: &str) -> bool {
    is_family_suffixed(id)
}

fn is_family_suffixed(id: &str) -> bool {
    id.ends_with(LAST_SCENE_SUFFIX) || id.ends_with(UNDO_SUFFIX) || id.ends_with(REDO_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_keys_share_the_project_key() {
        let keys = KeyNamespace::new("sd");
        assert_eq!(
            keys.family("P1"),
            [
                "sd_project_P1".to_string(),
                "sd_project_P1_lastScene".to_string(),
                "sd_project_P1_undo".to_string(),
                "sd_project_P1_redo".to_string(),
            ]
        );
    }

    #[test]
    fn project_id_from_key_filters_suffixes() {
        let keys = KeyNamespace::new("sd");
        assert_eq!(keys.project_id_from_key("sd_project_P1"), Some("P1"));
        assert_eq!(keys.project_id_from_key("sd_project_P1_undo"), None);
        assert_eq!(keys.project_id_from_key("sd_project_P1_redo"), None);
        assert_eq!(keys.project_id_from_key("sd_project_P1_lastScene"), None);
        assert_eq!(keys.project_id_from_key("sd_lastProject"), None);
        assert_eq!(keys.project_id_from_key("other_project_P1"), None);
        assert_eq!(keys.project_id_from_key("sd_project_"), None);
    }

    #[test]
    fn only_history_keys_are_expendable() {
        let keys = KeyNamespace::new("sd");
        assert!(keys.is_expendable("sd_project_P1_undo"));
        assert!(keys.is_expendable("sd_project_P1_redo"));
        assert!(!keys.is_expendable("sd_project_P1"));
        assert!(!keys.is_expendable("sd_characters"));
    }

    #[test]
    fn family_suffixes_are_reserved() {
        assert!(is_reserved_id("Draft_undo"));
        assert!(is_reserved_id("Draft_redo"));
        assert!(is_reserved_id("Draft_lastScene"));
        assert!(!is_reserved_id("Draft"));
        assert!(!is_reserved_id("undo draft"));
    }
}
