use serde::de::DeserializeOwned;
use tracing::warn;

use scriptdesk_core::{Character, CharacterGroup, CharacterId, GroupId};
use scriptdesk_storage::DataGateway;

/// Global characters and groups, shared by every project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterRoster {
    characters: Vec<Character>,
    groups: Vec<CharacterGroup>,
}

async fn load_list<T: DeserializeOwned>(gateway: &DataGateway, key: &str) -> Vec<T> {
    let Some(raw) = gateway.load(key).await else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(key = %key, error = %e, "roster list unreadable, resetting");
        Vec::new()
    })
}

impl CharacterRoster {
    pub fn new(characters: Vec<Character>, groups: Vec<CharacterGroup>) -> Self {
        Self { characters, groups }
    }

    pub async fn load(gateway: &DataGateway) -> Self {
        let keys = gateway.keys();
        Self {
            characters: load_list(gateway, &keys.characters()).await,
            groups: load_list(gateway, &keys.groups()).await,
        }
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn groups(&self) -> &[CharacterGroup] {
        &self.groups
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn characters_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.characters)
    }

    pub fn groups_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.groups)
    }

    pub fn add(&mut self, character: Character) {
        self.characters.push(character);
    }

    /// Replace the character with the same id. Returns false if there is none.
    pub fn update(&mut self, character: Character) -> bool {
        match self.characters.iter_mut().find(|c| c.id == character.id) {
            Some(slot) => {
                *slot = character;
                true
            }
            None => false,
        }
    }

    /// Blocks that referenced the character keep the dangling id.
    pub fn remove(&mut self, id: CharacterId) -> Option<Character> {
        let index = self.characters.iter().position(|c| c.id == id)?;
        Some(self.characters.remove(index))
    }

    /// Replace the group list. Characters in a group that no longer exists
    /// become ungrouped.
    pub fn set_groups(&mut self, groups: Vec<CharacterGroup>) {
        let known = |id: &GroupId| groups.iter().any(|g| g.id == *id);
        for character in &mut self.characters {
            if character.group.as_ref().is_some_and(|g| !known(g)) {
                character.group = None;
            }
        }
        self.groups = groups;
    }
}
