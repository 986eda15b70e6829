//! Chapter outlines.
//!
//! Outlines are produced upstream and only read here. Everything except the
//! chapter number is optional so partially filled plans still load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineCharacter {
    pub name: String,
    pub role: String,
    pub motivation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineEntity {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineConflict {
    pub description: String,
    pub timeline: String,
    pub status: String,
}

/// Plan for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub chapter_number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub characters: Vec<OutlineCharacter>,
    #[serde(default)]
    pub entities: Vec<OutlineEntity>,
    #[serde(default)]
    pub conflicts: Vec<OutlineConflict>,
    #[serde(default)]
    pub settings: Vec<String>,
    /// Ids of existing conflicts this chapter touches.
    #[serde(default)]
    pub conflict_ids: Vec<String>,
}

impl ChapterOutline {
    pub fn new(chapter_number: u32) -> Self {
        Self {
            chapter_number,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_character(mut self, name: impl Into<String>) -> Self {
        self.characters.push(OutlineCharacter {
            name: name.into(),
            ..OutlineCharacter::default()
        });
        self
    }

    pub fn with_entity(mut self, name: impl Into<String>, category: impl Into<String>) -> Self {
        self.entities.push(OutlineEntity {
            name: name.into(),
            category: category.into(),
        });
        self
    }

    pub fn with_setting(mut self, setting: impl Into<String>) -> Self {
        self.settings.push(setting.into());
        self
    }

    pub fn with_conflict_id(mut self, id: impl Into<String>) -> Self {
        self.conflict_ids.push(id.into());
        self
    }

    /// Lowercased character names.
    pub fn character_names(&self) -> BTreeSet<String> {
        self.characters
            .iter()
            .map(|c| c.name.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Lowercased entity names.
    pub fn entity_names(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .map(|e| e.name.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Whether `name` appears among the outline's entities, characters or
    /// settings (case-insensitive).
    pub fn mentions(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return false;
        }
        self.entities.iter().any(|e| e.name.trim().to_lowercase() == name)
            || self.characters.iter().any(|c| c.name.trim().to_lowercase() == name)
            || self.settings.iter().any(|s| s.trim().to_lowercase() == name)
    }

    /// Plain-text rendering used inside prompts.
    pub fn to_prompt_string(&self) -> String {
        let mut out = format!("Chapter {}", self.chapter_number);
        if !self.title.is_empty() {
            let _ = write!(out, ": {}", self.title);
        }
        out.push('\n');
        if !self.summary.is_empty() {
            let _ = writeln!(out, "{}", self.summary);
        }
        if !self.characters.is_empty() {
            out.push_str("Characters:\n");
            for c in &self.characters {
                let _ = write!(out, "- {}", c.name);
                if !c.role.is_empty() {
                    let _ = write!(out, " ({})", c.role);
                }
                if !c.motivation.is_empty() {
                    let _ = write!(out, ": {}", c.motivation);
                }
                out.push('\n');
            }
        }
        if !self.entities.is_empty() {
            out.push_str("Entities:\n");
            for e in &self.entities {
                let _ = writeln!(out, "- {} [{}]", e.name, e.category);
            }
        }
        if !self.settings.is_empty() {
            let _ = writeln!(out, "Settings: {}", self.settings.join(", "));
        }
        if !self.conflicts.is_empty() {
            out.push_str("Conflicts:\n");
            for c in &self.conflicts {
                let _ = writeln!(out, "- [{}] {} ({})", c.timeline, c.description, c.status);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_outline_loads() {
        let outline: ChapterOutline = serde_json::from_str(r#"{"chapter_number": 4}"#).unwrap();
        assert_eq!(outline.chapter_number, 4);
        assert!(outline.characters.is_empty());
        assert!(outline.conflict_ids.is_empty());
    }

    #[test]
    fn test_mentions_checks_all_name_lists() {
        let outline = ChapterOutline::new(1)
            .with_character("Lâm Phong")
            .with_entity("Huyết Kiếm", "item")
            .with_setting("Thanh Vân Tông");

        assert!(outline.mentions("lâm phong"));
        assert!(outline.mentions("HUYẾT KIẾM"));
        assert!(outline.mentions("Thanh Vân Tông"));
        assert!(!outline.mentions("Tô Nguyệt"));
        assert!(!outline.mentions(""));
    }

    #[test]
    fn test_prompt_string_includes_parts() {
        let outline = ChapterOutline::new(2)
            .with_title("The Trial")
            .with_summary("Phong faces the outer sect trial.")
            .with_character("Lâm Phong");
        let text = outline.to_prompt_string();

        assert!(text.starts_with("Chapter 2: The Trial"));
        assert!(text.contains("- Lâm Phong"));
    }
}
