// 🏢 Company Entity - monitored organization
//
// Identity (canonical name) is fixed by operator configuration.
// The only mutation allowed is adding/removing aliases.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// PRIORITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Priority {
        match value.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

// ============================================================================
// ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical name (identity)
    #[serde(rename = "name")]
    pub canonical_name: String,

    /// Registered full legal name, when different from the short name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default)]
    pub priority: Priority,
}

fn default_category() -> String {
    "未分类".to_string()
}

impl Entity {
    pub fn new(canonical_name: &str, category: &str, priority: Priority) -> Self {
        Entity {
            canonical_name: canonical_name.to_string(),
            full_name: None,
            aliases: Vec::new(),
            category: category.to_string(),
            priority,
        }
    }

    /// Add an alias; returns false when it was already known
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || alias == self.canonical_name || self.aliases.iter().any(|a| a == alias) {
            return false;
        }
        self.aliases.push(alias.to_string());
        true
    }

    pub fn remove_alias(&mut self, alias: &str) -> bool {
        let before = self.aliases.len();
        self.aliases.retain(|a| a != alias.trim());
        self.aliases.len() < before
    }

    /// Exact match against canonical name, full name or any alias
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.canonical_name == name
            || self.full_name.as_deref() == Some(name)
            || self.aliases.iter().any(|a| a == name)
    }

    /// Canonical name followed by full name and aliases
    pub fn all_names(&self) -> Vec<String> {
        let mut names = vec![self.canonical_name.clone()];
        if let Some(full) = &self.full_name {
            if full != &self.canonical_name {
                names.push(full.clone());
            }
        }
        names.extend(self.aliases.iter().cloned());
        names
    }
}

// ============================================================================
// ENTITY REGISTRY
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct EntityFile {
    #[serde(default = "default_version")]
    version: u32,
    companies: Vec<Entity>,
}

fn default_version() -> u32 {
    1
}

/// CSV row: name,full_name,aliases,category,priority (aliases ';'-separated)
#[derive(Debug, Deserialize)]
struct EntityRow {
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    aliases: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        EntityRegistry { entities: Vec::new() }
    }

    pub fn from_entities(entities: Vec<Entity>) -> Self {
        EntityRegistry { entities }
    }

    /// Load the entity list (JSON or CSV, picked by extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Entity list not found: {}", path.display());
        }

        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        if is_csv {
            Self::from_csv(path)
        } else {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read entity list: {}", path.display()))?;
            let file: EntityFile =
                serde_json::from_str(&content).context("Failed to parse entity list JSON")?;
            Ok(EntityRegistry::from_entities(file.companies))
        }
    }

    fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path).context("Failed to open entity CSV")?;
        let mut entities = Vec::new();

        for row in rdr.deserialize() {
            let row: EntityRow = row.context("Failed to deserialize entity row")?;
            let mut entity = Entity::new(
                row.name.trim(),
                row.category.as_deref().filter(|c| !c.is_empty()).unwrap_or("未分类"),
                Priority::parse(row.priority.as_deref().unwrap_or("normal")),
            );
            entity.full_name = row.full_name.filter(|f| !f.trim().is_empty());
            for alias in row.aliases.unwrap_or_default().split(';') {
                entity.add_alias(alias);
            }
            entities.push(entity);
        }

        Ok(EntityRegistry::from_entities(entities))
    }

    /// Persist as JSON (the format the aliases commands write back)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = EntityFile {
            version: 1,
            companies: self.entities.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn all(&self) -> &[Entity] {
        &self.entities
    }

    pub fn find(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.matches(name))
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.matches(name))
    }

    pub fn add_alias(&mut self, entity: &str, alias: &str) -> Result<bool> {
        if let Some(owner) = self.find(alias) {
            if !owner.matches(entity) {
                bail!("Alias {} already belongs to {}", alias, owner.canonical_name);
            }
        }
        match self.find_mut(entity) {
            Some(e) => Ok(e.add_alias(alias)),
            None => bail!("Unknown entity: {}", entity),
        }
    }

    pub fn remove_alias(&mut self, entity: &str, alias: &str) -> Result<bool> {
        match self.find_mut(entity) {
            Some(e) => Ok(e.remove_alias(alias)),
            None => bail!("Unknown entity: {}", entity),
        }
    }

    /// Entities ordered high → normal → low, declaration order within a tier
    pub fn by_priority(&self) -> Vec<&Entity> {
        let mut ordered: Vec<&Entity> = self.entities.iter().collect();
        ordered.sort_by_key(|e| e.priority);
        ordered
    }

    /// Entities grouped by category, categories in first-seen order
    pub fn by_category(&self) -> Vec<(String, Vec<&Entity>)> {
        let mut groups: Vec<(String, Vec<&Entity>)> = Vec::new();
        for entity in &self.entities {
            match groups.iter_mut().find(|(cat, _)| cat == &entity.category) {
                Some((_, members)) => members.push(entity),
                None => groups.push((entity.category.clone(), vec![entity])),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_registry() -> EntityRegistry {
        let mut acme = Entity::new("Acme", "Diagnostics", Priority::Normal);
        acme.add_alias("Acme Health");
        let beta = Entity::new("Beta Bio", "Biotech", Priority::High);
        let gamma = Entity::new("Gamma", "Diagnostics", Priority::Low);
        EntityRegistry::from_entities(vec![acme, beta, gamma])
    }

    #[test]
    fn test_alias_add_remove() {
        let mut entity = Entity::new("Acme", "Devices", Priority::High);

        assert!(entity.add_alias("Acme Corp"));
        assert!(!entity.add_alias("Acme Corp"));
        assert!(!entity.add_alias("Acme"));
        assert!(entity.matches("Acme Corp"));

        assert!(entity.remove_alias("Acme Corp"));
        assert!(!entity.matches("Acme Corp"));
        assert!(!entity.remove_alias("Acme Corp"));
    }

    #[test]
    fn test_find_by_alias() {
        let registry = sample_registry();
        let found = registry.find("Acme Health").unwrap();
        assert_eq!(found.canonical_name, "Acme");
        assert!(registry.find("Unknown").is_none());
    }

    #[test]
    fn test_alias_conflict_rejected() {
        let mut registry = sample_registry();
        assert!(registry.add_alias("Beta Bio", "Acme Health").is_err());
        assert!(registry.add_alias("Nobody", "x").is_err());
        assert!(registry.add_alias("Beta Bio", "Beta").unwrap());
    }

    #[test]
    fn test_priority_order() {
        let registry = sample_registry();
        let names: Vec<&str> = registry
            .by_priority()
            .iter()
            .map(|e| e.canonical_name.as_str())
            .collect();
        assert_eq!(names, vec!["Beta Bio", "Acme", "Gamma"]);
    }

    #[test]
    fn test_group_by_category() {
        let registry = sample_registry();
        let groups = registry.by_category();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Diagnostics");
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companies.json");

        let mut registry = sample_registry();
        registry.add_alias("Gamma", "Gamma Medical").unwrap();
        registry.save(&path).unwrap();

        let loaded = EntityRegistry::from_file(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.find("Gamma Medical").is_some());
        assert_eq!(loaded.find("Beta Bio").unwrap().priority, Priority::High);
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companies.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name,full_name,aliases,category,priority").unwrap();
        writeln!(file, "联影医疗,上海联影医疗科技股份有限公司,联影;United Imaging,影像,high").unwrap();
        writeln!(file, "Acme,,,,").unwrap();

        let registry = EntityRegistry::from_file(&path).unwrap();
        assert_eq!(registry.len(), 2);

        let uih = registry.find("United Imaging").unwrap();
        assert_eq!(uih.canonical_name, "联影医疗");
        assert_eq!(uih.priority, Priority::High);
        assert_eq!(uih.aliases.len(), 2);

        let acme = registry.find("Acme").unwrap();
        assert_eq!(acme.category, "未分类");
        assert!(acme.full_name.is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = EntityRegistry::from_file("/nonexistent/companies.json");
        assert!(result.is_err());
    }
}
