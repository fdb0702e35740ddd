//! Mail-merge placeholder registry.
//!
//! Placeholders are `{{label}}` tokens that a user drops into the document
//! for later substitution. The registry keeps two independently persisted
//! lists:
//!
//! * `customPlaceholders` — user-added tokens, most recent first;
//! * `deletedDefaultPlaceholders` — built-in tokens the user has hidden.
//!
//! The visible list is always `customs ++ (builtins − suppressed)`. Removing
//! a built-in never deletes its definition, it only suppresses it, so
//! [`PlaceholderRegistry::restore`] can bring it back.

use crate::error::PagesmithError;
use crate::surface::EditorSurface;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Store key of the user-added token list.
pub const CUSTOM_KEY: &str = "customPlaceholders";

/// Store key of the hidden built-in token list.
pub const SUPPRESSED_KEY: &str = "deletedDefaultPlaceholders";

/// Built-in tokens, in canonical display order.
pub const BUILTIN_PLACEHOLDERS: &[&str] = &[
    "{{name}}",
    "{{date}}",
    "{{address}}",
    "{{company}}",
    "{{email}}",
    "{{phone}}",
];

/// Where a visible placeholder comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderOrigin {
    BuiltIn,
    Custom,
}

/// One entry of [`PlaceholderRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub token: String,
    pub origin: PlaceholderOrigin,
}

impl Placeholder {
    /// The label between the braces.
    pub fn label(&self) -> &str {
        self.token
            .strip_prefix("{{")
            .and_then(|t| t.strip_suffix("}}"))
            .unwrap_or(&self.token)
    }
}

/// Canonical token form of a label: trimmed, wrapped in `{{ }}` exactly once.
pub fn normalize_token(label: &str) -> Result<String, PagesmithError> {
    let trimmed = label.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .unwrap_or(trimmed)
        .trim();
    if inner.is_empty() || inner.contains("{{") || inner.contains("}}") {
        return Err(PagesmithError::InvalidPlaceholder {
            label: label.to_string(),
        });
    }
    Ok(format!("{{{{{inner}}}}}"))
}

// ── Persistence ──────────────────────────────────────────────────────────

/// Durable string key-value records.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PagesmithError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), PagesmithError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, PagesmithError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PagesmithError> {
        (**self).set(key, value)
    }
}

/// Volatile store, for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PagesmithError> {
        Ok(self.records.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PagesmithError> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }
}

/// All records in one JSON object on disk.
///
/// Writes go to a sibling temp file which is then renamed over the original,
/// so a crash never leaves a half-written store behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, PagesmithError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                PagesmithError::StoreFailed(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PagesmithError::StoreFailed(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PagesmithError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PagesmithError> {
        let mut records = self.load()?;
        records.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| PagesmithError::StoreFailed(e.to_string()))?;

        let write_err = |e: std::io::Error| {
            PagesmithError::StoreFailed(format!("{}: {e}", self.path.display()))
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(write_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// The placeholder registry of one session.
#[derive(Debug)]
pub struct PlaceholderRegistry<S: KeyValueStore> {
    store: S,
    customs: Vec<String>,
    suppressed: Vec<String>,
}

impl<S: KeyValueStore> PlaceholderRegistry<S> {
    /// Load both lists from `store`. A missing record means an empty list;
    /// an unreadable record is logged and treated as empty.
    pub fn new(store: S) -> Result<Self, PagesmithError> {
        let customs = load_list(&store, CUSTOM_KEY)?;
        let suppressed = load_list(&store, SUPPRESSED_KEY)?;
        debug!(
            "Placeholder registry loaded: {} custom, {} hidden built-in",
            customs.len(),
            suppressed.len()
        );
        Ok(Self {
            store,
            customs,
            suppressed,
        })
    }

    /// Add a custom placeholder and return its token.
    ///
    /// # Errors
    /// [`PagesmithError::DuplicatePlaceholder`] if the token is already visible.
    pub fn add(&mut self, label: &str) -> Result<String, PagesmithError> {
        let token = normalize_token(label)?;
        if self.is_visible(&token) {
            return Err(PagesmithError::DuplicatePlaceholder { token });
        }
        let mut customs = Vec::with_capacity(self.customs.len() + 1);
        customs.push(token.clone());
        customs.extend(self.customs.iter().cloned());
        self.persist(CUSTOM_KEY, &customs)?;
        self.customs = customs;
        debug!("Added placeholder {}", token);
        Ok(token)
    }

    /// Remove a token from the visible list.
    ///
    /// Returns `false` if the token was not visible. Built-ins are recorded
    /// as suppressed rather than removed.
    pub fn remove(&mut self, token: &str) -> Result<bool, PagesmithError> {
        let token = normalize_token(token)?;
        if self.customs.contains(&token) {
            let customs: Vec<String> =
                self.customs.iter().filter(|t| **t != token).cloned().collect();
            self.persist(CUSTOM_KEY, &customs)?;
            self.customs = customs;
            return Ok(true);
        }
        if is_builtin(&token) && !self.suppressed.contains(&token) {
            let mut suppressed = self.suppressed.clone();
            suppressed.push(token);
            self.persist(SUPPRESSED_KEY, &suppressed)?;
            self.suppressed = suppressed;
            return Ok(true);
        }
        Ok(false)
    }

    /// Un-hide one built-in. Returns `false` if it was not hidden.
    pub fn restore(&mut self, token: &str) -> Result<bool, PagesmithError> {
        let token = normalize_token(token)?;
        if !self.suppressed.contains(&token) {
            return Ok(false);
        }
        let suppressed: Vec<String> =
            self.suppressed.iter().filter(|t| **t != token).cloned().collect();
        self.persist(SUPPRESSED_KEY, &suppressed)?;
        self.suppressed = suppressed;
        Ok(true)
    }

    /// Un-hide every built-in.
    pub fn restore_all(&mut self) -> Result<(), PagesmithError> {
        self.persist(SUPPRESSED_KEY, &[])?;
        self.suppressed.clear();
        Ok(())
    }

    /// Visible placeholders: customs (newest first), then unsuppressed built-ins.
    pub fn list(&self) -> Vec<Placeholder> {
        let customs = self.customs.iter().map(|t| Placeholder {
            token: t.clone(),
            origin: PlaceholderOrigin::Custom,
        });
        let builtins = BUILTIN_PLACEHOLDERS
            .iter()
            .filter(|t| !self.suppressed.iter().any(|s| s == *t))
            .filter(|t| !self.customs.iter().any(|c| c == *t))
            .map(|t| Placeholder {
                token: (*t).to_string(),
                origin: PlaceholderOrigin::BuiltIn,
            });
        customs.chain(builtins).collect()
    }

    /// Visible tokens only.
    pub fn tokens(&self) -> Vec<String> {
        self.list().into_iter().map(|p| p.token).collect()
    }

    /// Insert `token` at the cursor of `surface`. Unknown tokens are allowed.
    pub fn insert(
        &self,
        token: &str,
        surface: &mut dyn EditorSurface,
    ) -> Result<(), PagesmithError> {
        surface.insert_at_cursor(token)
    }

    /// Give back the underlying store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn is_visible(&self, token: &str) -> bool {
        self.customs.iter().any(|t| t == token)
            || (is_builtin(token) && !self.suppressed.iter().any(|t| t == token))
    }

    /// Write `list` under `key`. Callers swap in the new list only on success.
    fn persist(&mut self, key: &str, list: &[String]) -> Result<(), PagesmithError> {
        let json = serde_json::to_string(list)
            .map_err(|e| PagesmithError::StoreFailed(e.to_string()))?;
        self.store.set(key, json)
    }
}

fn is_builtin(token: &str) -> bool {
    BUILTIN_PLACEHOLDERS.contains(&token)
}

fn load_list<S: KeyValueStore>(store: &S, key: &str) -> Result<Vec<String>, PagesmithError> {
    let Some(raw) = store.get(key)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(list) => Ok(list),
        Err(e) => {
            warn!("Ignoring unreadable placeholder record '{}': {}", key, e);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;

    fn registry() -> PlaceholderRegistry<MemoryStore> {
        PlaceholderRegistry::new(MemoryStore::new()).unwrap()
    }

    #[test]
    fn normalize_wraps_and_unwraps() {
        assert_eq!(normalize_token("client").unwrap(), "{{client}}");
        assert_eq!(normalize_token("  {{ client }} ").unwrap(), "{{client}}");
        assert!(normalize_token("   ").is_err());
        assert!(normalize_token("{{}}").is_err());
    }

    #[test]
    fn fresh_registry_lists_builtins_in_order() {
        assert_eq!(registry().tokens(), BUILTIN_PLACEHOLDERS.to_vec());
    }

    #[test]
    fn added_label_appears_once_first_among_customs() {
        let mut r = registry();
        r.add("invoice").unwrap();
        let token = r.add("client").unwrap();
        let tokens = r.tokens();
        assert_eq!(tokens[0], token);
        assert_eq!(tokens[1], "{{invoice}}");
        assert_eq!(tokens.iter().filter(|t| **t == token).count(), 1);
        assert_eq!(r.list()[0].origin, PlaceholderOrigin::Custom);
        assert_eq!(r.list()[0].label(), "client");
    }

    #[test]
    fn duplicate_is_rejected_without_state_change() {
        let mut r = registry();
        r.add("client").unwrap();
        let before = r.tokens();
        let err = r.add("{{client}}").unwrap_err();
        assert!(matches!(err, PagesmithError::DuplicatePlaceholder { .. }));
        let err = r.add("name").unwrap_err();
        assert!(matches!(err, PagesmithError::DuplicatePlaceholder { .. }));
        assert_eq!(r.tokens(), before);
    }

    #[test]
    fn removed_builtin_stays_hidden_after_reload() {
        let mut r = registry();
        assert!(r.remove("{{date}}").unwrap());
        assert!(!r.tokens().contains(&"{{date}}".to_string()));

        let reloaded = PlaceholderRegistry::new(r.into_store()).unwrap();
        assert!(!reloaded.tokens().contains(&"{{date}}".to_string()));
    }

    #[test]
    fn removed_custom_is_gone_and_unknown_is_noop() {
        let mut r = registry();
        r.add("client").unwrap();
        assert!(r.remove("{{client}}").unwrap());
        assert!(!r.tokens().contains(&"{{client}}".to_string()));
        assert!(!r.remove("{{nobody}}").unwrap());
    }

    #[test]
    fn hidden_builtin_can_be_re_added_as_custom() {
        let mut r = registry();
        r.remove("name").unwrap();
        r.add("name").unwrap();
        let list = r.list();
        assert_eq!(list[0].token, "{{name}}");
        assert_eq!(list.iter().filter(|p| p.token == "{{name}}").count(), 1);

        // Removing the custom copy leaves the built-in hidden.
        r.remove("name").unwrap();
        assert!(!r.tokens().contains(&"{{name}}".to_string()));
    }

    #[test]
    fn restore_brings_builtins_back() {
        let mut r = registry();
        r.remove("email").unwrap();
        r.remove("phone").unwrap();
        assert!(r.restore("{{email}}").unwrap());
        assert!(!r.restore("{{email}}").unwrap());
        assert!(r.tokens().contains(&"{{email}}".to_string()));
        r.restore_all().unwrap();
        assert_eq!(r.tokens(), BUILTIN_PLACEHOLDERS.to_vec());
    }

    #[test]
    fn insert_writes_at_cursor_without_validation() {
        let r = registry();
        let mut surface = MemorySurface::new("<p>Hi </p>");
        surface.set_cursor(6);
        r.insert("{{anything goes}}", &mut surface).unwrap();
        assert_eq!(surface.markup(), "<p>Hi {{anything goes}}</p>");
    }

    #[test]
    fn json_file_store_round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("placeholders.json");

        let mut r = PlaceholderRegistry::new(JsonFileStore::new(&path)).unwrap();
        r.add("client").unwrap();
        r.remove("company").unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[CUSTOM_KEY], r#"["{{client}}"]"#);
        assert_eq!(raw[SUPPRESSED_KEY], r#"["{{company}}"]"#);

        let reopened = PlaceholderRegistry::new(JsonFileStore::new(&path)).unwrap();
        assert_eq!(reopened.tokens()[0], "{{client}}");
        assert!(!reopened.tokens().contains(&"{{company}}".to_string()));
    }

    #[test]
    fn corrupt_record_is_treated_as_empty() {
        let mut store = MemoryStore::new();
        store.set(CUSTOM_KEY, "not json".into()).unwrap();
        let r = PlaceholderRegistry::new(store).unwrap();
        assert_eq!(r.tokens(), BUILTIN_PLACEHOLDERS.to_vec());
    }

    /// Serves a fixed set of records and refuses every write.
    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, PagesmithError> {
            self.0.get(key)
        }

        fn set(&mut self, key: &str, _value: String) -> Result<(), PagesmithError> {
            Err(PagesmithError::StoreFailed(format!("{key}: read-only")))
        }
    }

    #[test]
    fn failed_write_leaves_the_list_unchanged() {
        let mut r = PlaceholderRegistry::new(ReadOnlyStore(MemoryStore::new())).unwrap();
        let before = r.tokens();

        assert!(matches!(r.add("client"), Err(PagesmithError::StoreFailed(_))));
        assert!(matches!(r.remove("{{date}}"), Err(PagesmithError::StoreFailed(_))));
        assert_eq!(r.tokens(), before);
        assert!(!r.tokens().contains(&"{{client}}".to_string()));
        assert!(r.tokens().contains(&"{{date}}".to_string()));
    }

    #[test]
    fn failed_write_keeps_hidden_builtins_hidden() {
        let mut seeded = MemoryStore::new();
        seeded.set(SUPPRESSED_KEY, r#"["{{date}}"]"#.into()).unwrap();
        let mut r = PlaceholderRegistry::new(ReadOnlyStore(seeded)).unwrap();

        assert!(r.restore("{{date}}").is_err());
        assert!(r.restore_all().is_err());
        assert!(!r.tokens().contains(&"{{date}}".to_string()));
    }
}
