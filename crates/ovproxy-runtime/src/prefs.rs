//! JSON file preference store: `<state-dir>/prefs.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ovproxy_daemon::error::PrefsError;
use ovproxy_daemon::prefs::{PrefKey, PrefsStore};

pub const PREFS_FILE: &str = "prefs.json";

#[derive(Debug)]
pub struct JsonFilePrefs {
    path: PathBuf,
    values: BTreeMap<String, i64>,
}

impl JsonFilePrefs {
    /// Load `<state_dir>/prefs.json`. A missing file is an empty store.
    pub fn load(state_dir: &Path) -> Result<Self, PrefsError> {
        let path = state_dir.join(PREFS_FILE);
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// Empty store that will write to `<state_dir>/prefs.json`.
    pub fn empty(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(PREFS_FILE),
            values: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write via temp file + rename so readers never see a partial file.
    fn persist(&self, values: &BTreeMap<String, i64>) -> Result<(), PrefsError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PrefsStore for JsonFilePrefs {
    fn get_int(&self, key: PrefKey) -> Option<i64> {
        self.values.get(key.as_str()).copied()
    }

    fn put_int(&mut self, key: PrefKey, value: i64) -> Result<(), PrefsError> {
        let mut next = self.values.clone();
        next.insert(key.as_str().to_string(), value);
        self.persist(&next)?;
        self.values = next;
        Ok(())
    }

    fn remove(&mut self, key: PrefKey) -> Result<(), PrefsError> {
        if !self.values.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut next = self.values.clone();
        next.remove(key.as_str());
        self.persist(&next)?;
        self.values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefs = JsonFilePrefs::load(dir.path()).expect("load");
        assert_eq!(prefs.get_int(PrefKey::QuickStepInteractionFlags), None);
        assert!(!prefs.path().exists());
    }

    #[test]
    fn value_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut prefs = JsonFilePrefs::load(dir.path()).expect("load");
        prefs
            .put_int(PrefKey::QuickStepInteractionFlags, 5)
            .expect("put");

        let reloaded = JsonFilePrefs::load(dir.path()).expect("reload");
        assert_eq!(reloaded.get_int(PrefKey::QuickStepInteractionFlags), Some(5));

        let text = std::fs::read_to_string(dir.path().join(PREFS_FILE)).expect("read");
        let json: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(json["quick_step_interaction_flags"], 5);
        assert!(!dir.path().join("prefs.json.tmp").exists());
    }

    #[test]
    fn remove_clears_persisted_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut prefs = JsonFilePrefs::load(dir.path()).expect("load");
        prefs
            .put_int(PrefKey::QuickStepInteractionFlags, 1)
            .expect("put");
        prefs.remove(PrefKey::QuickStepInteractionFlags).expect("remove");

        let reloaded = JsonFilePrefs::load(dir.path()).expect("reload");
        assert_eq!(reloaded.get_int(PrefKey::QuickStepInteractionFlags), None);
    }

    #[test]
    fn state_dir_is_created_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("state").join("ovproxy");
        let mut prefs = JsonFilePrefs::empty(&nested);
        prefs
            .put_int(PrefKey::QuickStepInteractionFlags, 2)
            .expect("put");
        assert!(nested.join(PREFS_FILE).exists());
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(PREFS_FILE), "{not json").expect("write");
        let err = JsonFilePrefs::load(dir.path()).expect_err("corrupt");
        assert!(matches!(err, PrefsError::Json(_)));
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        // the state "dir" is a file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").expect("write");
        let mut prefs = JsonFilePrefs::empty(&blocker);
        assert!(prefs.put_int(PrefKey::QuickStepInteractionFlags, 3).is_err());
        assert_eq!(prefs.get_int(PrefKey::QuickStepInteractionFlags), None);
    }
}
