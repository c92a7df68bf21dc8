use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::template::Template;

/// Named templates shared by every render of an engine.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl Registry {
    pub(crate) fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.read().get(name).cloned()
    }

    /// Stores `template`, replacing any previous entry under `name`.
    pub(crate) fn insert(&self, name: &str, template: Arc<Template>) {
        self.templates.write().insert(name.to_owned(), template);
    }

    /// Makes the entry under `name` report `alias` as its template name.
    pub(crate) fn rename(&self, name: &str, alias: &str) -> bool {
        let mut templates = self.templates.write();
        let Some(entry) = templates.get_mut(name) else {
            return false;
        };
        *entry = Arc::new(entry.with_name(alias));
        true
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.write().remove(name)
    }

    pub(crate) fn clear(&self) {
        self.templates.write().clear();
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::compile;

    fn template(name: &str) -> Arc<Template> {
        Arc::new(Template::from(compile("x", Some(name), false).unwrap()))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_insert_replaces() {
        let registry = Registry::default();
        registry.insert("a", template("first"));
        registry.insert("a", template("second"));
        assert_eq!(registry.get("a").unwrap().name(), Some("second"));
        assert_eq!(registry.names(), vec!["a".to_owned()]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_rename_keeps_key() {
        let registry = Registry::default();
        registry.insert("foobar", template("foobar"));
        assert!(registry.rename("foobar", "override"));
        assert_eq!(registry.get("foobar").unwrap().name(), Some("override"));
        assert!(registry.get("override").is_none());
        assert!(!registry.rename("missing", "x"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_remove_and_clear() {
        let registry = Registry::default();
        registry.insert("a", template("a"));
        registry.insert("b", template("b"));
        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        registry.clear();
        assert!(registry.names().is_empty());
    }
}
