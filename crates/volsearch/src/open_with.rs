//! Applications able to open a selection, each with a shortcut key.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Key listing applications that open any file.
pub const ANY_EXTENSION: &str = "*";

/// Extension to applications, as declared in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenWithTable {
    apps: BTreeMap<String, Vec<PathBuf>>,
}

impl OpenWithTable {
    pub fn new(apps: BTreeMap<String, Vec<PathBuf>>) -> Self {
        let apps = apps
            .into_iter()
            .map(|(extension, apps)| (extension.trim_start_matches('.').to_lowercase(), apps))
            .collect();
        Self { apps }
    }

    /// Applications for `path` in declaration order, extension-specific first.
    pub fn apps_for(&self, path: &Path) -> Vec<PathBuf> {
        let extension = path
            .extension()
            .map(|extension| extension.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mut apps: Vec<PathBuf> = Vec::new();
        let specific = self.apps.get(&extension).into_iter().flatten();
        let generic = self.apps.get(ANY_EXTENSION).into_iter().flatten();
        for app in specific.chain(generic) {
            if !apps.contains(app) {
                apps.push(app.clone());
            }
        }
        apps
    }

    /// Applications able to open every path in `paths`, each mapped to a
    /// distinct shortcut character. Applications that run out of shortcut
    /// characters are left out.
    pub fn compute_open_with_apps(&self, paths: &[PathBuf]) -> BTreeMap<PathBuf, char> {
        let Some((first, rest)) = paths.split_first() else {
            return BTreeMap::new();
        };
        let mut common = self.apps_for(first);
        for path in rest {
            let apps: BTreeSet<PathBuf> = self.apps_for(path).into_iter().collect();
            common.retain(|app| apps.contains(app));
        }

        let mut used = BTreeSet::new();
        let mut shortcuts = BTreeMap::new();
        for app in common {
            if let Some(key) = pick_shortcut(&app, &used) {
                used.insert(key);
                shortcuts.insert(app, key);
            }
        }
        shortcuts
    }
}

/// First unused alphanumeric of the app's name, else the first unused letter
/// or digit.
fn pick_shortcut(app: &Path, used: &BTreeSet<char>) -> Option<char> {
    let name = app
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .chain(('a'..='z').chain('0'..='9'))
        .find(|key| !used.contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> OpenWithTable {
        let mut apps = BTreeMap::new();
        apps.insert(
            ".PDF".to_string(),
            vec![PathBuf::from("/Applications/Preview.app"), PathBuf::from("/Applications/Acrobat.app")],
        );
        apps.insert(
            "txt".to_string(),
            vec![PathBuf::from("/Applications/TextEdit.app"), PathBuf::from("/Applications/Pages.app")],
        );
        apps.insert(
            ANY_EXTENSION.to_string(),
            vec![PathBuf::from("/Applications/Pages.app"), PathBuf::from("/Applications/Pixelmator.app")],
        );
        OpenWithTable::new(apps)
    }

    #[test]
    fn apps_for_merges_specific_and_generic() {
        assert_eq!(
            table().apps_for(Path::new("/a/b.txt")),
            vec![
                PathBuf::from("/Applications/TextEdit.app"),
                PathBuf::from("/Applications/Pages.app"),
                PathBuf::from("/Applications/Pixelmator.app"),
            ]
        );
        assert_eq!(table().apps_for(Path::new("/a/README")).len(), 2);
    }

    #[test]
    fn only_apps_opening_every_path_get_unique_shortcuts() {
        let shortcuts = table().compute_open_with_apps(&[
            PathBuf::from("/a/report.pdf"),
            PathBuf::from("/a/notes.txt"),
        ]);
        assert_eq!(shortcuts.len(), 2);
        assert_eq!(shortcuts[Path::new("/Applications/Pages.app")], 'p');
        assert_eq!(shortcuts[Path::new("/Applications/Pixelmator.app")], 'i');

        let single = table().compute_open_with_apps(&[PathBuf::from("/a/report.pdf")]);
        assert_eq!(single[Path::new("/Applications/Preview.app")], 'p');
        assert_eq!(single[Path::new("/Applications/Acrobat.app")], 'a');
        assert_eq!(single[Path::new("/Applications/Pages.app")], 'g');
        let keys: BTreeSet<char> = single.values().copied().collect();
        assert_eq!(keys.len(), single.len());
    }

    #[test]
    fn empty_selection_has_no_apps() {
        assert!(table().compute_open_with_apps(&[]).is_empty());
    }
}
