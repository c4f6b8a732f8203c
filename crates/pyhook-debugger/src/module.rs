use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

/// Module loaded by the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Module identifier, in load order.
    pub id: i32,
    /// Absolute source filename.
    pub filename: String,
    /// Source filename as known to the runtime.
    pub code_filename: String,
}

impl Module {
    /// Returns whether this module was loaded from the given file.
    ///
    /// The comparison is case-insensitive and treats `.pyc` and `.py` files as
    /// the same file.
    pub fn matches(&self, filename: &str) -> bool {
        same_file(&self.filename, &absolute_path(filename))
    }
}

/// Registry of the modules loaded by the debuggee.
///
/// Modules outlive debugging sessions: they are reported again to the next
/// controller attaching.
#[derive(Default)]
pub struct ModuleRegistry {
    next_id: AtomicI32,
    modules: Mutex<Vec<Module>>,
}

impl ModuleRegistry {
    /// Registers a module whose top-level code comes from the given file.
    pub fn register(&self, code_filename: &str) -> Module {
        let module = Module {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            filename: absolute_path(code_filename),
            code_filename: code_filename.to_owned(),
        };

        self.lock().push(module.clone());

        module
    }

    /// Returns whether no module was loaded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns all the loaded modules.
    pub fn all(&self) -> Vec<Module> {
        self.lock().clone()
    }

    /// Returns the first loaded module matching the given file.
    pub fn find(&self, filename: &str) -> Option<Module> {
        self.lock().iter().find(|m| m.matches(filename)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Module>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the absolute, lexically normalized form of a path.
pub fn absolute_path(filename: &str) -> String {
    if filename.starts_with('<') {
        return filename.to_owned();
    }

    let path = Path::new(filename);

    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    normalized.to_string_lossy().into_owned()
}

/// Compares two filenames, case-insensitively and accounting for `.pyc`
/// files.
pub fn same_file(file1: &str, file2: &str) -> bool {
    let strip = |f: &str| f.strip_suffix('c').filter(|f| f.ends_with(".py")).map(str::to_owned);

    let file1 = strip(file1).unwrap_or_else(|| file1.to_owned());
    let file2 = strip(file2).unwrap_or_else(|| file2.to_owned());

    file1.to_lowercase() == file2.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{ModuleRegistry, absolute_path, same_file};

    #[test]
    fn ids_follow_load_order() {
        let registry = ModuleRegistry::default();
        assert!(registry.is_empty());

        let main = registry.register("/src/main.py");
        let util = registry.register("/src/util.py");

        assert_eq!(main.id, 0);
        assert_eq!(util.id, 1);
        assert_eq!(registry.find("/SRC/Util.py"), Some(util));
        assert_eq!(registry.find("/src/other.py"), None);
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(absolute_path("/src/./pkg/../main.py"), "/src/main.py");
        assert_eq!(absolute_path("<string>"), "<string>");
        assert!(absolute_path("main.py").ends_with("/main.py"));
    }

    #[test]
    fn compiled_files_match_sources() {
        assert!(same_file("/src/main.pyc", "/src/main.py"));
        assert!(same_file("/src/main.py", "/src/MAIN.pyc"));
        assert!(same_file("/src/main.pyc", "/src/main.pyc"));
        assert!(!same_file("/src/main.py", "/src/main.pyw"));
    }
}
