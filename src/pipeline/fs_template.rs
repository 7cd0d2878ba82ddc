//! Template updater working directly on a directory of template files
//!
//! Recognised references:
//! - manifest entries: `"react": "^18.2.0"`
//! - go.mod requirements, in `go.mod` only: `require github.com/gin-gonic/gin v1.9.1`
//!   or the same inside a `require (` block
//! - pinned specifiers: `react@18.2.0`, `github.com/spf13/cobra@v1.8.0`
//!
//! A trailing `.tmpl` or `.tpl` is ignored when a file is classified by name.
//! Lock and checksum files (`go.sum`, `package-lock.json`, ...) are never touched.
//!
//! Operators and a leading `v` are kept as written; only the version itself is replaced.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::fs::write_atomic;
use crate::pipeline::template::{TemplateError, TemplateUpdater, VersionMap};

/// Directory under the template root that holds backups
pub const DEFAULT_BACKUP_DIR: &str = ".template-backups";

const VERSION: &str = r"v?[0-9][0-9A-Za-z.+\-]*";

const LOCK_FILES: [&str; 5] = [
    "go.sum",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "npm-shrinkwrap.json",
];

/// File name with a template suffix removed
fn template_name(path: &Path) -> &str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.strip_suffix(".tmpl")
        .or_else(|| name.strip_suffix(".tpl"))
        .unwrap_or(name)
}

fn is_lock_file(path: &Path) -> bool {
    LOCK_FILES.contains(&template_name(path))
}

fn is_go_mod(path: &Path) -> bool {
    template_name(path) == "go.mod"
}

/// Reference patterns for one package
struct References {
    manifest: Regex,
    go_mod: Regex,
    pinned: Regex,
}

impl References {
    fn new(name: &str) -> Result<Self, regex::Error> {
        let name = regex::escape(name);
        Ok(Self {
            manifest: Regex::new(&format!(r#"("{name}"\s*:\s*"[~^=<>]*\s*)({VERSION})(")"#))?,
            go_mod: Regex::new(&format!(r"(?m)^(\s*(?:require\s+)?{name}\s+)(v[0-9][0-9A-Za-z.+\-]*)()"))?,
            pinned: Regex::new(&format!(r"(?m)((?:^|[^\w@/.\-]){name}@)({VERSION})()"))?,
        })
    }

    fn patterns(&self, go_mod: bool) -> Vec<&Regex> {
        if go_mod {
            vec![&self.manifest, &self.go_mod, &self.pinned]
        } else {
            vec![&self.manifest, &self.pinned]
        }
    }

    fn is_referenced_in(&self, content: &str, go_mod: bool) -> bool {
        self.patterns(go_mod).iter().any(|re| re.is_match(content))
    }

    fn rewrite(&self, content: &str, version: &str, go_mod: bool) -> String {
        let mut output = content.to_string();
        for re in self.patterns(go_mod) {
            output = re
                .replace_all(&output, |caps: &Captures| {
                    format!("{}{}{}", &caps[1], keep_prefix_style(&caps[2], version), &caps[3])
                })
                .into_owned();
        }
        output
    }
}

/// `new` spelled with or without a leading `v`, matching `old`
fn keep_prefix_style(old: &str, new: &str) -> String {
    let bare = new.strip_prefix('v').unwrap_or(new);
    if old.starts_with('v') {
        format!("v{}", bare)
    } else {
        bare.to_string()
    }
}

fn compile(updates: &VersionMap) -> Result<Vec<(References, &str)>, TemplateError> {
    updates
        .iter()
        .map(|(name, version)| -> Result<_, TemplateError> {
            Ok((References::new(name)?, version.as_str()))
        })
        .collect()
}

/// Reads a template; `None` for files that are not UTF-8 text
fn read_text(path: &Path) -> Result<Option<String>, TemplateError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(None),
        Err(e) => Err(TemplateError::io(path, e)),
    }
}

#[derive(Debug, Clone)]
pub struct FsTemplateUpdater {
    root: PathBuf,
    backup_dir: PathBuf,
}

impl FsTemplateUpdater {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            backup_dir: root.join(DEFAULT_BACKUP_DIR),
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: &Path) -> Self {
        self.backup_dir = backup_dir.to_path_buf();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn backup_path(&self, path: &Path) -> Result<PathBuf, TemplateError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| TemplateError::OutsideRoot(path.to_path_buf()))?;
        Ok(self.backup_dir.join(relative))
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || name == "node_modules" || entry.path() == self.backup_dir
    }

    /// Every template file under the root, skipping hidden directories,
    /// node_modules, backups and lock files
    fn template_files(&self) -> Result<Vec<PathBuf>, TemplateError> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_skipped_dir(entry));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                TemplateError::io(path, e.into())
            })?;
            if entry.file_type().is_file() && !is_lock_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    fn affected(&self, updates: &VersionMap) -> Result<Vec<PathBuf>, TemplateError> {
        let references = compile(updates)?;
        let mut affected = Vec::new();

        for path in self.template_files()? {
            let Some(content) = read_text(&path)? else {
                continue;
            };
            let go_mod = is_go_mod(&path);
            if references.iter().any(|(r, _)| r.is_referenced_in(&content, go_mod)) {
                affected.push(path);
            }
        }

        debug!("{} templates reference {:?}", affected.len(), updates.keys());
        Ok(affected)
    }

    fn backup(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        for path in paths {
            let target = self.backup_path(path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| TemplateError::io(parent, e))?;
            }
            fs::copy(path, &target).map_err(|e| TemplateError::io(path, e))?;
        }
        info!("Backed up {} templates to {:?}", paths.len(), self.backup_dir);
        Ok(())
    }

    fn restore(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        for path in paths {
            let source = self.backup_path(path)?;
            let contents = match fs::read(&source) {
                Ok(contents) => contents,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(TemplateError::MissingBackup(path.clone()));
                }
                Err(e) => return Err(TemplateError::io(&source, e)),
            };
            write_atomic(path, &contents).map_err(|e| TemplateError::io(path, e))?;
        }
        info!("Restored {} templates", paths.len());
        Ok(())
    }

    fn update_all(&self, updates: &VersionMap) -> Result<(), TemplateError> {
        let references = compile(updates)?;
        let mut rewritten = 0;

        for path in self.template_files()? {
            let Some(content) = read_text(&path)? else {
                continue;
            };
            let go_mod = is_go_mod(&path);
            let updated = references
                .iter()
                .fold(content.clone(), |acc, (r, version)| r.rewrite(&acc, version, go_mod));

            if updated != content {
                write_atomic(&path, updated.as_bytes()).map_err(|e| TemplateError::io(&path, e))?;
                debug!("Rewrote {:?}", path);
                rewritten += 1;
            }
        }

        info!("Rewrote {} templates", rewritten);
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), TemplateError> {
        let content = fs::read_to_string(path).map_err(|e| TemplateError::io(path, e))?;
        let invalid = |reason: String| TemplateError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        if content.trim().is_empty() {
            return Err(invalid("empty file".to_string()));
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name.ends_with(".json") {
            serde_json::from_str::<serde_json::Value>(&content).map_err(|e| invalid(e.to_string()))?;
        } else if file_name == "go.mod"
            && !content.lines().any(|l| l.trim_start().starts_with("module "))
        {
            return Err(invalid("missing module directive".to_string()));
        }

        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, TemplateError>
    where
        T: Send + 'static,
        F: FnOnce(&FsTemplateUpdater) -> Result<T, TemplateError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(|e| TemplateError::Update(e.to_string()))?
    }
}

#[async_trait::async_trait]
impl TemplateUpdater for FsTemplateUpdater {
    async fn get_affected_templates(&self, updates: &VersionMap) -> Result<Vec<PathBuf>, TemplateError> {
        let updates = updates.clone();
        self.blocking(move |this| this.affected(&updates)).await
    }

    async fn backup_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        let paths = paths.to_vec();
        self.blocking(move |this| this.backup(&paths)).await
    }

    async fn restore_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        let paths = paths.to_vec();
        self.blocking(move |this| this.restore(&paths)).await
    }

    async fn update_all_templates(&self, updates: &VersionMap) -> Result<(), TemplateError> {
        let updates = updates.clone();
        self.blocking(move |this| this.update_all(&updates)).await
    }

    async fn validate_template(&self, path: &Path) -> Result<(), TemplateError> {
        let path = path.to_path_buf();
        self.blocking(move |this| this.validate(&path)).await
    }
}
