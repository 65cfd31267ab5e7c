//! Traversal producer: turns command-line arguments into queued work.
//!
//! Runs on the main thread while workers drain the queue. Directory
//! recursion, the include/exclude filters, and the device/directory
//! policies all live on this side of the queue; by the time an item is
//! enqueued it is an open handle plus a display name.

use std::fs::{File, Metadata};
use std::path::Path;

use glob::Pattern;
use ignore::WalkBuilder;
use tracing::debug;

use crate::config::{Config, DeviceAction, DirectoryAction, ListMode};
use crate::errors::{GrepError, Result};
use crate::printer::OutputSink;
use crate::queue::{FileSource, WorkItem, WorkQueue};

/// `--include` / `--exclude` / `--exclude-dir` pattern sets.
///
/// A file is skipped when it matches an exclude pattern, or when include
/// patterns exist and none of them match. Patterns are tried against both
/// the base name and the path as it will be displayed.
#[derive(Debug, Clone, Default)]
pub struct PathFilters {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    exclude_dir: Vec<Pattern>,
}

impl PathFilters {
    pub fn add_include(&mut self, pat: &str) -> Result<()> {
        self.include.push(parse_glob(pat)?);
        Ok(())
    }

    pub fn add_exclude(&mut self, pat: &str) -> Result<()> {
        self.exclude.push(parse_glob(pat)?);
        Ok(())
    }

    pub fn add_exclude_dir(&mut self, pat: &str) -> Result<()> {
        // Trailing slashes never match a directory name.
        self.exclude_dir.push(parse_glob(pat.trim_end_matches('/'))?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.exclude_dir.is_empty()
    }

    pub fn skip_file(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let full = path.to_string_lossy();
        if !self.include.is_empty()
            && !self
                .include
                .iter()
                .any(|p| p.matches(&name) || p.matches(&full))
        {
            return true;
        }
        self.exclude
            .iter()
            .any(|p| p.matches(&name) || p.matches(&full))
    }

    pub fn skip_dir(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let full = path.to_string_lossy();
        self.exclude_dir
            .iter()
            .any(|p| p.matches(&name) || p.matches(&full))
    }
}

fn parse_glob(pat: &str) -> Result<Pattern> {
    Pattern::new(pat).map_err(|e| GrepError::config(format!("invalid pattern {}: {}", pat, e)))
}

pub struct Producer<'a> {
    cfg: &'a Config,
    queue: &'a WorkQueue,
    sink: &'a OutputSink,
}

impl<'a> Producer<'a> {
    pub fn new(cfg: &'a Config, queue: &'a WorkQueue, sink: &'a OutputSink) -> Self {
        Producer { cfg, queue, sink }
    }

    /// Resolves one command-line argument; `-` is standard input.
    pub fn search_arg(&self, arg: &str) {
        if arg == "-" {
            self.queue.enqueue(WorkItem {
                source: FileSource::Stdin,
                name: self.cfg.stdin_label().to_string(),
                metadata: None,
            });
            return;
        }
        self.search_path(Path::new(arg));
    }

    fn search_path(&self, path: &Path) {
        let cfg = self.cfg;
        let name = path.display().to_string();
        // Command-line names always follow symlinks.
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                self.sink.report(cfg, &name, &e);
                return;
            }
        };

        if meta.is_dir() {
            match cfg.directories {
                DirectoryAction::Recurse => self.walk(path),
                DirectoryAction::Skip => {}
                // Reading a directory as a file ordinarily fails at read
                // time; let that surface as a normal per-file diagnostic.
                DirectoryAction::Read => self.open_and_enqueue(path, true, Some(meta)),
            }
            return;
        }

        if cfg.filters.skip_file(path) {
            return;
        }
        self.open_and_enqueue(path, true, Some(meta));
    }

    fn walk(&self, root: &Path) {
        let cfg = self.cfg;
        let mut builder = WalkBuilder::new(root);
        // A plain traversal: no gitignore semantics, no hidden-file
        // skipping. Only our own filters apply.
        builder
            .standard_filters(false)
            .follow_links(cfg.follow_links);
        let filters = cfg.filters.clone();
        builder.filter_entry(move |entry| {
            match entry.file_type() {
                Some(ft) if ft.is_dir() => !filters.skip_dir(entry.path()),
                _ => true,
            }
        });

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    if is_loop_error(&err) {
                        self.sink.warn(cfg, &format!("recursive directory loop: {}", err));
                    } else {
                        self.sink.report_message(cfg, &err.to_string());
                    }
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                continue;
            }
            // Unfollowed symlinks are neither opened nor reported.
            if file_type.is_symlink() {
                continue;
            }
            if cfg.filters.skip_file(entry.path()) {
                continue;
            }
            self.open_and_enqueue(entry.path(), false, None);
        }
    }

    fn open_and_enqueue(&self, path: &Path, command_line: bool, meta: Option<Metadata>) {
        let cfg = self.cfg;
        let name = path.display().to_string();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                self.sink.report(cfg, &name, &e);
                return;
            }
        };
        let meta = meta.or_else(|| file.metadata().ok());

        if let Some(m) = &meta {
            if is_device(m) && self.skip_devices(command_line) {
                return;
            }
            // When stdout is a regular file, scanning it would feed our
            // own output back in; skip it unless output is bounded in a
            // way that makes the loop impossible.
            if !cfg.out_quiet
                && cfg.list_mode == ListMode::None
                && cfg.max_count > 1
                && file_id(m).is_some()
                && file_id(m) == cfg.stdout_id
            {
                self.sink
                    .report_message(cfg, &format!("input file {} is also the output", name));
                return;
            }
        }

        debug!(file = %name, "queueing");
        self.queue.enqueue(WorkItem {
            source: FileSource::File(file),
            name,
            metadata: meta,
        });
    }

    fn skip_devices(&self, command_line: bool) -> bool {
        match self.cfg.devices {
            DeviceAction::Skip => true,
            DeviceAction::ReadCommandLine => !command_line,
            DeviceAction::Read => false,
        }
    }
}

fn is_loop_error(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop_error(err),
        ignore::Error::Partial(errs) => errs.iter().any(is_loop_error),
        _ => false,
    }
}

#[cfg(unix)]
fn is_device(meta: &Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    ft.is_block_device() || ft.is_char_device() || ft.is_fifo() || ft.is_socket()
}

#[cfg(not(unix))]
fn is_device(_meta: &Metadata) -> bool {
    false
}

/// Device and inode pair identifying a file, for the output-loop check.
#[cfg(unix)]
pub fn file_id(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
pub fn file_id(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}
