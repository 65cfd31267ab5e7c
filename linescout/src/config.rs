//! Process-wide configuration.
//!
//! A [`Config`] is assembled once at startup and shared by reference with
//! the producer and every worker; nothing in it changes after
//! [`Config::finalize`]. The only mutable process state lives elsewhere:
//! the output sink, its error flag, and the work queue.

use std::num::NonZeroUsize;

use crate::binary::BinaryMode;
use crate::colors::ColorSpecs;
use crate::matcher::{MatcherKind, PatternSet};
use crate::walk::PathFilters;

/// What to do when an input is a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryAction {
    /// Read it like any other file (the open or read will ordinarily fail
    /// with a diagnostic).
    #[default]
    Read,
    Recurse,
    Skip,
}

/// What to do when an input is a device, FIFO or socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceAction {
    /// Read devices named on the command line, skip those found while
    /// recursing.
    #[default]
    ReadCommandLine,
    Read,
    Skip,
}

/// File-name listing modes (`-l` / `-L`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    #[default]
    None,
    Matching,
    NonMatching,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pattern_set: PatternSet,

    /// Select non-matching lines (`-v`).
    pub invert: bool,
    /// Print line numbers (`-n`).
    pub out_line: bool,
    /// Print byte offsets (`-b`).
    pub out_byte: bool,
    /// Print the file name ahead of each line.
    pub out_file: bool,
    /// Terminate file names with NUL instead of a separator (`-Z`).
    pub null_filename: bool,
    /// Pad head fields and emit `\t\b` so tab stops line up (`-T`).
    pub align_tabs: bool,
    /// Show only matched substrings, one per line (`-o`).
    pub only_matching: bool,
    /// Display label for standard input.
    pub label: Option<String>,

    /// Maximum selected lines per file (`-m`).
    pub max_count: u64,
    /// Leading context lines (`-B`).
    pub before_context: usize,
    /// Trailing context lines (`-A`).
    pub after_context: usize,
    /// True when any of `-A`/`-B`/`-C`/`-NUM` appeared; gates the group
    /// separator.
    pub context_used: bool,

    /// Count matching lines per file instead of printing them (`-c`).
    pub count_matches: bool,
    pub list_mode: ListMode,
    /// Quiet: exit on the first match (`-q`).
    pub exit_on_match: bool,
    /// Stop scanning a file once a line has been selected. Derived.
    pub done_on_match: bool,
    /// Suppress normal output. Derived.
    pub out_quiet: bool,

    pub binary_mode: BinaryMode,
    pub directories: DirectoryAction,
    pub devices: DeviceAction,
    /// Follow symlinks while recursing (`-R` rather than `-r`).
    pub follow_links: bool,
    /// Suppress per-file diagnostics (`-s`).
    pub suppress_errors: bool,

    /// Line terminator byte; NUL under `-z`.
    pub eol: u8,
    /// Flush the output channel after every line.
    pub line_buffered: bool,
    /// Separator printed between non-adjacent context groups; `None`
    /// under `--no-group-separator`.
    pub group_separator: Option<String>,

    pub color: bool,
    pub colors: ColorSpecs,

    pub thread_count: NonZeroUsize,

    /// Whether the matcher selects an empty line; with inversion this
    /// decides if all-NUL input regions can be dropped unseen.
    pub skip_empty_lines: bool,

    /// `--include` / `--exclude` / `--exclude-dir` path filters.
    pub filters: PathFilters,

    /// Device and inode of stdout when it is a regular file, used to skip
    /// an input that is also the output.
    pub stdout_id: Option<(u64, u64)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pattern_set: PatternSet::new(MatcherKind::Basic, vec![String::new()]),
            invert: false,
            out_line: false,
            out_byte: false,
            out_file: false,
            null_filename: false,
            align_tabs: false,
            only_matching: false,
            label: None,
            max_count: u64::MAX,
            before_context: 0,
            after_context: 0,
            context_used: false,
            count_matches: false,
            list_mode: ListMode::None,
            exit_on_match: false,
            done_on_match: false,
            out_quiet: false,
            binary_mode: BinaryMode::Binary,
            directories: DirectoryAction::Read,
            devices: DeviceAction::ReadCommandLine,
            follow_links: false,
            suppress_errors: false,
            eol: b'\n',
            line_buffered: false,
            group_separator: Some(crate::printer::SEP_STR_GROUP.to_string()),
            color: false,
            colors: ColorSpecs::default(),
            thread_count: NonZeroUsize::MIN,
            skip_empty_lines: false,
            filters: PathFilters::default(),
            stdout_id: None,
        }
    }
}

impl Config {
    /// Applies the output-mode precedence rules after all options are in:
    /// `-q` overrides `-l`/`-L`, which in turn override `-c`. Quiet and
    /// listing modes stop at the first selected line per file.
    pub fn finalize(&mut self) {
        if self.exit_on_match {
            self.list_mode = ListMode::None;
        }
        if self.exit_on_match || self.list_mode != ListMode::None {
            self.count_matches = false;
            self.done_on_match = true;
        }
        self.out_quiet = self.count_matches || self.done_on_match;
    }

    /// The display name for standard input.
    pub fn stdin_label(&self) -> &str {
        self.label.as_deref().unwrap_or("(standard input)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_overrides_list_and_count() {
        let mut cfg = Config {
            exit_on_match: true,
            list_mode: ListMode::Matching,
            count_matches: true,
            ..Config::default()
        };
        cfg.finalize();
        assert_eq!(cfg.list_mode, ListMode::None);
        assert!(!cfg.count_matches);
        assert!(cfg.done_on_match);
        assert!(cfg.out_quiet);
    }

    #[test]
    fn test_list_overrides_count() {
        let mut cfg = Config {
            list_mode: ListMode::NonMatching,
            count_matches: true,
            ..Config::default()
        };
        cfg.finalize();
        assert_eq!(cfg.list_mode, ListMode::NonMatching);
        assert!(!cfg.count_matches);
        assert!(cfg.done_on_match);
        assert!(cfg.out_quiet);
    }

    #[test]
    fn test_count_alone_is_quiet_but_scans_fully() {
        let mut cfg = Config {
            count_matches: true,
            ..Config::default()
        };
        cfg.finalize();
        assert!(cfg.count_matches);
        assert!(!cfg.done_on_match);
        assert!(cfg.out_quiet);
    }

    #[test]
    fn test_plain_output_mode() {
        let mut cfg = Config::default();
        cfg.finalize();
        assert!(!cfg.out_quiet);
        assert!(!cfg.done_on_match);
    }

    #[test]
    fn test_stdin_label() {
        let cfg = Config::default();
        assert_eq!(cfg.stdin_label(), "(standard input)");
        let cfg = Config {
            label: Some("pipe".to_string()),
            ..Config::default()
        };
        assert_eq!(cfg.stdin_label(), "pipe");
    }
}
