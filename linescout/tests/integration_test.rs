use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use linescout::matcher::{MatcherKind, PatternSet};
use linescout::{BinaryMode, Config, DirectoryAction, ListMode};
use tempfile::TempDir;

// Helper writer collecting everything the pipeline emits.
#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> String {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn run_pipeline(cfg: &Config, files: &[String]) -> (i32, String) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let code = linescout::worker::run(cfg, files, Box::new(SharedBuf(out.clone())));
    let bytes = out.lock().unwrap().clone();
    (code, String::from_utf8_lossy(&bytes).into_owned())
}

fn config_for(pattern: &str) -> Config {
    let mut cfg = Config {
        pattern_set: PatternSet::new(MatcherKind::Extended, vec![pattern.to_string()]),
        ..Config::default()
    };
    cfg.finalize();
    cfg
}

#[test]
fn test_single_file_matches() {
    let dir = TempDir::new().unwrap();
    let t = create_test_file(dir.path(), "t", b"abc\nabd\nabc\n");

    let (code, out) = run_pipeline(&config_for("abc"), &[t]);
    assert_eq!(out, "abc\nabc\n");
    assert_eq!(code, 0);
}

#[test]
fn test_no_match_exit_status() {
    let dir = TempDir::new().unwrap();
    let t = create_test_file(dir.path(), "t", b"abc\n");

    let (code, out) = run_pipeline(&config_for("zzz"), &[t]);
    assert_eq!(out, "");
    assert_eq!(code, 1);
}

#[test]
fn test_inverted_with_line_numbers() {
    let dir = TempDir::new().unwrap();
    let t = create_test_file(dir.path(), "t", b"abc\nabd\nabc\n");

    let mut cfg = config_for("abc");
    cfg.invert = true;
    cfg.out_line = true;
    let (code, out) = run_pipeline(&cfg, &[t]);
    assert_eq!(out, "2:abd\n");
    assert_eq!(code, 0);
}

#[test]
fn test_two_files_with_filenames() {
    let dir = TempDir::new().unwrap();
    let f1 = create_test_file(dir.path(), "f1", b"hello\n");
    let f2 = create_test_file(dir.path(), "f2", b"world\n");

    let mut cfg = config_for("hello");
    cfg.out_file = true;
    let (code, out) = run_pipeline(&cfg, &[f1.clone(), f2]);
    assert_eq!(out, format!("{}:hello\n", f1));
    assert_eq!(code, 0);
}

#[test]
fn test_binary_file_without_match_mode() {
    let dir = TempDir::new().unwrap();
    let b = create_test_file(dir.path(), "b", b"x\0y\nxy\n");

    let mut cfg = config_for("x");
    cfg.binary_mode = BinaryMode::WithoutMatch;
    let (code, out) = run_pipeline(&cfg, &[b]);
    assert_eq!(out, "");
    assert_eq!(code, 1);
}

#[test]
fn test_binary_file_default_message() {
    let dir = TempDir::new().unwrap();
    let b = create_test_file(dir.path(), "b", b"x\0y\nxy\n");

    let (code, out) = run_pipeline(&config_for("x"), &[b.clone()]);
    assert_eq!(out, format!("Binary file {} matches\n", b));
    assert_eq!(code, 0);
}

#[test]
fn test_count_mode_per_file() {
    let dir = TempDir::new().unwrap();
    let f1 = create_test_file(dir.path(), "f1", b"hit\nmiss\nhit\n");
    let f2 = create_test_file(dir.path(), "f2", b"miss\n");

    let mut cfg = config_for("hit");
    cfg.count_matches = true;
    cfg.out_file = true;
    cfg.finalize();
    let (code, out) = run_pipeline(&cfg, &[f1.clone(), f2.clone()]);
    assert_eq!(out, format!("{}:2\n{}:0\n", f1, f2));
    assert_eq!(code, 0);
}

#[test]
fn test_list_matching_files() {
    let dir = TempDir::new().unwrap();
    let f1 = create_test_file(dir.path(), "f1", b"hit\n");
    let f2 = create_test_file(dir.path(), "f2", b"miss\n");

    let mut cfg = config_for("hit");
    cfg.list_mode = ListMode::Matching;
    cfg.finalize();
    let (code, out) = run_pipeline(&cfg, &[f1.clone(), f2.clone()]);
    assert_eq!(out, format!("{}\n", f1));
    assert_eq!(code, 0);

    let mut cfg = config_for("hit");
    cfg.list_mode = ListMode::NonMatching;
    cfg.finalize();
    let (code, out) = run_pipeline(&cfg, &[f1, f2.clone()]);
    assert_eq!(out, format!("{}\n", f2));
    assert_eq!(code, 0);
}

#[test]
fn test_missing_file_reports_trouble() {
    let dir = TempDir::new().unwrap();
    let good = create_test_file(dir.path(), "good", b"hit\n");
    let missing = dir.path().join("missing").display().to_string();

    let mut cfg = config_for("hit");
    cfg.suppress_errors = true;
    let (code, out) = run_pipeline(&cfg, &[missing, good]);
    // The good file still matched, but the error wins the exit status.
    assert_eq!(out, "hit\n");
    assert_eq!(code, 2);
}

#[test]
fn test_recursive_search_with_excludes() {
    let dir = TempDir::new().unwrap();
    create_test_file(dir.path(), "src/a.rs", b"needle\n");
    create_test_file(dir.path(), "src/b.txt", b"needle\n");
    create_test_file(dir.path(), "target/c.rs", b"needle\n");

    let mut cfg = config_for("needle");
    cfg.directories = DirectoryAction::Recurse;
    cfg.out_file = true;
    cfg.filters.add_include("*.rs").unwrap();
    cfg.filters.add_exclude_dir("target").unwrap();
    let root = dir.path().display().to_string();
    let (code, out) = run_pipeline(&cfg, &[root]);
    assert_eq!(code, 0);
    assert!(out.contains("a.rs"));
    assert!(!out.contains("b.txt"));
    assert!(!out.contains("c.rs"));
}

#[test]
fn test_directory_skip_action() {
    let dir = TempDir::new().unwrap();
    create_test_file(dir.path(), "sub/f", b"hit\n");

    let mut cfg = config_for("hit");
    cfg.directories = DirectoryAction::Skip;
    let (code, out) = run_pipeline(&cfg, &[dir.path().display().to_string()]);
    assert_eq!(out, "");
    assert_eq!(code, 1);
}

#[test]
fn test_max_count_with_trailing_context() {
    let dir = TempDir::new().unwrap();
    let t = create_test_file(dir.path(), "t", b"a1\nx\ny\na2\n");

    let mut cfg = config_for("a");
    cfg.max_count = 1;
    cfg.after_context = 1;
    cfg.context_used = true;
    let (code, out) = run_pipeline(&cfg, &[t]);
    assert_eq!(out, "a1\nx\n");
    assert_eq!(code, 0);
}

#[test]
fn test_parallel_workers_keep_lines_atomic() {
    let dir = TempDir::new().unwrap();
    let mut files = Vec::new();
    for i in 0..16 {
        let body = format!("hit file{:02}\n", i).repeat(50);
        files.push(create_test_file(
            dir.path(),
            &format!("f{:02}", i),
            body.as_bytes(),
        ));
    }

    let mut cfg = config_for("hit");
    cfg.thread_count = NonZeroUsize::new(4).unwrap();
    let (code, out) = run_pipeline(&cfg, &files);
    assert_eq!(code, 0);

    // Cross-file ordering is unspecified, but every emitted line must be
    // intact and the multiset must be exactly what a serial run selects.
    let mut lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 16 * 50);
    lines.sort_unstable();
    for chunk in lines.chunks(50) {
        assert!(chunk.iter().all(|l| *l == chunk[0]));
        assert!(chunk[0].starts_with("hit file"));
    }
}

#[test]
fn test_idempotent_filtering() {
    // grep P (grep P F) == grep P F for a plain, non-context run.
    let dir = TempDir::new().unwrap();
    let t = create_test_file(dir.path(), "t", b"one\ntwo\nthree\ntwo\n");

    let (_, first) = run_pipeline(&config_for("two"), &[t]);
    let again = create_test_file(dir.path(), "t2", first.as_bytes());
    let (_, second) = run_pipeline(&config_for("two"), &[again]);
    assert_eq!(first, second);
}
