use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use linescout::{
    BinaryMode, ColorSpecs, Config, DeviceAction, DirectoryAction, GrepError, ListMode,
    MatcherKind, PatternSet,
};
use tracing_subscriber::EnvFilter;

const PROGRAM: &str = "linescout";

#[derive(Parser)]
#[command(
    name = PROGRAM,
    version,
    about = "Search for PATTERN in each FILE or standard input",
    disable_help_flag = true,
    args_override_self = true
)]
struct Cli {
    #[arg(long = "help", action = ArgAction::HelpLong, help = "Print help")]
    help: Option<bool>,

    /// PATTERN is an extended regular expression
    #[arg(short = 'E', long = "extended-regexp")]
    extended_regexp: bool,

    /// PATTERN is a set of newline-separated strings
    #[arg(short = 'F', long = "fixed-strings", visible_alias = "fixed-regexp")]
    fixed_strings: bool,

    /// PATTERN is a basic regular expression
    #[arg(short = 'G', long = "basic-regexp")]
    basic_regexp: bool,

    /// PATTERN is a Perl regular expression
    #[arg(short = 'P', long = "perl-regexp")]
    perl_regexp: bool,

    /// Select a matcher by registry name
    #[arg(short = 'X', value_name = "NAME", hide = true)]
    matcher: Option<String>,

    /// Use PATTERN for matching
    #[arg(short = 'e', long = "regexp", value_name = "PATTERN", action = ArgAction::Append)]
    regexp: Vec<String>,

    /// Obtain PATTERN from FILE
    #[arg(short = 'f', long = "file", value_name = "FILE", action = ArgAction::Append)]
    pattern_files: Vec<PathBuf>,

    /// Ignore case distinctions
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    /// Old-timers' spelling of -i
    #[arg(short = 'y', hide = true)]
    ignore_case_old: bool,

    /// Force PATTERN to match only whole words
    #[arg(short = 'w', long = "word-regexp")]
    word_regexp: bool,

    /// Force PATTERN to match only whole lines
    #[arg(short = 'x', long = "line-regexp")]
    line_regexp: bool,

    /// A data line ends in 0 byte, not newline
    #[arg(short = 'z', long = "null-data")]
    null_data: bool,

    /// Suppress error messages
    #[arg(short = 's', long = "no-messages")]
    no_messages: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long = "invert-match")]
    invert_match: bool,

    /// Use NUM search threads
    #[arg(
        short = 'M',
        long = "parallel",
        value_name = "NUM",
        num_args = 0..=1,
        default_missing_value = "auto",
        require_equals = true
    )]
    parallel: Option<String>,

    /// Stop after NUM matches
    #[arg(short = 'm', long = "max-count", value_name = "NUM")]
    max_count: Option<u64>,

    /// Print the byte offset with output lines
    #[arg(short = 'b', long = "byte-offset")]
    byte_offset: bool,

    /// Print line number with output lines
    #[arg(short = 'n', long = "line-number")]
    line_number: bool,

    /// Flush output on every line
    #[arg(long = "line-buffered")]
    line_buffered: bool,

    /// Print the file name for each match
    #[arg(short = 'H', long = "with-filename")]
    with_filename: bool,

    /// Suppress the file name prefix on output
    #[arg(short = 'h', long = "no-filename")]
    no_filename: bool,

    /// Use LABEL as the standard input file name prefix
    #[arg(long = "label", value_name = "LABEL")]
    label: Option<String>,

    /// Show only the part of a line matching PATTERN
    #[arg(short = 'o', long = "only-matching")]
    only_matching: bool,

    /// Suppress all normal output
    #[arg(short = 'q', long = "quiet", visible_alias = "silent")]
    quiet: bool,

    /// Assume that binary files are TYPE: binary, text or without-match
    #[arg(long = "binary-files", value_name = "TYPE")]
    binary_files: Option<String>,

    /// Equivalent to --binary-files=text
    #[arg(short = 'a', long = "text")]
    text: bool,

    /// Equivalent to --binary-files=without-match
    #[arg(short = 'I')]
    no_binary: bool,

    /// How to handle directories: read, recurse or skip
    #[arg(short = 'd', long = "directories", value_name = "ACTION")]
    directories: Option<String>,

    /// How to handle devices, FIFOs and sockets: read or skip
    #[arg(short = 'D', long = "devices", value_name = "ACTION")]
    devices: Option<String>,

    /// Like --directories=recurse
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,

    /// Likewise, but follow all symlinks
    #[arg(short = 'R', long = "dereference-recursive")]
    dereference_recursive: bool,

    /// Search only files that match FILE_PATTERN
    #[arg(long = "include", value_name = "FILE_PATTERN", action = ArgAction::Append)]
    include: Vec<String>,

    /// Skip files and directories matching FILE_PATTERN
    #[arg(long = "exclude", value_name = "FILE_PATTERN", action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Skip files matching any file pattern from FILE
    #[arg(long = "exclude-from", value_name = "FILE", action = ArgAction::Append)]
    exclude_from: Vec<PathBuf>,

    /// Directories that match PATTERN will be skipped
    #[arg(long = "exclude-dir", value_name = "PATTERN", action = ArgAction::Append)]
    exclude_dir: Vec<String>,

    /// Print only names of FILEs containing no match
    #[arg(short = 'L', long = "files-without-match")]
    files_without_match: bool,

    /// Print only names of FILEs containing matches
    #[arg(short = 'l', long = "files-with-matches")]
    files_with_matches: bool,

    /// Print only a count of matching lines per FILE
    #[arg(short = 'c', long = "count")]
    count: bool,

    /// Make tabs line up (if needed)
    #[arg(short = 'T', long = "initial-tab")]
    initial_tab: bool,

    /// Print 0 byte after FILE name
    #[arg(short = 'Z', long = "null")]
    null: bool,

    /// Print NUM lines of leading context
    #[arg(short = 'B', long = "before-context", value_name = "NUM")]
    before_context: Option<u64>,

    /// Print NUM lines of trailing context
    #[arg(short = 'A', long = "after-context", value_name = "NUM")]
    after_context: Option<u64>,

    /// Print NUM lines of output context
    #[arg(short = 'C', long = "context", value_name = "NUM")]
    context: Option<u64>,

    /// Use markers to highlight the matching strings
    #[arg(
        long = "color",
        visible_alias = "colour",
        value_name = "WHEN",
        num_args = 0..=1,
        default_missing_value = "auto",
        require_equals = true
    )]
    color: Option<String>,

    /// Do not strip CR characters at EOL (MSDOS/Windows)
    #[arg(short = 'U', long = "binary")]
    dos_binary: bool,

    /// Report offsets as if CRs were not there (MSDOS/Windows)
    #[arg(short = 'u', long = "unix-byte-offsets")]
    unix_byte_offsets: bool,

    /// Separator between non-adjacent context groups
    #[arg(long = "group-separator", value_name = "STR")]
    group_separator: Option<String>,

    /// Suppress the group separator
    #[arg(long = "no-group-separator")]
    no_group_separator: bool,

    /// PATTERN (when no -e/-f was given), then input files
    #[arg(value_name = "ARGS")]
    args: Vec<String>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")),
        )
        .with_writer(std::io::stderr)
        .init();

    let argv = expand_args(std::env::args().collect());
    let cli = Cli::parse_from(argv);

    match build_config(cli) {
        Ok(Some((cfg, files))) => {
            let out = Box::new(std::io::BufWriter::new(std::io::stdout()));
            linescout::worker::run(&cfg, &files, out)
        }
        // Short-circuit paths that already know the exit status
        // (currently only --max-count=0).
        Ok(None) => 1,
        Err(err) => {
            eprintln!("{}: {}", PROGRAM, err);
            2
        }
    }
}

/// Pre-clap argv fixups: prepend `GREP_OPTIONS`, and rewrite the legacy
/// `-NUM` context shorthand into `--context=NUM`.
fn expand_args(mut argv: Vec<String>) -> Vec<String> {
    if argv.is_empty() {
        return argv;
    }
    let mut out = vec![argv.remove(0)];

    if let Ok(opts) = std::env::var("GREP_OPTIONS") {
        let prepended = split_shell_words(&opts);
        if !prepended.is_empty() {
            eprintln!(
                "{}: warning: GREP_OPTIONS is deprecated; please use an alias or script",
                PROGRAM
            );
            out.extend(prepended);
        }
    }

    let mut past_options = false;
    for arg in argv {
        if !past_options {
            if arg == "--" {
                past_options = true;
            } else if arg.len() > 1
                && arg.starts_with('-')
                && arg[1..].bytes().all(|b| b.is_ascii_digit())
            {
                out.push(format!("--context={}", &arg[1..]));
                continue;
            }
        }
        out.push(arg);
    }
    out
}

/// Whitespace-splits `GREP_OPTIONS`, honoring backslash escapes.
fn split_shell_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    words.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        words.push(cur);
    }
    words
}

/// Builds the immutable [`Config`] and the input list. `Ok(None)` means
/// the run was short-circuited with a known status.
fn build_config(cli: Cli) -> Result<Option<(Config, Vec<String>)>, GrepError> {
    let mut args = cli.args;

    // Matcher selection; repeating the same one is fine, mixing is not.
    let mut kind: Option<MatcherKind> = None;
    let mut select = |k: MatcherKind| -> Result<(), GrepError> {
        match kind {
            Some(prev) if prev != k => Err(GrepError::config("conflicting matchers specified")),
            _ => {
                kind = Some(k);
                Ok(())
            }
        }
    };
    if cli.basic_regexp {
        select(MatcherKind::Basic)?;
    }
    if cli.extended_regexp {
        select(MatcherKind::Extended)?;
    }
    if cli.fixed_strings {
        select(MatcherKind::Fixed)?;
    }
    if cli.perl_regexp {
        select(MatcherKind::Perl)?;
    }
    if let Some(name) = &cli.matcher {
        let named = MatcherKind::from_name(name)
            .ok_or_else(|| GrepError::config(format!("invalid matcher {}", name)))?;
        select(named)?;
    }
    let kind = kind.unwrap_or(MatcherKind::Basic);

    // Accumulate patterns from -e and -f; otherwise the first positional
    // argument is the pattern. Embedded newlines separate alternatives.
    let mut patterns: Vec<String> = Vec::new();
    let from_options = !cli.regexp.is_empty() || !cli.pattern_files.is_empty();
    for pat in &cli.regexp {
        patterns.extend(pat.split('\n').map(str::to_string));
    }
    for path in &cli.pattern_files {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrepError::config(format!("{}: {}", path.display(), e)))?;
        // An empty file contributes nothing; a trailing newline does not
        // produce a trailing empty alternative.
        if !content.is_empty() {
            let stripped = content.strip_suffix('\n').unwrap_or(&content);
            patterns.extend(stripped.split('\n').map(str::to_string));
        }
    }
    let mut invert = cli.invert_match;
    let mut match_words = cli.word_regexp;
    let mut match_lines = cli.line_regexp;
    if from_options {
        if patterns.is_empty() {
            // No patterns at all (e.g. -f /dev/null): select nothing, by
            // matching everything and flipping the selection.
            invert = !invert;
            match_words = false;
            match_lines = false;
            patterns.push(String::new());
        }
    } else {
        if args.is_empty() {
            return Err(GrepError::config(
                "usage: linescout [OPTION]... PATTERN [FILE]...",
            ));
        }
        let pattern = args.remove(0);
        patterns.extend(pattern.split('\n').map(str::to_string));
    }
    if match_lines {
        match_words = false;
    }

    let eol = if cli.null_data { 0 } else { b'\n' };

    let mut pattern_set = PatternSet::new(kind, patterns);
    pattern_set.ignore_case = cli.ignore_case || cli.ignore_case_old;
    pattern_set.match_words = match_words;
    pattern_set.match_lines = match_lines;
    pattern_set.eol = eol;

    // Compile once up front so pattern errors are fatal before any
    // traversal starts, and to probe whether an empty line is selected.
    let probe = pattern_set.compile()?;
    let skip_empty_lines = probe.execute(&[eol], None).is_some() == invert;

    let binary_mode = if let Some(kind) = &cli.binary_files {
        match kind.as_str() {
            "binary" => BinaryMode::Binary,
            "text" => BinaryMode::Text,
            "without-match" => BinaryMode::WithoutMatch,
            _ => return Err(GrepError::config("unknown binary-files type")),
        }
    } else if cli.text {
        BinaryMode::Text
    } else if cli.no_binary {
        BinaryMode::WithoutMatch
    } else {
        BinaryMode::Binary
    };

    let mut directories = if let Some(action) = &cli.directories {
        match action.as_str() {
            "read" => DirectoryAction::Read,
            "recurse" => DirectoryAction::Recurse,
            "skip" => DirectoryAction::Skip,
            _ => return Err(GrepError::config("unknown directories method")),
        }
    } else {
        DirectoryAction::Read
    };
    if cli.recursive || cli.dereference_recursive {
        directories = DirectoryAction::Recurse;
    }

    let devices = if let Some(action) = &cli.devices {
        match action.as_str() {
            "read" => DeviceAction::Read,
            "skip" => DeviceAction::Skip,
            _ => return Err(GrepError::config("unknown devices method")),
        }
    } else {
        DeviceAction::ReadCommandLine
    };

    let thread_count = match cli.parallel.as_deref() {
        None => NonZeroUsize::MIN,
        Some("auto") => {
            NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
        }
        Some(n) => n
            .parse::<usize>()
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| GrepError::config("invalid number of threads"))?,
    };

    let mut exit_on_match = cli.quiet;
    let mut stdout_id = None;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        // /dev/stdout resolves to whatever fd 1 points at, which is the
        // one stat std exposes without raw-fd calls.
        if !exit_on_match {
            if let Ok(meta) = std::fs::metadata("/dev/stdout") {
                if meta.is_file() {
                    stdout_id = Some((meta.dev(), meta.ino()));
                } else if let Ok(null) = std::fs::metadata("/dev/null") {
                    if meta.dev() == null.dev() && meta.ino() == null.ino() {
                        // Output goes nowhere; stop at the first match.
                        exit_on_match = true;
                    }
                }
            }
        }
    }

    let color = match cli.color.as_deref() {
        None => false,
        Some("always") | Some("yes") | Some("force") => true,
        Some("never") | Some("no") | Some("none") => false,
        Some("auto") | Some("tty") | Some("if-tty") => {
            std::io::stdout().is_terminal()
                && std::env::var_os("TERM").is_none_or(|t| t != "dumb")
        }
        Some(other) => {
            return Err(GrepError::config(format!("invalid color value {}", other)))
        }
    };
    let colors = if color {
        ColorSpecs::from_env()
    } else {
        ColorSpecs::default()
    };

    let mut filters = linescout::walk::PathFilters::default();
    for pat in &cli.include {
        filters.add_include(pat)?;
    }
    for pat in &cli.exclude {
        filters.add_exclude(pat)?;
    }
    for path in &cli.exclude_from {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrepError::config(format!("{}: {}", path.display(), e)))?;
        for line in content.lines().filter(|l| !l.is_empty()) {
            filters.add_exclude(line)?;
        }
    }
    for pat in &cli.exclude_dir {
        filters.add_exclude_dir(pat)?;
    }

    let group_separator = if cli.no_group_separator {
        None
    } else {
        Some(
            cli.group_separator
                .unwrap_or_else(|| linescout::printer::SEP_STR_GROUP.to_string()),
        )
    };

    let list_mode = if cli.files_with_matches {
        ListMode::Matching
    } else if cli.files_without_match {
        ListMode::NonMatching
    } else {
        ListMode::None
    };

    let before_context = cli.before_context.or(cli.context).unwrap_or(0);
    let after_context = cli.after_context.or(cli.context).unwrap_or(0);
    let context_used =
        cli.before_context.is_some() || cli.after_context.is_some() || cli.context.is_some();

    // -U and -u parse for compatibility; CR handling only ever differed
    // on DOS-like platforms.
    let _ = (cli.dos_binary, cli.unix_byte_offsets);

    let files: Vec<String> = if !args.is_empty() {
        args
    } else if directories == DirectoryAction::Recurse {
        vec![".".to_string()]
    } else {
        vec!["-".to_string()]
    };

    let out_file = ((files.len() > 1 || directories == DirectoryAction::Recurse)
        && !cli.no_filename)
        || cli.with_filename;

    let mut cfg = Config {
        pattern_set,
        invert,
        out_line: cli.line_number,
        out_byte: cli.byte_offset,
        out_file,
        null_filename: cli.null,
        align_tabs: cli.initial_tab,
        only_matching: cli.only_matching,
        label: cli.label,
        max_count: cli.max_count.unwrap_or(u64::MAX),
        before_context: before_context as usize,
        after_context: after_context as usize,
        context_used,
        count_matches: cli.count,
        list_mode,
        exit_on_match,
        done_on_match: false,
        out_quiet: false,
        binary_mode,
        directories,
        devices,
        follow_links: cli.dereference_recursive,
        suppress_errors: cli.no_messages,
        eol,
        line_buffered: cli.line_buffered,
        group_separator,
        color,
        colors,
        thread_count,
        skip_empty_lines,
        filters,
        stdout_id,
    };
    cfg.finalize();

    // A zero max-count can never select a line; the answer is known
    // before any input is opened.
    if cfg.max_count == 0 {
        return Ok(None);
    }

    Ok(Some((cfg, files)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_digit_rewrite() {
        let argv = vec![
            "linescout".to_string(),
            "-5".to_string(),
            "pat".to_string(),
            "file".to_string(),
        ];
        assert_eq!(
            expand_args(argv),
            vec!["linescout", "--context=5", "pat", "file"]
        );
    }

    #[test]
    fn test_digit_rewrite_stops_after_double_dash() {
        let argv = vec![
            "linescout".to_string(),
            "--".to_string(),
            "-5".to_string(),
        ];
        assert_eq!(expand_args(argv), vec!["linescout", "--", "-5"]);
    }

    #[test]
    fn test_split_shell_words() {
        assert_eq!(split_shell_words("-i  -n"), vec!["-i", "-n"]);
        assert_eq!(split_shell_words(r"a\ b c"), vec!["a b", "c"]);
        assert_eq!(split_shell_words("  "), Vec::<String>::new());
    }

    #[test]
    fn test_conflicting_matchers() {
        let cli = Cli::parse_from(["linescout", "-E", "-F", "pat"]);
        assert!(build_config(cli).is_err());
    }

    #[test]
    fn test_repeated_matcher_is_fine() {
        let cli = Cli::parse_from(["linescout", "-E", "-E", "pat"]);
        assert!(build_config(cli).is_ok());
    }

    #[test]
    fn test_max_count_zero_short_circuits() {
        let cli = Cli::parse_from(["linescout", "-m", "0", "pat"]);
        assert!(matches!(build_config(cli), Ok(None)));
    }

    #[test]
    fn test_pattern_newlines_are_alternatives() {
        let cli = Cli::parse_from(["linescout", "-e", "one\ntwo", "f"]);
        let (cfg, files) = build_config(cli).unwrap().unwrap();
        assert_eq!(cfg.pattern_set.patterns, vec!["one", "two"]);
        assert_eq!(files, vec!["f"]);
    }

    #[test]
    fn test_context_defaults_from_c() {
        let cli = Cli::parse_from(["linescout", "-C", "2", "-A", "1", "pat"]);
        let (cfg, _) = build_config(cli).unwrap().unwrap();
        assert_eq!(cfg.after_context, 1);
        assert_eq!(cfg.before_context, 2);
        assert!(cfg.context_used);
    }

    #[test]
    fn test_filename_defaulting() {
        let cli = Cli::parse_from(["linescout", "pat", "a", "b"]);
        let (cfg, _) = build_config(cli).unwrap().unwrap();
        assert!(cfg.out_file);

        let cli = Cli::parse_from(["linescout", "pat", "a"]);
        let (cfg, _) = build_config(cli).unwrap().unwrap();
        assert!(!cfg.out_file);

        let cli = Cli::parse_from(["linescout", "-h", "pat", "a", "b"]);
        let (cfg, _) = build_config(cli).unwrap().unwrap();
        assert!(!cfg.out_file);

        let cli = Cli::parse_from(["linescout", "-H", "pat", "a"]);
        let (cfg, _) = build_config(cli).unwrap().unwrap();
        assert!(cfg.out_file);
    }

    #[test]
    fn test_default_input_is_stdin() {
        let cli = Cli::parse_from(["linescout", "pat"]);
        let (_, files) = build_config(cli).unwrap().unwrap();
        assert_eq!(files, vec!["-"]);
    }

    #[test]
    fn test_recursive_defaults_to_cwd() {
        let cli = Cli::parse_from(["linescout", "-r", "pat"]);
        let (_, files) = build_config(cli).unwrap().unwrap();
        assert_eq!(files, vec!["."]);
    }

    #[test]
    fn test_invalid_binary_files_type() {
        let cli = Cli::parse_from(["linescout", "--binary-files", "maybe", "pat"]);
        assert!(build_config(cli).is_err());
    }

    #[test]
    fn test_bad_pattern_is_fatal() {
        let cli = Cli::parse_from(["linescout", "(", "f"]);
        assert!(build_config(cli).is_err());
    }
}
