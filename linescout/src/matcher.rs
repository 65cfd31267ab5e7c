//! Pattern matchers.
//!
//! The scanner talks to matchers through the [`Matcher`] trait: compile a
//! pattern set once per worker, then call `execute` against buffer
//! windows. A compiled matcher is private to its worker; sharing one
//! across threads is not part of the contract, cloning the [`PatternSet`]
//! and recompiling is.
//!
//! `execute` has two modes, selected by the cursor argument:
//!
//! - `cursor == None`: `buf` spans whole lines. Return the first *line*
//!   containing a match, as `(line_start, line_len)` where the length
//!   includes the end-of-line byte when present.
//! - `cursor == Some(at)`: `buf` is a single line (end-of-line byte
//!   included). Return the first exact match at or after `at`, as
//!   `(offset, len)`. Zero-length matches are permitted; callers are
//!   responsible for making progress past them.

use aho_corasick::{AhoCorasick, MatchKind};
use memchr::{memchr, memrchr};
use regex::bytes::{Regex, RegexBuilder};

use crate::errors::{GrepError, Result};

/// Pattern dialect, selectable with `-G`/`-E`/`-F`/`-P` or by name via `-X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Basic,
    Extended,
    Fixed,
    Perl,
}

impl MatcherKind {
    /// Looks a matcher up by its registry name.
    pub fn from_name(name: &str) -> Option<MatcherKind> {
        match name {
            "grep" => Some(MatcherKind::Basic),
            "egrep" | "awk" | "gawk" | "posixawk" => Some(MatcherKind::Extended),
            "fgrep" => Some(MatcherKind::Fixed),
            "perl" => Some(MatcherKind::Perl),
            _ => None,
        }
    }
}

/// Everything needed to compile a matcher: the pattern alternatives plus
/// the match-shaping flags. Cheap to clone; each worker compiles its own.
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub kind: MatcherKind,
    /// Individual alternatives. Newlines in `-e`/`-f` input separate
    /// alternatives, so none of these contains one.
    pub patterns: Vec<String>,
    pub ignore_case: bool,
    pub match_words: bool,
    pub match_lines: bool,
    pub eol: u8,
}

impl PatternSet {
    pub fn new(kind: MatcherKind, patterns: Vec<String>) -> Self {
        PatternSet {
            kind,
            patterns,
            ignore_case: false,
            match_words: false,
            match_lines: false,
            eol: b'\n',
        }
    }

    /// Compiles this pattern set into a matcher for one worker.
    pub fn compile(&self) -> Result<Box<dyn Matcher>> {
        let engine = match self.kind {
            MatcherKind::Fixed => {
                let ac = AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .ascii_case_insensitive(self.ignore_case)
                    .build(&self.patterns)
                    .map_err(|e| GrepError::pattern(e.to_string()))?;
                MatchEngine::Fixed(ac)
            }
            _ => {
                let joined = join_alternatives(&self.patterns);
                let re = RegexBuilder::new(&joined)
                    .case_insensitive(self.ignore_case)
                    .multi_line(true)
                    .build()
                    .map_err(|e| GrepError::pattern(e.to_string()))?;
                MatchEngine::Regex(re)
            }
        };

        let whole_line = if self.match_lines {
            Some(match self.kind {
                MatcherKind::Fixed => WholeLine::Literals(
                    self.patterns.iter().map(|p| p.clone().into_bytes()).collect(),
                ),
                _ => {
                    let joined = join_alternatives(&self.patterns);
                    let anchored = format!("^(?:{})$", joined);
                    WholeLine::Regex(
                        RegexBuilder::new(&anchored)
                            .case_insensitive(self.ignore_case)
                            .build()
                            .map_err(|e| GrepError::pattern(e.to_string()))?,
                    )
                }
            })
        } else {
            None
        };

        Ok(Box::new(PatternMatcher {
            engine,
            whole_line,
            ignore_case: self.ignore_case,
            match_words: self.match_words,
            match_lines: self.match_lines,
            eol: self.eol,
        }))
    }
}

/// Joins alternatives into a single regex. A lone pattern is passed
/// through untouched so its own anchors and precedence are preserved.
fn join_alternatives(patterns: &[String]) -> String {
    if patterns.len() == 1 {
        patterns[0].clone()
    } else {
        patterns
            .iter()
            .map(|p| format!("(?:{})", p))
            .collect::<Vec<_>>()
            .join("|")
    }
}

pub trait Matcher: Send {
    /// See the module docs for the two execution modes.
    fn execute(&self, buf: &[u8], cursor: Option<usize>) -> Option<(usize, usize)>;
}

#[derive(Debug)]
enum MatchEngine {
    Regex(Regex),
    Fixed(AhoCorasick),
}

#[derive(Debug)]
enum WholeLine {
    Regex(Regex),
    Literals(Vec<Vec<u8>>),
}

#[derive(Debug)]
pub struct PatternMatcher {
    engine: MatchEngine,
    whole_line: Option<WholeLine>,
    ignore_case: bool,
    match_words: bool,
    match_lines: bool,
    eol: u8,
}

impl Matcher for PatternMatcher {
    fn execute(&self, buf: &[u8], cursor: Option<usize>) -> Option<(usize, usize)> {
        match cursor {
            None => self.find_line(buf),
            Some(at) => {
                let line = strip_eol(buf, self.eol);
                if at > line.len() {
                    return None;
                }
                self.match_in_line(line, at)
            }
        }
    }
}

impl PatternMatcher {
    /// Finds the first line of `buf` containing a match.
    fn find_line(&self, buf: &[u8]) -> Option<(usize, usize)> {
        // The regex engine understands `\n` line anchors, so for the
        // default end-of-line byte one multi-line search over the whole
        // window locates a candidate and only that line needs validating.
        // For other eol bytes (null-data mode) anchors would bind to the
        // wrong byte, so the window is walked a line at a time instead.
        if self.eol == b'\n' {
            if let MatchEngine::Regex(_) = self.engine {
                return self.find_line_by_candidate(buf);
            }
        }
        self.find_line_by_walk(buf)
    }

    fn find_line_by_candidate(&self, buf: &[u8]) -> Option<(usize, usize)> {
        let mut start = 0;
        while start <= buf.len() {
            let (cand, _) = self.find_candidate(buf, start)?;
            let (ls, le) = line_span(buf, cand, self.eol);
            let body_end = line_body_end(buf, ls, le, self.eol);
            if self.match_in_line(&buf[ls..body_end], 0).is_some() {
                return Some((ls, le - ls));
            }
            if le <= start {
                return None;
            }
            start = le;
        }
        None
    }

    fn find_line_by_walk(&self, buf: &[u8]) -> Option<(usize, usize)> {
        let mut ls = 0;
        while ls < buf.len() {
            let le = match memchr(self.eol, &buf[ls..]) {
                Some(i) => ls + i + 1,
                None => buf.len(),
            };
            let body_end = line_body_end(buf, ls, le, self.eol);
            if self.match_in_line(&buf[ls..body_end], 0).is_some() {
                return Some((ls, le - ls));
            }
            ls = le;
        }
        None
    }

    /// Raw engine search with no word/line shaping applied.
    fn find_candidate(&self, hay: &[u8], at: usize) -> Option<(usize, usize)> {
        match &self.engine {
            MatchEngine::Regex(re) => re.find_at(hay, at).map(|m| (m.start(), m.end())),
            MatchEngine::Fixed(ac) => ac
                .find(&hay[at..])
                .map(|m| (at + m.start(), at + m.end())),
        }
    }

    /// Finds the first acceptable match within a single line (no eol byte),
    /// starting at `from`. Applies `-w` boundary checks and `-x` whole-line
    /// matching.
    fn match_in_line(&self, line: &[u8], from: usize) -> Option<(usize, usize)> {
        if self.match_lines {
            let whole = match &self.whole_line {
                Some(WholeLine::Regex(re)) => re.is_match(line),
                Some(WholeLine::Literals(pats)) => pats
                    .iter()
                    .any(|p| bytes_eq(p, line, self.ignore_case)),
                None => false,
            };
            return if whole && from == 0 {
                Some((0, line.len()))
            } else {
                None
            };
        }

        let mut pos = from;
        while pos <= line.len() {
            let (s, e) = self.find_candidate(line, pos)?;
            if self.match_words && !word_bounded(line, s, e) {
                pos = s + 1;
                continue;
            }
            return Some((s, e - s));
        }
        None
    }
}

fn bytes_eq(a: &[u8], b: &[u8], ignore_case: bool) -> bool {
    if ignore_case {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| x.eq_ignore_ascii_case(y))
    } else {
        a == b
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_bounded(line: &[u8], start: usize, end: usize) -> bool {
    (start == 0 || !is_word_byte(line[start - 1]))
        && (end == line.len() || !is_word_byte(line[end]))
}

/// The line of `buf` containing byte `pos`: `(start, end)` where `end`
/// includes the eol byte when the line has one.
fn line_span(buf: &[u8], pos: usize, eol: u8) -> (usize, usize) {
    let ls = memrchr(eol, &buf[..pos]).map_or(0, |i| i + 1);
    let le = match memchr(eol, &buf[pos..]) {
        Some(i) => pos + i + 1,
        None => buf.len(),
    };
    (ls, le)
}

/// One past the last content byte of a line, excluding the eol byte.
fn line_body_end(buf: &[u8], ls: usize, le: usize, eol: u8) -> usize {
    if le > ls && buf[le - 1] == eol {
        le - 1
    } else {
        le
    }
}

fn strip_eol(buf: &[u8], eol: u8) -> &[u8] {
    match buf.last() {
        Some(&b) if b == eol => &buf[..buf.len() - 1],
        _ => buf,
    }
}
