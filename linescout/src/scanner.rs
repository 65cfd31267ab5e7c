//! Per-file scanning and output formatting.
//!
//! A [`FileScanner`] drives one input to completion: fill the buffer,
//! classify it, hand whole-line regions to the matcher, emit selected
//! lines and their context, carry the residue of an incomplete last line
//! into the next fill. The formatter half lives here too because head
//! fields (line numbers, byte offsets) are computed from the same
//! bookkeeping the scan loop maintains.
//!
//! Invariants the loop preserves across fills:
//!
//! - the scanned region always ends at a line boundary; bytes past the
//!   last end-of-line byte are residue, saved for the next cycle;
//! - `totalnl` counts the line terminators at or below `lastnl`, so the
//!   line number of any byte past `lastnl` can be recovered with one
//!   forward scan;
//! - `lastout` tracks one past the last emitted byte, or `None` when the
//!   next output is not adjacent to the previous one (which is what
//!   triggers the group separator);
//! - no byte is ever emitted twice.

use std::io::Read;

use memchr::{memchr, memrchr};
use tracing::trace;

use crate::binary::{self, BinaryMode};
use crate::buffer::ScanBuffer;
use crate::config::Config;
use crate::matcher::Matcher;
use crate::printer::{
    self, OutputSink, SinkState, SEP_CHAR_REJECTED, SEP_CHAR_SELECTED,
};

/// Dies with the fatal counter-overflow diagnostic. The caller must hold
/// the sink lock so the message cannot interleave with other output; the
/// process exits before the lock would be released.
fn overflow_error_locked() -> ! {
    eprintln!("{}: input is too large to count", printer::PROGRAM);
    std::process::exit(2);
}

/// Adds two line or byte counters; overflow is fatal. For call sites that
/// already hold the sink lock.
fn add_count_locked(a: u64, b: u64) -> u64 {
    match a.checked_add(b) {
        Some(sum) => sum,
        None => overflow_error_locked(),
    }
}

pub struct FileScanner<'a> {
    cfg: &'a Config,
    matcher: &'a dyn Matcher,
    sink: &'a OutputSink,
    buf: &'a mut ScanBuffer,
    filename: &'a str,

    /// Bytes retired from the window, for `-b` offsets.
    totalcc: u64,
    /// Line terminators counted at or below `lastnl`.
    totalnl: u64,
    lastnl: usize,
    /// One past the last byte emitted, `None` when conceptually retired.
    lastout: Option<usize>,
    /// Selected lines still permitted by `--max-count`.
    outleft: u64,
    /// Trailing-context lines still owed.
    pending: u64,
    done_on_match: bool,
    out_quiet: bool,
    encoding_error_output: bool,
    /// Absolute input offset just past the last matching line.
    pub after_last_match: u64,
}

impl<'a> FileScanner<'a> {
    pub fn new(
        cfg: &'a Config,
        matcher: &'a dyn Matcher,
        sink: &'a OutputSink,
        buf: &'a mut ScanBuffer,
        filename: &'a str,
    ) -> Self {
        FileScanner {
            cfg,
            matcher,
            sink,
            buf,
            filename,
            totalcc: 0,
            totalnl: 0,
            lastnl: 0,
            lastout: None,
            outleft: cfg.max_count,
            pending: 0,
            done_on_match: cfg.done_on_match,
            out_quiet: cfg.out_quiet,
            encoding_error_output: false,
            after_last_match: 0,
        }
    }

    /// Scans one input to completion. Returns the number of selected
    /// lines; read errors are reported as diagnostics, not surfaced.
    pub fn run(&mut self, src: &mut dyn Read, size_hint: Option<u64>) -> u64 {
        let cfg = self.cfg;
        let eol = cfg.eol;
        trace!(file = self.filename, "scanning");

        let done_on_match_0 = self.done_on_match;
        let out_quiet_0 = self.out_quiet;

        // Selected-line count when NULs were first deduced; None until then.
        let mut nlines_first_null: Option<u64> = None;
        let mut nul_zapper: u8 = 0;
        let mut nlines: u64 = 0;
        let mut residue: usize = 0;
        let mut save: usize = 0;

        self.buf.reset(cfg.skip_empty_lines && eol == 0);
        self.totalcc = 0;
        self.totalnl = 0;
        self.lastout = None;
        self.outleft = cfg.max_count;
        self.pending = 0;
        self.after_last_match = 0;
        self.encoding_error_output = false;

        match self.buf.fill(src, 0, size_hint) {
            Ok((_, skipped)) => {
                if skipped > 0 {
                    self.totalnl = self.add_count(self.totalnl, skipped);
                }
            }
            Err(e) => {
                self.sink.report(cfg, self.filename, &e);
                return 0;
            }
        }

        let mut finished = false;
        loop {
            if nlines_first_null.is_none()
                && eol != 0
                && cfg.binary_mode != BinaryMode::Text
                && binary::has_nulls(self.buf.window())
            {
                if cfg.binary_mode == BinaryMode::WithoutMatch {
                    return 0;
                }
                if !cfg.count_matches {
                    self.done_on_match = true;
                    self.out_quiet = true;
                }
                nlines_first_null = Some(nlines);
                nul_zapper = eol;
                self.buf.skip_nuls = cfg.skip_empty_lines;
            }

            self.lastnl = self.buf.beg;
            if self.lastout.is_some() {
                self.lastout = Some(self.buf.beg);
            }

            let mut beg = self.buf.beg + save;
            if beg == self.buf.lim {
                break;
            }

            if nul_zapper != 0 {
                let lim = self.buf.lim;
                binary::zap_nuls(&mut self.buf.data_mut()[beg..lim], nul_zapper);
            }

            // Split at the last eol in the window; everything past it is
            // the residue of an incomplete line, carried into the next
            // cycle. No eol in the new data means the whole read extends
            // the existing residue.
            let window_lim = self.buf.lim;
            let lim = {
                let data = self.buf.data();
                match memrchr(eol, &data[beg..window_lim]) {
                    Some(i) => beg + i + 1,
                    None => beg - residue,
                }
            };
            beg -= residue;
            residue = window_lim - lim;

            if beg < lim {
                if self.outleft > 0 {
                    nlines += self.grep_buf(beg, lim);
                }
                if self.pending > 0 {
                    self.pr_pending(lim);
                }
                if (self.outleft == 0 && self.pending == 0)
                    || (self.done_on_match && nlines_first_null.unwrap_or(0) < nlines)
                {
                    finished = true;
                    break;
                }
            }

            // Keep the last before-context lines ahead of the split point
            // as leading context for a match at the start of the next
            // window.
            let mut kept = 0;
            beg = lim;
            {
                let data = self.buf.data();
                while kept < cfg.before_context
                    && beg > self.buf.beg
                    && Some(beg) != self.lastout
                {
                    kept += 1;
                    beg -= 1;
                    while beg > self.buf.beg && data[beg - 1] != eol {
                        beg -= 1;
                    }
                }
            }
            // Retained context that is not adjacent to the previous
            // output resets the adjacency marker.
            if Some(beg) != self.lastout {
                self.lastout = None;
            }

            save = residue + (lim - beg);
            if cfg.out_byte {
                self.totalcc =
                    self.add_count(self.totalcc, (self.buf.lim - self.buf.beg - save) as u64);
            }
            if cfg.out_line {
                self.nlscan(beg, false);
            }
            match self.buf.fill(src, save, size_hint) {
                Ok((_, skipped)) => {
                    if skipped > 0 {
                        self.totalnl = self.add_count(self.totalnl, skipped);
                    }
                }
                Err(e) => {
                    self.sink.report(cfg, self.filename, &e);
                    finished = true;
                    break;
                }
            }
        }

        // A final line with no terminator still gets scanned, with a
        // synthetic eol appended.
        if !finished && residue > 0 {
            self.buf.append_eol(eol);
            if self.outleft > 0 {
                let start = self.buf.beg + save - residue;
                let lim = self.buf.lim;
                nlines += self.grep_buf(start, lim);
            }
            if self.pending > 0 {
                let lim = self.buf.lim;
                self.pr_pending(lim);
            }
        }

        self.done_on_match = done_on_match_0;
        self.out_quiet = out_quiet_0;
        if !self.out_quiet
            && (self.encoding_error_output
                || nlines_first_null.is_some_and(|n| n < nlines))
        {
            let mut st = self.sink.lock();
            st.write(format!("Binary file {} matches\n", self.filename).as_bytes());
            if cfg.line_buffered {
                st.flush();
            }
        }
        nlines
    }

    /// Scans `[beg, lim)`, a whole number of lines, emitting matching
    /// lines (or the gaps between them under `-v`). Returns the number of
    /// lines selected.
    fn grep_buf(&mut self, beg: usize, lim: usize) -> u64 {
        let cfg = self.cfg;
        let outleft0 = self.outleft;
        let mut p = beg;
        while p < lim {
            let m = {
                let data = self.buf.data();
                self.matcher.execute(&data[p..lim], None)
            };
            let (off, len) = match m {
                Some((off, len)) => (off, len),
                None => {
                    if !cfg.invert {
                        break;
                    }
                    (lim - p, 0)
                }
            };
            let b = p + off;
            let endp = b + len;
            // Never match the empty region at the end of the buffer.
            if !cfg.invert && b == lim {
                break;
            }
            if !cfg.invert || p < b {
                let (prbeg, prend) = if cfg.invert { (p, b) } else { (b, endp) };
                self.pr_text(prbeg, prend);
                if self.outleft == 0 || self.done_on_match {
                    if cfg.exit_on_match {
                        self.sink.lock().flush();
                        std::process::exit(if self.sink.errseen() { 2 } else { 0 });
                    }
                    break;
                }
            }
            p = endp;
        }
        outleft0 - self.outleft
    }

    /// Emits pending trailing-context lines up to `lim`. A line that
    /// matches once the max-count budget is spent ends the pending run
    /// instead of being printed as context.
    fn pr_pending(&mut self, lim: usize) {
        let cfg = self.cfg;
        if self.lastout.is_none() {
            self.lastout = Some(self.buf.beg);
        }
        let sink = self.sink;
        let mut st = sink.lock();
        while self.pending > 0 {
            let Some(lo) = self.lastout.filter(|&lo| lo < lim) else {
                break;
            };
            let nl = {
                let data = self.buf.data();
                match memchr(cfg.eol, &data[lo..lim]) {
                    Some(i) => lo + i,
                    None => break,
                }
            };
            self.pending -= 1;
            let print_it = self.outleft != 0 || {
                let data = self.buf.data();
                self.matcher.execute(&data[lo..nl + 1], None).is_none() == !cfg.invert
            };
            if print_it {
                self.pr_line(&mut st, lo, nl + 1, SEP_CHAR_REJECTED);
            } else {
                self.pending = 0;
            }
        }
    }

    /// Emits the region `[beg, lim)` as selected output, preceded by any
    /// leading context and, when not adjacent to earlier output, the
    /// group separator.
    fn pr_text(&mut self, beg: usize, lim: usize) {
        let cfg = self.cfg;
        let eol = cfg.eol;

        if !self.out_quiet && self.pending > 0 {
            self.pr_pending(beg);
        }

        let mut p = beg;
        let sink = self.sink;
        let mut st = sink.lock();

        if !self.out_quiet {
            let bp = self.lastout.unwrap_or(self.buf.beg);
            {
                let data = self.buf.data();
                for _ in 0..cfg.before_context {
                    if p > bp {
                        p -= 1;
                        while p > bp && data[p - 1] != eol {
                            p -= 1;
                        }
                    }
                }
            }

            // Group separator between non-adjacent blocks, only once any
            // output exists and only when context was requested at all.
            if cfg.context_used && st.used && Some(p) != self.lastout {
                if let Some(gs) = &cfg.group_separator {
                    cfg.colors.sgr_start(&mut st, sep_attrs(cfg));
                    st.write(gs.as_bytes());
                    cfg.colors.sgr_end(&mut st, sep_attrs(cfg));
                    st.write_byte(b'\n');
                }
            }

            while p < beg {
                let nl = {
                    let data = self.buf.data();
                    memchr(eol, &data[p..beg]).map_or(beg, |i| p + i + 1)
                };
                self.pr_line(&mut st, p, nl, SEP_CHAR_REJECTED);
                p = nl;
            }
        }

        let n;
        if cfg.invert {
            // The region may span many non-matching lines.
            let mut count = 0u64;
            while p < lim && count < self.outleft {
                let nl = {
                    let data = self.buf.data();
                    memchr(eol, &data[p..lim]).map_or(lim, |i| p + i + 1)
                };
                if !self.out_quiet {
                    self.pr_line(&mut st, p, nl, SEP_CHAR_SELECTED);
                }
                p = nl;
                count += 1;
            }
            n = count;
        } else {
            if !self.out_quiet {
                self.pr_line(&mut st, beg, lim, SEP_CHAR_SELECTED);
            }
            n = 1;
            p = lim;
        }

        self.after_last_match = self.buf.offset - (self.buf.lim - p) as u64;
        self.pending = if self.out_quiet {
            0
        } else {
            cfg.after_context as u64
        };
        st.used = true;
        self.outleft = self.outleft.saturating_sub(n);
    }

    /// Emits one line, head fields included. `sep` distinguishes selected
    /// from context lines.
    fn pr_line(&mut self, st: &mut SinkState, beg: usize, lim: usize, sep: u8) {
        let cfg = self.cfg;

        if !cfg.only_matching && !self.print_line_head(st, beg, lim - beg - 1, lim, sep) {
            return;
        }

        let matching = (sep == SEP_CHAR_SELECTED) ^ cfg.invert;
        let (line_color, match_color): (&str, &str) = if cfg.color {
            (
                if (sep == SEP_CHAR_SELECTED) ^ (cfg.invert && cfg.colors.rv) {
                    &cfg.colors.selected_line
                } else {
                    &cfg.colors.context_line
                },
                if sep == SEP_CHAR_SELECTED {
                    &cfg.colors.selected_match
                } else {
                    &cfg.colors.context_match
                },
            )
        } else {
            ("", "")
        };

        let mut cur = beg;
        if (cfg.only_matching && matching)
            || (cfg.color && (!line_color.is_empty() || !match_color.is_empty()))
        {
            // Only a matching line has anything to walk match by match.
            if matching && (cfg.only_matching || !match_color.is_empty()) {
                match self.print_line_middle(st, beg, lim, line_color, match_color) {
                    Some(rest) => cur = rest,
                    None => return,
                }
            }
            if !cfg.only_matching && !line_color.is_empty() {
                cur = self.print_line_tail(st, cur, lim, line_color);
            }
        }

        if !cfg.only_matching && lim > cur {
            let data = self.buf.data();
            st.write(&data[cur..lim]);
        }
        if cfg.line_buffered {
            st.flush();
        }
        if let Some(err) = &st.write_error {
            eprintln!("{}: write error: {}", printer::PROGRAM, err);
            std::process::exit(2);
        }
        self.lastout = Some(lim);
    }

    /// Prints the head fields for a line (or for one match under `-o`).
    /// Returns false when the line is suppressed because it contains an
    /// encoding error, which also flips the file into binary handling.
    fn print_line_head(
        &mut self,
        st: &mut SinkState,
        beg: usize,
        len: usize,
        lim: usize,
        sep: u8,
    ) -> bool {
        let cfg = self.cfg;

        if cfg.binary_mode != BinaryMode::Text {
            let bad = {
                let data = self.buf.data();
                binary::line_has_encoding_error(&data[beg..beg + len])
            };
            if bad {
                self.encoding_error_output = true;
                self.done_on_match = true;
                self.out_quiet = true;
                return false;
            }
        }

        let mut pending_sep = false;

        if cfg.out_file {
            printer::print_filename(st, cfg, self.filename);
            if cfg.null_filename {
                st.write_byte(0);
            } else {
                pending_sep = true;
            }
        }

        if cfg.out_line {
            if self.lastnl < lim {
                self.nlscan(beg, true);
                self.totalnl = add_count_locked(self.totalnl, 1);
                self.lastnl = lim;
            }
            if pending_sep {
                printer::print_sep(st, cfg, sep);
            }
            printer::print_offset(st, cfg, self.totalnl, 4, &cfg.colors.line_num);
            pending_sep = true;
        }

        if cfg.out_byte {
            let pos = add_count_locked(self.totalcc, (beg - self.buf.beg) as u64);
            if pending_sep {
                printer::print_sep(st, cfg, sep);
            }
            printer::print_offset(st, cfg, pos, 6, &cfg.colors.byte_num);
            pending_sep = true;
        }

        if pending_sep {
            // The tab-backspace pair lands the line body on a tab stop
            // for viewers that expand tabs.
            if cfg.align_tabs {
                st.write(b"\t\x08");
            }
            printer::print_sep(st, cfg, sep);
        }

        true
    }

    /// Walks a matching line match by match, emitting colored matches (or,
    /// under `-o`, one line per match). Returns the index where the tail
    /// begins, or `None` when output was suppressed mid-line.
    fn print_line_middle(
        &mut self,
        st: &mut SinkState,
        beg: usize,
        lim: usize,
        line_color: &str,
        match_color: &str,
    ) -> Option<usize> {
        let cfg = self.cfg;
        let mut cur = beg;
        // Earliest zero-width match position, so a later real match
        // re-covers the bytes walked past while making progress.
        let mut mid: Option<usize> = None;

        while cur < lim {
            let m = {
                let data = self.buf.data();
                self.matcher.execute(&data[beg..lim], Some(cur - beg))
            };
            let (off, size) = match m {
                Some(x) => x,
                None => break,
            };
            let b = beg + off;
            if b == lim {
                break;
            }
            if size == 0 {
                // Zero-width match: advance a single byte. Not multibyte
                // aware, matching the long-standing observable behavior.
                if mid.is_none() {
                    mid = Some(cur);
                }
                cur = b + 1;
                continue;
            }

            if cfg.only_matching {
                let sep = if cfg.invert {
                    SEP_CHAR_REJECTED
                } else {
                    SEP_CHAR_SELECTED
                };
                if !self.print_line_head(st, b, size, lim, sep) {
                    return None;
                }
            } else {
                cfg.colors.sgr_start(st, line_color);
                if let Some(m0) = mid.take() {
                    cur = m0;
                }
                {
                    let data = self.buf.data();
                    st.write(&data[cur..b]);
                }
            }

            cfg.colors.sgr_start(st, match_color);
            {
                let data = self.buf.data();
                st.write(&data[b..b + size]);
            }
            cfg.colors.sgr_end(st, match_color);
            if cfg.only_matching {
                st.write_byte(cfg.eol);
            }
            cur = b + size;
        }

        if cfg.only_matching {
            Some(lim)
        } else if let Some(m0) = mid {
            Some(m0)
        } else {
            Some(cur)
        }
    }

    /// Emits the uncolored-match remainder of a line under a line color,
    /// leaving the end-of-line bytes for the plain write that follows.
    fn print_line_tail(
        &mut self,
        st: &mut SinkState,
        beg: usize,
        lim: usize,
        line_color: &str,
    ) -> usize {
        let cfg = self.cfg;
        let tail_len = {
            let data = self.buf.data();
            let mut eol_size = usize::from(lim > beg && data[lim - 1] == cfg.eol);
            eol_size += usize::from(lim - eol_size > beg && data[lim - 1 - eol_size] == b'\r');
            lim - eol_size - beg
        };
        if tail_len > 0 {
            cfg.colors.sgr_start(st, line_color);
            {
                let data = self.buf.data();
                st.write(&data[beg..beg + tail_len]);
            }
            cfg.colors.sgr_end(st, line_color);
            beg + tail_len
        } else {
            beg
        }
    }

    /// Like [`add_count_locked`], for call sites that do not hold the sink
    /// lock: the fatal diagnostic is serialized before the process dies.
    fn add_count(&self, a: u64, b: u64) -> u64 {
        match a.checked_add(b) {
            Some(sum) => sum,
            None => {
                let _guard = self.sink.lock();
                overflow_error_locked()
            }
        }
    }

    /// Counts line terminators between `lastnl` and `lim`. `locked` says
    /// whether the caller already holds the sink lock, which decides how a
    /// counter overflow gets reported.
    fn nlscan(&mut self, lim: usize, locked: bool) {
        let mut newlines = 0u64;
        let mut p = self.lastnl;
        {
            let data = self.buf.data();
            while p < lim {
                match memchr(self.cfg.eol, &data[p..lim]) {
                    Some(i) => {
                        newlines += 1;
                        p += i + 1;
                    }
                    None => break,
                }
            }
        }
        self.totalnl = if locked {
            add_count_locked(self.totalnl, newlines)
        } else {
            self.add_count(self.totalnl, newlines)
        };
        self.lastnl = lim;
    }
}

fn sep_attrs(cfg: &Config) -> &str {
    if cfg.color {
        &cfg.colors.separator
    } else {
        ""
    }
}
