//! Worker pool: N scan threads fed by the traversal producer.
//!
//! Each worker owns a private buffer and its own compile of the pattern
//! set; the compiled matcher contract does not promise concurrent
//! execution on a shared pattern. Workers loop on the queue, scan each
//! file, and emit count-mode and list-mode summaries under the output
//! lock, then close the handle by dropping it.

use std::io::Write;
use std::thread;

use tracing::{debug, info};

use crate::buffer::ScanBuffer;
use crate::config::{Config, ListMode};
use crate::matcher::Matcher;
use crate::printer::{self, OutputSink, SEP_CHAR_SELECTED};
use crate::queue::{FileSource, WorkItem, WorkQueue, DEFAULT_CAPACITY};
use crate::scanner::FileScanner;
use crate::walk::Producer;

/// Runs the whole pipeline: spawns the workers, feeds them every
/// command-line argument, and aggregates the exit status: `0` when any
/// line was selected, `1` when none was, `2` when any error occurred.
pub fn run(cfg: &Config, args: &[String], out: Box<dyn Write + Send>) -> i32 {
    let sink = OutputSink::new(out);
    let queue = WorkQueue::with_capacity(DEFAULT_CAPACITY);
    info!(threads = cfg.thread_count.get(), "starting scan");

    let matched = thread::scope(|scope| {
        let mut workers = Vec::new();
        for _ in 0..cfg.thread_count.get() {
            workers.push(scope.spawn(|| worker_loop(cfg, &queue, &sink)));
        }

        let producer = Producer::new(cfg, &queue, &sink);
        for arg in args {
            producer.search_arg(arg);
        }
        queue.close();

        workers
            .into_iter()
            .fold(false, |acc, handle| acc | handle.join().unwrap_or(false))
    });

    {
        let mut st = sink.lock();
        st.flush();
        if let Some(err) = &st.write_error {
            eprintln!("{}: write error: {}", printer::PROGRAM, err);
            return 2;
        }
    }

    if sink.errseen() {
        2
    } else if matched {
        0
    } else {
        1
    }
}

/// One worker: compile, then drain the queue. Returns whether any
/// assigned file had a selected line.
fn worker_loop(cfg: &Config, queue: &WorkQueue, sink: &OutputSink) -> bool {
    let matcher: Box<dyn Matcher> = match cfg.pattern_set.compile() {
        Ok(m) => m,
        Err(e) => {
            // Compilation is validated up front, so this is unexpected;
            // keep draining so the producer never blocks on a full queue.
            sink.report_message(cfg, &e.to_string());
            while queue.dequeue().is_some() {}
            return false;
        }
    };
    let mut buf = ScanBuffer::new();
    let mut matched = false;
    let mut files = 0u64;

    while let Some(item) = queue.dequeue() {
        files += 1;
        let count = scan_item(cfg, matcher.as_ref(), sink, &mut buf, item);
        matched |= count > 0;
    }

    debug!(files, matched, "worker done");
    matched
}

fn scan_item(
    cfg: &Config,
    matcher: &dyn Matcher,
    sink: &OutputSink,
    buf: &mut ScanBuffer,
    item: WorkItem,
) -> u64 {
    let WorkItem {
        source,
        name,
        metadata,
    } = item;
    let size_hint = metadata
        .as_ref()
        .filter(|m| m.is_file())
        .map(|m| m.len());

    let mut scanner = FileScanner::new(cfg, matcher, sink, buf, &name);
    let count = match source {
        FileSource::File(mut file) => scanner.run(&mut file, size_hint),
        FileSource::Stdin => scanner.run(&mut std::io::stdin(), None),
    };

    if cfg.count_matches {
        let mut st = sink.lock();
        if cfg.out_file {
            printer::print_filename(&mut st, cfg, &name);
            if cfg.null_filename {
                st.write_byte(0);
            } else {
                printer::print_sep(&mut st, cfg, SEP_CHAR_SELECTED);
            }
        }
        st.write(count.to_string().as_bytes());
        st.write_byte(b'\n');
        if cfg.line_buffered {
            st.flush();
        }
    }

    let listed = match cfg.list_mode {
        ListMode::Matching => count > 0,
        ListMode::NonMatching => count == 0,
        ListMode::None => false,
    };
    if listed {
        let mut st = sink.lock();
        printer::print_filename(&mut st, cfg, &name);
        st.write_byte(if cfg.null_filename { 0 } else { b'\n' });
        if cfg.line_buffered {
            st.flush();
        }
    }

    count
}
