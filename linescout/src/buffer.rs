//! Input buffering for the scanner.
//!
//! The buffer holds one sliding window over the input. Reads are issued in
//! multiples of a fixed block size and appended after whatever prefix the
//! scanner asked to keep (the residue of an incomplete last line plus any
//! retained context). When the free tail is too small for another block
//! the allocation doubles, capped near the remaining file size when that
//! is known so a huge file does not force a huge allocation up front.
//!
//! One byte of slop is always kept past the window so the scanner can
//! append a synthetic end-of-line byte to a final unterminated line.

use std::io::Read;

/// Initial window size, not counting slop.
pub const INITIAL_BUFSIZE: usize = 32 * 1024;

/// Read granularity; fills ask the source for multiples of this.
pub const BLOCK_SIZE: usize = 4096;

#[derive(Debug)]
pub struct ScanBuffer {
    data: Vec<u8>,
    /// Start of the live window.
    pub(crate) beg: usize,
    /// One past the end of the live window.
    pub(crate) lim: usize,
    /// Absolute input offset of `lim`: total bytes consumed from the source.
    pub(crate) offset: u64,
    /// Skip blocks consisting entirely of NUL bytes.
    pub(crate) skip_nuls: bool,
}

impl ScanBuffer {
    pub fn new() -> Self {
        ScanBuffer {
            data: vec![0; INITIAL_BUFSIZE + 1],
            beg: 0,
            lim: 0,
            offset: 0,
            skip_nuls: false,
        }
    }

    /// Prepares the buffer for a new input.
    pub fn reset(&mut self, skip_nuls: bool) {
        self.beg = 0;
        self.lim = 0;
        self.offset = 0;
        self.skip_nuls = skip_nuls;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The live window.
    pub fn window(&self) -> &[u8] {
        &self.data[self.beg..self.lim]
    }

    /// Appends one end-of-line byte to the window. Used to terminate a
    /// final line the input left unterminated; the slop byte guarantees
    /// room.
    pub fn append_eol(&mut self, eol: u8) {
        self.data[self.lim] = eol;
        self.lim += 1;
    }

    /// Reads more data, keeping the trailing `save` bytes of the current
    /// window immediately before the newly read bytes. `size_hint` is the
    /// total input size when known, used to bound growth.
    ///
    /// Returns `(added, nul_bytes_skipped)`; `added == 0` means end of
    /// input. The skipped count is nonzero only in null-data skip mode,
    /// where all-NUL blocks are dropped and each dropped byte counts as
    /// one line terminator.
    pub fn fill(
        &mut self,
        src: &mut dyn Read,
        save: usize,
        size_hint: Option<u64>,
    ) -> std::io::Result<(usize, u64)> {
        debug_assert!(save <= self.lim - self.beg);

        let usable = self.data.len() - 1;
        let read_start;
        if usable - self.lim >= BLOCK_SIZE {
            // Enough tail room: read in place, window begins at the save.
            self.beg = self.lim - save;
            read_start = self.lim;
        } else {
            // Grow by doubling until the save plus one block fits, but try
            // not to allocate far past what the input can still supply.
            let minsize = save + BLOCK_SIZE;
            let mut newsize = usable;
            while newsize < minsize {
                newsize *= 2;
            }
            if let Some(total) = size_hint {
                let to_be_read = total.saturating_sub(self.offset);
                let cap = save as u64 + to_be_read;
                if cap >= minsize as u64 && cap < newsize as u64 {
                    newsize = cap as usize;
                }
            }
            self.data.copy_within(self.lim - save..self.lim, 0);
            if newsize + 1 > self.data.len() {
                self.data.resize(newsize + 1, 0);
            }
            self.beg = 0;
            self.lim = save;
            read_start = save;
        }

        // Both branches above leave at least one block of tail room.
        let readsize = (self.data.len() - 1 - read_start) / BLOCK_SIZE * BLOCK_SIZE;

        let mut skipped = 0u64;
        loop {
            let n = read_retrying(src, &mut self.data[read_start..read_start + readsize])?;
            self.offset += n as u64;
            if n == 0 || !self.skip_nuls || self.data[read_start..read_start + n].iter().any(|&b| b != 0)
            {
                self.lim = read_start + n;
                return Ok((n, skipped));
            }
            // A block of pure NULs in null-data mode: every byte is a line
            // terminator for an empty line the matcher will not select.
            skipped += n as u64;
        }
    }
}

impl Default for ScanBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn read_retrying(src: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match src.read(buf) {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = (self.data.len() - self.pos).min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_fill_reads_window() {
        let mut buf = ScanBuffer::new();
        buf.reset(false);
        let mut src = Cursor::new(b"hello\nworld\n".to_vec());
        let (n, _) = buf.fill(&mut src, 0, None).unwrap();
        assert_eq!(n, 12);
        assert_eq!(buf.window(), b"hello\nworld\n");
        assert_eq!(buf.offset, 12);
        let (n, _) = buf.fill(&mut src, 0, None).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_save_carries_residue() {
        let mut buf = ScanBuffer::new();
        buf.reset(false);
        let mut src = Trickle {
            data: b"partial-line-then\nrest\n".to_vec(),
            pos: 0,
            chunk: 7,
        };
        let (n, _) = buf.fill(&mut src, 0, None).unwrap();
        assert_eq!(n, 7);
        assert_eq!(buf.window(), b"partial");
        // Keep everything (it is all residue) and read more.
        let (n, _) = buf.fill(&mut src, 7, None).unwrap();
        assert_eq!(n, 7);
        assert_eq!(buf.window(), b"partial-line-t");
    }

    #[test]
    fn test_growth_preserves_saved_bytes() {
        let mut buf = ScanBuffer::new();
        buf.reset(false);
        // One line longer than the whole initial buffer.
        let big = vec![b'a'; INITIAL_BUFSIZE * 2 + 17];
        let mut src = Cursor::new(big.clone());
        let mut save = 0;
        loop {
            let (n, _) = buf.fill(&mut src, save, Some(big.len() as u64)).unwrap();
            if n == 0 {
                break;
            }
            save = buf.lim - buf.beg;
        }
        assert_eq!(buf.window().len(), big.len());
        assert!(buf.window().iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_growth_capped_by_size_hint() {
        let mut buf = ScanBuffer::new();
        buf.reset(false);
        let data = vec![b'x'; INITIAL_BUFSIZE + BLOCK_SIZE];
        let mut src = Cursor::new(data.clone());
        let mut save = 0;
        loop {
            let (n, _) = buf.fill(&mut src, save, Some(data.len() as u64)).unwrap();
            if n == 0 {
                break;
            }
            save = buf.lim - buf.beg;
        }
        assert_eq!(buf.window().len(), data.len());
        // The allocation stayed near the file size rather than doubling
        // all the way to the next power of two.
        assert!(buf.data.len() <= data.len() + BLOCK_SIZE + 1);
    }

    #[test]
    fn test_nul_block_skipping() {
        let mut buf = ScanBuffer::new();
        buf.reset(true);
        let mut data = vec![0u8; BLOCK_SIZE];
        data.extend_from_slice(b"tail\0");
        let mut src = Trickle {
            data,
            pos: 0,
            chunk: BLOCK_SIZE,
        };
        let (n, skipped) = buf.fill(&mut src, 0, None).unwrap();
        assert_eq!(skipped, BLOCK_SIZE as u64);
        assert_eq!(n, 5);
        assert_eq!(buf.window(), b"tail\0");
    }

    #[test]
    fn test_append_eol_after_full_read() {
        let mut buf = ScanBuffer::new();
        buf.reset(false);
        let mut src = Cursor::new(b"no newline".to_vec());
        buf.fill(&mut src, 0, None).unwrap();
        buf.append_eol(b'\n');
        assert_eq!(buf.window(), b"no newline\n");
    }
}
