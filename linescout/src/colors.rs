//! SGR color table for output highlighting.
//!
//! Colors are fixed escape strings, not terminfo capabilities. Each entry
//! holds the attribute portion of an SGR sequence (`01;31`, `35`, ...);
//! an empty string means "leave the terminal's default color pair alone".
//! The table can be overridden through the `GREP_COLORS` environment
//! variable (and the legacy single-attribute `GREP_COLOR`).

use crate::printer::SinkState;

/// Per-field color attributes plus the two boolean capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSpecs {
    /// `ms`: matched text on a selected line.
    pub selected_match: String,
    /// `mc`: matched text on a context line.
    pub context_match: String,
    /// `fn`: file name field.
    pub filename: String,
    /// `ln`: line number field.
    pub line_num: String,
    /// `bn`: byte offset field.
    pub byte_num: String,
    /// `se`: separator characters and the group separator.
    pub separator: String,
    /// `sl`: non-field bytes of a selected line.
    pub selected_line: String,
    /// `cx`: non-field bytes of a context line.
    pub context_line: String,
    /// `rv`: swap sl/cx when `--invert-match` is in effect.
    pub rv: bool,
    /// `ne`: drop the erase-to-end-of-line suffix from SGR sequences.
    pub ne: bool,
}

impl Default for ColorSpecs {
    fn default() -> Self {
        ColorSpecs {
            selected_match: "01;31".to_string(),
            context_match: "01;31".to_string(),
            filename: "35".to_string(),
            line_num: "32".to_string(),
            byte_num: "32".to_string(),
            separator: "36".to_string(),
            selected_line: String::new(),
            context_line: String::new(),
            rv: false,
            ne: false,
        }
    }
}

impl ColorSpecs {
    /// Builds the color table from the environment: the legacy `GREP_COLOR`
    /// first (a bare attribute string for matched text), then `GREP_COLORS`,
    /// which takes priority.
    pub fn from_env() -> Self {
        let mut specs = ColorSpecs::default();
        if let Ok(legacy) = std::env::var("GREP_COLOR") {
            if !legacy.is_empty() {
                specs.selected_match = legacy.clone();
                specs.context_match = legacy;
            }
        }
        if let Ok(val) = std::env::var("GREP_COLORS") {
            specs.parse_grep_colors(&val);
        }
        specs
    }

    /// Parses a `GREP_COLORS` value: colon-separated `cap=value` pairs.
    ///
    /// Values may contain only digits and `;`. Unknown capabilities are
    /// skipped for forward compatibility; a malformed field aborts parsing
    /// and leaves any assignments made so far in place.
    pub fn parse_grep_colors(&mut self, s: &str) {
        for field in s.split(':') {
            let (name, val) = match field.split_once('=') {
                Some((name, val)) => {
                    if name.is_empty() || val.contains('=') {
                        return;
                    }
                    if !val.bytes().all(|b| b.is_ascii_digit() || b == b';') {
                        return;
                    }
                    (name, Some(val))
                }
                None => (field, None),
            };
            match name {
                "mt" => {
                    if let Some(v) = val {
                        self.selected_match = v.to_string();
                    }
                    self.context_match = self.selected_match.clone();
                }
                "ms" => {
                    if let Some(v) = val {
                        self.selected_match = v.to_string();
                    }
                }
                "mc" => {
                    if let Some(v) = val {
                        self.context_match = v.to_string();
                    }
                }
                "fn" => {
                    if let Some(v) = val {
                        self.filename = v.to_string();
                    }
                }
                "ln" => {
                    if let Some(v) = val {
                        self.line_num = v.to_string();
                    }
                }
                "bn" => {
                    if let Some(v) = val {
                        self.byte_num = v.to_string();
                    }
                }
                "se" => {
                    if let Some(v) = val {
                        self.separator = v.to_string();
                    }
                }
                "sl" => {
                    if let Some(v) = val {
                        self.selected_line = v.to_string();
                    }
                }
                "cx" => {
                    if let Some(v) = val {
                        self.context_line = v.to_string();
                    }
                }
                "rv" => self.rv = true,
                "ne" => self.ne = true,
                // Unknown capability: ignore and keep going.
                _ => {}
            }
        }
    }

    /// Writes the SGR start sequence for `attrs`, if non-empty.
    ///
    /// The erase-to-end-of-line suffix keeps background colors from
    /// bleeding across hard tabs and wrapped lines; `ne` disables it.
    pub fn sgr_start(&self, st: &mut SinkState, attrs: &str) {
        if attrs.is_empty() {
            return;
        }
        st.write(b"\x1b[");
        st.write(attrs.as_bytes());
        st.write(b"m");
        if !self.ne {
            st.write(b"\x1b[K");
        }
    }

    /// Writes the SGR reset sequence, if `attrs` selected anything.
    pub fn sgr_end(&self, st: &mut SinkState, attrs: &str) {
        if attrs.is_empty() {
            return;
        }
        st.write(b"\x1b[m");
        if !self.ne {
            st.write(b"\x1b[K");
        }
    }
}
