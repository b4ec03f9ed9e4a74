use std::path::PathBuf;

/// Assembly-wide options, populated from the command line.
#[derive(Debug, Clone)]
pub struct Options {
    /// Filler emitted by `DS` and by padded `ALIGN`s in ROM sections.
    pub pad_byte: u8,
    /// Directories searched by `INCLUDE` and `INCBIN`.
    pub include_paths: Vec<PathBuf>,
    /// Maximum nesting of INCLUDE/REPT/FOR contexts.
    pub max_recursion_depth: usize,
    /// Default fractional precision for `f` format specs, in bits (1..=31).
    pub q_precision: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pad_byte: 0,
            include_paths: Vec::new(),
            max_recursion_depth: 64,
            q_precision: 16,
        }
    }
}
