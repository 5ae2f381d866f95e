//! Recursive character text splitter.
//!
//! Long literal values are split into overlapping windows of at most
//! `chunk_size` characters. Within each window the splitter looks for the
//! coarsest available boundary (paragraph, line, sentence, word) and cuts after
//! the last one it finds, falling back to a raw character cut. Each chunk after
//! the first starts exactly `overlap` characters before the previous chunk's
//! end, so the chunks always cover the whole text.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Boundaries tried in order of preference.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

/// A chunk of text together with its character span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
  pub index: usize,
  /// Start offset in characters (inclusive).
  pub start: usize,
  /// End offset in characters (exclusive).
  pub end:   usize,
  pub text:  String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSplitter {
  pub chunk_size: usize,
  pub overlap:    usize,
}

impl Default for TextSplitter {
  fn default() -> Self {
    Self { chunk_size: DEFAULT_CHUNK_SIZE, overlap: DEFAULT_CHUNK_OVERLAP }
  }
}

impl TextSplitter {
  pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
    let splitter = Self { chunk_size, overlap };
    splitter.validate()?;
    Ok(splitter)
  }

  /// Reject configurations that could not make forward progress.
  pub fn validate(&self) -> Result<()> {
    if self.chunk_size == 0 || self.overlap >= self.chunk_size {
      return Err(Error::InvalidChunkConfig {
        size:    self.chunk_size,
        overlap: self.overlap,
      });
    }
    Ok(())
  }

  /// Split `text` into chunks. Empty text yields no chunks; text of at most
  /// `chunk_size` characters yields exactly one.
  pub fn split(&self, text: &str) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
      return vec![];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
      let remaining = chars.len() - start;
      if remaining <= self.chunk_size {
        chunks.push(make_chunk(&chars, chunks.len(), start, chars.len()));
        break;
      }

      let end = self.find_cut(&chars, start);
      chunks.push(make_chunk(&chars, chunks.len(), start, end));
      start = end - self.overlap;
    }
    chunks
  }

  /// Choose the end of the chunk beginning at `start`. The cut always lies in
  /// `(start + overlap, start + chunk_size]` so the next chunk advances.
  fn find_cut(&self, chars: &[char], start: usize) -> usize {
    let window_end = start + self.chunk_size;
    let min_cut = start + self.overlap + 1;

    for sep in SEPARATORS {
      let sep: Vec<char> = sep.chars().collect();
      if let Some(cut) = last_boundary(chars, &sep, min_cut, window_end) {
        return cut;
      }
    }
    window_end
  }
}

/// Offset just past the last occurrence of `sep` whose end lies in
/// `[min_cut, max_cut]`.
fn last_boundary(chars: &[char], sep: &[char], min_cut: usize, max_cut: usize) -> Option<usize> {
  let mut cut = max_cut;
  while cut >= min_cut && cut >= sep.len() {
    if chars[cut - sep.len()..cut] == *sep {
      return Some(cut);
    }
    cut -= 1;
  }
  None
}

fn make_chunk(chars: &[char], index: usize, start: usize, end: usize) -> TextChunk {
  TextChunk { index, start, end, text: chars[start..end].iter().collect() }
}
