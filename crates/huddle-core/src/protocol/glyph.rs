//! Glyph bit matrices.
//!
//! The engine assigns each client a square glyph, sent as a flat row-major
//! string of `'0'`/`'1'` characters. Turning the matrix into pixels is the job
//! of a [`crate::overlay::GlyphRenderer`].

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlyphError {
    #[error("Glyph data is empty")]
    Empty,

    #[error("Glyph data length {0} is not a perfect square")]
    NotSquare(usize),

    #[error("Invalid glyph bit {0:?}")]
    InvalidBit(char),
}

/// A square matrix of glyph cells, `true` meaning a white cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphMatrix {
    rows: Vec<Vec<bool>>,
}

impl GlyphMatrix {
    pub fn parse(data: &str) -> Result<Self, GlyphError> {
        let bits = data
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(GlyphError::InvalidBit(other)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if bits.is_empty() {
            return Err(GlyphError::Empty);
        }

        let dim = bits.len().isqrt();
        if dim * dim != bits.len() {
            return Err(GlyphError::NotSquare(bits.len()));
        }

        Ok(Self {
            rows: bits.chunks(dim).map(<[bool]>::to_vec).collect(),
        })
    }

    /// Number of cells per side.
    pub fn dimension(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<bool>] {
        &self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }
}

/// A rendered glyph, ready to be shown by an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl GlyphImage {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }
}
