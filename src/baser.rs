use crate::error::{Error, Result};

/// Digit alphabet shared by every supported base. The first 36 entries are
/// the usual base-36 digits; the remaining 26 are the code points `d + 29`
/// for `d` in `36..62`.
const ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Functor for a given base. Will convert natural numbers to packer symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baser {
    /// The numeric base for conversion (2-62)
    base: usize,
}

impl Baser {
    /// Creates a new `Baser` for the given base.
    ///
    /// # Supported bases
    ///
    /// - **2 to 36**: digits and lowercase letters, as produced by
    ///   `Number.prototype.toString(base)`.
    /// - **37 to 62**: digits, lowercase letters, then uppercase letters for
    ///   digit values 36 through 61.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedBase`] if the base is outside `2..=62`.
    pub fn new(base: usize) -> Result<Self> {
        match base {
            2..=62 => Ok(Self { base }),
            _ => Err(Error::UnsupportedBase(base)),
        }
    }

    /// Renders `value` as a packer symbol.
    ///
    /// Values below the base are a single character; larger values carry
    /// into more significant digits, so `encode(base) == "10"`.
    pub fn encode(&self, mut value: usize) -> String {
        let mut digits = Vec::new();
        loop {
            digits.push(ALPHANUMERIC[value % self.base]);
            value /= self.base;
            if value == 0 {
                break;
            }
        }
        digits.iter().rev().map(|&digit| char::from(digit)).collect()
    }
}
