use core::fmt;
use core::str::FromStr;

use crate::{Error, Result};

/// Number of characters in every code.
pub const CODE_LEN: usize = 8;

/// The alphabet codes are drawn from.
pub const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Size of the code space, `26^8`.
pub const CODE_SPACE: u64 = 26u64.pow(CODE_LEN as u32);

/// A validated referral code: exactly [`CODE_LEN`] ASCII uppercase letters.
///
/// The same value is written to the primary entity's code column and the
/// secondary entity's referral column, so the type is the unit of uniqueness
/// shared by both stores.
///
/// # Example
/// ```
/// use refcode::Code;
///
/// let code: Code = "ABCDEFGH".parse().unwrap();
/// assert_eq!(code.as_str(), "ABCDEFGH");
/// assert!("abcdefgh".parse::<Code>().is_err());
/// assert!("ABCDEFG".parse::<Code>().is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code([u8; CODE_LEN]);

impl Code {
    /// Builds a code from its index in the code space.
    ///
    /// The index is written in base 26, most significant letter first, so
    /// `0` maps to `AAAAAAAA` and `CODE_SPACE - 1` to `ZZZZZZZZ`. Indices at
    /// or beyond [`CODE_SPACE`] wrap.
    pub const fn from_index(mut index: u64) -> Self {
        let mut bytes = [b'A'; CODE_LEN];
        let mut i = CODE_LEN;
        while i > 0 {
            i -= 1;
            bytes[i] = ALPHABET[(index % 26) as usize];
            index /= 26;
        }
        Self(bytes)
    }

    pub fn as_str(&self) -> &str {
        // Every byte is in `A..=Z`, which is valid single-byte UTF-8.
        core::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Returns `true` if `s` has the exact shape of a code.
    pub fn is_valid(s: &str) -> bool {
        s.len() == CODE_LEN && s.bytes().all(|b| b.is_ascii_uppercase())
    }
}

impl FromStr for Code {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !Self::is_valid(s) {
            return Err(Error::decode(format!(
                "`{s}` is not {CODE_LEN} uppercase ASCII letters"
            )));
        }
        let mut bytes = [0u8; CODE_LEN];
        bytes.copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Code {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_bounds_map_to_first_and_last_code() {
        assert_eq!(Code::from_index(0).as_str(), "AAAAAAAA");
        assert_eq!(Code::from_index(1).as_str(), "AAAAAAAB");
        assert_eq!(Code::from_index(26).as_str(), "AAAAAABA");
        assert_eq!(Code::from_index(CODE_SPACE - 1).as_str(), "ZZZZZZZZ");
        assert_eq!(Code::from_index(CODE_SPACE), Code::from_index(0));
    }

    #[test]
    fn parse_rejects_wrong_shape() {
        assert!("ABCDEFGH".parse::<Code>().is_ok());
        assert!("ABCDEFG".parse::<Code>().is_err());
        assert!("ABCDEFGHI".parse::<Code>().is_err());
        assert!("ABCDEFG1".parse::<Code>().is_err());
        assert!("ABCDEFGh".parse::<Code>().is_err());
        assert!("ÀBCDEFG".parse::<Code>().is_err());
        assert!("".parse::<Code>().is_err());
    }

    #[test]
    fn display_matches_input() {
        let code: Code = "QWERTYUI".parse().unwrap();
        assert_eq!(code.to_string(), "QWERTYUI");
        assert_eq!(format!("{code:?}"), "Code(QWERTYUI)");
    }
}
