//! CoAP tokens: short, caller-chosen byte strings that correlate a
//! notification back to the request that created the observation.

use std::fmt;

/// CoAP tokens are at most 8 bytes by protocol definition (RFC 7252 §3).
pub const TOKEN_MAX_LEN: usize = 8;

/// A CoAP token, stored inline (never heap-allocated).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
  bytes: [u8; TOKEN_MAX_LEN],
  len: u8,
}

impl Token {
  pub fn empty() -> Self {
    Self {
      bytes: [0; TOKEN_MAX_LEN],
      len: 0,
    }
  }

  /// Builds a token from a byte slice, truncating to [`TOKEN_MAX_LEN`]
  /// bytes. A slice longer than that indicates a misbehaving message
  /// layer, not a valid CoAP token; truncating rather than panicking keeps
  /// subscriber registration robust against it.
  pub fn new(raw: &[u8]) -> Self {
    let len = raw.len().min(TOKEN_MAX_LEN);
    if raw.len() > TOKEN_MAX_LEN {
      log::warn!(
        "token length {} exceeds {TOKEN_MAX_LEN}, truncating",
        raw.len()
      );
    }
    let mut bytes = [0u8; TOKEN_MAX_LEN];
    bytes[..len].copy_from_slice(&raw[..len]);
    Self {
      bytes,
      len: len as u8,
    }
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.bytes[..self.len as usize]
  }

  pub fn len(&self) -> usize {
    self.len as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Token(")?;
    for b in self.as_slice() {
      write!(f, "{b:02X}")?;
    }
    write!(f, ")")
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.as_slice() {
      write!(f, "{b:02X}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncates_overlong_token() {
    let t = Token::new(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(t.len(), 8);
    assert_eq!(t.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
  }

  #[test]
  fn keeps_short_token_verbatim() {
    let t = Token::new(&[0xAB, 0xCD]);
    assert_eq!(t.as_slice(), &[0xAB, 0xCD]);
  }

  #[test]
  fn display_is_hex() {
    let t = Token::new(&[0xAB, 0xCD]);
    assert_eq!(format!("{t}"), "ABCD");
  }

  #[test]
  fn empty_token_is_empty() {
    assert!(Token::empty().is_empty());
  }
}
