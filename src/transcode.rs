//! Text transcoding between the host's local charset and UTF-8.
//!
//! WebSocket text frames always carry UTF-8. Hosts whose native text is in
//! another charset plug a [`TextTranscoder`] into the channel; binary
//! payloads are never touched.

use crate::error::{Error, Result};

/// Converts text between the local charset and UTF-8.
pub trait TextTranscoder: Send + Sync {
    /// Append the UTF-8 form of `local` to `out`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transcode` if `local` is not valid in the local charset.
    fn to_utf8(&self, local: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Append the local form of `utf8` to `out`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` if `utf8` is not valid UTF-8.
    fn to_local(&self, utf8: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Whether both directions are the identity, letting callers skip copies.
    fn is_identity(&self) -> bool {
        false
    }
}

/// Local charset is UTF-8; text passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Passthrough;

impl TextTranscoder for Utf8Passthrough {
    fn to_utf8(&self, local: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(local);
        Ok(())
    }

    fn to_local(&self, utf8: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(utf8);
        Ok(())
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Local charset is ISO-8859-1.
///
/// Characters above U+00FF have no local form and become `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1Transcoder;

impl TextTranscoder for Latin1Transcoder {
    fn to_utf8(&self, local: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(local.len());
        let mut tmp = [0u8; 4];
        for &b in local {
            out.extend_from_slice(char::from(b).encode_utf8(&mut tmp).as_bytes());
        }
        Ok(())
    }

    fn to_local(&self, utf8: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let text = std::str::from_utf8(utf8).map_err(|_| Error::InvalidUtf8)?;
        out.reserve(text.len());
        out.extend(text.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_identity() {
        let t = Utf8Passthrough;
        let mut out = Vec::new();
        t.to_local("héllo".as_bytes(), &mut out).unwrap();
        assert_eq!(out, "héllo".as_bytes());
        assert!(t.is_identity());
    }

    #[test]
    fn test_latin1_to_utf8() {
        let mut out = Vec::new();
        Latin1Transcoder.to_utf8(&[b'c', 0xE9, b'!'], &mut out).unwrap();
        assert_eq!(out, "cé!".as_bytes());
    }

    #[test]
    fn test_latin1_to_local_replaces_unmappable() {
        let mut out = Vec::new();
        Latin1Transcoder.to_local("é€".as_bytes(), &mut out).unwrap();
        assert_eq!(out, vec![0xE9, b'?']);
    }

    #[test]
    fn test_latin1_rejects_invalid_utf8() {
        let mut out = Vec::new();
        assert_eq!(
            Latin1Transcoder.to_local(&[0xC3], &mut out),
            Err(Error::InvalidUtf8)
        );
    }

    #[test]
    fn test_latin1_appends() {
        let mut out = b"x".to_vec();
        Latin1Transcoder.to_utf8(b"y", &mut out).unwrap();
        assert_eq!(out, b"xy");
        assert!(!Latin1Transcoder.is_identity());
    }
}
