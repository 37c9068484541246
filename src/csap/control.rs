//! The CSAP control frame.
//!
//! Every CSAP message starts with one TEXT frame of exactly 82 ASCII bytes:
//!
//! ```text
//! UsrCtlSize(20) DataSize(20) NumFragments(20) MaxFragmentSize(20) Format(1) Fin(1)
//! ```
//!
//! Counters are zero-padded decimal so the frame survives EBCDIC/ASCII
//! conversion unchanged. Format is `1` for text and `2` for binary, Fin is
//! `0` or `1`.

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Encoded size of a control frame.
pub const CONTROL_FRAME_LEN: usize = 82;

const COUNTER_WIDTH: usize = 20;

/// Payload format of the fragments that follow a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Fragments are TEXT frames.
    #[default]
    Text,
    /// Fragments are BINARY frames.
    Binary,
}

impl Format {
    /// WebSocket opcode carrying fragments of this format.
    #[must_use]
    pub const fn opcode(self) -> OpCode {
        match self {
            Format::Text => OpCode::Text,
            Format::Binary => OpCode::Binary,
        }
    }

    const fn wire(self) -> u8 {
        match self {
            Format::Text => b'1',
            Format::Binary => b'2',
        }
    }
}

/// Decoded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFrame {
    /// Size of the user-control block that follows, 0 if none.
    pub user_ctl_size: usize,
    /// Total payload across all fragments.
    pub data_size: usize,
    /// Number of fragment frames that follow.
    pub num_fragments: usize,
    /// Size of the largest fragment.
    pub max_fragment_size: usize,
    /// Fragment format.
    pub format: Format,
    /// Last message of a logical exchange.
    pub fin: bool,
}

impl ControlFrame {
    /// Encode into the fixed 82-byte layout.
    #[must_use]
    pub fn encode(&self) -> [u8; CONTROL_FRAME_LEN] {
        let text = format!(
            "{:020}{:020}{:020}{:020}",
            self.user_ctl_size, self.data_size, self.num_fragments, self.max_fragment_size
        );
        let mut out = [0u8; CONTROL_FRAME_LEN];
        out[..4 * COUNTER_WIDTH].copy_from_slice(text.as_bytes());
        out[80] = self.format.wire();
        out[81] = if self.fin { b'1' } else { b'0' };
        out
    }

    /// Decode the fixed 82-byte layout.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidControlFrame` if the length is wrong, a counter
    /// holds anything but digits or does not fit in `usize`, or the format
    /// or fin flag is out of range.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != CONTROL_FRAME_LEN {
            return Err(Error::InvalidControlFrame(format!(
                "expected {CONTROL_FRAME_LEN} bytes, got {}",
                data.len()
            )));
        }

        let counter = |index: usize| -> Result<usize> {
            let field = &data[index * COUNTER_WIDTH..(index + 1) * COUNTER_WIDTH];
            if !field.iter().all(u8::is_ascii_digit) {
                return Err(Error::InvalidControlFrame(format!(
                    "counter {index} is not decimal"
                )));
            }
            // all ASCII digits, so valid UTF-8
            let text = std::str::from_utf8(field).unwrap_or_default();
            text.parse::<u64>()
                .ok()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| Error::InvalidControlFrame(format!("counter {index} overflows")))
        };

        let format = match data[80] {
            b'1' => Format::Text,
            b'2' => Format::Binary,
            other => {
                return Err(Error::InvalidControlFrame(format!(
                    "unknown format {:?}",
                    char::from(other)
                )));
            }
        };
        let fin = match data[81] {
            b'0' => false,
            b'1' => true,
            other => {
                return Err(Error::InvalidControlFrame(format!(
                    "unknown fin flag {:?}",
                    char::from(other)
                )));
            }
        };

        Ok(Self {
            user_ctl_size: counter(0)?,
            data_size: counter(1)?,
            num_fragments: counter(2)?,
            max_fragment_size: counter(3)?,
            format,
            fin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ControlFrame {
        ControlFrame {
            user_ctl_size: 12,
            data_size: 7,
            num_fragments: 2,
            max_fragment_size: 4,
            format: Format::Text,
            fin: true,
        }
    }

    #[test]
    fn test_encode_layout() {
        let wire = sample().encode();
        let text = std::str::from_utf8(&wire).unwrap();
        assert_eq!(
            text,
            "00000000000000000012\
             00000000000000000007\
             00000000000000000002\
             00000000000000000004\
             11"
        );
    }

    #[test]
    fn test_decode_encoded() {
        let mut frame = sample();
        frame.format = Format::Binary;
        frame.fin = false;
        assert_eq!(ControlFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        // old single-block layout
        assert!(matches!(
            ControlFrame::decode(&[b'0'; 80]),
            Err(Error::InvalidControlFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_digits() {
        let mut wire = sample().encode();
        wire[25] = b' ';
        assert!(matches!(
            ControlFrame::decode(&wire),
            Err(Error::InvalidControlFrame(msg)) if msg.contains("counter 1")
        ));
    }

    #[test]
    fn test_decode_rejects_bad_flags() {
        let mut wire = sample().encode();
        wire[80] = b'3';
        assert!(ControlFrame::decode(&wire).is_err());

        let mut wire = sample().encode();
        wire[81] = b'Y';
        assert!(ControlFrame::decode(&wire).is_err());
    }

    #[test]
    fn test_decode_rejects_overflowing_counter() {
        let mut wire = sample().encode();
        wire[..20].copy_from_slice(b"99999999999999999999");
        assert!(matches!(
            ControlFrame::decode(&wire),
            Err(Error::InvalidControlFrame(msg)) if msg.contains("overflows")
        ));
    }

    #[test]
    fn test_format_opcode() {
        assert_eq!(Format::Text.opcode(), OpCode::Text);
        assert_eq!(Format::Binary.opcode(), OpCode::Binary);
    }
}
