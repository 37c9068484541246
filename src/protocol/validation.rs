//! Incoming frame validation.
//!
//! Enforces the role-dependent masking rule (RFC 6455 section 5.1), the
//! structural header rules and the configured frame size limit.

use crate::channel::Role;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::FrameHeader;

/// Validator for frame headers read by a channel.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
}

impl FrameValidator {
    /// Create a validator for the given role.
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
        }
    }

    /// Let a server accept unmasked client frames.
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Validate a header before its payload is read.
    ///
    /// Checks run in order: masking, structure, size.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - server received an unmasked frame
    /// - `Error::MaskedServerFrame` - client received a masked frame
    /// - errors from [`FrameHeader::validate`]
    /// - `Error::FrameTooLarge` - payload exceeds `max_frame_size`
    pub fn validate_incoming(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        if self.role.expects_masked() && !masked && !self.accept_unmasked_frames {
            return Err(Error::UnmaskedClientFrame);
        }
        if !self.role.expects_masked() && masked {
            return Err(Error::MaskedServerFrame);
        }
        header.validate()?;
        self.limits.check_frame_size(header.payload_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn header(masked: bool, len: usize) -> FrameHeader {
        FrameHeader::new(true, OpCode::Binary, len, masked.then_some([1, 2, 3, 4]))
    }

    // --------------------------------------------------------------------------
    // Masking (RFC 6455 Section 5.1)
    // --------------------------------------------------------------------------

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let validator = FrameValidator::new(Role::Server, Limits::default());
        assert_eq!(
            validator.validate_incoming(&header(false, 10)),
            Err(Error::UnmaskedClientFrame)
        );
    }

    #[test]
    fn test_server_accepts_masked_client_frame() {
        let validator = FrameValidator::new(Role::Server, Limits::default());
        assert!(validator.validate_incoming(&header(true, 10)).is_ok());
    }

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Role::Client, Limits::default());
        assert_eq!(
            validator.validate_incoming(&header(true, 10)),
            Err(Error::MaskedServerFrame)
        );
    }

    #[test]
    fn test_server_accepts_unmasked_when_configured() {
        let validator =
            FrameValidator::new(Role::Server, Limits::default()).with_accept_unmasked(true);
        assert!(validator.validate_incoming(&header(false, 10)).is_ok());
    }

    // --------------------------------------------------------------------------
    // Structure and size
    // --------------------------------------------------------------------------

    #[test]
    fn test_rejects_rsv_bits() {
        let validator = FrameValidator::new(Role::Client, Limits::default());
        let mut h = header(false, 0);
        h.rsv = 0x40;
        assert_eq!(validator.validate_incoming(&h), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_masking_checked_before_rsv() {
        let validator = FrameValidator::new(Role::Server, Limits::default());
        let mut h = header(false, 0);
        h.rsv = 0x10;
        assert_eq!(validator.validate_incoming(&h), Err(Error::UnmaskedClientFrame));
    }

    #[test]
    fn test_embedded_limits_reject_large_frames() {
        let validator = FrameValidator::new(Role::Client, Limits::embedded());
        assert!(validator.validate_incoming(&header(false, 64 * 1024)).is_ok());
        assert_eq!(
            validator.validate_incoming(&header(false, 64 * 1024 + 1)),
            Err(Error::FrameTooLarge {
                size: 64 * 1024 + 1,
                max: 64 * 1024
            })
        );
    }
}
