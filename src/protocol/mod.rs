//! RFC 6455 wire format: opcodes, frame headers, masking and the HTTP upgrade.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, encode_frame};
pub use handshake::{
    ClientRequest, HandshakeRequest, HandshakeResponse, HttpRequestHead, Negotiation, WS_GUID,
    compute_accept_key,
};
pub use mask::{apply_mask, apply_mask_at};
pub use opcode::OpCode;
pub use validation::FrameValidator;
