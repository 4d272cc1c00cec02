pub mod decode;
pub mod frame;
pub mod slot;

pub use decode::{decode_line, DecodeSummary, DecoderSettings, DecoderThread, FrameDecoder};
pub use frame::SpectrumFrame;
pub use slot::FrameSlot;
