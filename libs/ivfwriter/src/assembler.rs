use bytes::Bytes;

use crate::av1::Av1Assembler;
use crate::codec::CodecKind;
use crate::error::Result;
use crate::vp8::Vp8Assembler;

/// RTP timestamps of the first synchronised packet and of the latest completed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampSpan {
    pub first: u32,
    pub last: u32,
}

impl TimestampSpan {
    /// Elapsed RTP ticks, tolerating a single wraparound of the 32-bit timestamp.
    pub fn elapsed(&self) -> u32 {
        self.last.wrapping_sub(self.first)
    }
}

/// Turns an ordered stream of RTP payloads for one codec into complete coded frames.
///
/// Payloads are expected de-duplicated and in sequence-number order. An `Err` only
/// rejects the offending payload: state accumulated from earlier payloads is kept.
pub trait FrameAssembler: Send {
    fn codec(&self) -> CodecKind;

    /// Feed one RTP payload, returning the frames it completed (possibly none).
    fn push_payload(
        &mut self,
        payload: &[u8],
        marker: bool,
        timestamp: u32,
    ) -> Result<Vec<Bytes>>;

    /// `None` until at least one frame has been completed.
    fn timestamp_span(&self) -> Option<TimestampSpan>;
}

/// Factory helper to create the assembler matching a codec kind.
pub fn create_assembler(codec: CodecKind) -> Box<dyn FrameAssembler> {
    match codec {
        CodecKind::Vp8 => Box::new(Vp8Assembler::new()),
        CodecKind::Av1 => Box::new(Av1Assembler::new()),
    }
}
