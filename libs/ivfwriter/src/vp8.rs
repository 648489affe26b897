use bytes::{Bytes, BytesMut};

use crate::assembler::{FrameAssembler, TimestampSpan};
use crate::codec::CodecKind;
use crate::error::{Error, Result};

/// VP8 RTP payload descriptor (RFC 7741 section 4.2).
///
/// ```text
///       0 1 2 3 4 5 6 7
///      +-+-+-+-+-+-+-+-+
///      |X|R|N|S|R| PID | (REQUIRED)
///      +-+-+-+-+-+-+-+-+
/// X:   |I|L|T|K| RSV   | (OPTIONAL)
///      +-+-+-+-+-+-+-+-+
/// I:   |M| PictureID   | (OPTIONAL, M extends it to 15 bits)
///      +-+-+-+-+-+-+-+-+
/// L:   |   TL0PICIDX   | (OPTIONAL)
///      +-+-+-+-+-+-+-+-+
/// T/K: |TID|Y| KEYIDX  | (OPTIONAL)
///      +-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug)]
pub struct Vp8Descriptor {
    pub start_of_partition: bool,
    pub partition_index: u8,
    pub descriptor_len: usize,
    /// The whole RTP payload, descriptor included, as re-emitted into the frame.
    pub payload: Bytes,
}

impl Vp8Descriptor {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let first = *payload
            .first()
            .ok_or_else(|| Error::invalid_payload("empty VP8 payload"))?;

        let mut index = 1;
        if first & 0x80 != 0 {
            let ext = *payload
                .get(index)
                .ok_or_else(|| Error::invalid_payload("VP8 extension byte missing"))?;
            index += 1;

            if ext & 0x80 != 0 {
                let picture_id = *payload
                    .get(index)
                    .ok_or_else(|| Error::invalid_payload("VP8 picture id missing"))?;
                index += if picture_id & 0x80 != 0 { 2 } else { 1 };
            }
            if ext & 0x40 != 0 {
                index += 1;
            }
            if ext & 0x30 != 0 {
                index += 1;
            }
        }

        if payload.len() <= index {
            return Err(Error::invalid_payload(format!(
                "VP8 payload too short: {} bytes, descriptor needs {}",
                payload.len(),
                index + 1
            )));
        }

        Ok(Self {
            start_of_partition: first & 0x10 != 0,
            partition_index: first & 0x07,
            descriptor_len: index,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Low bit of the first payload byte. `0` marks a keyframe, `1` an interframe.
    pub fn keyframe_bit(&self) -> u8 {
        self.payload[0] & 0x01
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe_bit() == 0
    }
}

/// Accumulates VP8 payloads until the marker bit closes the frame.
///
/// Nothing is buffered before the first keyframe that starts a partition.
#[derive(Debug, Default)]
pub struct Vp8Assembler {
    current_frame: Option<BytesMut>,
    seen_key_frame: bool,
    first_timestamp: Option<u32>,
    last_timestamp: Option<u32>,
}

impl Vp8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_key_frame(&self) -> bool {
        self.seen_key_frame
    }

    /// Returns `Some(frame)` when the marker bit completes a non-empty frame.
    pub fn push(&mut self, payload: &[u8], marker: bool, timestamp: u32) -> Result<Option<Bytes>> {
        if payload.is_empty() {
            return Ok(None);
        }

        let descriptor = Vp8Descriptor::parse(payload)?;

        if !self.seen_key_frame && !descriptor.is_keyframe() {
            tracing::trace!("[vp8] waiting for keyframe, dropping ts={}", timestamp);
            return Ok(None);
        }
        if self.current_frame.is_none() && !descriptor.start_of_partition {
            tracing::trace!("[vp8] no partition start, dropping ts={}", timestamp);
            return Ok(None);
        }
        if !self.seen_key_frame {
            tracing::debug!("[vp8] first keyframe at ts={}", timestamp);
            self.seen_key_frame = true;
            self.first_timestamp = Some(timestamp);
        }

        self.current_frame
            .get_or_insert_with(BytesMut::new)
            .extend_from_slice(&descriptor.payload);

        if !marker {
            return Ok(None);
        }

        match self.current_frame.take() {
            Some(frame) if !frame.is_empty() => {
                self.last_timestamp = Some(timestamp);
                tracing::trace!("[vp8] frame complete: size={}, ts={}", frame.len(), timestamp);
                Ok(Some(frame.freeze()))
            }
            _ => Ok(None),
        }
    }
}

impl FrameAssembler for Vp8Assembler {
    fn codec(&self) -> CodecKind {
        CodecKind::Vp8
    }

    fn push_payload(
        &mut self,
        payload: &[u8],
        marker: bool,
        timestamp: u32,
    ) -> Result<Vec<Bytes>> {
        Ok(self.push(payload, marker, timestamp)?.into_iter().collect())
    }

    fn timestamp_span(&self) -> Option<TimestampSpan> {
        Some(TimestampSpan {
            first: self.first_timestamp?,
            last: self.last_timestamp?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reads_start_and_partition() {
        let desc = Vp8Descriptor::parse(&[0x13, 0xAA]).unwrap();
        assert!(desc.start_of_partition);
        assert_eq!(desc.partition_index, 3);
        assert_eq!(desc.descriptor_len, 1);
        assert_eq!(desc.keyframe_bit(), 1);

        let desc = Vp8Descriptor::parse(&[0x00, 0xAA]).unwrap();
        assert!(!desc.start_of_partition);
        assert!(desc.is_keyframe());
    }

    #[test]
    fn descriptor_walks_extensions() {
        // X + I with 15-bit picture id + L + T
        let payload = [0x90, 0xE0, 0x81, 0x02, 0x05, 0x40, 0x9D];
        let desc = Vp8Descriptor::parse(&payload).unwrap();
        assert_eq!(desc.descriptor_len, 6);
        assert_eq!(desc.payload.as_ref(), &payload);
    }

    #[test]
    fn descriptor_rejects_truncated_payloads() {
        assert!(matches!(
            Vp8Descriptor::parse(&[]),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Vp8Descriptor::parse(&[0x10]),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Vp8Descriptor::parse(&[0x90]),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Vp8Descriptor::parse(&[0x90, 0x80, 0x81]),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn drops_everything_before_keyframe() {
        let mut assembler = Vp8Assembler::new();
        assert!(assembler.push(&[0x11, 0x01], true, 100).unwrap().is_none());
        assert!(assembler.push(&[0x11, 0x02, 0x03], true, 200).unwrap().is_none());
        assert!(!assembler.seen_key_frame());
        assert_eq!(assembler.timestamp_span(), None);
    }

    #[test]
    fn single_packet_keyframe() {
        let mut assembler = Vp8Assembler::new();
        let frame = assembler.push(&[0x10, 0xAA, 0xBB], true, 3000).unwrap();
        assert_eq!(frame.unwrap().as_ref(), &[0x10, 0xAA, 0xBB]);
        assert_eq!(
            assembler.timestamp_span(),
            Some(TimestampSpan {
                first: 3000,
                last: 3000
            })
        );
    }

    #[test]
    fn fragments_are_concatenated_until_marker() {
        let mut assembler = Vp8Assembler::new();
        assert!(assembler.push(&[0x10, 0x01], false, 90).unwrap().is_none());
        let frame = assembler.push(&[0x02, 0x03], true, 90).unwrap();
        assert_eq!(frame.unwrap().as_ref(), &[0x10, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn continuation_without_partition_start_is_dropped() {
        let mut assembler = Vp8Assembler::new();
        // keyframe bit 0 but S=0 and nothing buffered
        assert!(assembler.push(&[0x00, 0x01], true, 10).unwrap().is_none());
        assert!(!assembler.seen_key_frame());

        assembler.push(&[0x10, 0x01], true, 20).unwrap();
        assert!(assembler.seen_key_frame());
        assert!(assembler.push(&[0x01, 0x02], true, 30).unwrap().is_none());
        assert_eq!(assembler.timestamp_span().unwrap().last, 20);
    }

    #[test]
    fn interframes_follow_after_sync() {
        let mut assembler = Vp8Assembler::new();
        assembler.push(&[0x10, 0x00], true, 0).unwrap();
        let frame = assembler.push(&[0x11, 0x05], true, 3000).unwrap();
        assert_eq!(frame.unwrap().as_ref(), &[0x11, 0x05]);
        assert_eq!(
            assembler.timestamp_span(),
            Some(TimestampSpan {
                first: 0,
                last: 3000
            })
        );
    }

    #[test]
    fn invalid_payload_keeps_partial_frame() {
        let mut assembler = Vp8Assembler::new();
        assembler.push(&[0x10, 0x01], false, 0).unwrap();
        assert!(assembler.push(&[0x90], true, 0).is_err());
        let frame = assembler.push(&[0x00, 0x02], true, 0).unwrap();
        assert_eq!(frame.unwrap().as_ref(), &[0x10, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn empty_payload_is_ignored() {
        let mut assembler = Vp8Assembler::new();
        assert!(assembler.push(&[], true, 0).unwrap().is_none());
        assert!(!assembler.seen_key_frame());
    }
}
