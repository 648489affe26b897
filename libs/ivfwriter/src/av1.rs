use bytes::{BufMut, Bytes, BytesMut};

use crate::assembler::{FrameAssembler, TimestampSpan};
use crate::codec::CodecKind;
use crate::error::{Error, Result};

const MAX_OBU_SIZE: usize = 3 * 1024 * 1024;

const OBU_FORBIDDEN_BIT: u8 = 0x80;
const OBU_EXTENSION_FLAG: u8 = 0x04;
const OBU_HAS_SIZE_FIELD: u8 = 0x02;

/// Pulls complete OBUs out of AV1 RTP payloads.
///
/// Implementations keep whatever continuation state they need between calls; each call
/// returns the OBUs completed by that payload, in bitstream order.
pub trait ObuExtractor: Send {
    fn extract(&mut self, payload: &[u8]) -> Result<Vec<Bytes>>;
}

/// AV1 aggregation header, first byte of every AV1 RTP payload.
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |Z|Y| W |N|-|-|-|
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct AggregationHeader {
    /// First OBU element continues an OBU from the previous packet.
    z: bool,
    /// Last OBU element continues in the next packet.
    y: bool,
    /// Number of OBU elements, 0 when every element carries a length prefix.
    w: u8,
    /// First packet of a coded video sequence.
    n: bool,
}

impl AggregationHeader {
    fn parse(byte: u8) -> Self {
        Self {
            z: byte & 0x80 != 0,
            y: byte & 0x40 != 0,
            w: (byte >> 4) & 0x03,
            n: byte & 0x08 != 0,
        }
    }
}

/// Default [`ObuExtractor`] for the AV1 RTP payload format.
///
/// Emitted OBUs always carry `obu_has_size_field`, i.e. they are in the
/// low overhead bitstream format expected inside IVF.
#[derive(Debug, Default)]
pub struct Av1Depacketizer {
    fragment: Option<BytesMut>,
}

impl Av1Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks everything that could fail before any continuation state is touched.
    fn validate(&self, header: AggregationHeader, elements: &[&[u8]]) -> Result<()> {
        let last = elements.len() - 1;
        for (i, element) in elements.iter().enumerate() {
            let prefix: &[u8] = if header.z && i == 0 {
                match &self.fragment {
                    Some(fragment) => &fragment[..],
                    None => continue,
                }
            } else {
                &[]
            };

            let total = prefix.len() + element.len();
            if total > MAX_OBU_SIZE {
                return Err(Error::invalid_payload(format!(
                    "OBU size ({total}) exceeds maximum allowed ({MAX_OBU_SIZE})"
                )));
            }
            if header.y && i == last {
                continue;
            }

            let first = prefix.first().or(element.first()).copied().unwrap_or(0);
            if first & OBU_FORBIDDEN_BIT != 0 {
                return Err(Error::invalid_payload("forbidden bit set in OBU header"));
            }
            if total < obu_header_len(first) {
                return Err(Error::invalid_payload("truncated OBU header"));
            }
        }
        Ok(())
    }
}

impl ObuExtractor for Av1Depacketizer {
    fn extract(&mut self, payload: &[u8]) -> Result<Vec<Bytes>> {
        if payload.len() < 2 {
            return Err(Error::invalid_payload(format!(
                "AV1 payload too short: {} bytes",
                payload.len()
            )));
        }

        let header = AggregationHeader::parse(payload[0]);
        tracing::trace!(
            "[av1-rtp] aggregation header: z={}, y={}, w={}, n={}, payload_len={}",
            header.z,
            header.y,
            header.w,
            header.n,
            payload.len()
        );
        if header.z && header.n {
            return Err(Error::invalid_payload(
                "N bit set on a packet continuing a fragment",
            ));
        }

        let elements = split_elements(&payload[1..], header.w)?;
        self.validate(header, &elements)?;

        let last = elements.len() - 1;
        let mut obus = Vec::with_capacity(elements.len());
        for (i, element) in elements.into_iter().enumerate() {
            let mut obu = if header.z && i == 0 {
                match self.fragment.take() {
                    Some(fragment) => fragment,
                    None => {
                        tracing::trace!(
                            "[av1-rtp] dropping fragment without a start: size={}",
                            element.len()
                        );
                        continue;
                    }
                }
            } else {
                if let Some(stale) = self.fragment.take() {
                    tracing::debug!("[av1-rtp] discarding unfinished OBU: size={}", stale.len());
                }
                BytesMut::with_capacity(element.len())
            };
            obu.extend_from_slice(element);

            if header.y && i == last {
                self.fragment = Some(obu);
            } else {
                tracing::trace!(
                    "[av1-rtp] OBU complete: type={}, size={}",
                    (obu[0] >> 3) & 0x0F,
                    obu.len()
                );
                obus.push(marshal_obu(obu));
            }
        }

        Ok(obus)
    }
}

/// Split the payload after the aggregation header into OBU elements.
fn split_elements(mut payload: &[u8], w: u8) -> Result<Vec<&[u8]>> {
    let mut elements = Vec::new();
    while !payload.is_empty() {
        if w != 0 && elements.len() + 1 == w as usize {
            elements.push(payload);
            break;
        }

        let (size, leb_len) = read_leb128(payload)?;
        payload = &payload[leb_len..];
        if size == 0 || payload.len() < size {
            return Err(Error::invalid_payload(format!(
                "invalid OBU element size {size}, {} bytes left",
                payload.len()
            )));
        }
        elements.push(&payload[..size]);
        payload = &payload[size..];
    }

    if elements.is_empty() || (w != 0 && elements.len() != w as usize) {
        return Err(Error::invalid_payload(format!(
            "W field is {w} but payload holds {} elements",
            elements.len()
        )));
    }
    Ok(elements)
}

fn obu_header_len(header: u8) -> usize {
    if header & OBU_EXTENSION_FLAG != 0 { 2 } else { 1 }
}

/// Make sure the OBU carries `obu_size`, inserting it after the header if missing.
fn marshal_obu(obu: BytesMut) -> Bytes {
    let header = obu[0];
    if header & OBU_HAS_SIZE_FIELD != 0 {
        return obu.freeze();
    }

    let header_len = obu_header_len(header);
    let payload = &obu[header_len..];
    let mut buf = BytesMut::with_capacity(obu.len() + leb128_size(payload.len()));
    buf.put_u8(header | OBU_HAS_SIZE_FIELD);
    buf.extend_from_slice(&obu[1..header_len]);
    write_leb128(&mut buf, payload.len());
    buf.extend_from_slice(payload);
    buf.freeze()
}

fn read_leb128(buf: &[u8]) -> Result<(usize, usize)> {
    let mut value: usize = 0;
    let mut shift = 0;
    for (i, byte) in buf.iter().copied().enumerate() {
        value |= ((byte & 0x7F) as usize) << shift;
        if (byte & 0x80) == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 28 {
            break;
        }
    }
    Err(Error::invalid_payload("invalid LEB128"))
}

fn leb128_size(mut value: usize) -> usize {
    let mut size = 1;
    while value >= 0x80 {
        value >>= 7;
        size += 1;
    }
    size
}

fn write_leb128(buf: &mut BytesMut, mut value: usize) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Emits every complete OBU as its own frame.
pub struct Av1Assembler {
    extractor: Box<dyn ObuExtractor>,
    first_timestamp: Option<u32>,
    last_timestamp: Option<u32>,
}

impl Default for Av1Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Av1Assembler {
    pub fn new() -> Self {
        Self::with_extractor(Box::new(Av1Depacketizer::new()))
    }

    pub fn with_extractor(extractor: Box<dyn ObuExtractor>) -> Self {
        Self {
            extractor,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    pub fn push(&mut self, payload: &[u8], timestamp: u32) -> Result<Vec<Bytes>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let obus = self.extractor.extract(payload)?;
        if !obus.is_empty() {
            self.first_timestamp.get_or_insert(timestamp);
            self.last_timestamp = Some(timestamp);
        }
        Ok(obus)
    }
}

impl FrameAssembler for Av1Assembler {
    fn codec(&self) -> CodecKind {
        CodecKind::Av1
    }

    fn push_payload(
        &mut self,
        payload: &[u8],
        _marker: bool,
        timestamp: u32,
    ) -> Result<Vec<Bytes>> {
        self.push(payload, timestamp)
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

    fn extract(depacketizer: &mut Av1Depacketizer, payload: &[u8]) -> Vec<Vec<u8>> {
        depacketizer
            .extract(payload)
            .expect("extract")
            .into_iter()
            .map(|obu| obu.to_vec())
            .collect()
    }

    #[test]
    fn leb128_decoding_examples() {
        let vectors = [
            (&[0x00u8][..], 0usize),
            (&[0x7F][..], 127usize),
            (&[0x80, 0x01][..], 128usize),
            (&[0xE5, 0x8E, 0x26][..], 624_485usize),
        ];

        for (bytes, expected) in vectors {
            let (value, consumed) = read_leb128(bytes).expect("valid leb128");
            assert_eq!(value, expected);
            assert_eq!(consumed, bytes.len());
        }
        assert!(read_leb128(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn leb128_encoding_matches_size() {
        for value in [0usize, 1, 127, 128, 16_383, 16_384, 624_485] {
            let mut buf = BytesMut::new();
            write_leb128(&mut buf, value);
            assert_eq!(buf.len(), leb128_size(value));
            assert_eq!(read_leb128(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn single_obu_gets_size_field() {
        let mut depacketizer = Av1Depacketizer::new();
        let obus = extract(&mut depacketizer, &[0x10, 0x30, 0xAA, 0xBB]);
        assert_eq!(obus, vec![vec![0x32, 0x02, 0xAA, 0xBB]]);
    }

    #[test]
    fn obu_with_size_field_is_kept() {
        let mut depacketizer = Av1Depacketizer::new();
        let obus = extract(&mut depacketizer, &[0x10, 0x0A, 0x01, 0x42]);
        assert_eq!(obus, vec![vec![0x0A, 0x01, 0x42]]);
    }

    #[test]
    fn extension_header_is_preserved() {
        let mut depacketizer = Av1Depacketizer::new();
        let obus = extract(&mut depacketizer, &[0x10, 0x34, 0x08, 0xAA]);
        assert_eq!(obus, vec![vec![0x36, 0x08, 0x01, 0xAA]]);
    }

    #[test]
    fn aggregated_obus_are_split() {
        let expected = vec![vec![0x12, 0x00], vec![0x32, 0x02, 0x01, 0x02]];

        let mut depacketizer = Av1Depacketizer::new();
        let obus = extract(&mut depacketizer, &[0x00, 0x01, 0x10, 0x03, 0x30, 0x01, 0x02]);
        assert_eq!(obus, expected);

        let obus = extract(&mut depacketizer, &[0x20, 0x01, 0x10, 0x30, 0x01, 0x02]);
        assert_eq!(obus, expected);
    }

    #[test]
    fn fragments_are_joined_across_packets() {
        let mut depacketizer = Av1Depacketizer::new();
        assert!(extract(&mut depacketizer, &[0x50, 0x30, 0x01]).is_empty());
        assert!(extract(&mut depacketizer, &[0xD0, 0x02]).is_empty());
        let obus = extract(&mut depacketizer, &[0x90, 0x03, 0x04]);
        assert_eq!(obus, vec![vec![0x32, 0x04, 0x01, 0x02, 0x03, 0x04]]);
    }

    #[test]
    fn fragment_without_start_is_dropped() {
        let mut depacketizer = Av1Depacketizer::new();
        assert!(extract(&mut depacketizer, &[0x90, 0x02, 0x03]).is_empty());
        assert!(extract(&mut depacketizer, &[0xD0, 0x02]).is_empty());
        let obus = extract(&mut depacketizer, &[0x10, 0x30, 0xAA]);
        assert_eq!(obus, vec![vec![0x32, 0x01, 0xAA]]);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let cases: [&[u8]; 6] = [
            &[0x10],
            &[0x88, 0x30],
            &[0x30, 0x01, 0x10],
            &[0x00, 0x00, 0x30],
            &[0x00, 0x05, 0x30],
            &[0x10, 0xB0, 0x01],
        ];
        for payload in cases {
            let mut depacketizer = Av1Depacketizer::new();
            assert!(
                matches!(depacketizer.extract(payload), Err(Error::InvalidPayload(_))),
                "payload {payload:02x?} should be rejected"
            );
        }
    }

    #[test]
    fn error_keeps_pending_fragment() {
        let mut depacketizer = Av1Depacketizer::new();
        assert!(extract(&mut depacketizer, &[0x50, 0x30, 0x01]).is_empty());
        assert!(depacketizer.extract(&[0x00, 0x05, 0x30]).is_err());
        let obus = extract(&mut depacketizer, &[0x90, 0x02]);
        assert_eq!(obus, vec![vec![0x32, 0x02, 0x01, 0x02]]);
    }

    #[test]
    fn assembler_tracks_timestamps_of_emitted_obus() {
        let mut assembler = Av1Assembler::new();
        assert!(assembler.push(&[0x50, 0x30, 0x01], 1000).unwrap().is_empty());
        assert_eq!(assembler.timestamp_span(), None);

        assert_eq!(assembler.push(&[0x90, 0x02], 1000).unwrap().len(), 1);
        assert_eq!(
            assembler.push(&[0x00, 0x01, 0x10, 0x02, 0x30, 0x01], 4000).unwrap().len(),
            2
        );
        assert_eq!(
            assembler.timestamp_span(),
            Some(TimestampSpan {
                first: 1000,
                last: 4000
            })
        );
    }

    struct Fixed(Vec<Bytes>);

    impl ObuExtractor for Fixed {
        fn extract(&mut self, _payload: &[u8]) -> Result<Vec<Bytes>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn assembler_delegates_to_custom_extractor() {
        let obus = vec![Bytes::from_static(&[1, 2]), Bytes::from_static(&[3])];
        let mut assembler = Av1Assembler::with_extractor(Box::new(Fixed(obus.clone())));
        assert_eq!(assembler.push_payload(&[0xFF], false, 7).unwrap(), obus);
        assert!(assembler.push_payload(&[], true, 8).unwrap().is_empty());
    }
}
