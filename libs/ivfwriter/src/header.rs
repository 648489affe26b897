// IVF layout, little-endian throughout:
//
// file header (32 bytes)
//   0  "DKIF"
//   4  u16 version (0)
//   6  u16 header length (32)
//   8  FOURCC
//  12  u16 width, u16 height
//  16  u32 framerate numerator, u32 framerate denominator
//  24  u32 frame count
//  28  u32 unused
//
// frame record
//   0  u32 frame size
//   4  u64 presentation timestamp
//  12  frame bytes

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use bytes::Bytes;

use crate::framerate::FrameRate;

pub const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
pub const IVF_VERSION: u16 = 0;
pub const IVF_HEADER_SIZE: usize = 32;
pub const IVF_FRAME_HEADER_SIZE: usize = 12;

/// Offset of the fields rewritten on finalize: numerator, denominator, frame count.
pub const IVF_RATE_OFFSET: u64 = 16;
pub const IVF_FRAME_COUNT_OFFSET: u64 = 24;

/// Header values written at open time, before the stream length is known.
pub const PROVISIONAL_FRAMERATE: FrameRate = FrameRate::new(24, 1);
pub const PROVISIONAL_FRAME_COUNT: u32 = 900;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub framerate: FrameRate,
    pub frame_count: u32,
}

impl IvfHeader {
    pub fn provisional(fourcc: [u8; 4], width: u16, height: u16) -> Self {
        Self {
            fourcc,
            width,
            height,
            framerate: PROVISIONAL_FRAMERATE,
            frame_count: PROVISIONAL_FRAME_COUNT,
        }
    }

    pub fn encode(&self) -> [u8; IVF_HEADER_SIZE] {
        let mut buf = [0u8; IVF_HEADER_SIZE];
        buf[0..4].copy_from_slice(IVF_SIGNATURE);
        LittleEndian::write_u16(&mut buf[4..], IVF_VERSION);
        LittleEndian::write_u16(&mut buf[6..], IVF_HEADER_SIZE as u16);
        buf[8..12].copy_from_slice(&self.fourcc);
        LittleEndian::write_u16(&mut buf[12..], self.width);
        LittleEndian::write_u16(&mut buf[14..], self.height);
        buf[16..28].copy_from_slice(&encode_trailer(self.framerate, self.frame_count));
        // 28..32 unused
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < IVF_HEADER_SIZE {
            return Err(invalid_data(format!(
                "IVF header needs {IVF_HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        if &buf[0..4] != IVF_SIGNATURE {
            return Err(invalid_data("missing DKIF signature"));
        }
        let header_size = LittleEndian::read_u16(&buf[6..]);
        if header_size as usize != IVF_HEADER_SIZE {
            return Err(invalid_data(format!(
                "unexpected IVF header size {header_size}"
            )));
        }

        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&buf[8..12]);
        Ok(Self {
            fourcc,
            width: LittleEndian::read_u16(&buf[12..]),
            height: LittleEndian::read_u16(&buf[14..]),
            framerate: FrameRate::new(
                LittleEndian::read_u32(&buf[16..]),
                LittleEndian::read_u32(&buf[20..]),
            ),
            frame_count: LittleEndian::read_u32(&buf[24..]),
        })
    }
}

/// The 12 header bytes starting at [`IVF_RATE_OFFSET`].
pub fn encode_trailer(framerate: FrameRate, frame_count: u32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    LittleEndian::write_u32(&mut buf[0..], framerate.numerator);
    LittleEndian::write_u32(&mut buf[4..], framerate.denominator);
    LittleEndian::write_u32(&mut buf[8..], frame_count);
    buf
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub pts: u64,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; IVF_FRAME_HEADER_SIZE] {
        let mut buf = [0u8; IVF_FRAME_HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..], self.size);
        LittleEndian::write_u64(&mut buf[4..], self.pts);
        buf
    }

    pub fn decode(buf: &[u8; IVF_FRAME_HEADER_SIZE]) -> Self {
        Self {
            size: LittleEndian::read_u32(&buf[0..]),
            pts: LittleEndian::read_u64(&buf[4..]),
        }
    }
}

/// Sequential reader over an IVF stream.
pub struct IvfReader<R> {
    reader: R,
    header: IvfHeader,
}

impl<R: Read> IvfReader<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut buf = [0u8; IVF_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        let header = IvfHeader::decode(&buf)?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    /// `Ok(None)` on a clean end of stream; a frame cut short is an error.
    pub fn next_frame(&mut self) -> io::Result<Option<(FrameHeader, Bytes)>> {
        let size = match self.reader.read_u32::<LittleEndian>() {
            Ok(size) => size,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        };
        let pts = self.reader.read_u64::<LittleEndian>()?;

        let mut frame = vec![0u8; size as usize];
        self.reader.read_exact(&mut frame)?;
        Ok(Some((FrameHeader { size, pts }, Bytes::from(frame))))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for IvfReader<R> {
    type Item = io::Result<(FrameHeader, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
