use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use webrtc::rtp::packet::Packet;

use crate::assembler::{FrameAssembler, TimestampSpan, create_assembler};
use crate::codec::{CodecKind, IvfConfig};
use crate::error::{Error, Result};
use crate::sink::Sink;
use crate::writer::IvfWriter;

/// One recording session: RTP payloads of a single codec in, IVF out.
pub struct IvfRecorder<S: Sink> {
    codec: CodecKind,
    assembler: Box<dyn FrameAssembler>,
    writer: IvfWriter<S>,
}

impl IvfRecorder<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, config: IvfConfig) -> Result<Self> {
        let writer = IvfWriter::create(path, &config)?;
        Ok(Self {
            codec: config.codec,
            assembler: create_assembler(config.codec),
            writer,
        })
    }
}

impl<S: Sink> IvfRecorder<S> {
    pub fn open(sink: S, config: IvfConfig) -> Result<Self> {
        let assembler = create_assembler(config.codec);
        Self::with_assembler(sink, config, assembler)
    }

    /// Use a custom assembler, e.g. an [`Av1Assembler`](crate::Av1Assembler) built
    /// around another OBU extractor. Its codec must match the configured one.
    pub fn with_assembler(
        sink: S,
        config: IvfConfig,
        assembler: Box<dyn FrameAssembler>,
    ) -> Result<Self> {
        if assembler.codec() != config.codec {
            return Err(Error::CodecAlreadyBound {
                bound: config.codec,
                requested: assembler.codec(),
            });
        }
        Ok(Self {
            codec: config.codec,
            writer: IvfWriter::open(sink, &config)?,
            assembler,
        })
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn frame_count(&self) -> u64 {
        self.writer.frame_count()
    }

    pub fn timestamp_span(&self) -> Option<TimestampSpan> {
        self.assembler.timestamp_span()
    }

    pub fn writer(&self) -> &IvfWriter<S> {
        &self.writer
    }

    /// Feed one RTP payload and write every frame it completes.
    /// Returns the number of frames written.
    pub fn push(&mut self, payload: &[u8], marker: bool, timestamp: u32) -> Result<usize> {
        if self.writer.is_finalized() {
            return Err(Error::SinkUnavailable(None));
        }

        let frames = self.assembler.push_payload(payload, marker, timestamp)?;
        for frame in &frames {
            self.writer.write_frame(frame)?;
        }
        Ok(frames.len())
    }

    pub fn write_rtp(&mut self, packet: &Packet) -> Result<usize> {
        self.push(
            &packet.payload,
            packet.header.marker,
            packet.header.timestamp,
        )
    }

    /// Keep PTS aligned when the caller skips a frame on purpose.
    pub fn frame_dropped(&mut self) {
        self.writer.note_dropped();
    }

    /// Patch the header and release the sink. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        let span = self.assembler.timestamp_span();
        self.writer.finalize(span)
    }
}
