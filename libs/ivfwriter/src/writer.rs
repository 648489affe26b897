use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::assembler::TimestampSpan;
use crate::codec::IvfConfig;
use crate::error::{Error, Result};
use crate::framerate::{self, FrameRate};
use crate::header::{
    FrameHeader, IVF_FRAME_COUNT_OFFSET, IVF_RATE_OFFSET, IvfHeader, encode_trailer,
};
use crate::sink::Sink;

/// Serializes complete frames into an IVF stream.
///
/// The file header goes out on [`IvfWriter::open`] with provisional rate and
/// frame count; [`IvfWriter::finalize`] patches them when the sink can seek.
pub struct IvfWriter<S: Sink> {
    sink: Option<S>,
    header: IvfHeader,
    clock_rate: u32,
    fallback_framerate: Option<FrameRate>,
    // Frame slots consumed so far, written or dropped. Doubles as the next PTS.
    frame_count: u64,
    failed: bool,
}

impl IvfWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write the IVF header to it.
    pub fn create<P: AsRef<Path>>(path: P, config: &IvfConfig) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|err| {
            warn!("[ivf] cannot create {}: {}", path.as_ref().display(), err);
            Error::SinkUnavailable(Some(err))
        })?;
        Self::open(BufWriter::new(file), config)
    }
}

impl<S: Sink> IvfWriter<S> {
    pub fn open(mut sink: S, config: &IvfConfig) -> Result<Self> {
        let header = IvfHeader::provisional(config.codec.fourcc(), config.width, config.height);
        sink.write_all(&header.encode())?;
        debug!(
            "[ivf] header written: codec={}, {}x{}, clock_rate={}",
            config.codec, config.width, config.height, config.clock_rate
        );

        Ok(Self {
            sink: Some(sink),
            header,
            clock_rate: config.clock_rate,
            fallback_framerate: config.fallback_framerate,
            frame_count: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_finalized(&self) -> bool {
        self.sink.is_none()
    }

    /// Write one frame record. The frame slot is consumed even if the write fails,
    /// and a failed write makes every later call fail with `SinkUnavailable`.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.failed {
            return Err(Error::SinkUnavailable(None));
        }
        let sink = self.sink.as_mut().ok_or(Error::SinkUnavailable(None))?;
        let size = u32::try_from(frame.len())
            .map_err(|_| Error::invalid_payload(format!("frame too large: {}", frame.len())))?;

        let header = FrameHeader {
            size,
            pts: self.frame_count,
        };
        self.frame_count += 1;

        let result = sink
            .write_all(&header.encode())
            .and_then(|_| sink.write_all(frame));
        if let Err(err) = result {
            self.failed = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Reserve a PTS slot for a frame the caller chose not to write.
    pub fn note_dropped(&mut self) {
        self.frame_count += 1;
    }

    /// Patch the header if possible, then release the sink.
    ///
    /// Calling it again once the sink is released does nothing.
    pub fn finalize(&mut self, span: Option<TimestampSpan>) -> Result<()> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };

        let patched = self.patch_header(&mut sink, span);
        let closed = match sink.close() {
            Some(result) => result,
            None => sink.flush(),
        };
        debug!(
            "[ivf] finalized: frames={}, framerate={}/{}",
            self.frame_count, self.header.framerate.numerator, self.header.framerate.denominator
        );

        match (patched, closed) {
            (Err(err @ Error::SinkWrite(_)), _) => Err(err),
            (_, Err(err)) => Err(err.into()),
            (patched, Ok(())) => patched,
        }
    }

    fn patch_header(&mut self, sink: &mut S, span: Option<TimestampSpan>) -> Result<()> {
        let Some(seekable) = sink.as_seekable() else {
            debug!("[ivf] sink is not seekable, header left provisional");
            return Ok(());
        };

        let frame_count = self.frame_count as u32;
        let framerate = framerate::estimate(self.clock_rate, self.frame_count, span)
            .or_else(|err| self.fallback_framerate.ok_or(err));

        match framerate {
            Ok(framerate) => {
                seekable.seek(SeekFrom::Start(IVF_RATE_OFFSET))?;
                seekable.write_all(&encode_trailer(framerate, frame_count))?;
                self.header.framerate = framerate;
                self.header.frame_count = frame_count;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "[ivf] framerate undefined (frames={}, span={:?}), keeping provisional rate",
                    self.frame_count, span
                );
                seekable.seek(SeekFrom::Start(IVF_FRAME_COUNT_OFFSET))?;
                seekable.write_all(&frame_count.to_le_bytes())?;
                self.header.frame_count = frame_count;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use crate::header::{IvfReader, PROVISIONAL_FRAMERATE};
    use crate::sink::AppendOnly;
    use std::io::{self, Cursor, Write};

    fn span(first: u32, last: u32) -> Option<TimestampSpan> {
        Some(TimestampSpan { first, last })
    }

    #[test]
    fn open_writes_header_immediately() {
        let mut out = Vec::new();
        let writer = IvfWriter::open(&mut out, &IvfConfig::with_codec(CodecKind::Av1)).unwrap();
        assert_eq!(writer.frame_count(), 0);
        drop(writer);
        assert_eq!(out.len(), 32);
        assert_eq!(&out[8..12], b"AV01");
    }

    #[test]
    fn frames_get_slot_counter_as_pts() {
        let mut out = Cursor::new(Vec::new());
        let mut writer = IvfWriter::open(&mut out, &IvfConfig::default()).unwrap();
        writer.write_frame(&[1]).unwrap();
        writer.note_dropped();
        writer.note_dropped();
        writer.write_frame(&[2, 3]).unwrap();
        writer.finalize(span(0, 9000)).unwrap();

        let reader = IvfReader::new(Cursor::new(out.into_inner())).unwrap();
        assert_eq!(reader.header().frame_count, 4);
        let frames: Vec<_> = reader.map(|frame| frame.unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.pts, 0);
        assert_eq!(frames[1].0.pts, 3);
        assert_eq!(frames[1].1.as_ref(), &[2, 3]);
    }

    #[test]
    fn finalize_patches_rate_and_count() {
        let mut out = Cursor::new(Vec::new());
        let mut writer = IvfWriter::open(&mut out, &IvfConfig::default()).unwrap();
        for _ in 0..3 {
            writer.write_frame(&[0]).unwrap();
        }
        writer.finalize(span(0, 6000)).unwrap();
        assert_eq!(writer.header().framerate, FrameRate::new(45, 1));

        let header = IvfHeader::decode(out.get_ref()).unwrap();
        assert_eq!(header.framerate, FrameRate::new(45, 1));
        assert_eq!(header.frame_count, 3);
    }

    #[test]
    fn undefined_rate_patches_count_only() {
        let mut out = Cursor::new(Vec::new());
        let mut writer = IvfWriter::open(&mut out, &IvfConfig::default()).unwrap();
        writer.write_frame(&[0]).unwrap();
        assert!(matches!(
            writer.finalize(span(100, 100)),
            Err(Error::RateUndefined)
        ));
        assert!(writer.is_finalized());
        assert!(writer.finalize(span(100, 100)).is_ok());

        let header = IvfHeader::decode(out.get_ref()).unwrap();
        assert_eq!(header.framerate, PROVISIONAL_FRAMERATE);
        assert_eq!(header.frame_count, 1);
    }

    #[test]
    fn undefined_rate_uses_configured_fallback() {
        let config = IvfConfig {
            fallback_framerate: Some(FrameRate::new(30, 1)),
            ..Default::default()
        };
        let mut out = Cursor::new(Vec::new());
        let mut writer = IvfWriter::open(&mut out, &config).unwrap();
        writer.finalize(None).unwrap();

        let header = IvfHeader::decode(out.get_ref()).unwrap();
        assert_eq!(header.framerate, FrameRate::new(30, 1));
        assert_eq!(header.frame_count, 0);
    }

    #[test]
    fn non_seekable_sink_keeps_provisional_header() {
        let mut out = Vec::new();
        let mut writer = IvfWriter::open(AppendOnly(&mut out), &IvfConfig::default()).unwrap();
        writer.write_frame(&[7, 7]).unwrap();
        writer.finalize(span(0, 3000)).unwrap();

        let header = IvfHeader::decode(&out).unwrap();
        assert_eq!(header.framerate, FrameRate::new(24, 1));
        assert_eq!(header.frame_count, 900);
        assert_eq!(out.len(), 32 + 12 + 2);
    }

    #[test]
    fn writes_after_finalize_are_rejected() {
        let mut writer = IvfWriter::open(Vec::new(), &IvfConfig::default()).unwrap();
        writer.finalize(None).unwrap();
        assert!(matches!(
            writer.write_frame(&[1]),
            Err(Error::SinkUnavailable(None))
        ));
    }

    /// Accepts the header then fails every write.
    struct Broken {
        budget: usize,
    }

    impl Write for Broken {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget < buf.len() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for Broken {}

    #[test]
    fn write_error_consumes_slot_and_poisons_writer() {
        let mut writer = IvfWriter::open(Broken { budget: 32 }, &IvfConfig::default()).unwrap();
        assert!(matches!(writer.write_frame(&[1]), Err(Error::SinkWrite(_))));
        assert_eq!(writer.frame_count(), 1);
        assert!(matches!(
            writer.write_frame(&[1]),
            Err(Error::SinkUnavailable(None))
        ));
    }

    #[test]
    fn open_reports_header_write_failure() {
        let result = IvfWriter::open(Broken { budget: 0 }, &IvfConfig::default());
        assert!(matches!(result, Err(Error::SinkWrite(_))));
    }

    #[test]
    fn create_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.ivf");
        let result = IvfWriter::create(path, &IvfConfig::default());
        assert!(matches!(result, Err(Error::SinkUnavailable(Some(_)))));
    }
}
