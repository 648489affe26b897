use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, Write};

/// Byte destination for an IVF stream.
///
/// Seeking and closing are optional capabilities: the writer probes them on
/// finalize and silently skips whatever the sink cannot do.
pub trait Sink: Write {
    /// Random access view of the sink, used to patch the header after the last frame.
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        None
    }

    /// Release the underlying resource. `None` when the sink has nothing to close.
    fn close(&mut self) -> Option<io::Result<()>> {
        None
    }
}

pub trait SeekableSink: Write + Seek {}

impl<T: Write + Seek + ?Sized> SeekableSink for T {}

impl Sink for File {
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        Some(self)
    }

    fn close(&mut self) -> Option<io::Result<()>> {
        Some(self.flush().and_then(|_| self.sync_all()))
    }
}

impl<W: Write + Seek> Sink for BufWriter<W> {
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        Some(self)
    }

    fn close(&mut self) -> Option<io::Result<()>> {
        Some(self.flush())
    }
}

impl<T> Sink for Cursor<T>
where
    Cursor<T>: Write,
    T: AsRef<[u8]>,
{
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        Some(self)
    }
}

impl Sink for Vec<u8> {}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        (**self).as_seekable()
    }

    fn close(&mut self) -> Option<io::Result<()>> {
        (**self).close()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn as_seekable(&mut self) -> Option<&mut dyn SeekableSink> {
        (**self).as_seekable()
    }

    fn close(&mut self) -> Option<io::Result<()>> {
        (**self).close()
    }
}

/// Hides every capability of the wrapped writer, e.g. to stream IVF to a pipe or socket.
#[derive(Debug, Default)]
pub struct AppendOnly<W>(pub W);

impl<W> AppendOnly<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> Write for AppendOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> Sink for AppendOnly<W> {}
