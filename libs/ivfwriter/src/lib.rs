pub mod assembler;
pub mod av1;
pub mod codec;
pub mod error;
pub mod framerate;
pub mod header;
pub mod recorder;
pub mod sink;
pub mod vp8;
pub mod writer;


pub use assembler::{FrameAssembler, TimestampSpan, create_assembler};
pub use av1::{Av1Assembler, Av1Depacketizer, ObuExtractor};
pub use codec::{CodecKind, IvfConfig, IvfConfigBuilder};
pub use error::{Error, Result};
pub use framerate::FrameRate;
pub use header::{FrameHeader, IvfHeader, IvfReader};
pub use recorder::IvfRecorder;
pub use sink::{AppendOnly, SeekableSink, Sink};
pub use vp8::{Vp8Assembler, Vp8Descriptor};
pub use writer::IvfWriter;
