use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::framerate::FrameRate;

pub const MIME_TYPE_VP8: &str = "video/VP8";
pub const MIME_TYPE_AV1: &str = "video/AV1";

pub const DEFAULT_CLOCK_RATE: u32 = 90_000;
pub const DEFAULT_WIDTH: u16 = 640;
pub const DEFAULT_HEIGHT: u16 = 480;

/// Video codec carried by the RTP stream, fixed for the lifetime of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CodecKind {
    #[default]
    Vp8,
    Av1,
}

impl CodecKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            CodecKind::Vp8 => MIME_TYPE_VP8,
            CodecKind::Av1 => MIME_TYPE_AV1,
        }
    }

    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            CodecKind::Vp8 => *b"VP80",
            CodecKind::Av1 => *b"AV01",
        }
    }

    pub fn from_fourcc(fourcc: [u8; 4]) -> Result<Self> {
        match &fourcc {
            b"VP80" => Ok(CodecKind::Vp8),
            b"AV01" => Ok(CodecKind::Av1),
            _ => Err(Error::unsupported_codec(String::from_utf8_lossy(&fourcc))),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    /// Accepts a MIME type (`video/VP8`) or a bare codec name (`vp8`), case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let name = name
            .split_once('/')
            .filter(|(kind, _)| kind.eq_ignore_ascii_case("video"))
            .map(|(_, codec)| codec)
            .unwrap_or(name);

        if name.eq_ignore_ascii_case("vp8") {
            Ok(CodecKind::Vp8)
        } else if name.eq_ignore_ascii_case("av1") {
            Ok(CodecKind::Av1)
        } else {
            Err(Error::unsupported_codec(s))
        }
    }
}

impl TryFrom<String> for CodecKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CodecKind> for String {
    fn from(codec: CodecKind) -> Self {
        codec.mime_type().to_string()
    }
}

/// Everything a session needs to know up front.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IvfConfig {
    pub codec: CodecKind,
    /// RTP clock rate, used to turn timestamp spans into a framerate.
    pub clock_rate: u32,
    pub width: u16,
    pub height: u16,
    /// Written on finalize when no framerate can be estimated.
    pub fallback_framerate: Option<FrameRate>,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            clock_rate: DEFAULT_CLOCK_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fallback_framerate: None,
        }
    }
}

impl IvfConfig {
    pub fn builder() -> IvfConfigBuilder {
        IvfConfigBuilder::default()
    }

    pub fn with_codec(codec: CodecKind) -> Self {
        Self {
            codec,
            ..Default::default()
        }
    }
}

/// Builds an [`IvfConfig`], rejecting a second codec selection.
///
/// Errors are deferred to [`IvfConfigBuilder::build`] so calls can be chained.
#[derive(Debug, Default)]
pub struct IvfConfigBuilder {
    codec: Option<CodecKind>,
    clock_rate: Option<u32>,
    width: Option<u16>,
    height: Option<u16>,
    fallback_framerate: Option<FrameRate>,
    error: Option<Error>,
}

impl IvfConfigBuilder {
    pub fn codec(mut self, codec: CodecKind) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.codec {
            Some(bound) => {
                self.error = Some(Error::CodecAlreadyBound {
                    bound,
                    requested: codec,
                })
            }
            None => self.codec = Some(codec),
        }
        self
    }

    pub fn mime_type(self, mime_type: &str) -> Self {
        match mime_type.parse() {
            Ok(codec) => self.codec(codec),
            Err(err) => self.fail(err),
        }
    }

    pub fn clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = Some(clock_rate);
        self
    }

    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn fallback_framerate(mut self, framerate: FrameRate) -> Self {
        self.fallback_framerate = Some(framerate);
        self
    }

    pub fn build(self) -> Result<IvfConfig> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let defaults = IvfConfig::default();
        Ok(IvfConfig {
            codec: self.codec.unwrap_or(defaults.codec),
            clock_rate: self.clock_rate.unwrap_or(defaults.clock_rate),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            fallback_framerate: self.fallback_framerate,
        })
    }

    fn fail(mut self, err: Error) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }
}
