use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use ivfwriter::{CodecKind, FrameRate, IvfConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// MIME type, e.g. "video/VP8"
    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,
    #[serde(default = "default_width")]
    pub width: u16,
    #[serde(default = "default_height")]
    pub height: u16,
    /// Written when no rate can be derived from the RTP timestamps
    #[serde(default)]
    pub fallback_framerate: Option<FrameRate>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("5004"))
    ))
    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5004)))
}

fn default_output() -> PathBuf {
    PathBuf::from("output.ivf")
}

fn default_payload_type() -> u8 {
    96
}

fn default_clock_rate() -> u32 {
    ivfwriter::codec::DEFAULT_CLOCK_RATE
}

fn default_width() -> u16 {
    ivfwriter::codec::DEFAULT_WIDTH
}

fn default_height() -> u16 {
    ivfwriter::codec::DEFAULT_HEIGHT
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            output: default_output(),
            codec: CodecKind::default(),
            payload_type: default_payload_type(),
            clock_rate: default_clock_rate(),
            width: default_width(),
            height: default_height(),
            fallback_framerate: None,
            log: Log::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.payload_type > 127 {
            return Err(anyhow::anyhow!(
                "payload_type must be in [0, 127], got {}",
                self.payload_type
            ));
        }
        if self.clock_rate == 0 {
            return Err(anyhow::anyhow!("clock_rate must not be zero"));
        }
        if let Some(framerate) = self.fallback_framerate {
            if framerate.numerator == 0 || framerate.denominator == 0 {
                return Err(anyhow::anyhow!(
                    "fallback_framerate must be positive, got {}/{}",
                    framerate.numerator,
                    framerate.denominator
                ));
            }
        }
        Ok(())
    }

    pub fn ivf_config(&self) -> ivfwriter::Result<IvfConfig> {
        let builder = IvfConfig::builder()
            .codec(self.codec)
            .clock_rate(self.clock_rate)
            .dimensions(self.width, self.height);
        match self.fallback_framerate {
            Some(framerate) => builder.fallback_framerate(framerate).build(),
            None => builder.build(),
        }
    }
}
