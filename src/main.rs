use std::{net::SocketAddr, path::PathBuf};

use clap::{ArgAction, Parser};
use ivfwriter::CodecKind;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use rtp2ivf::config::Config;

mod log;
mod utils;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose mode [default: config log.level, -v "info", -vv "debug", -vvv "trace"]
    #[arg(short = 'v', action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,
    /// Set config file path
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// UDP address to receive RTP on, e.g.: 0.0.0.0:5004
    #[arg(short, long)]
    listen: Option<SocketAddr>,
    /// IVF file to write
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// e.g.: video/VP8, video/AV1
    #[arg(long)]
    codec: Option<CodecKind>,
    /// value: [0, 127]
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=127))]
    payload_type: Option<u8>,
    #[arg(long)]
    clock_rate: Option<u32>,
    #[arg(long)]
    width: Option<u16>,
    #[arg(long)]
    height: Option<u16>,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(listen) = self.listen {
            cfg.listen = listen;
        }
        if let Some(output) = &self.output {
            cfg.output = output.clone();
        }
        if let Some(codec) = self.codec {
            cfg.codec = codec;
        }
        if let Some(payload_type) = self.payload_type {
            cfg.payload_type = payload_type;
        }
        if let Some(clock_rate) = self.clock_rate {
            cfg.clock_rate = clock_rate;
        }
        if let Some(width) = self.width {
            cfg.width = width;
        }
        if let Some(height) = self.height {
            cfg.height = height;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg: Config = utils::load("rtp2ivf".to_string(), args.config.clone());
    args.apply(&mut cfg);
    cfg.validate()?;

    let level = match log::verbosity(args.verbose) {
        Some(level) => level.to_string(),
        None => cfg.log.level.clone(),
    };
    log::set(log::directives(&level));

    warn!("set log level : {}", level);
    debug!("config : {:?}", cfg);

    let socket = UdpSocket::bind(cfg.listen).await?;
    info!("listening on {}", socket.local_addr()?);

    let stats = rtp2ivf::serve(cfg, socket, utils::shutdown_signal()).await?;
    info!(
        "received {} packets: {} ignored, {} malformed, {} frames",
        stats.packets, stats.ignored, stats.malformed, stats.frames
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "rtp2ivf",
            "-vv",
            "--codec",
            "video/AV1",
            "-p",
            "45",
            "-o",
            "out.ivf",
            "--width",
            "1280",
        ]);
        assert_eq!(args.verbose, 2);

        let mut cfg = Config::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.codec, CodecKind::Av1);
        assert_eq!(cfg.payload_type, 45);
        assert_eq!(cfg.output, PathBuf::from("out.ivf"));
        assert_eq!((cfg.width, cfg.height), (1280, 480));
    }

    #[test]
    fn rejects_out_of_range_payload_type() {
        assert!(Args::try_parse_from(["rtp2ivf", "-p", "128"]).is_err());
        assert!(Args::try_parse_from(["rtp2ivf", "--codec", "video/H264"]).is_err());
    }
}
