use std::{fs::File, future::Future, io::BufReader, path::Path};

use ivfwriter::{Error as IvfError, IvfHeader, IvfReader, IvfRecorder, Sink};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};
use webrtc::{rtp::packet::Packet, util::Unmarshal};

use crate::config::Config;

pub mod config;

/// Largest datagram we accept, same as the UDP payload limit.
const RECV_BUFFER_SIZE: usize = 65535;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Datagrams received
    pub packets: usize,
    /// RTP packets with another payload type
    pub ignored: usize,
    /// Datagrams that are not RTP, or payloads the depacketizer rejected
    pub malformed: usize,
    /// Frames written to the IVF file
    pub frames: usize,
}

/// Record the stream arriving on `socket` into `cfg.output` until `signal` resolves.
///
/// The file is finalized on every exit path, receive errors included.
pub async fn serve<F>(cfg: Config, socket: UdpSocket, signal: F) -> anyhow::Result<Stats>
where
    F: Future<Output = ()>,
{
    let mut recorder = IvfRecorder::create(&cfg.output, cfg.ivf_config()?)?;
    info!(
        "recording {} (pt={}) to {}",
        recorder.codec(),
        cfg.payload_type,
        cfg.output.display()
    );

    let result = record(&socket, &mut recorder, cfg.payload_type, signal).await;

    match recorder.close() {
        Ok(()) => {}
        Err(IvfError::RateUndefined) => {
            warn!("framerate undefined, header keeps the placeholder rate")
        }
        Err(err) => return Err(err.into()),
    }
    let stats = result?;

    let header = summarize(&cfg.output)?;
    info!(
        "{}: {} {}x{}, {}/{} fps, {} frame slots, {} frames written",
        cfg.output.display(),
        String::from_utf8_lossy(&header.fourcc),
        header.width,
        header.height,
        header.framerate.numerator,
        header.framerate.denominator,
        header.frame_count,
        stats.frames
    );
    Ok(stats)
}

/// Feed every RTP packet of `payload_type` into `recorder` until `signal` resolves.
pub async fn record<S, F>(
    socket: &UdpSocket,
    recorder: &mut IvfRecorder<S>,
    payload_type: u8,
    signal: F,
) -> anyhow::Result<Stats>
where
    S: Sink,
    F: Future<Output = ()>,
{
    tokio::pin!(signal);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut stats = Stats::default();

    loop {
        tokio::select! {
            _ = &mut signal => {
                debug!("stop receiving: {:?}", stats);
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (n, peer) = result?;
                stats.packets += 1;
                on_datagram(recorder, payload_type, &buf[..n], &mut stats)
                    .map_err(|err| anyhow::anyhow!("recording packet from {}: {}", peer, err))?;
            }
        }
    }
    Ok(stats)
}

fn on_datagram<S: Sink>(
    recorder: &mut IvfRecorder<S>,
    payload_type: u8,
    mut data: &[u8],
    stats: &mut Stats,
) -> ivfwriter::Result<()> {
    let packet = match Packet::unmarshal(&mut data) {
        Ok(packet) => packet,
        Err(err) => {
            warn!("dropping non-RTP datagram: {}", err);
            stats.malformed += 1;
            return Ok(());
        }
    };

    if packet.header.payload_type != payload_type {
        trace!(
            "ignoring payload type {}, seq={}",
            packet.header.payload_type,
            packet.header.sequence_number
        );
        stats.ignored += 1;
        return Ok(());
    }

    match recorder.write_rtp(&packet) {
        Ok(frames) => {
            stats.frames += frames;
            Ok(())
        }
        Err(IvfError::InvalidPayload(reason)) => {
            warn!(
                "invalid payload, seq={}, ts={}: {}",
                packet.header.sequence_number, packet.header.timestamp, reason
            );
            stats.malformed += 1;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Read a finished IVF file back and check that every frame record is intact.
pub fn summarize<P: AsRef<Path>>(path: P) -> anyhow::Result<IvfHeader> {
    let reader = IvfReader::new(BufReader::new(File::open(path)?))?;
    let header = *reader.header();
    let mut records = 0usize;
    for frame in reader {
        let (frame_header, _) = frame?;
        trace!("frame pts={} size={}", frame_header.pts, frame_header.size);
        records += 1;
    }
    debug!("{} frame records read back", records);
    Ok(header)
}
