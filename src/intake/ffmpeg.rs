//! FFmpeg-backed decoder for real CCTV URLs (HLS, RTSP, HTTP).
//!
//! Decoding runs on its own thread and hands BGR frames to the async side over
//! a bounded channel; when the channel is full the newest frame is dropped to
//! stay real-time.

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::common::{Frame, PixelFormat};
use crate::error::ConnectivityError;
use crate::intake::source::{BackendRead, StreamBackend, StreamOpener};

const CHANNEL_CAPACITY: usize = 4;
// Microseconds. Bounds every network read so a stalled live stream returns.
const READ_TIMEOUT_US: &str = "10000000";

enum DecodeEvent {
    Frame(Frame),
    Stalled(String),
}

pub struct FfmpegOpener;

#[async_trait]
impl StreamOpener for FfmpegOpener {
    fn accepts(&self, url: &str) -> bool {
        ["http://", "https://", "rtsp://", "rtmp://", "file://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
    }

    async fn open(&self, url: &str) -> Result<Box<dyn StreamBackend>, ConnectivityError> {
        let owned = url.to_string();
        let opened = tokio::task::spawn_blocking(move || FfmpegStream::open(owned))
            .await
            .map_err(|e| ConnectivityError::Open {
                url: url.to_string(),
                reason: e.to_string(),
            })??;
        Ok(Box::new(opened))
    }
}

pub struct FfmpegStream {
    frame_rx: mpsc::Receiver<DecodeEvent>,
    stop: Arc<AtomicBool>,
    decoder_thread: Option<JoinHandle<()>>,
}

struct Decoder {
    url: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    converter: Converter,
}

// Decoder state plus the BGR scaler; everything that turns packets into frames.
struct Converter {
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    decoded: ffmpeg::frame::Video,
    bgr: ffmpeg::frame::Video,
}

impl FfmpegStream {
    // The decoder lives on its own thread from open to finish; only the open
    // result and decoded frames cross back.
    fn open(url: String) -> Result<Self, ConnectivityError> {
        let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (opened_tx, opened_rx) = std::sync::mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_url = url.clone();

        let decoder_thread = std::thread::spawn(move || match Decoder::open(thread_url) {
            Ok(mut decoder) => {
                let _ = opened_tx.send(Ok(()));
                decoder.run(frame_tx, thread_stop);
            }
            Err(e) => {
                let _ = opened_tx.send(Err(e));
            }
        });

        let opened = opened_rx.recv().map_err(|e| ConnectivityError::Open {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if let Err(e) = opened {
            if decoder_thread.join().is_err() {
                error!("FFmpeg decoder thread panicked");
            }
            return Err(e);
        }

        Ok(Self {
            frame_rx,
            stop,
            decoder_thread: Some(decoder_thread),
        })
    }
}

impl Decoder {
    fn open(url: String) -> Result<Self, ConnectivityError> {
        let open_err = |reason: String| ConnectivityError::Open {
            url: url.clone(),
            reason,
        };
        ffmpeg::init().map_err(|e| open_err(e.to_string()))?;
        let mut options = ffmpeg::Dictionary::new();
        options.set("rw_timeout", READ_TIMEOUT_US);
        options.set("timeout", READ_TIMEOUT_US);
        let input = ffmpeg::format::input_with_dictionary(&url, options)
            .map_err(|e| open_err(e.to_string()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_err("stream has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| open_err(e.to_string()))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| open_err(e.to_string()))?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| open_err(e.to_string()))?;

        info!(
            "FFmpeg opened {} ({}x{})",
            url,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            url,
            input,
            stream_index,
            converter: Converter {
                decoder,
                scaler,
                decoded: ffmpeg::frame::Video::empty(),
                bgr: ffmpeg::frame::Video::empty(),
            },
        })
    }

    fn run(&mut self, frame_tx: mpsc::Sender<DecodeEvent>, stop: Arc<AtomicBool>) {
        for (stream, packet) in self.input.packets() {
            if stop.load(Ordering::Relaxed) {
                info!("FFmpeg decoder for {} stopped", self.url);
                return;
            }
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.converter.decoder.send_packet(&packet) {
                if frame_tx
                    .blocking_send(DecodeEvent::Stalled(e.to_string()))
                    .is_err()
                {
                    return;
                }
                continue;
            }
            if !self.converter.emit(&self.url, &frame_tx) {
                return;
            }
        }

        // Flush frames still buffered inside the decoder.
        if self.converter.decoder.send_eof().is_ok() {
            self.converter.emit(&self.url, &frame_tx);
        }
        info!("FFmpeg decoder for {} finished", self.url);
    }
}

impl Converter {
    // Hands every frame the decoder has ready to the async side. False once
    // the receiving end is gone.
    fn emit(&mut self, url: &str, frame_tx: &mpsc::Sender<DecodeEvent>) -> bool {
        while self.decoder.receive_frame(&mut self.decoded).is_ok() {
            if let Err(e) = self.scaler.run(&self.decoded, &mut self.bgr) {
                warn!("FFmpeg scale failed on {}: {}", url, e);
                continue;
            }
            let Some(frame) = to_frame(&self.bgr) else {
                error!("FFmpeg produced a frame with an unexpected layout");
                continue;
            };
            match frame_tx.try_send(DecodeEvent::Frame(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Drop frame to keep real-time
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        true
    }
}

fn to_frame(frame: &ffmpeg::frame::Video) -> Option<Frame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    Frame::from_raw(width, height, pixels, PixelFormat::Bgr)
}

#[async_trait]
impl StreamBackend for FfmpegStream {
    async fn read(&mut self) -> BackendRead {
        match self.frame_rx.recv().await {
            Some(DecodeEvent::Frame(frame)) => BackendRead::Frame(frame),
            Some(DecodeEvent::Stalled(reason)) => BackendRead::Unavailable(reason),
            None => BackendRead::EndOfStream,
        }
    }

    // Never blocks: a decoder thread still inside a network read is detached
    // and exits on its own once the read returns and sees the stop flag.
    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.frame_rx.close();
        let Some(thread) = self.decoder_thread.take() else {
            return;
        };
        if thread.is_finished() {
            if thread.join().is_err() {
                error!("FFmpeg decoder thread panicked");
            }
        } else {
            debug!("Detaching FFmpeg decoder thread that is still reading");
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.release();
    }
}
