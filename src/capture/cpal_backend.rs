//! cpal-backed capture.
//!
//! `cpal::Stream` is not `Send`, so each capture session gets a dedicated
//! thread that owns the stream for its whole life: the thread builds the
//! stream, reports the result back, then parks until told to stop. The
//! returned handle is plain channel + join state and is freely `Send`.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::capture::{AudioCallback, CaptureBackend, CaptureHandle, DefaultInputSelector};
use crate::error::CaptureError;
use crate::priority::ResolvedSelection;

/// i16 inputs are converted through a fixed scratch buffer in chunks of this
/// many samples, so the callback path never allocates.
const I16_CHUNK_SAMPLES: usize = 8192;

/// Captures from real input devices through cpal.
#[derive(Debug, Default)]
pub struct CpalCaptureBackend;

impl CpalCaptureBackend {
    /// Creates a backend on the default host.
    pub fn new() -> Self {
        Self
    }
}

fn open_by_name(name: &str) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::BackendError(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(CaptureError::DeviceNotFound {
        name: name.to_string(),
    })
}

impl CaptureBackend for CpalCaptureBackend {
    fn native_format(&self, selection: &ResolvedSelection) -> Result<(u32, u16), CaptureError> {
        let device = open_by_name(&selection.name)?;
        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::BackendError(e.to_string()))?;
        Ok((config.sample_rate().0, config.channels()))
    }

    fn start_capture(
        &self,
        selection: &ResolvedSelection,
        callback: AudioCallback,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let name = selection.name.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("automic-capture".to_string())
            .spawn(move || run_stream_thread(&name, callback, &ready_tx, &stop_rx))
            .map_err(|e| CaptureError::BackendError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCaptureHandle {
                stop_tx,
                join: Some(join),
            })),
            Ok(Err(error)) => {
                let _ = join.join();
                Err(error)
            }
            Err(_) => {
                let _ = join.join();
                Err(CaptureError::BackendError(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }
}

/// Owns the stream thread for one session.
struct CpalCaptureHandle {
    stop_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_stream_thread(
    name: &str,
    mut callback: AudioCallback,
    ready_tx: &mpsc::Sender<Result<(), CaptureError>>,
    stop_rx: &mpsc::Receiver<()>,
) {
    let stream = match build_stream(name, &mut callback) {
        Ok(stream) => stream,
        Err(error) => {
            let _ = ready_tx.send(Err(error));
            return;
        }
    };
    if let Err(error) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::BackendError(error.to_string())));
        return;
    }
    tracing::debug!(device = %name, "capture stream running");
    let _ = ready_tx.send(Ok(()));

    // Stream stays alive until the handle is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!(device = %name, "capture stream stopped");
}

fn build_stream(name: &str, callback: &mut AudioCallback) -> Result<cpal::Stream, CaptureError> {
    let device = open_by_name(name)?;
    let config = device
        .default_input_config()
        .map_err(|e| CaptureError::BackendError(e.to_string()))?;
    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();

    let err_fn = {
        let name = name.to_string();
        move |error: cpal::StreamError| {
            tracing::error!(device = %name, %error, "capture stream error");
        }
    };

    // Moves the engine callback into the stream closure; the handle keeps the
    // stream (and with it the closure) alive until teardown.
    let mut engine_cb = std::mem::replace(callback, Box::new(|_| {}));

    match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| engine_cb(data),
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::BackendError(e.to_string())),
        SampleFormat::I16 => {
            let mut scratch = vec![0.0f32; I16_CHUNK_SAMPLES];
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        for chunk in data.chunks(I16_CHUNK_SAMPLES) {
                            for (dst, &src) in scratch.iter_mut().zip(chunk) {
                                *dst = f32::from(src) / f32::from(i16::MAX);
                            }
                            engine_cb(&scratch[..chunk.len()]);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| CaptureError::BackendError(e.to_string()))
        }
        other => Err(CaptureError::UnsupportedFormat {
            format: format!("{other:?}"),
        }),
    }
}

/// Default-input selector for hosts without a programmable default.
///
/// cpal has no API for changing the system default input, so this reports
/// nothing saved and accepts set requests as no-ops; on platforms with a real
/// control surface a native implementation replaces it.
#[derive(Debug, Default)]
pub struct NoopDefaultInput;

impl NoopDefaultInput {
    /// Creates the no-op selector.
    pub fn new() -> Self {
        Self
    }
}

impl DefaultInputSelector for NoopDefaultInput {
    fn current_default(&self) -> Option<String> {
        None
    }

    fn set_default(&self, uid: &str) -> Result<(), CaptureError> {
        tracing::debug!(%uid, "default input selection not supported by this backend");
        Ok(())
    }
}
