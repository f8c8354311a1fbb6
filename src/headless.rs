//! Collaborators for running the engine without a desktop shell: rings
//! are printed, popups and power requests are logged, audio is silent.

use std::io::{self, Write};

use crate::notify::PopupRequest;
use crate::platform::{AudioOutput, PopupHost, PowerBlocker, SystemNotifier};
use crate::sound::SoundSource;

#[derive(Debug, Default)]
pub struct StdoutNotifier;

impl SystemNotifier for StdoutNotifier {
    fn show(&mut self, title: &str, body: &str) {
        let mut out = io::stdout().lock();
        if let Err(err) = writeln!(out, "[{title}] {body}") {
            log::warn!("unable to print notification: {err}");
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingPopupHost {
    open: Option<PopupRequest>,
}

impl LoggingPopupHost {
    pub fn open_popup(&self) -> Option<&PopupRequest> {
        self.open.as_ref()
    }
}

impl PopupHost for LoggingPopupHost {
    fn show(&mut self, request: &PopupRequest) {
        log::info!(
            "popup for {} at {:?}: {} ({})",
            request.id,
            request.position,
            request.title,
            request.body
        );
        self.open = Some(request.clone());
    }

    fn close(&mut self) {
        if let Some(request) = self.open.take() {
            log::info!("popup for {} closed", request.id);
        }
    }
}

/// Tracks what would be playing without producing sound.
#[derive(Debug, Default)]
pub struct SilentAudio {
    current: Option<SoundSource>,
    volume: f32,
}

impl SilentAudio {
    pub fn current(&self) -> Option<&SoundSource> {
        self.current.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioOutput for SilentAudio {
    fn play(&mut self, source: &SoundSource, volume: f32) {
        if let Some(previous) = &self.current {
            log::debug!("replacing {previous:?} on the audio channel");
        }
        log::info!("playing {source:?} at volume {volume:.2}");
        self.current = Some(source.clone());
        self.volume = volume;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn stop(&mut self) {
        self.current = None;
    }
}

#[derive(Debug, Default)]
pub struct LoggingPowerBlocker {
    active: bool,
}

impl PowerBlocker for LoggingPowerBlocker {
    fn request(&mut self, enabled: bool) {
        if enabled != self.active {
            log::info!(
                "keep-awake {}",
                if enabled { "requested" } else { "released" }
            );
        }
        self.active = enabled;
    }
}
