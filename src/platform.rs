//! Capability tier and the narrow collaborator interfaces the engines call
//! into. Implementations live in the shell (or in `headless`).

use std::path::Path;

use anyhow::Result;

use crate::notify::PopupRequest;
use crate::sound::SoundSource;

pub const BROWSER_SOUND_LIMIT: usize = 10;
pub const NATIVE_SOUND_LIMIT: usize = 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CapabilityTier {
    Browser,
    Native,
}

/// What the hosting shell can do, resolved once at startup.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlatformCapabilities {
    pub tier: CapabilityTier,
    pub file_storage: bool,
    pub power_blocker: bool,
    pub custom_sound_limit: usize,
}

impl PlatformCapabilities {
    pub fn browser() -> Self {
        Self {
            tier: CapabilityTier::Browser,
            file_storage: false,
            power_blocker: false,
            custom_sound_limit: BROWSER_SOUND_LIMIT,
        }
    }

    pub fn native() -> Self {
        Self {
            tier: CapabilityTier::Native,
            file_storage: true,
            power_blocker: true,
            custom_sound_limit: NATIVE_SOUND_LIMIT,
        }
    }

    pub fn for_tier(tier: CapabilityTier) -> Self {
        match tier {
            CapabilityTier::Browser => Self::browser(),
            CapabilityTier::Native => Self::native(),
        }
    }
}

pub trait PowerBlocker {
    fn request(&mut self, enabled: bool);
}

pub trait SystemNotifier {
    fn show(&mut self, title: &str, body: &str);
}

pub trait PopupHost {
    fn show(&mut self, request: &PopupRequest);
    fn close(&mut self);
}

/// The single shared audio output. Playing a new source replaces whatever
/// is currently playing.
pub trait AudioOutput {
    fn play(&mut self, source: &SoundSource, volume: f32);
    fn set_volume(&mut self, volume: f32);
    fn stop(&mut self);
}

/// Native file-backed storage for custom sound payloads. References are
/// opaque strings handed back by the store.
pub trait SoundFileStore {
    fn save(&mut self, name: &str, bytes: &[u8]) -> Result<String>;
    fn copy(&mut self, source: &Path, name: &str) -> Result<String>;
    fn delete(&mut self, reference: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_carry_their_sound_limits() {
        assert_eq!(PlatformCapabilities::browser().custom_sound_limit, 10);
        assert_eq!(PlatformCapabilities::native().custom_sound_limit, 20);
        assert!(!PlatformCapabilities::for_tier(CapabilityTier::Browser).file_storage);
        assert!(PlatformCapabilities::for_tier(CapabilityTier::Native).power_blocker);
    }
}
