use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::alarm::model::DEFAULT_SOUND;
use crate::error::{ClockError, ClockResult};
use crate::ids::MonotonicIds;
use crate::platform::{AudioOutput, PlatformCapabilities, SoundFileStore};
use crate::store::{self, CUSTOM_SOUNDS_KEY, KeyValueStore, VOLUME_KEY};

pub const CUSTOM_SOUND_PREFIX: &str = "custom_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundData {
    /// Payload embedded in the stored list itself.
    Inline(Vec<u8>),
    /// Reference returned by the native file store.
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSound {
    pub id: String,
    pub name: String,
    pub data: SoundData,
}

impl CustomSound {
    pub fn is_native_file(&self) -> bool {
        matches!(self.data, SoundData::File(_))
    }
}

/// What the audio output is asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSource {
    Default,
    Embedded(Vec<u8>),
    File(String),
}

#[derive(Debug, Clone)]
pub enum SoundPayload {
    Bytes { file_name: String, bytes: Vec<u8> },
    Path(PathBuf),
}

pub struct SoundLibrary {
    store: Arc<dyn KeyValueStore>,
    capabilities: PlatformCapabilities,
    files: Option<Box<dyn SoundFileStore>>,
    audio: Box<dyn AudioOutput>,
    sounds: Vec<CustomSound>,
    volume: f32,
    playing: bool,
    ids: MonotonicIds,
}

impl SoundLibrary {
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        capabilities: PlatformCapabilities,
        files: Option<Box<dyn SoundFileStore>>,
        audio: Box<dyn AudioOutput>,
    ) -> Self {
        let sounds: Vec<CustomSound> = store::load_or_default(store.as_ref(), CUSTOM_SOUNDS_KEY);
        let volume = store::load_optional::<f32>(store.as_ref(), VOLUME_KEY)
            .filter(|volume| volume.is_finite())
            .map_or(1.0, |volume| volume.clamp(0.0, 1.0));
        let last_id = sounds
            .iter()
            .filter_map(|sound| sound.id.strip_prefix(CUSTOM_SOUND_PREFIX))
            .filter_map(|stamp| stamp.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        if capabilities.file_storage && files.is_none() {
            log::warn!("file storage advertised but no file store given; sounds stay inline");
        }
        Self {
            store,
            capabilities,
            files,
            audio,
            sounds,
            volume,
            playing: false,
            ids: MonotonicIds::starting_after(last_id),
        }
    }

    pub fn custom_sounds(&self) -> &[CustomSound] {
        &self.sounds
    }

    pub fn get(&self, id: &str) -> Option<&CustomSound> {
        self.sounds.iter().find(|sound| sound.id == id)
    }

    pub fn limit(&self) -> usize {
        self.capabilities.custom_sound_limit
    }

    pub fn add_custom_sound(
        &mut self,
        name: &str,
        payload: SoundPayload,
        now: DateTime<Local>,
    ) -> ClockResult<CustomSound> {
        let limit = self.limit();
        if self.sounds.len() >= limit {
            log::warn!("custom sound '{name}' rejected, limit of {limit} reached");
            return Err(ClockError::SoundLimitReached { limit });
        }

        let id = format!("{CUSTOM_SOUND_PREFIX}{}", self.ids.next(now));
        let data = self
            .store_payload(&id, payload)
            .map_err(ClockError::SoundStorage)?;
        let sound = CustomSound {
            id,
            name: name.to_string(),
            data,
        };
        log::info!("custom sound '{}' added as {}", sound.name, sound.id);
        self.sounds.push(sound.clone());
        self.persist_sounds();
        Ok(sound)
    }

    /// Removes the sound from the list. Returns whether the backing file (if
    /// any) was cleaned up too; the entry is gone either way.
    pub fn delete_custom_sound(&mut self, id: &str) -> ClockResult<bool> {
        let index = self
            .sounds
            .iter()
            .position(|sound| sound.id == id)
            .ok_or_else(|| ClockError::UnknownSound(id.to_string()))?;
        let removed = self.sounds.remove(index);
        self.persist_sounds();

        let SoundData::File(reference) = &removed.data else {
            return Ok(true);
        };
        let Some(files) = self.files.as_mut() else {
            log::warn!("no file store to remove {reference}");
            return Ok(false);
        };
        match files.delete(reference) {
            Ok(removed_file) => Ok(removed_file),
            Err(err) => {
                log::error!("failed to remove sound file {reference}: {err:#}");
                Ok(false)
            }
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.audio.set_volume(self.volume);
        store::save(self.store.as_ref(), VOLUME_KEY, &self.volume);
        self.volume
    }

    /// Unknown custom references fall back to the default sound.
    pub fn resolve(&self, sound_ref: &str) -> SoundSource {
        if sound_ref.is_empty() || sound_ref == DEFAULT_SOUND {
            return SoundSource::Default;
        }
        match self.get(sound_ref) {
            Some(sound) => match &sound.data {
                SoundData::Inline(bytes) => SoundSource::Embedded(bytes.clone()),
                SoundData::File(reference) => SoundSource::File(reference.clone()),
            },
            None => {
                log::warn!("sound '{sound_ref}' not found, using default");
                SoundSource::Default
            }
        }
    }

    /// Starts `sound_ref` on the shared channel, looping. Whatever was
    /// playing before is replaced.
    pub fn play(&mut self, sound_ref: &str) {
        let source = self.resolve(sound_ref);
        self.audio.play(&source, self.volume);
        self.playing = true;
    }

    pub fn stop_playback(&mut self) {
        if self.playing {
            log::debug!("audio channel stopped");
        }
        self.audio.stop();
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn store_payload(&mut self, id: &str, payload: SoundPayload) -> Result<SoundData> {
        let file_store = if self.capabilities.file_storage {
            self.files.as_mut()
        } else {
            None
        };
        match (file_store, payload) {
            (Some(files), SoundPayload::Bytes { file_name, bytes }) => files
                .save(&format!("{id}_{}", base_name(&file_name)?), &bytes)
                .map(SoundData::File),
            (Some(files), SoundPayload::Path(path)) => {
                let name = base_name(&path.to_string_lossy())?;
                files
                    .copy(&path, &format!("{id}_{name}"))
                    .map(SoundData::File)
            }
            (None, SoundPayload::Bytes { bytes, .. }) => Ok(SoundData::Inline(bytes)),
            (None, SoundPayload::Path(path)) => fs::read(&path)
                .with_context(|| format!("unable to read sound file {}", path.display()))
                .map(SoundData::Inline),
        }
    }

    fn persist_sounds(&self) {
        store::save(self.store.as_ref(), CUSTOM_SOUNDS_KEY, &self.sounds);
    }
}

/// Sound files kept in one directory. Names are reduced to their final
/// path component before use.
#[derive(Debug, Clone)]
pub struct FsSoundStore {
    dir: PathBuf,
}

impl FsSoundStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create sounds directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn target(&self, name: &str) -> Result<PathBuf> {
        Ok(self.dir.join(base_name(name)?))
    }
}

impl SoundFileStore for FsSoundStore {
    fn save(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        let target = self.target(name)?;
        fs::write(&target, bytes)
            .with_context(|| format!("unable to write {}", target.display()))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn copy(&mut self, source: &Path, name: &str) -> Result<String> {
        let target = self.target(name)?;
        fs::copy(source, &target).with_context(|| {
            format!("unable to copy {} to {}", source.display(), target.display())
        })?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn delete(&mut self, reference: &str) -> Result<bool> {
        let target = self.target(reference)?;
        if !target.exists() {
            return Ok(false);
        }
        fs::remove_file(&target)
            .with_context(|| format!("unable to remove {}", target.display()))?;
        Ok(true)
    }
}

fn base_name(name: &str) -> Result<String> {
    Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .filter(|base| !base.is_empty())
        .ok_or_else(|| anyhow!("invalid sound file name '{name}'"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::store::MemoryStore;

    #[derive(Clone, Default)]
    struct RecordingAudio {
        played: Arc<Mutex<Vec<SoundSource>>>,
    }

    impl AudioOutput for RecordingAudio {
        fn play(&mut self, source: &SoundSource, _volume: f32) {
            self.played.lock().expect("lock").push(source.clone());
        }

        fn set_volume(&mut self, _volume: f32) {}

        fn stop(&mut self) {}
    }

    fn now() -> DateTime<Local> {
        Local
            .timestamp_opt(1_780_000_000, 0)
            .single()
            .expect("valid epoch")
    }

    fn bytes(name: &str) -> SoundPayload {
        SoundPayload::Bytes {
            file_name: format!("{name}.mp3"),
            bytes: vec![1, 2, 3],
        }
    }

    fn browser_library(store: Arc<MemoryStore>) -> SoundLibrary {
        SoundLibrary::load(
            store,
            PlatformCapabilities::browser(),
            None,
            Box::new(RecordingAudio::default()),
        )
    }

    #[test]
    fn browser_mode_stores_inline_and_caps_at_ten() {
        let mut library = browser_library(Arc::new(MemoryStore::new()));
        for index in 0..10 {
            let sound = library
                .add_custom_sound(&format!("s{index}"), bytes("s"), now())
                .expect("under the limit");
            assert!(!sound.is_native_file());
        }
        let err = library
            .add_custom_sound("eleventh", bytes("s"), now())
            .expect_err("over the limit");
        assert!(matches!(err, ClockError::SoundLimitReached { limit: 10 }));
        assert_eq!(err.to_string(), "Maximum of 10 custom sounds allowed.");
        assert_eq!(library.custom_sounds().len(), 10);
    }

    #[test]
    fn native_mode_writes_files() {
        let dir = tempdir().expect("tempdir");
        let files = FsSoundStore::open(dir.path()).expect("sounds dir");
        let mut library = SoundLibrary::load(
            Arc::new(MemoryStore::new()),
            PlatformCapabilities::native(),
            Some(Box::new(files)),
            Box::new(RecordingAudio::default()),
        );
        let sound = library
            .add_custom_sound("rooster", bytes("../../rooster"), now())
            .expect("stored");
        let SoundData::File(path) = &sound.data else {
            panic!("expected file-backed sound");
        };
        assert!(Path::new(path).starts_with(dir.path()));
        assert!(Path::new(path).exists());

        assert!(library.delete_custom_sound(&sound.id).expect("known sound"));
        assert!(!Path::new(path).exists());
        assert!(library.custom_sounds().is_empty());
    }

    #[test]
    fn native_mode_caps_at_twenty() {
        let dir = tempdir().expect("tempdir");
        let files = FsSoundStore::open(dir.path()).expect("sounds dir");
        let mut library = SoundLibrary::load(
            Arc::new(MemoryStore::new()),
            PlatformCapabilities::native(),
            Some(Box::new(files)),
            Box::new(RecordingAudio::default()),
        );
        for index in 0..20 {
            library
                .add_custom_sound(&format!("s{index}"), bytes(&format!("s{index}")), now())
                .expect("under the limit");
        }
        let err = library
            .add_custom_sound("twenty-first", bytes("extra"), now())
            .expect_err("over the limit");
        assert!(matches!(err, ClockError::SoundLimitReached { limit: 20 }));
        assert_eq!(library.custom_sounds().len(), 20);
        assert!(library.custom_sounds().iter().all(CustomSound::is_native_file));
    }

    #[test]
    fn delete_survives_missing_backing_file() {
        let dir = tempdir().expect("tempdir");
        let files = FsSoundStore::open(dir.path()).expect("sounds dir");
        let mut library = SoundLibrary::load(
            Arc::new(MemoryStore::new()),
            PlatformCapabilities::native(),
            Some(Box::new(files)),
            Box::new(RecordingAudio::default()),
        );
        let sound = library
            .add_custom_sound("bell", bytes("bell"), now())
            .expect("stored");
        let SoundData::File(path) = &sound.data else {
            panic!("expected file-backed sound");
        };
        fs::remove_file(path).expect("remove behind the library's back");

        assert!(!library.delete_custom_sound(&sound.id).expect("known sound"));
        assert!(library.custom_sounds().is_empty());
    }

    #[test]
    fn unreadable_source_path_adds_nothing() {
        let mut library = browser_library(Arc::new(MemoryStore::new()));
        let err = library
            .add_custom_sound(
                "ghost",
                SoundPayload::Path(PathBuf::from("/definitely/not/here.mp3")),
                now(),
            )
            .expect_err("missing file");
        assert!(matches!(err, ClockError::SoundStorage(_)));
        assert!(library.custom_sounds().is_empty());
    }

    #[test]
    fn volume_is_clamped_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let mut library = browser_library(store.clone());
        assert_eq!(library.volume(), 1.0);
        assert_eq!(library.set_volume(1.7), 1.0);
        assert_eq!(library.set_volume(-0.2), 0.0);
        assert_eq!(library.set_volume(0.35), 0.35);

        let reloaded = browser_library(store);
        assert_eq!(reloaded.volume(), 0.35);
    }

    #[test]
    fn unknown_reference_resolves_to_default() {
        let audio = RecordingAudio::default();
        let played = audio.played.clone();
        let mut library = SoundLibrary::load(
            Arc::new(MemoryStore::new()),
            PlatformCapabilities::browser(),
            None,
            Box::new(audio),
        );
        let sound = library
            .add_custom_sound("chime", bytes("chime"), now())
            .expect("stored");

        library.play("custom_missing");
        library.play(&sound.id);
        assert!(library.is_playing());
        library.stop_playback();
        assert!(!library.is_playing());

        let played = played.lock().expect("lock").clone();
        assert_eq!(
            played,
            vec![SoundSource::Default, SoundSource::Embedded(vec![1, 2, 3])]
        );
    }
}
