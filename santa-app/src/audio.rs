use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use futures::future::BoxFuture;
use futures::FutureExt;
use santa_core::KeyValueStore;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub const PREF_KEY: &str = "music:pref";
pub const VOLUME_KEY: &str = "music:volume";

pub const DEFAULT_VOLUME: f32 = 0.05;
pub const FALLBACK_VOLUME: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    On,
    Off,
}

impl Preference {
    pub fn as_str(self) -> &'static str {
        match self {
            Preference::On => "on",
            Preference::Off => "off",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "on" => Some(Preference::On),
            "off" => Some(Preference::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio player configured")]
    NoPlayer,
    #[error("failed to start audio player: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("audio player exited immediately: {0}")]
    Exited(ExitStatus),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("playback denied: {0}")]
    PlaybackDenied(#[source] PlaybackError),
}

pub trait Playback: Send {
    fn play(&mut self, volume: f32) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn is_playing(&mut self) -> bool;
}

pub fn clamp_volume(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

fn parse_volume(raw: Option<&str>) -> f32 {
    let Some(raw) = raw else {
        return DEFAULT_VOLUME;
    };
    match raw.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => clamp_volume(v),
        _ => FALLBACK_VOLUME,
    }
}

pub struct AudioSession<P, S> {
    player: P,
    store: S,
    state: AudioState,
    preference: Option<Preference>,
    volume: f32,
}

impl<P: Playback, S: KeyValueStore> AudioSession<P, S> {
    pub fn load(store: S, player: P) -> Self {
        let preference = read(&store, PREF_KEY).as_deref().and_then(Preference::parse);
        let volume = parse_volume(read(&store, VOLUME_KEY).as_deref());
        let state = match preference {
            Some(Preference::On) => AudioState::Enabled,
            _ => AudioState::Disabled,
        };
        Self {
            player,
            store,
            state,
            preference,
            volume,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, AudioState::Enabled)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn preference(&self) -> Option<Preference> {
        self.preference
    }

    /// True until the user has answered the music prompt once.
    pub fn needs_prompt(&self) -> bool {
        self.preference.is_none()
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    // Must be driven from the user action that asked for music.
    pub async fn enable(&mut self, initial_volume: Option<f32>) -> Result<(), AudioError> {
        if let Some(v) = initial_volume {
            self.apply_volume(v);
        }

        match self.player.play(self.volume).await {
            Ok(()) => {
                self.state = AudioState::Enabled;
                self.remember(Preference::On);
                info!(volume = self.volume, "background music enabled");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "could not start background music");
                self.state = AudioState::Disabled;
                self.remember(Preference::Off);
                Err(AudioError::PlaybackDenied(err))
            }
        }
    }

    pub fn disable(&mut self) {
        self.player.stop();
        self.state = AudioState::Disabled;
        self.remember(Preference::Off);
        debug!("background music disabled");
    }

    /// Stops the loop without touching the stored preference.
    pub fn stop_playback(&mut self) {
        self.player.stop();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.apply_volume(volume);
    }

    pub async fn resume_if_enabled(&mut self) {
        if !self.is_enabled() || self.player.is_playing() {
            return;
        }
        if let Err(err) = self.player.play(self.volume).await {
            warn!(%err, "deferred playback still blocked");
        }
    }

    fn apply_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        self.player.set_volume(self.volume);
        self.write(VOLUME_KEY, &self.volume.to_string());
    }

    fn remember(&mut self, preference: Preference) {
        self.preference = Some(preference);
        self.write(PREF_KEY, preference.as_str());
    }

    fn write(&mut self, key: &str, value: &str) {
        if let Err(err) = self.store.set(key, value) {
            warn!(%err, key, "failed to persist audio setting");
        }
    }
}

fn read<S: KeyValueStore>(store: &S, key: &str) -> Option<String> {
    store.get(key).unwrap_or_else(|err| {
        warn!(%err, key, "failed to read audio setting");
        None
    })
}

/// The command line is split on whitespace. `{track}` is replaced by the
/// track path (appended when absent) and `{volume}` by the volume in percent.
pub struct CommandPlayback {
    command: Option<Vec<String>>,
    track: PathBuf,
    volume: f32,
    child: Option<Child>,
}

impl CommandPlayback {
    pub fn new(command: Option<&str>, track: impl Into<PathBuf>) -> Self {
        let command = command
            .map(|c| c.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());
        Self {
            command,
            track: track.into(),
            volume: DEFAULT_VOLUME,
            child: None,
        }
    }

    async fn start(&mut self, volume: f32) -> Result<(), PlaybackError> {
        self.volume = clamp_volume(volume);
        if self.is_playing() {
            return Ok(());
        }
        let mut child = self.build()?.spawn()?;
        // Let a player that rejects its arguments fail before reporting success.
        tokio::task::yield_now().await;
        if let Some(status) = child.try_wait()? {
            if !status.success() {
                return Err(PlaybackError::Exited(status));
            }
        }
        self.child = Some(child);
        Ok(())
    }

    fn build(&self) -> Result<Command, PlaybackError> {
        let parts = self.command.as_ref().ok_or(PlaybackError::NoPlayer)?;
        let track = self.track.to_string_lossy();
        let percent = (self.volume * 100.0).round().to_string();

        let mut has_track = false;
        let args = parts[1..]
            .iter()
            .map(|arg| {
                has_track |= arg.contains("{track}");
                arg.replace("{track}", &track).replace("{volume}", &percent)
            })
            .collect::<Vec<_>>();

        let mut cmd = Command::new(&parts[0]);
        cmd.args(args);
        if !has_track {
            cmd.arg(&self.track);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Playback for CommandPlayback {
    fn play(&mut self, volume: f32) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.start(volume).boxed()
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                debug!(%err, "audio player already gone");
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        // External players pick the volume up on their next start.
        self.volume = clamp_volume(volume);
    }

    fn is_playing(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(_) => {
                self.child = None;
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use santa_core::MemoryStore;

    #[derive(Default)]
    struct ScriptedPlayback {
        deny: bool,
        playing: bool,
        volume: f32,
        starts: usize,
    }

    impl Playback for ScriptedPlayback {
        fn play(&mut self, volume: f32) -> BoxFuture<'_, Result<(), PlaybackError>> {
            async move {
                self.starts += 1;
                self.volume = volume;
                if self.deny {
                    return Err(PlaybackError::NoPlayer);
                }
                self.playing = true;
                Ok(())
            }
            .boxed()
        }

        fn stop(&mut self) {
            self.playing = false;
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }

        fn is_playing(&mut self) -> bool {
            self.playing
        }
    }

    fn allowing() -> ScriptedPlayback {
        ScriptedPlayback::default()
    }

    fn denying() -> ScriptedPlayback {
        ScriptedPlayback {
            deny: true,
            ..ScriptedPlayback::default()
        }
    }

    #[test]
    fn fresh_session_asks_and_uses_default_volume() {
        let session = AudioSession::load(MemoryStore::new(), allowing());
        assert!(session.needs_prompt());
        assert_eq!(session.state(), AudioState::Disabled);
        assert_eq!(session.volume(), DEFAULT_VOLUME);
    }

    #[test]
    fn stored_volume_is_clamped_or_replaced() {
        let mut store = MemoryStore::new();
        store.set(VOLUME_KEY, "3.5").unwrap();
        assert_eq!(AudioSession::load(store.clone(), allowing()).volume(), 1.0);

        store.set(VOLUME_KEY, "loud").unwrap();
        assert_eq!(
            AudioSession::load(store.clone(), allowing()).volume(),
            FALLBACK_VOLUME
        );

        store.set(VOLUME_KEY, "NaN").unwrap();
        assert_eq!(AudioSession::load(store, allowing()).volume(), FALLBACK_VOLUME);
    }

    #[tokio::test]
    async fn enable_starts_playback_and_remembers_choice() {
        let mut session = AudioSession::load(MemoryStore::new(), allowing());
        session.enable(Some(0.3)).await.unwrap();

        assert_eq!(session.state(), AudioState::Enabled);
        assert!(!session.needs_prompt());
        assert!(session.player_mut().playing);
        assert_eq!(session.player_mut().volume, 0.3);
        assert_eq!(session.store.get(PREF_KEY).unwrap().as_deref(), Some("on"));
        assert_eq!(session.store.get(VOLUME_KEY).unwrap().as_deref(), Some("0.3"));
    }

    #[tokio::test]
    async fn denied_playback_falls_back_to_off() {
        let mut session = AudioSession::load(MemoryStore::new(), denying());
        let err = session.enable(None).await.unwrap_err();

        assert!(matches!(err, AudioError::PlaybackDenied(PlaybackError::NoPlayer)));
        assert_eq!(session.state(), AudioState::Disabled);
        assert_eq!(session.preference(), Some(Preference::Off));
        assert_eq!(session.store.get(PREF_KEY).unwrap().as_deref(), Some("off"));
    }

    #[tokio::test]
    async fn disable_stops_and_persists_off() {
        let mut session = AudioSession::load(MemoryStore::new(), allowing());
        session.enable(None).await.unwrap();
        session.disable();

        assert_eq!(session.state(), AudioState::Disabled);
        assert!(!session.player_mut().playing);
        assert_eq!(session.store.get(PREF_KEY).unwrap().as_deref(), Some("off"));
    }

    #[tokio::test]
    async fn stop_playback_keeps_preference_on() {
        let mut session = AudioSession::load(MemoryStore::new(), allowing());
        session.enable(None).await.unwrap();
        session.stop_playback();

        assert!(!session.player_mut().playing);
        assert!(session.is_enabled());
        assert_eq!(session.store.get(PREF_KEY).unwrap().as_deref(), Some("on"));
    }

    #[test]
    fn set_volume_clamps_and_persists() {
        let mut session = AudioSession::load(MemoryStore::new(), allowing());
        session.set_volume(-2.0);
        assert_eq!(session.volume(), 0.0);
        assert_eq!(session.store.get(VOLUME_KEY).unwrap().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn stored_on_resumes_on_first_gesture() {
        let mut store = MemoryStore::new();
        store.set(PREF_KEY, "on").unwrap();
        let mut session = AudioSession::load(store, allowing());
        assert!(session.is_enabled());
        assert!(!session.player_mut().playing);

        session.resume_if_enabled().await;
        session.resume_if_enabled().await;
        assert!(session.player_mut().playing);
        assert_eq!(session.player_mut().starts, 1);
    }

    #[tokio::test]
    async fn resume_does_nothing_when_off() {
        let mut store = MemoryStore::new();
        store.set(PREF_KEY, "off").unwrap();
        let mut session = AudioSession::load(store, allowing());
        session.resume_if_enabled().await;
        assert_eq!(session.player_mut().starts, 0);
    }

    #[tokio::test]
    async fn command_playback_without_player_is_denied() {
        let mut player = CommandPlayback::new(None, "loop.mp3");
        let err = player.play(0.5).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NoPlayer));
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn command_playback_reports_missing_binary() {
        let mut player = CommandPlayback::new(Some("santa-no-such-player-binary --loop"), "loop.mp3");
        let err = player.play(0.5).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Spawn(_)));
    }
}
