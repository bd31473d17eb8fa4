//! Voice Lifecycle Manager.
//!
//! Owns every live voice: builds its graph, mounts it in the context, arms a
//! fallback timer, and tears it down exactly once. Three things can end a
//! voice (an explicit stop, the context reporting the graph ended, or the
//! fallback timer) and all of them converge on `teardown`.
//!
//! ```text
//! Idle → Starting → Playing → Stopping → Stopped
//! ```
//!
//! Two clocks are involved: graphs are scheduled on the context's audio
//! clock, timers on the host's wall clock (`now`).

use std::collections::BTreeMap;
use std::fmt;

use crate::config::EngineConfig;
use crate::context::{AudioContext, NodeId};
use crate::error::{EngineError, ensure_finite};
use crate::router::{ChannelMix, route};
use crate::sound::SoundParameters;
use crate::synth::synthesize;

/// Identity of a voice: one per sounding clip instance, or one preview per sound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoiceKey {
    Clip { track_id: String, clip_id: String },
    Preview { sound_id: String },
}

impl VoiceKey {
    pub fn new(track_id: impl Into<String>, clip_id: impl Into<String>) -> Self {
        VoiceKey::Clip {
            track_id: track_id.into(),
            clip_id: clip_id.into(),
        }
    }

    /// Key of the one-shot preview voice for a sound.
    pub fn preview(sound_id: impl Into<String>) -> Self {
        VoiceKey::Preview {
            sound_id: sound_id.into(),
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, VoiceKey::Preview { .. })
    }

    /// The track a timeline voice belongs to.
    pub fn track_id(&self) -> Option<&str> {
        match self {
            VoiceKey::Clip { track_id, .. } => Some(track_id),
            VoiceKey::Preview { .. } => None,
        }
    }

    /// `(track_id, clip_id)` of a timeline voice.
    pub fn clip(&self) -> Option<(&str, &str)> {
        match self {
            VoiceKey::Clip { track_id, clip_id } => Some((track_id, clip_id)),
            VoiceKey::Preview { .. } => None,
        }
    }
}

impl fmt::Display for VoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceKey::Clip { track_id, clip_id } => write!(f, "{track_id}/{clip_id}"),
            VoiceKey::Preview { sound_id } => write!(f, "preview:{sound_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Starting,
    Playing,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Wall-clock deadlines, each owned by one voice.
#[derive(Debug, Default)]
pub struct Timers {
    next: u64,
    deadlines: BTreeMap<TimerId, (f64, VoiceKey)>,
}

impl Timers {
    pub fn arm(&mut self, deadline: f64, key: VoiceKey) -> TimerId {
        self.next += 1;
        let id = TimerId(self.next);
        self.deadlines.insert(id, (deadline, key));
        id
    }

    pub fn clear(&mut self, id: TimerId) -> bool {
        self.deadlines.remove(&id).is_some()
    }

    /// Remove and return every timer due at `now`.
    pub fn due(&mut self, now: f64) -> Vec<(TimerId, VoiceKey)> {
        let fired: Vec<TimerId> = self
            .deadlines
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        fired
            .into_iter()
            .filter_map(|id| self.deadlines.remove(&id).map(|(_, key)| (id, key)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub key: VoiceKey,
    state: VoiceState,
    node: Option<NodeId>,
    timer: Option<TimerId>,
    /// Context time the voice began sounding.
    pub start_time: f64,
    /// Seconds into the sound at which it began.
    pub offset: f64,
    /// Context time the generators stop.
    pub stop_time: f64,
}

impl Voice {
    fn idle(key: VoiceKey, offset: f64) -> Self {
        Voice {
            key,
            state: VoiceState::Idle,
            node: None,
            timer: None,
            start_time: 0.0,
            offset,
            stop_time: 0.0,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// True from the moment the voice starts, before it is audible.
    pub fn is_playing(&self) -> bool {
        matches!(self.state, VoiceState::Starting | VoiceState::Playing)
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStats {
    pub started: u64,
    pub stopped: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct VoiceManager {
    config: EngineConfig,
    voices: BTreeMap<VoiceKey, Voice>,
    timers: Timers,
    stats: VoiceStats,
}

impl VoiceManager {
    pub fn new(config: EngineConfig) -> Self {
        VoiceManager {
            config,
            voices: BTreeMap::new(),
            timers: Timers::default(),
            stats: VoiceStats::default(),
        }
    }

    /// Start `params` under `key`, `offset` seconds into the sound.
    ///
    /// Any voice already live under `key` is torn down first. On failure
    /// nothing stays mounted or armed and the error is returned.
    pub fn play(
        &mut self,
        ctx: &mut AudioContext,
        key: VoiceKey,
        params: &SoundParameters,
        mix: ChannelMix,
        offset: f64,
        now: f64,
    ) -> Result<(), EngineError> {
        self.stop(ctx, &key);

        let mut voice = Voice::idle(key.clone(), offset);
        voice.state = VoiceState::Starting;

        let start = ctx.current_time();
        let mounted = ensure_finite("offset", offset).and_then(|offset| {
            let offset = offset.max(0.0);
            let origin = start - offset;
            let handle = synthesize(params, origin, start, ctx.sample_rate(), &self.config)?;
            let graph = route(handle, params, mix, ctx.sample_rate(), &self.config)?;
            let stop_time = graph.end_time();
            let remaining = (stop_time - start).max(0.0);
            let node = ctx.connect(graph)?;
            Ok((node, stop_time, remaining))
        });

        match mounted {
            Ok((node, stop_time, remaining)) => {
                voice.node = Some(node);
                voice.start_time = start;
                voice.stop_time = stop_time;
                voice.timer = Some(
                    self.timers
                        .arm(now + remaining + self.config.fallback_slack, key.clone()),
                );
                voice.state = VoiceState::Playing;
                self.stats.started += 1;
                log::debug!("Voice {key} started at {start:.3}s (offset {offset:.3}s)");
                self.voices.insert(key, voice);
                Ok(())
            }
            Err(e) => {
                voice.state = VoiceState::Stopped;
                self.stats.failed += 1;
                log::error!("Voice {key} failed to start: {e}");
                Err(e)
            }
        }
    }

    /// Tear down the voice under `key`. Returns whether one was live.
    pub fn stop(&mut self, ctx: &mut AudioContext, key: &VoiceKey) -> bool {
        match self.voices.remove(key) {
            Some(voice) => {
                self.teardown(ctx, voice);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self, ctx: &mut AudioContext) {
        let voices = std::mem::take(&mut self.voices);
        for voice in voices.into_values() {
            self.teardown(ctx, voice);
        }
    }

    /// Tear down every voice on `track_id`.
    pub fn stop_track(&mut self, ctx: &mut AudioContext, track_id: &str) {
        self.stop_matching(ctx, |k| k.track_id() == Some(track_id));
    }

    /// Tear down every timeline voice, leaving sound previews alone.
    pub fn stop_timeline(&mut self, ctx: &mut AudioContext) {
        self.stop_matching(ctx, |k| !k.is_preview());
    }

    fn stop_matching(&mut self, ctx: &mut AudioContext, matches: impl Fn(&VoiceKey) -> bool) {
        let keys: Vec<VoiceKey> = self.voices.keys().filter(|k| matches(k)).cloned().collect();
        for key in keys {
            self.stop(ctx, &key);
        }
    }

    /// Retire voices whose graphs ended or whose fallback timers fired.
    /// Returns the keys torn down.
    pub fn poll(&mut self, ctx: &mut AudioContext, now: f64) -> Vec<VoiceKey> {
        let mut retired = Vec::new();

        for node in ctx.take_ended() {
            let key = self
                .voices
                .iter()
                .find(|(_, v)| v.node == Some(node))
                .map(|(k, _)| k.clone());
            match key {
                Some(key) => {
                    log::debug!("Voice {key} ended");
                    self.stop(ctx, &key);
                    retired.push(key);
                }
                // Not ours any more; make sure it is gone.
                None => {
                    ctx.disconnect(node);
                }
            }
        }

        for (timer, key) in self.timers.due(now) {
            let owned = self.voices.get(&key).is_some_and(|v| v.timer == Some(timer));
            if owned {
                log::debug!("Voice {key} reached its fallback deadline");
                self.stop(ctx, &key);
                retired.push(key);
            }
        }
        retired
    }

    fn teardown(&mut self, ctx: &mut AudioContext, mut voice: Voice) {
        if voice.state == VoiceState::Stopped {
            return;
        }
        voice.state = VoiceState::Stopping;
        if let Some(node) = voice.node.take() {
            ctx.disconnect(node);
        }
        if let Some(timer) = voice.timer.take() {
            self.timers.clear(timer);
        }
        voice.state = VoiceState::Stopped;
        self.stats.stopped += 1;
        log::debug!("Voice {} stopped", voice.key);
    }

    pub fn voice(&self, key: &VoiceKey) -> Option<&Voice> {
        self.voices.get(key)
    }

    pub fn is_active(&self, key: &VoiceKey) -> bool {
        self.voices.get(key).is_some_and(Voice::is_playing)
    }

    pub fn active_keys(&self) -> impl Iterator<Item = &VoiceKey> {
        self.voices.keys()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn stats(&self) -> VoiceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RENDER_QUANTUM;
    use crate::sound::SoundKind;

    fn setup() -> (VoiceManager, AudioContext) {
        let cfg = EngineConfig::default();
        let mut ctx = AudioContext::realtime(&cfg);
        ctx.resume().unwrap();
        (VoiceManager::new(cfg), ctx)
    }

    fn lead(duration: f64) -> SoundParameters {
        SoundParameters {
            id: "lead".into(),
            kind: SoundKind::Lead,
            duration,
            ..Default::default()
        }
    }

    fn key() -> VoiceKey {
        VoiceKey::new("t1", "c1")
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut mgr, mut ctx) = setup();
        mgr.play(&mut ctx, key(), &lead(1.0), ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        assert!(mgr.is_active(&key()));

        assert!(mgr.stop(&mut ctx, &key()));
        assert!(!mgr.stop(&mut ctx, &key()), "Second stop is a no-op");
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(mgr.timer_count(), 0);
        assert_eq!(mgr.stats().stopped, 1);
    }

    #[test]
    fn retrigger_keeps_one_live_voice() {
        let (mut mgr, mut ctx) = setup();
        let params = lead(2.0);
        mgr.play(&mut ctx, key(), &params, ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        mgr.play(&mut ctx, key(), &params, ChannelMix::default(), 0.0, 0.1)
            .unwrap();
        assert_eq!(mgr.len(), 1);
        assert_eq!(ctx.node_count(), 1);
        assert_eq!(mgr.timer_count(), 1);
        assert_eq!(
            mgr.stats(),
            VoiceStats {
                started: 2,
                stopped: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn ended_event_tears_down() {
        let (mut mgr, mut ctx) = setup();
        mgr.play(&mut ctx, key(), &lead(0.05), ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        let stop = mgr.voice(&key()).unwrap().stop_time;
        ctx.render((stop * 44100.0) as usize + RENDER_QUANTUM).unwrap();

        let retired = mgr.poll(&mut ctx, 0.0);
        assert_eq!(retired, vec![key()]);
        assert!(mgr.is_empty());
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(mgr.timer_count(), 0, "Ended path must clear the fallback timer");

        // The timer path finds nothing left to do.
        assert!(mgr.poll(&mut ctx, 100.0).is_empty());
        assert_eq!(mgr.stats().stopped, 1);
    }

    #[test]
    fn fallback_timer_tears_down_without_ended_event() {
        let (mut mgr, mut ctx) = setup();
        mgr.play(&mut ctx, key(), &lead(0.5), ChannelMix::default(), 0.0, 10.0)
            .unwrap();
        assert!(mgr.poll(&mut ctx, 10.5).is_empty(), "Not due yet");
        let retired = mgr.poll(&mut ctx, 11.0);
        assert_eq!(retired, vec![key()]);
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(mgr.timer_count(), 0);
    }

    #[test]
    fn failed_start_reaches_stopped_without_leaks() {
        let (mut mgr, mut ctx) = setup();
        let broken = SoundParameters {
            pitch: 1.0e5,
            ..lead(1.0)
        };
        let result = mgr.play(&mut ctx, key(), &broken, ChannelMix::default(), 0.0, 0.0);
        assert!(result.is_err());
        assert!(!mgr.is_active(&key()));
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(mgr.timer_count(), 0);
        assert_eq!(mgr.stats().failed, 1);
    }

    #[test]
    fn failed_retrigger_still_removes_the_old_voice() {
        let (mut mgr, mut ctx) = setup();
        mgr.play(&mut ctx, key(), &lead(1.0), ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        let result = mgr.play(&mut ctx, key(), &lead(1.0), ChannelMix::default(), f64::NAN, 0.0);
        assert!(result.is_err());
        assert!(mgr.is_empty());
        assert_eq!(ctx.node_count(), 0);
    }

    #[test]
    fn offset_biases_origin() {
        let (mut mgr, mut ctx) = setup();
        ctx.render(44100).unwrap();
        mgr.play(&mut ctx, key(), &lead(2.0), ChannelMix::default(), 0.5, 0.0)
            .unwrap();
        let voice = mgr.voice(&key()).unwrap();
        let graph = ctx.node(voice.node().unwrap()).unwrap();
        assert!((graph.origin() - 0.5).abs() < 1e-12);
        assert!((voice.start_time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stop_track_only_touches_that_track() {
        let (mut mgr, mut ctx) = setup();
        let p = lead(1.0);
        for (t, c) in [("a", "1"), ("a", "2"), ("b", "1")] {
            mgr.play(&mut ctx, VoiceKey::new(t, c), &p, ChannelMix::default(), 0.0, 0.0)
                .unwrap();
        }
        mgr.stop_track(&mut ctx, "a");
        let left: Vec<_> = mgr.active_keys().cloned().collect();
        assert_eq!(left, vec![VoiceKey::new("b", "1")]);
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn stop_all_leaves_nothing_behind() {
        let (mut mgr, mut ctx) = setup();
        let p = lead(1.0);
        mgr.play(&mut ctx, VoiceKey::new("a", "1"), &p, ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        mgr.play(&mut ctx, VoiceKey::preview("s"), &p, ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        mgr.stop_timeline(&mut ctx);
        assert_eq!(mgr.len(), 1, "Previews survive a timeline flush");
        mgr.stop_all(&mut ctx);
        assert!(mgr.is_empty());
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(mgr.timer_count(), 0);
    }

    #[test]
    fn preview_keys_never_collide_with_tracks() {
        let (mut mgr, mut ctx) = setup();
        let p = lead(1.0);
        mgr.play(&mut ctx, VoiceKey::new("preview", "s"), &p, ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        mgr.play(&mut ctx, VoiceKey::preview("s"), &p, ChannelMix::default(), 0.0, 0.0)
            .unwrap();
        assert_eq!(mgr.len(), 2);
        assert_eq!(VoiceKey::preview("s").track_id(), None);

        mgr.stop_track(&mut ctx, "preview");
        let left: Vec<_> = mgr.active_keys().cloned().collect();
        assert_eq!(left, vec![VoiceKey::preview("s")]);
        mgr.stop_timeline(&mut ctx);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn timers_fire_once() {
        let mut timers = Timers::default();
        let id = timers.arm(1.0, key());
        assert!(timers.due(0.5).is_empty());
        assert_eq!(timers.due(1.0), vec![(id, key())]);
        assert!(timers.due(2.0).is_empty());
        assert!(!timers.clear(id));
    }
}
