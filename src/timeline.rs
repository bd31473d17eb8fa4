//! Timeline data model — tracks, clips, transport position and loop region.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Default timeline length in seconds.
pub const DEFAULT_TIMELINE_DURATION: f64 = 60.0;

/// Longest timeline that can be set or rendered, in seconds.
pub const MAX_TIMELINE_DURATION: f64 = 600.0;

const DEFAULT_TRACK_COLOR: &str = "#6366f1";

/// A fresh, globally unique id for a sound, track, clip or preset.
pub fn mint_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reject placements that violate `start_time >= 0` and `duration > 0`.
pub fn validate_placement(start_time: f64, duration: f64) -> Result<(), EngineError> {
    let valid =
        start_time.is_finite() && start_time >= 0.0 && duration.is_finite() && duration > 0.0;
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidClip {
            start_time,
            duration,
        })
    }
}

/// A time-bounded placement of a track's sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineClip {
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    /// Seconds into the source at which the clip begins.
    pub offset: f64,
}

impl Default for TimelineClip {
    fn default() -> Self {
        TimelineClip {
            id: String::new(),
            start_time: 0.0,
            duration: 1.0,
            offset: 0.0,
        }
    }
}

impl TimelineClip {
    pub fn new(start_time: f64, duration: f64) -> Result<Self, EngineError> {
        validate_placement(start_time, duration)?;
        Ok(TimelineClip {
            id: mint_id(),
            start_time,
            duration,
            offset: 0.0,
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether `position` falls within `[start, end)`.
    pub fn spans(&self, position: f64) -> bool {
        position >= self.start_time && position < self.end_time()
    }

    /// Whether `position` is inside the trigger window `[start, start + window]`.
    pub fn in_trigger_window(&self, position: f64, window: f64) -> bool {
        position >= self.start_time && position <= self.start_time + window
    }

    /// Intra-clip offset of a voice started at `position`.
    pub fn offset_at(&self, position: f64) -> f64 {
        (position - self.start_time).max(0.0) + self.offset.max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineTrack {
    pub id: String,
    /// Weak reference to a sound; a dangling id makes the track silent.
    pub sound_id: String,
    pub name: String,
    pub color: String,
    pub muted: bool,
    pub solo: bool,
    pub volume: f64,
    pub pan: f64,
    pub clips: Vec<TimelineClip>,
}

impl Default for TimelineTrack {
    fn default() -> Self {
        TimelineTrack {
            id: String::new(),
            sound_id: String::new(),
            name: String::new(),
            color: DEFAULT_TRACK_COLOR.to_string(),
            muted: false,
            solo: false,
            volume: 1.0,
            pan: 0.0,
            clips: Vec::new(),
        }
    }
}

impl TimelineTrack {
    pub fn new(sound_id: impl Into<String>, name: impl Into<String>) -> Self {
        TimelineTrack {
            id: mint_id(),
            sound_id: sound_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn clip(&self, clip_id: &str) -> Option<&TimelineClip> {
        self.clips.iter().find(|c| c.id == clip_id)
    }

    pub fn clip_mut(&mut self, clip_id: &str) -> Option<&mut TimelineClip> {
        self.clips.iter_mut().find(|c| c.id == clip_id)
    }

    /// Whether the track should sound given the timeline's solo state.
    pub fn is_audible(&self, any_solo: bool) -> bool {
        !self.muted && (!any_solo || self.solo)
    }

    pub fn volume(&self) -> f64 {
        if self.volume.is_finite() {
            self.volume.clamp(0.0, 2.0)
        } else {
            1.0
        }
    }

    pub fn pan(&self) -> f64 {
        if self.pan.is_finite() {
            self.pan.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopRegion {
    pub enabled: bool,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineState {
    pub tracks: Vec<TimelineTrack>,
    pub duration: f64,
    pub current_time: f64,
    pub is_playing: bool,
    #[serde(rename = "loop")]
    pub loop_region: LoopRegion,
}

impl Default for TimelineState {
    fn default() -> Self {
        TimelineState {
            tracks: Vec::new(),
            duration: DEFAULT_TIMELINE_DURATION,
            current_time: 0.0,
            is_playing: false,
            loop_region: LoopRegion::default(),
        }
    }
}

impl TimelineState {
    pub fn track(&self, track_id: &str) -> Option<&TimelineTrack> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut TimelineTrack> {
        self.tracks.iter_mut().find(|t| t.id == track_id)
    }

    pub fn clip(&self, track_id: &str, clip_id: &str) -> Option<&TimelineClip> {
        self.track(track_id).and_then(|t| t.clip(clip_id))
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    /// Validate a loop region against the timeline duration.
    pub fn check_loop(&self, start: f64, end: f64) -> Result<(), EngineError> {
        let valid = start.is_finite()
            && end.is_finite()
            && 0.0 <= start
            && start < end
            && end <= self.duration;
        if valid {
            Ok(())
        } else {
            Err(EngineError::InvalidLoopRegion { start, end })
        }
    }

    /// The loop region when looping is enabled and well-formed.
    pub fn active_loop(&self) -> Option<LoopRegion> {
        let l = self.loop_region;
        (l.enabled && self.check_loop(l.start, l.end).is_ok()).then_some(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_unique() {
        let a = mint_id();
        let b = mint_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn clip_placement_is_validated() {
        assert!(TimelineClip::new(0.0, 1.0).is_ok());
        assert!(TimelineClip::new(-0.1, 1.0).is_err());
        assert!(TimelineClip::new(1.0, 0.0).is_err());
        assert!(TimelineClip::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn trigger_window_is_closed_interval_after_start() {
        let clip = TimelineClip::new(2.0, 1.5).unwrap();
        assert!(!clip.in_trigger_window(1.9, 0.2));
        assert!(clip.in_trigger_window(2.0, 0.2));
        assert!(clip.in_trigger_window(2.05, 0.2));
        assert!(!clip.in_trigger_window(2.3, 0.2));
        assert!((clip.offset_at(2.05) - 0.05).abs() < 1e-12);
        assert_eq!(clip.offset_at(1.0), 0.0);
    }

    #[test]
    fn solo_silences_other_tracks() {
        let mut t = TimelineTrack::new("s", "A");
        assert!(t.is_audible(false));
        assert!(!t.is_audible(true));
        t.solo = true;
        assert!(t.is_audible(true));
        t.muted = true;
        assert!(!t.is_audible(true));
    }

    #[test]
    fn loop_region_bounds() {
        let state = TimelineState {
            duration: 10.0,
            ..Default::default()
        };
        assert!(state.check_loop(1.0, 3.0).is_ok());
        assert!(state.check_loop(3.0, 3.0).is_err());
        assert!(state.check_loop(-1.0, 3.0).is_err());
        assert!(state.check_loop(1.0, 11.0).is_err());
    }

    #[test]
    fn state_hydrates_from_camel_case_json() {
        let json = r#"{
            "tracks": [{"id": "t1", "soundId": "s1", "clips": [{"id": "c1", "startTime": 2, "duration": 1.5}]}],
            "duration": 10,
            "loop": {"enabled": true, "start": 1, "end": 3}
        }"#;
        let state: TimelineState = serde_json::from_str(json).unwrap();
        assert_eq!(state.tracks[0].sound_id, "s1");
        assert_eq!(state.tracks[0].volume, 1.0);
        assert_eq!(state.clip("t1", "c1").unwrap().start_time, 2.0);
        assert_eq!(state.active_loop().unwrap().end, 3.0);
    }
}
