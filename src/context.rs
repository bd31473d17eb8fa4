//! Audio context — the render host voice graphs are mounted in.
//!
//! A context is pulled: the platform (an audio callback, a worklet, or the
//! offline renderer) asks for frames and the context renders every mounted
//! graph in fixed quanta, summing them on the master bus. Its clock is the
//! number of frames delivered divided by the sample rate.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::dsp::mixer::Mixer;
use crate::error::EngineError;
use crate::router::VoiceGraph;

/// Frames rendered per processing block.
pub const RENDER_QUANTUM: usize = 128;

/// Handle of a graph mounted in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Produces silence and does not advance until resumed.
    Suspended,
    Running,
    Closed,
}

/// Non-interleaved stereo samples.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoBuffer {
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn silent(sample_rate: u32, frames: usize) -> Self {
        StereoBuffer {
            sample_rate,
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channels(&self) -> [&[f32]; 2] {
        [&self.left, &self.right]
    }

    /// Largest absolute sample across both channels.
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0_f32, |m, s| m.max(s.abs()))
    }

    pub fn scale(&mut self, gain: f32) {
        for s in self.left.iter_mut().chain(self.right.iter_mut()) {
            *s *= gain;
        }
    }
}

pub struct AudioContext {
    sample_rate: f64,
    state: ContextState,
    resume_requested: bool,
    offline: bool,
    /// Frames handed to the caller.
    frames_delivered: u64,
    /// Quanta processed internally; may run ahead of delivery by < 1 quantum.
    quanta: u64,
    carry_left: Vec<f32>,
    carry_right: Vec<f32>,
    nodes: BTreeMap<NodeId, VoiceGraph>,
    next_id: u64,
    ended: Vec<NodeId>,
    ended_seen: BTreeSet<NodeId>,
    mixer: Mixer,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("state", &self.state)
            .field("offline", &self.offline)
            .field("current_time", &self.current_time())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl AudioContext {
    fn with_bus(sample_rate: f64, state: ContextState, offline: bool, mixer: Mixer) -> Self {
        AudioContext {
            sample_rate,
            state,
            resume_requested: false,
            offline,
            frames_delivered: 0,
            quanta: 0,
            carry_left: Vec::new(),
            carry_right: Vec::new(),
            nodes: BTreeMap::new(),
            next_id: 1,
            ended: Vec::new(),
            ended_seen: BTreeSet::new(),
            mixer,
            scratch_left: vec![0.0; RENDER_QUANTUM],
            scratch_right: vec![0.0; RENDER_QUANTUM],
        }
    }

    /// A live output context. Starts suspended until a user gesture resumes it.
    pub fn realtime(config: &EngineConfig) -> Self {
        log::info!("Creating realtime audio context at {} Hz", config.sample_rate);
        AudioContext::with_bus(
            config.sample_rate as f64,
            ContextState::Suspended,
            false,
            Mixer::new(config.master_gain, config.soft_clip),
        )
    }

    /// A running, unclipped context for rendering ahead of time.
    pub fn offline(sample_rate: u32) -> Self {
        AudioContext::with_bus(
            sample_rate as f64,
            ContextState::Running,
            true,
            Mixer::new(1.0, false),
        )
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Seconds of audio delivered so far.
    pub fn current_time(&self) -> f64 {
        self.frames_delivered as f64 / self.sample_rate
    }

    /// Ask for a resume; the host honours it at the next user gesture.
    pub fn request_resume(&mut self) {
        if self.state == ContextState::Suspended && !self.resume_requested {
            log::warn!("Audio context is suspended; resume requested");
            self.resume_requested = true;
        }
    }

    pub fn resume_requested(&self) -> bool {
        self.resume_requested
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.state == ContextState::Closed {
            return Err(EngineError::ContextClosed);
        }
        if self.state == ContextState::Suspended {
            log::info!("Audio context resumed");
        }
        self.state = ContextState::Running;
        self.resume_requested = false;
        Ok(())
    }

    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    /// Close the context, dropping every mounted graph.
    pub fn close(&mut self) {
        self.state = ContextState::Closed;
        self.nodes.clear();
        self.ended.clear();
        self.ended_seen.clear();
    }

    /// Mount `graph`, returning its handle.
    pub fn connect(&mut self, graph: VoiceGraph) -> Result<NodeId, EngineError> {
        if self.state == ContextState::Closed {
            return Err(EngineError::ContextClosed);
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, graph);
        Ok(id)
    }

    /// Unmount a graph. Returns whether it was mounted.
    pub fn disconnect(&mut self, id: NodeId) -> bool {
        self.ended.retain(|e| *e != id);
        self.ended_seen.remove(&id);
        self.nodes.remove(&id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&VoiceGraph> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drain the graphs whose generators finished since the last call.
    pub fn take_ended(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.ended)
    }

    fn process_quantum(&mut self) {
        let block_start = (self.quanta * RENDER_QUANTUM as u64) as f64 / self.sample_rate;
        let block_end = block_start + RENDER_QUANTUM as f64 / self.sample_rate;
        self.mixer.clear(RENDER_QUANTUM);

        let mut finished = Vec::new();
        for (id, graph) in self.nodes.iter_mut() {
            self.scratch_left.fill(0.0);
            self.scratch_right.fill(0.0);
            match graph.render(block_start, &mut self.scratch_left, &mut self.scratch_right) {
                Ok(()) => self.mixer.add_block(&self.scratch_left, &self.scratch_right),
                Err(e) => {
                    log::error!("Graph {id:?} failed while rendering: {e}");
                    finished.push(*id);
                    continue;
                }
            }
            if graph.has_ended(block_end) {
                finished.push(*id);
            }
        }

        for id in finished {
            if self.offline {
                self.nodes.remove(&id);
            } else if self.ended_seen.insert(id) {
                self.ended.push(id);
            }
        }

        let start = self.carry_left.len();
        self.carry_left.resize(start + RENDER_QUANTUM, 0.0);
        self.carry_right.resize(start + RENDER_QUANTUM, 0.0);
        self.mixer
            .output_into(&mut self.carry_left[start..], &mut self.carry_right[start..]);
        self.quanta += 1;
    }

    /// Pull `frames` frames of output.
    ///
    /// A suspended context returns silence without advancing its clock.
    pub fn render(&mut self, frames: usize) -> Result<StereoBuffer, EngineError> {
        let rate = self.sample_rate as u32;
        match self.state {
            ContextState::Closed => return Err(EngineError::ContextClosed),
            ContextState::Suspended => return Ok(StereoBuffer::silent(rate, frames)),
            ContextState::Running => {}
        }
        while self.carry_left.len() < frames {
            self.process_quantum();
        }
        let left: Vec<f32> = self.carry_left.drain(..frames).collect();
        let right: Vec<f32> = self.carry_right.drain(..frames).collect();
        self.frames_delivered += frames as u64;
        Ok(StereoBuffer {
            sample_rate: rate,
            left,
            right,
        })
    }
}

/// Lazily constructs the shared live context, exactly once.
#[derive(Debug)]
pub struct ContextHolder {
    config: EngineConfig,
    context: Option<AudioContext>,
    constructions: u32,
}

impl ContextHolder {
    pub fn new(config: EngineConfig) -> Self {
        ContextHolder {
            config,
            context: None,
            constructions: 0,
        }
    }

    /// The context, created on first use.
    pub fn get(&mut self) -> &mut AudioContext {
        let config = &self.config;
        let constructions = &mut self.constructions;
        self.context.get_or_insert_with(|| {
            *constructions += 1;
            AudioContext::realtime(config)
        })
    }

    /// The context if it has been created.
    pub fn existing(&mut self) -> Option<&mut AudioContext> {
        self.context.as_mut()
    }

    pub fn is_created(&self) -> bool {
        self.context.is_some()
    }

    pub fn constructions(&self) -> u32 {
        self.constructions
    }
}
