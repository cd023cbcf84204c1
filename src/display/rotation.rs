use std::time::Duration;

use tokio::time::Instant;

use super::fallback::{FallbackImage, RenderedImage};
use crate::tasks::loader::{LoadError, LoadedImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationTiming {
    /// Time between rotation ticks.
    pub interval: Duration,
    /// Length of the crossfade started by each tick.
    pub fade: Duration,
}

impl RotationTiming {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);
    pub const DEFAULT_FADE: Duration = Duration::from_millis(1000);

    pub const fn from_millis(interval: u64, fade: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval),
            fade: Duration::from_millis(fade),
        }
    }
}

impl Default for RotationTiming {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            fade: Self::DEFAULT_FADE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    /// Nothing to rotate: the list is empty.
    Idle,
    Displaying { current: usize },
    Transitioning { previous: usize, current: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationChange {
    pub previous: usize,
    pub current: usize,
    pub generation: u64,
}

/// Opacities of the two layers during a crossfade, in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    pub incoming: f32,
    pub outgoing: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerView {
    pub index: usize,
    pub image: RenderedImage,
    pub opacity: f32,
}

/// What to draw right now. `previous` sits beneath `current`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RotationView {
    pub current: Option<LayerView>,
    pub previous: Option<LayerView>,
}

impl RotationView {
    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(|l| l.index)
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.previous.as_ref().map(|l| l.index)
    }

    /// Layers in paint order, bottom first.
    pub fn layers(&self) -> impl Iterator<Item = &LayerView> {
        self.previous.iter().chain(self.current.iter())
    }
}

#[derive(Debug, Clone)]
struct Frame {
    index: usize,
    image: FallbackImage,
}

impl Frame {
    fn new(index: usize, url: &str) -> Self {
        Self {
            index,
            image: FallbackImage::new(Some(url.to_string())),
        }
    }

    fn layer(&self, opacity: f32) -> LayerView {
        LayerView {
            index: self.index,
            image: self.image.render(),
            opacity,
        }
    }
}

/// Rotating display state. Time is supplied by the caller so the machine
/// stays deterministic; the async driver lives in `tasks::rotator`.
#[derive(Debug, Clone)]
pub struct Rotation {
    sources: Vec<String>,
    timing: RotationTiming,
    current: Option<Frame>,
    previous: Option<Frame>,
    generation: u64,
    fade_started: Option<Instant>,
}

impl Rotation {
    pub fn new(sources: Vec<String>, timing: RotationTiming) -> Self {
        let current = sources.first().map(|url| Frame::new(0, url));
        Self {
            sources,
            timing,
            current,
            previous: None,
            generation: 0,
            fade_started: None,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn timing(&self) -> RotationTiming {
        self.timing
    }

    /// Rotation needs at least two entries to be visible.
    pub fn rotates(&self) -> bool {
        self.sources.len() >= 2
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> RotationPhase {
        match (&self.previous, &self.current) {
            (_, None) => RotationPhase::Idle,
            (None, Some(cur)) => RotationPhase::Displaying { current: cur.index },
            (Some(prev), Some(cur)) => RotationPhase::Transitioning {
                previous: prev.index,
                current: cur.index,
            },
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(|f| f.index)
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.previous.as_ref().map(|f| f.index)
    }

    pub fn current_image(&self) -> Option<&FallbackImage> {
        self.current.as_ref().map(|f| &f.image)
    }

    pub fn previous_image(&self) -> Option<&FallbackImage> {
        self.previous.as_ref().map(|f| &f.image)
    }

    /// Advance to the next source. The outgoing frame keeps its own load
    /// state; the incoming one starts fresh with a pending load.
    pub fn tick(&mut self, now: Instant) -> Option<RotationChange> {
        if !self.rotates() {
            return None;
        }
        let outgoing = self.current.take()?;
        let next = (outgoing.index + 1) % self.sources.len();
        let previous = outgoing.index;
        self.current = Some(Frame::new(next, &self.sources[next]));
        self.previous = Some(outgoing);
        self.generation += 1;
        self.fade_started = Some(now);
        Some(RotationChange {
            previous,
            current: next,
            generation: self.generation,
        })
    }

    /// When the crossfade of the latest tick ends, if one is running.
    pub fn fade_deadline(&self) -> Option<Instant> {
        self.previous.as_ref()?;
        self.fade_started.map(|at| at + self.timing.fade)
    }

    /// Drop the outgoing frame once the fade started by tick `generation` is
    /// over. A newer tick owns the outgoing frame, so older completions are
    /// ignored.
    pub fn finish_fade(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.previous.is_none() {
            return false;
        }
        self.previous = None;
        self.fade_started = None;
        true
    }

    pub fn crossfade(&self, now: Instant) -> Option<Crossfade> {
        self.previous.as_ref()?;
        let started = self.fade_started?;
        let fade = self.timing.fade.as_secs_f32();
        let t = if fade <= 0.0 {
            1.0
        } else {
            (now.saturating_duration_since(started).as_secs_f32() / fade).clamp(0.0, 1.0)
        };
        Some(Crossfade {
            incoming: t,
            outgoing: 1.0 - t,
        })
    }

    /// Sources whose load has not been requested yet, marked as loading.
    pub fn take_pending_loads(&mut self) -> Vec<String> {
        self.current
            .iter_mut()
            .chain(self.previous.iter_mut())
            .filter_map(|f| f.image.begin_load())
            .collect()
    }

    /// Apply a load outcome to every displayed frame showing `url`.
    pub fn on_load_result(&mut self, url: &str, result: &Result<LoadedImage, LoadError>) -> bool {
        let mut changed = false;
        for frame in self.current.iter_mut().chain(self.previous.iter_mut()) {
            changed |= frame.image.on_load_result(url, result);
        }
        changed
    }

    /// Replace the source list. An identical list is a no-op; anything else
    /// restarts from the first entry.
    pub fn set_sources(&mut self, sources: Vec<String>) -> bool {
        if sources == self.sources {
            return false;
        }
        *self = Self::new(sources, self.timing);
        true
    }

    pub fn set_timing(&mut self, timing: RotationTiming) -> bool {
        if timing == self.timing {
            return false;
        }
        self.timing = timing;
        true
    }

    pub fn view(&self, now: Instant) -> RotationView {
        let fade = self.crossfade(now);
        RotationView {
            current: self
                .current
                .as_ref()
                .map(|f| f.layer(fade.map_or(1.0, |c| c.incoming))),
            previous: self
                .previous
                .as_ref()
                .zip(fade)
                .map(|(f, c)| f.layer(c.outgoing)),
        }
    }
}
