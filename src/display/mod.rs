//! Image display components: a single image with fallback, and a rotating
//! list of images with a crossfade between frames.

pub mod fallback;
pub mod rotation;

pub use fallback::{DisplayAttrs, FallbackImage, Fit, ImageRef, RenderedImage};
pub use rotation::{
    Crossfade, LayerView, Rotation, RotationChange, RotationPhase, RotationTiming, RotationView,
};
