mod background;
mod compositor;

pub use background::{cover_crop, solid_background, BackgroundCache};
pub use compositor::{
    compose_transparent, composite, decontaminate, resolve_mask, Compositor, Rendered, MID_GRAY,
};
