pub mod overlay;
pub mod skeleton;

pub use overlay::{annotate_error, draw_text};
pub use skeleton::{draw_skeleton, SKELETON_CONNECTIONS};
