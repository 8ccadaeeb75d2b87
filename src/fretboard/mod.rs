// Fretboard - Tuning, tab data model, and string/fret placement
// Turns quantized note events into playable tablature

pub mod placement;
pub mod render;
pub mod tuning;
pub mod types;

pub use placement::{place, FretboardMapper, HandPosition, DEFAULT_MAX_FRET, EXTENDED_MAX_FRET};
pub use render::render_ascii;
pub use tuning::Tuning;
pub use types::{FretAssignment, NoteEvent, TabEvent};
