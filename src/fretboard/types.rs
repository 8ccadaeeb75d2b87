// Tab data model
// Quantized note events in, string/fret tab events out

use serde::{Deserialize, Serialize};

/// One simultaneous sounding (single note or chord) after quantization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Onset in quarter notes from the start of the piece
    pub offset: f64,

    /// Length in quarter notes, always > 0
    pub duration: f64,

    /// MIDI pitch numbers, fractional values allowed
    pub pitches: Vec<f64>,

    /// Note names parallel to `pitches`, e.g. "E2"
    pub names: Vec<String>,
}

impl NoteEvent {
    pub fn new(offset: f64, duration: f64, pitches: Vec<f64>, names: Vec<String>) -> Self {
        NoteEvent {
            offset,
            duration,
            pitches,
            names,
        }
    }

    pub fn is_chord(&self) -> bool {
        self.pitches.len() > 1
    }
}

/// Where a single pitch of a chord ended up on the neck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FretAssignment {
    /// String number, 1 (highest) to 6 (lowest)
    pub string: u8,

    /// Fret number, 0 = open string
    pub fret: u8,

    /// Integer MIDI pitch that was placed
    pub midi: i32,
}

/// A placed chord: parallel string/fret arrays in placement order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabEvent {
    pub time: f64,
    pub duration: f64,
    pub strings: Vec<u8>,
    pub frets: Vec<u8>,
}

impl TabEvent {
    /// Build a tab event from assignments, keeping their order
    pub fn from_assignments(time: f64, duration: f64, assignments: &[FretAssignment]) -> Self {
        TabEvent {
            time,
            duration,
            strings: assignments.iter().map(|a| a.string).collect(),
            frets: assignments.iter().map(|a| a.fret).collect(),
        }
    }

    /// True when every pitch of the source event was dropped
    pub fn is_rest(&self) -> bool {
        self.strings.is_empty()
    }

    /// True when every string has a matching fret
    pub fn is_well_formed(&self) -> bool {
        self.strings.len() == self.frets.len()
    }

    /// Fret played on a string number, if any
    pub fn fret_on(&self, string: u8) -> Option<u8> {
        self.strings
            .iter()
            .position(|&s| s == string)
            .and_then(|idx| self.frets.get(idx).copied())
    }
}
