// Grid quantization - Snap transcribed notes to a rhythmic grid
// Groups notes that land on the same grid onset into chords

use std::path::Path;
use thiserror::Error;

use super::midi::{read_notes, MidiNote, MidiReadError};
use crate::fretboard::NoteEvent;

/// Default grid: four steps per quarter note (sixteenths)
pub const DEFAULT_QUARTER_DIVISOR: u32 = 4;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "E-", "E", "F", "F#", "G", "G#", "A", "B-", "B",
];

#[derive(Debug, Error)]
pub enum QuantizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Midi(#[from] MidiReadError),

    #[error("Invalid grid divisor: {0}")]
    InvalidDivisor(u32),
}

/// Turns a transcribed note stream into ordered note events
pub trait Quantizer: Send + Sync {
    fn extract(&self, midi_path: &Path) -> Result<Vec<NoteEvent>, QuantizeError>;
}

/// Quantizer snapping onsets and durations to `1/divisor` of a quarter note
#[derive(Debug, Clone, Copy)]
pub struct GridQuantizer {
    pub quarter_divisor: u32,
}

impl GridQuantizer {
    pub fn new(quarter_divisor: u32) -> Result<Self, QuantizeError> {
        if quarter_divisor == 0 {
            return Err(QuantizeError::InvalidDivisor(quarter_divisor));
        }
        Ok(GridQuantizer { quarter_divisor })
    }

    /// Quantize already-decoded notes
    pub fn quantize(&self, notes: &[MidiNote]) -> Vec<NoteEvent> {
        let divisor = f64::from(self.quarter_divisor);

        // (grid onset, grid length, pitch) in integer grid steps
        let mut snapped: Vec<(i64, i64, u8)> = notes
            .iter()
            .map(|note| {
                let onset = (note.start * divisor).round().max(0.0) as i64;
                let length = ((note.duration * divisor).round() as i64).max(1);
                (onset, length, note.pitch)
            })
            .collect();
        snapped.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));

        let mut events: Vec<NoteEvent> = Vec::new();
        let mut current: Option<(i64, i64, Vec<u8>)> = None;

        for (onset, length, pitch) in snapped {
            if let Some((group_onset, group_length, pitches)) = current.as_mut() {
                if *group_onset == onset {
                    *group_length = (*group_length).max(length);
                    if !pitches.contains(&pitch) {
                        pitches.push(pitch);
                    }
                    continue;
                }
            }
            if let Some(group) = current.take() {
                events.push(Self::to_event(group, divisor));
            }
            current = Some((onset, length, vec![pitch]));
        }
        if let Some(group) = current {
            events.push(Self::to_event(group, divisor));
        }

        events
    }

    fn to_event((onset, length, pitches): (i64, i64, Vec<u8>), divisor: f64) -> NoteEvent {
        NoteEvent {
            offset: onset as f64 / divisor,
            duration: length as f64 / divisor,
            names: pitches.iter().map(|&p| pitch_name(p)).collect(),
            pitches: pitches.iter().map(|&p| f64::from(p)).collect(),
        }
    }
}

impl Default for GridQuantizer {
    fn default() -> Self {
        GridQuantizer {
            quarter_divisor: DEFAULT_QUARTER_DIVISOR,
        }
    }
}

impl Quantizer for GridQuantizer {
    fn extract(&self, midi_path: &Path) -> Result<Vec<NoteEvent>, QuantizeError> {
        let bytes = std::fs::read(midi_path)?;
        let notes = read_notes(&bytes)?;
        Ok(self.quantize(&notes))
    }
}

/// Note name with octave, e.g. 40 -> "E2", 70 -> "B-4"
pub fn pitch_name(pitch: u8) -> String {
    let octave = i32::from(pitch) / 12 - 1;
    format!("{}{}", NOTE_NAMES[usize::from(pitch % 12)], octave)
}
