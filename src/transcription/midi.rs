// MIDI reading - Standard MIDI files into timed notes using midly crate
// Times are expressed in quarter notes so they survive tempo metadata

use midly::{MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MidiReadError {
    #[error("Failed to parse MIDI: {0}")]
    Parse(#[from] midly::Error),

    #[error("Unsupported MIDI timing: {0}")]
    UnsupportedTiming(String),
}

/// A sounding note recovered from a MIDI file
#[derive(Debug, Clone, PartialEq)]
pub struct MidiNote {
    /// Onset in quarter notes
    pub start: f64,

    /// Length in quarter notes
    pub duration: f64,

    /// MIDI key number
    pub pitch: u8,

    pub velocity: u8,
}

/// Read all notes of all tracks, sorted by onset then pitch
///
/// Note-on with velocity 0 is treated as note-off. Overlapping notes on the
/// same key and channel are closed first-in first-out; notes still sounding
/// when a track ends are closed at the track's last tick.
pub fn read_notes(bytes: &[u8]) -> Result<Vec<MidiNote>, MidiReadError> {
    let smf = Smf::parse(bytes)?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(ppq) => f64::from(ppq.as_int()),
        Timing::Timecode(fps, subframes) => {
            return Err(MidiReadError::UnsupportedTiming(format!(
                "SMPTE {:?} fps, {} ticks per frame",
                fps, subframes
            )));
        }
    };
    if ticks_per_quarter <= 0.0 {
        return Err(MidiReadError::UnsupportedTiming(
            "zero ticks per quarter note".to_string(),
        ));
    }

    let mut notes = Vec::new();

    for track in &smf.tracks {
        let mut tick: u64 = 0;
        let mut sounding: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            tick += u64::from(event.delta.as_int());

            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    sounding
                        .entry((channel, key.as_int()))
                        .or_default()
                        .push_back((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let pitch = key.as_int();
                    if let Some((start, velocity)) = sounding
                        .get_mut(&(channel, pitch))
                        .and_then(|queue| queue.pop_front())
                    {
                        notes.push(to_note(start, tick, pitch, velocity, ticks_per_quarter));
                    }
                }
                _ => {}
            }
        }

        for ((_, pitch), queue) in sounding {
            for (start, velocity) in queue {
                notes.push(to_note(start, tick, pitch, velocity, ticks_per_quarter));
            }
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
    Ok(notes)
}

fn to_note(start: u64, end: u64, pitch: u8, velocity: u8, ticks_per_quarter: f64) -> MidiNote {
    MidiNote {
        start: start as f64 / ticks_per_quarter,
        duration: end.saturating_sub(start) as f64 / ticks_per_quarter,
        pitch,
        velocity,
    }
}
