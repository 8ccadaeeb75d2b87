// Fretboard placement
// Assigns each pitch of each chord to a string/fret under ergonomic costs

use super::tuning::{Tuning, STRING_COUNT};
use super::types::{FretAssignment, NoteEvent, TabEvent};

/// Fret ceiling used by the tab service
pub const DEFAULT_MAX_FRET: u8 = 15;

/// Fret ceiling of a full-size neck
pub const EXTENDED_MAX_FRET: u8 = 21;

/// Starting hand-position estimate for every tab
pub const INITIAL_HAND_POSITION: f64 = 2.0;

/// Weight kept from the previous estimate on each fretted note
pub const HAND_SMOOTHING: f64 = 0.8;

/// Above this position chords are assigned from the highest pitch down
pub const HIGH_POSITION_THRESHOLD: f64 = 12.0;

/// Cost added per fret to favour the low end of the neck
const LOW_FRET_BIAS: f64 = 0.5;

/// Cost reduction for open strings
const OPEN_STRING_REWARD: f64 = 2.0;

/// Running estimate of where the fretting hand sits, in frets
///
/// Scoped to one tab: create a fresh one per placement run and thread it
/// through every chord of that run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandPosition {
    position: f64,
}

impl HandPosition {
    pub fn new() -> Self {
        HandPosition {
            position: INITIAL_HAND_POSITION,
        }
    }

    pub fn value(&self) -> f64 {
        self.position
    }

    /// Whether chords should be assigned from the highest pitch down
    pub fn prefers_descending(&self) -> bool {
        self.position > HIGH_POSITION_THRESHOLD
    }

    /// Fold a chosen fret into the estimate; open strings leave it untouched
    pub fn observe(&mut self, fret: u8) {
        if fret > 0 {
            self.position =
                self.position * HAND_SMOOTHING + f64::from(fret) * (1.0 - HAND_SMOOTHING);
        }
    }

    /// Placement cost of playing `fret` from the current position
    pub fn cost(&self, fret: u8) -> f64 {
        let fret = f64::from(fret);
        let open_reward = if fret == 0.0 { OPEN_STRING_REWARD } else { 0.0 };
        (fret - self.position).abs() + fret * LOW_FRET_BIAS - open_reward
    }
}

impl Default for HandPosition {
    fn default() -> Self {
        Self::new()
    }
}

/// A candidate location for one pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    string: u8,
    fret: u8,
}

/// Maps quantized note events onto a tuned fretboard
#[derive(Debug, Clone)]
pub struct FretboardMapper {
    tuning: Tuning,
    max_fret: u8,
}

impl FretboardMapper {
    pub fn new(tuning: Tuning, max_fret: u8) -> Self {
        FretboardMapper { tuning, max_fret }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn max_fret(&self) -> u8 {
        self.max_fret
    }

    /// Place a whole tab, starting from a fresh hand position
    pub fn place(&self, events: &[NoteEvent]) -> Vec<TabEvent> {
        let mut hand = HandPosition::new();
        events
            .iter()
            .map(|event| self.place_chord(event, &mut hand))
            .collect()
    }

    /// Place one chord, updating the caller's hand position
    ///
    /// Pitches without any playable location are dropped. The resulting
    /// strings and frets are in assignment order, which is ascending pitch
    /// unless the hand sits above the twelfth fret.
    pub fn place_chord(&self, event: &NoteEvent, hand: &mut HandPosition) -> TabEvent {
        let mut ordered = event.pitches.clone();
        if hand.prefers_descending() {
            ordered.sort_by(|a, b| b.total_cmp(a));
        } else {
            ordered.sort_by(|a, b| a.total_cmp(b));
        }

        let mut used = [false; STRING_COUNT];
        let mut assignments: Vec<FretAssignment> = Vec::with_capacity(ordered.len());

        for pitch in ordered {
            let Some(best) = self
                .candidates(pitch, &used)
                .min_by(|a, b| hand.cost(a.fret).total_cmp(&hand.cost(b.fret)))
            else {
                log::debug!("No playable position for pitch {}, dropping it", pitch);
                continue;
            };

            used[usize::from(best.string - 1)] = true;
            assignments.push(FretAssignment {
                string: best.string,
                fret: best.fret,
                midi: pitch.trunc() as i32,
            });
            hand.observe(best.fret);
        }

        TabEvent::from_assignments(event.offset, event.duration, &assignments)
    }

    /// Playable locations for a pitch on strings not yet used, string order
    fn candidates<'a>(
        &'a self,
        pitch: f64,
        used: &'a [bool; STRING_COUNT],
    ) -> impl Iterator<Item = Candidate> + 'a {
        (0..STRING_COUNT).filter_map(move |index| {
            if used[index] {
                return None;
            }
            let fret = (pitch - f64::from(self.tuning.open_pitch(index))).trunc();
            if fret < 0.0 || fret > f64::from(self.max_fret) {
                return None;
            }
            Some(Candidate {
                string: index as u8 + 1,
                fret: fret as u8,
            })
        })
    }
}

impl Default for FretboardMapper {
    fn default() -> Self {
        FretboardMapper::new(Tuning::standard(), DEFAULT_MAX_FRET)
    }
}

/// Place events with the given tuning and fret ceiling
pub fn place(events: &[NoteEvent], tuning: &Tuning, max_fret: u8) -> Vec<TabEvent> {
    FretboardMapper::new(*tuning, max_fret).place(events)
}
