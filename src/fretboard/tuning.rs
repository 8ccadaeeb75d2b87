// Guitar tuning
// Ordered open-string pitches, highest string first

use serde::{Deserialize, Serialize};

/// Number of strings on the instrument
pub const STRING_COUNT: usize = 6;

/// Standard EADGBE tuning, index 0 = high E (string 1)
pub const STANDARD_TUNING: [i32; STRING_COUNT] = [64, 59, 55, 50, 45, 40];

const PITCH_CLASS_LABELS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Open-string MIDI pitches for the six strings
///
/// Index 0 is the highest string (string number 1), index 5 the lowest
/// (string number 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuning {
    open_pitches: [i32; STRING_COUNT],
}

impl Tuning {
    pub fn new(open_pitches: [i32; STRING_COUNT]) -> Self {
        Tuning { open_pitches }
    }

    /// Standard EADGBE tuning
    pub fn standard() -> Self {
        Tuning::new(STANDARD_TUNING)
    }

    /// Open pitch of a string by zero-based index (0 = highest string)
    pub fn open_pitch(&self, index: usize) -> i32 {
        self.open_pitches[index]
    }

    pub fn open_pitches(&self) -> &[i32; STRING_COUNT] {
        &self.open_pitches
    }

    /// Label used at the start of a tab line, e.g. "e" for the high E string
    ///
    /// The highest string is written in lower case so it can be told apart
    /// from a lower string sharing its pitch class.
    pub fn string_label(&self, index: usize) -> String {
        let pitch_class = self.open_pitches[index].rem_euclid(12) as usize;
        let label = PITCH_CLASS_LABELS[pitch_class];
        if index == 0 {
            label.to_lowercase()
        } else {
            label.to_string()
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tuning() {
        let tuning = Tuning::default();
        assert_eq!(tuning.open_pitch(0), 64);
        assert_eq!(tuning.open_pitch(5), 40);
    }

    #[test]
    fn test_string_labels() {
        let tuning = Tuning::standard();
        let labels: Vec<String> = (0..STRING_COUNT).map(|i| tuning.string_label(i)).collect();
        assert_eq!(labels, vec!["e", "B", "G", "D", "A", "E"]);
    }

    #[test]
    fn test_drop_d_label() {
        let tuning = Tuning::new([64, 59, 55, 50, 45, 38]);
        assert_eq!(tuning.string_label(5), "D");
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let json = serde_json::to_string(&Tuning::standard()).unwrap();
        assert_eq!(json, "[64,59,55,50,45,40]");
    }
}
