// ASCII tablature rendering
// One column per tab event, highest string on top

use super::tuning::{Tuning, STRING_COUNT};
use super::types::TabEvent;

/// Render tab events as six lines of ASCII tab
///
/// Each event becomes one column. Frets in a column are padded with dashes
/// to the widest fret label so chords stay aligned; an event with no placed
/// notes renders as an empty column of width one.
pub fn render_ascii(events: &[TabEvent], tuning: &Tuning) -> String {
    let mut lines: Vec<String> = (0..STRING_COUNT)
        .map(|index| format!("{}|", tuning.string_label(index)))
        .collect();

    for event in events {
        let width = event
            .frets
            .iter()
            .map(|fret| fret.to_string().len())
            .max()
            .unwrap_or(1);

        for (index, line) in lines.iter_mut().enumerate() {
            let string_number = index as u8 + 1;
            match event.fret_on(string_number) {
                Some(fret) => {
                    let label = fret.to_string();
                    line.push('-');
                    line.push_str(&label);
                    line.push_str(&"-".repeat(width - label.len()));
                    line.push('-');
                }
                None => {
                    line.push('-');
                    line.push_str(&"-".repeat(width));
                    line.push('-');
                }
            }
        }
    }

    lines.join("\n")
}
