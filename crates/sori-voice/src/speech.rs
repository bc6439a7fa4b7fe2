//! Sentence-unit splitting for sequential TTS playback.
//!
//! Responses are played one sentence-like unit at a time so an interruption
//! can stop between units. Units split on `.` `!` `?` `。`, each keeping its
//! terminator; pieces with no content besides terminators and whitespace are
//! discarded.

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。')
}

/// Split `text` into playable sentence units. The terminator stays attached
/// to its sentence; leading whitespace of a following unit is preserved.
pub fn split_speech_units(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if is_terminator(c) {
            push_unit(&mut units, &mut current);
        }
    }
    push_unit(&mut units, &mut current);
    units
}

fn push_unit(units: &mut Vec<String>, current: &mut String) {
    let has_content = current
        .chars()
        .any(|c| !c.is_whitespace() && !is_terminator(c));
    if has_content {
        units.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// A unit handed to the synthesizer always carries a trailing `.` so the
/// voice lands on a full stop; units already ending in `.` are untouched.
pub fn ensure_sentence_end(mut unit: String) -> String {
    if !unit.ends_with('.') {
        unit.push('.');
    }
    unit
}
