//! Deterministic keyword command detection.
//!
//! Runs whenever the upstream classifier is unavailable or non-committal.
//! Works on a normalized transcript: lowercase, accents folded, punctuation
//! stripped, whitespace collapsed.

use walkie_types::{ClassificationResult, Intent};

/// Spoken numbers and ordinals the connect command understands.
const WORD_NUMBERS: &[(&str, &str)] = &[
    ("uno", "1"),
    ("primero", "1"),
    ("dos", "2"),
    ("segundo", "2"),
    ("tres", "3"),
    ("tercero", "3"),
    ("cuatro", "4"),
    ("cuarto", "4"),
    ("cinco", "5"),
    ("quinto", "5"),
];

/// Normalizes a transcript for keyword matching.
pub fn normalize_transcript(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            ',' | '.' | ';' | ':' | '!' | '?' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attempts to detect a command in the transcript without the upstream
/// classifier. Returns `None` when no trigger matches.
pub fn detect_command_fallback(
    transcript: &str,
    channels: &[String],
    current_state: &str,
) -> Option<ClassificationResult> {
    let normalized = normalize_transcript(transcript);

    if is_list_channels(&normalized) {
        return Some(ClassificationResult::command(
            Intent::RequestChannelList,
            current_state,
        ));
    }

    if is_disconnect(&normalized) {
        return Some(ClassificationResult::command(
            Intent::RequestChannelDisconnect,
            current_state,
        ));
    }

    if is_connect(&normalized) {
        if let Some(channel) = extract_channel(&normalized, channels) {
            let mut result =
                ClassificationResult::command(Intent::RequestChannelConnect, current_state);
            result.channels = vec![channel];
            return Some(result);
        }
    }

    None
}

fn contains_all(text: &str, terms: &[&str]) -> bool {
    terms.iter().all(|term| text.contains(term))
}

fn is_list_channels(text: &str) -> bool {
    contains_all(text, &["lista", "canal"])
        || contains_all(text, &["dame", "canal"])
        || contains_all(text, &["trae", "canal"])
        || text.contains("muestrame canal")
        || contains_all(text, &["canales", "disponibles"])
}

fn is_connect(text: &str) -> bool {
    text.contains("conecta")
        || text.contains("conectame")
        || text.contains("cambia")
        || text.contains("ponme")
        || text.contains("uneme")
        || (text.contains("entrar") && text.contains("canal"))
}

fn is_disconnect(text: &str) -> bool {
    text.contains("desconecta")
        || text.contains("salir del canal")
        || text.contains("sacame del canal")
        || text.contains("quitarme del canal")
        || text.contains("dejar el canal")
}

/// Extracts a channel target from the transcript: embedded digits first,
/// then the spoken-number table. The resulting `canal-N` code is accepted
/// only if the available list is empty or contains it.
fn extract_channel(text: &str, channels: &[String]) -> Option<String> {
    if let Some(digits) = first_digit_run(text) {
        return validate_channel(format!("canal-{digits}"), channels);
    }

    for word in text.split_whitespace() {
        if let Some((_, number)) = WORD_NUMBERS.iter().find(|(spoken, _)| *spoken == word) {
            return validate_channel(format!("canal-{number}"), channels);
        }
    }

    None
}

fn first_digit_run(text: &str) -> Option<String> {
    let mut run = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            run.push(c);
        } else if !run.is_empty() {
            return Some(run);
        }
    }
    if run.is_empty() {
        None
    } else {
        Some(run)
    }
}

fn validate_channel(channel: String, channels: &[String]) -> Option<String> {
    if channels.is_empty() || channels.iter().any(|c| c == &channel) {
        Some(channel)
    } else {
        None
    }
}
