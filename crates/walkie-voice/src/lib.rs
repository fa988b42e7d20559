//! Voice processing for the walkie platform.
//!
//! Everything between raw transcripts and a dispatchable decision lives
//! here: the HTTP speech-to-text client, the intent classifier with its
//! prompt contract, retry policy, keyword-heuristic fallback and result
//! cache, and the cheap transcript filters (coherence and the restricted
//! phrase blocklist) the ingest pipeline applies before spending an
//! upstream call.

pub mod classify;
pub mod config;
pub mod error;
pub mod filter;
pub mod heuristics;
pub mod stt;

pub use classify::{IntentAnalyzer, IntentClassifier};
pub use config::{ClassifierConfig, SttConfig};
pub use error::VoiceError;
pub use filter::{contains_restricted_phrase, is_likely_coherent};
pub use stt::{HttpSttClient, SpeechToText};
