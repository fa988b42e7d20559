//! Transmission coordination: floor signaling and audio fan-out.
//!
//! The floor is cooperative: the latest START wins on each receiver.
//! A conversation clip raises the floor for its sender, pushes the audio
//! to every live peer, and schedules a deferred STOP once the clip's
//! estimated duration has played out.

use crate::registry::ConnectionRegistry;
use crate::AppState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Payloads above this are refused by the broadcast path.
pub const MAX_BROADCAST_BYTES: usize = 10 * 1024 * 1024;

/// Raises the floor for a speaker on a channel.
///
/// The speaker's own session receives `START`; every other session
/// receives `STOP`. Sessions whose buffers cannot take the control frame
/// are closed.
pub fn start_transmission(registry: &ConnectionRegistry, channel: &str, speaker_id: i64) {
    signal_transmission(registry, channel, speaker_id, true);
}

/// Lowers the floor: `STOP` to every session on the channel.
pub fn stop_transmission(registry: &ConnectionRegistry, channel: &str, speaker_id: i64) {
    signal_transmission(registry, channel, speaker_id, false);
}

fn signal_transmission(
    registry: &ConnectionRegistry,
    channel: &str,
    speaker_id: i64,
    starting: bool,
) {
    let sessions = registry.channel_sessions(channel);
    if sessions.is_empty() {
        tracing::debug!(channel, "no live sessions for transmission signal");
        return;
    }

    tracing::info!(
        channel,
        speaker = speaker_id,
        starting,
        peers = sessions.len(),
        "signaling transmission"
    );

    for session in sessions {
        let signal = if starting && session.user_id == speaker_id {
            "START"
        } else {
            "STOP"
        };
        let frame = json!({
            "type": "transmission",
            "from": speaker_id,
            "signal": signal,
        })
        .to_string();

        if !session.send_control(frame) {
            tracing::warn!(
                user = session.user_id,
                channel,
                "session cannot drain control frames, closing"
            );
            registry.remove_user(session.user_id);
        }
    }
}

/// Writes the payload as a binary frame to every live session on the
/// channel except the sender's own.
pub fn broadcast_audio(
    registry: &ConnectionRegistry,
    channel: &str,
    sender_id: i64,
    payload: &Arc<Vec<u8>>,
) {
    if payload.len() > MAX_BROADCAST_BYTES {
        tracing::warn!(
            channel,
            sender = sender_id,
            size = payload.len(),
            limit = MAX_BROADCAST_BYTES,
            "payload too large, refusing to broadcast"
        );
        return;
    }

    let sessions = registry.channel_sessions(channel);
    if sessions.is_empty() {
        tracing::debug!(channel, "no live sessions for audio broadcast");
        return;
    }

    tracing::info!(
        channel,
        sender = sender_id,
        peers = sessions.len(),
        size = payload.len(),
        "broadcasting audio"
    );

    for session in sessions {
        if session.user_id == sender_id {
            continue;
        }
        session.send_audio(Arc::clone(payload));
    }
}

/// Schedules the deferred floor release for a clip.
///
/// The STOP fires after the clip's estimated duration; process shutdown
/// cancels the task so no phantom STOPs stay pending.
pub fn schedule_stop_transmission(
    state: &Arc<AppState>,
    channel: String,
    speaker_id: i64,
    after: Duration,
) {
    let registry = state.registry.clone();
    let mut shutdown = state.shutdown_tx.subscribe();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => {
                stop_transmission(&registry, &channel, speaker_id);
            }
            _ = shutdown.recv() => {
                tracing::debug!(channel, speaker = speaker_id, "shutdown canceled deferred stop");
            }
        }
    });
}

/// Estimates the playback duration of a clip.
///
/// Assumes 16 kHz 16-bit mono PCM (32 000 bytes per second), subtracting
/// the WAV header when present, clamped to [500 ms, 30 s].
pub fn estimate_duration(payload: &[u8]) -> Duration {
    let mut data_size = payload.len();
    if data_size > 44 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WAVE" {
        data_size -= 44;
    }

    let seconds = (data_size as f64 / 32_000.0).clamp(0.5, 30.0);
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{OutboundFrame, OUTBOUND_BUFFER};
    use tokio::sync::mpsc;

    fn wav_with_payload(data_bytes: usize) -> Vec<u8> {
        let mut wav = Vec::with_capacity(44 + data_bytes);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&[0u8; 4]);
        wav.extend_from_slice(b"WAVE");
        wav.resize(44 + data_bytes, 0);
        wav
    }

    #[test]
    fn estimate_one_second_of_audio() {
        let wav = wav_with_payload(32_000);
        let duration = estimate_duration(&wav);
        let delta = (duration.as_secs_f64() - 1.0).abs();
        assert!(delta < 0.05, "expected ~1s, got {duration:?}");
    }

    #[test]
    fn estimate_without_header_uses_full_length() {
        let raw = vec![0u8; 32_000];
        let duration = estimate_duration(&raw);
        let delta = (duration.as_secs_f64() - 1.0).abs();
        assert!(delta < 0.05, "expected ~1s, got {duration:?}");
    }

    #[test]
    fn estimate_clamps_to_bounds() {
        assert_eq!(estimate_duration(&[0u8; 100]), Duration::from_millis(500));
        let long = wav_with_payload(2_000_000);
        assert_eq!(estimate_duration(&long), Duration::from_secs(30));
    }

    #[test]
    fn start_signals_start_to_speaker_and_stop_to_peers() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(OUTBOUND_BUFFER);
        let (tx_b, mut rx_b) = mpsc::channel(OUTBOUND_BUFFER);
        registry.register(1, "canal-1", tx_a);
        registry.register(2, "canal-1", tx_b);

        start_transmission(&registry, "canal-1", 1);

        let frame_a = match rx_a.try_recv() {
            Ok(OutboundFrame::Control(frame)) => frame,
            other => panic!("expected control frame, got {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame_a).unwrap();
        assert_eq!(value["signal"], "START");
        assert_eq!(value["from"], 1);

        let frame_b = match rx_b.try_recv() {
            Ok(OutboundFrame::Control(frame)) => frame,
            other => panic!("expected control frame, got {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame_b).unwrap();
        assert_eq!(value["signal"], "STOP");
    }

    #[test]
    fn broadcast_excludes_the_sender() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(OUTBOUND_BUFFER);
        let (tx_b, mut rx_b) = mpsc::channel(OUTBOUND_BUFFER);
        registry.register(1, "canal-1", tx_a);
        registry.register(2, "canal-1", tx_b);

        let payload = Arc::new(wav_with_payload(64));
        broadcast_audio(&registry, "canal-1", 1, &payload);

        assert!(rx_a.try_recv().is_err(), "sender must not get its own clip");
        match rx_b.try_recv() {
            Ok(OutboundFrame::Audio(bytes)) => assert!(Arc::ptr_eq(&bytes, &payload)),
            other => panic!("expected audio frame, got {other:?}"),
        }
    }

    #[test]
    fn oversized_payload_is_refused() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        registry.register(2, "canal-1", tx);

        let payload = Arc::new(vec![0u8; MAX_BROADCAST_BYTES + 1]);
        broadcast_audio(&registry, "canal-1", 1, &payload);

        assert!(rx.try_recv().is_err(), "oversized clip must be dropped");
    }
}
