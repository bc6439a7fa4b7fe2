//! Example: sentence splitting and unit-by-unit synthesis, no hardware.
//!
//! Shows how a response is carved into playable units and handed to a
//! synthesis backend one unit at a time. With `SORI_TTS_API_KEY` set (via
//! `.env`) the units go through the real API; otherwise the placeholder
//! renders nothing. Run the console front-end for actual playback.

use sori_voice::{
    create_best_tts, ensure_sentence_end, split_speech_units, SpeechStyle, TtsBackend,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let response = "네, 거실 불을 켰습니다. 더 필요한 것이 있나요? 좋은 하루 되세요!";
    info!("response: {}", response);

    let tts = create_best_tts();
    let style = SpeechStyle::default();

    for unit in split_speech_units(response) {
        let spoken = ensure_sentence_end(unit);
        let audio = tts.synthesize(&spoken, &style)?;
        info!("unit {:?} -> {} bytes of audio", spoken, audio.len());
    }

    Ok(())
}
