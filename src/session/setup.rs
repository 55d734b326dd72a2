//! Fixed session configuration sent when a session opens.

use crate::config::SessionConfig;
use crate::defaults;
use crate::putting::{PuttingStats, Settings};
use crate::session::protocol::{
    ClientMessage, Content, FunctionDeclaration, GenerationConfig, PrebuiltVoiceConfig,
    SetupPayload, SpeechConfig, TextPart, ToolDeclaration, TranscriptionConfig, VoiceConfig,
};
use serde_json::{Value, json};

/// Everything the agent is told at session open.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub instructions: String,
}

impl SessionSetup {
    /// Build the setup for the current read. The instructions embed a snapshot of
    /// `stats` and the pace conversion from `settings`.
    pub fn new(config: &SessionConfig, stats: &PuttingStats, settings: &Settings) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: instructions(stats, settings),
        }
    }

    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Setup(SetupPayload {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: self.instructions.clone(),
                }],
            },
            tools: vec![ToolDeclaration {
                function_declarations: vec![update_stats_declaration()],
            }],
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
        })
    }
}

/// Declaration of the stats update tool. Every argument is optional.
pub fn update_stats_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: defaults::TOOL_UPDATE_STATS.to_string(),
        description: "Update the putting parameters based on user voice input.".to_string(),
        parameters: update_stats_schema(),
    }
}

fn update_stats_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "distance": {"type": "NUMBER", "description": "Distance to hole in feet."},
            "slopeSide": {"type": "NUMBER", "description": "Side slope percentage."},
            "slopeVertical": {"type": "NUMBER", "description": "Vertical slope percentage."},
            "stimp": {"type": "NUMBER", "description": "Green speed (stimp rating)."}
        }
    })
}

fn instructions(stats: &PuttingStats, settings: &Settings) -> String {
    let step = settings.step_length;
    format!(
        "You are the GreenLight Caddy, a tour-grade putting assistant. \
The golfer sets distance, slope and green speed by voice.

LIVE READ:
- Distance: {distance}ft
- Side slope: {side}%
- Vertical slope: {vertical}%
- Stimp: {stimp}

DISTANCE:
- Paces or steps are converted to feet at {step}ft each. \"3 paces\" means {three_paces}ft.
- \"15 feet\" or \"distance 15\" sets distance to 15.

SIDE SLOPE SIGN (must be followed exactly):
- Positive: the ball breaks right to left, aim right of the hole.
- Negative: the ball breaks left to right, aim left of the hole.
- \"breaking right\", \"right to left\" or \"slope right\" is positive. \"2 percent breaking right\" sets slopeSide 2.
- \"breaking left\", \"left to right\" or \"slope left\" is negative. \"3 percent breaking left\" sets slopeSide -3.

VERTICAL SLOPE:
- Uphill is positive (\"uphill 1 percent\" sets slopeVertical 1), downhill is negative (\"downhill 2 percent\" sets slopeVertical -2).

A single phrase may set several values, e.g. \"3 paces 2 percent breaking right\" sets distance and a positive slope.

Call {tool} right away for every change, then read back the aim point. \
Keep every reply under five words.",
        distance = stats.distance,
        side = stats.slope_side,
        vertical = stats.slope_vertical,
        stimp = stats.stimp,
        step = step,
        three_paces = 3.0 * step,
        tool = defaults::TOOL_UPDATE_STATS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup::new(
            &SessionConfig::default(),
            &PuttingStats::default(),
            &Settings::default(),
        )
    }

    #[test]
    fn test_instructions_embed_live_read() {
        let setup = setup();
        assert!(setup.instructions.contains("Distance: 12ft"));
        assert!(setup.instructions.contains("Side slope: 1%"));
        assert!(setup.instructions.contains("Stimp: 10"));
        assert!(setup.instructions.contains("\"3 paces\" means 9ft"));
    }

    #[test]
    fn test_instructions_keep_sign_convention() {
        let text = setup().instructions;
        assert!(text.contains("Positive: the ball breaks right to left, aim right"));
        assert!(text.contains("Negative: the ball breaks left to right, aim left"));
        assert!(text.contains("sets slopeSide -3"));
    }

    #[test]
    fn test_setup_message_wire_shape() {
        let json = setup().to_message().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let payload = &value["setup"];

        assert_eq!(payload["model"], defaults::DEFAULT_MODEL);
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(payload["inputAudioTranscription"], json!({}));
        assert_eq!(payload["outputAudioTranscription"], json!({}));
        assert!(
            payload["systemInstruction"]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("GreenLight Caddy")
        );
    }

    #[test]
    fn test_tool_declaration() {
        let declaration = update_stats_declaration();
        assert_eq!(declaration.name, "updatePuttingStats");
        let properties = declaration.parameters["properties"].as_object().unwrap();
        let mut names: Vec<&str> = properties.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["distance", "slopeSide", "slopeVertical", "stimp"]);
        assert!(declaration.parameters.get("required").is_none(), "all arguments are optional");
    }
}
