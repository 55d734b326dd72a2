//! Wire messages exchanged with the live agent.
//!
//! Outbound messages are JSON objects keyed by their kind (`setup`,
//! `realtimeInput`, `toolResponse`). Inbound server messages are decoded into
//! a flat list of [`InboundEvent`]s in the order they should be handled.

use crate::defaults;
use crate::error::{GreenlightError, Result};
use crate::pipeline::types::{PcmBuffer, TranscriptChannel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One encoded capture frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    pub mime_type: String,
    /// Base64 of little-endian i16 samples.
    pub data: String,
}

/// Acknowledgement sent after applying a stats update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponsePayload {
    pub result: String,
    pub aim_point: String,
    pub distance: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub response: ToolResponsePayload,
}

/// What the pipeline sends while a session is open.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Audio(AudioChunk),
    ToolResult(ToolResult),
}

/// Everything the agent can tell the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Setup was accepted; the session is live.
    Opened,
    /// A fragment of the agent's reply, decoded to PCM.
    Audio(PcmBuffer),
    /// Cumulative transcript text for one channel.
    Transcript {
        channel: TranscriptChannel,
        text: String,
    },
    ToolInvocation {
        name: String,
        args: Value,
        id: String,
    },
    /// The user barged in; queued playback must be dropped.
    Interrupted,
    TurnComplete,
    Error {
        reason: String,
    },
    Closed,
}

// Client -> server envelope

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

impl From<OutboundMessage> for ClientMessage {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Audio(chunk) => ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks: vec![chunk],
            }),
            OutboundMessage::ToolResult(result) => {
                ClientMessage::ToolResponse(ToolResponseMessage {
                    function_responses: vec![result],
                })
            }
        }
    }
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GreenlightError::Protocol {
            message: format!("Failed to encode client message: {}", e),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<AudioChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<ToolResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolDeclaration>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclaration {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Serializes as `{}`; its presence turns transcription on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

// Server -> client

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCall>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// Sample rate named in a `audio/pcm;rate=N` mime type.
fn rate_from_mime(mime_type: Option<&str>) -> u32 {
    mime_type
        .and_then(|mime| {
            mime.split(';')
                .filter_map(|param| param.trim().strip_prefix("rate="))
                .find_map(|rate| rate.parse().ok())
        })
        .unwrap_or(defaults::PLAYBACK_SAMPLE_RATE)
}

/// Encode little-endian PCM bytes for the wire.
pub fn encode_pcm(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode one inline audio payload.
pub fn decode_pcm(data: &str, sample_rate: u32) -> Result<PcmBuffer> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| GreenlightError::Protocol {
            message: format!("Invalid base64 audio: {}", e),
        })?;
    Ok(PcmBuffer::from_le_bytes(&bytes, sample_rate))
}

/// Decode one server frame into pipeline events.
///
/// Order within a frame: opened, transcripts (input then output), tool calls,
/// audio, interruption, turn complete. Undecodable audio parts are skipped.
pub fn decode_server_message(text: &str) -> Result<Vec<InboundEvent>> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| GreenlightError::Protocol {
            message: format!("Malformed server message: {}", e),
        })?;

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(InboundEvent::Opened);
    }

    if let Some(content) = message.server_content {
        for (channel, transcription) in [
            (TranscriptChannel::Input, content.input_transcription),
            (TranscriptChannel::Output, content.output_transcription),
        ] {
            if let Some(text) = transcription.and_then(|t| t.text) {
                events.push(InboundEvent::Transcript { channel, text });
            }
        }
        if let Some(turn) = content.model_turn {
            for data in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                let rate = rate_from_mime(data.mime_type.as_deref());
                match decode_pcm(&data.data, rate) {
                    Ok(buffer) => events.push(InboundEvent::Audio(buffer)),
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable audio part"),
                }
            }
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
    }

    if let Some(call) = message.tool_call {
        // Tool calls go ahead of any audio in the same frame.
        let position = events
            .iter()
            .position(|e| matches!(e, InboundEvent::Audio(_) | InboundEvent::Interrupted | InboundEvent::TurnComplete))
            .unwrap_or(events.len());
        let invocations = call.function_calls.into_iter().map(|f| InboundEvent::ToolInvocation {
            name: f.name,
            args: f.args,
            id: f.id.unwrap_or_default(),
        });
        events.splice(position..position, invocations);
    }

    if let Some(go_away) = message.go_away {
        tracing::warn!(time_left = ?go_away.time_left, "server will end the session soon");
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audio_chunk_wire_shape() {
        let message: ClientMessage = OutboundMessage::Audio(AudioChunk {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: encode_pcm(&[1, 0, 255, 255]),
        })
        .into();
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AQD//w=="}]}})
        );
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let message: ClientMessage = OutboundMessage::ToolResult(ToolResult {
            id: "call-1".to_string(),
            name: "updatePuttingStats".to_string(),
            response: ToolResponsePayload {
                result: "ok".to_string(),
                aim_point: "Aim 7.0 inches right".to_string(),
                distance: 12.0,
                slope: 1.0,
            },
        })
        .into();
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(
            value["toolResponse"]["functionResponses"][0],
            json!({
                "id": "call-1",
                "name": "updatePuttingStats",
                "response": {"result": "ok", "aimPoint": "Aim 7.0 inches right", "distance": 12.0, "slope": 1.0}
            })
        );
    }

    #[test]
    fn test_setup_complete_opens() {
        let events = decode_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![InboundEvent::Opened]);
    }

    #[test]
    fn test_decode_audio_part() {
        let data = encode_pcm(&[0x10, 0x00, 0xf0, 0xff]);
        let text = json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": data}}]}}
        })
        .to_string();

        let events = decode_server_message(&text).unwrap();
        assert_eq!(events, vec![InboundEvent::Audio(PcmBuffer::new(vec![16, -16], 24000))]);
    }

    #[test]
    fn test_audio_without_rate_defaults_to_playback_rate() {
        let text = json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": encode_pcm(&[0, 0])}}]}}
        })
        .to_string();

        match decode_server_message(&text).unwrap().as_slice() {
            [InboundEvent::Audio(buffer)] => assert_eq!(buffer.sample_rate, 24000),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_decode_transcripts_and_interruption() {
        let text = json!({
            "serverContent": {
                "inputTranscription": {"text": "three paces"},
                "outputTranscription": {"text": "Aim two"},
                "interrupted": true
            }
        })
        .to_string();

        let events = decode_server_message(&text).unwrap();
        assert_eq!(
            events,
            vec![
                InboundEvent::Transcript {
                    channel: TranscriptChannel::Input,
                    text: "three paces".to_string()
                },
                InboundEvent::Transcript {
                    channel: TranscriptChannel::Output,
                    text: "Aim two".to_string()
                },
                InboundEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn test_decode_tool_call() {
        let text = json!({
            "toolCall": {"functionCalls": [{"id": "fc-7", "name": "updatePuttingStats", "args": {"distance": 20}}]}
        })
        .to_string();

        let events = decode_server_message(&text).unwrap();
        assert_eq!(
            events,
            vec![InboundEvent::ToolInvocation {
                name: "updatePuttingStats".to_string(),
                args: json!({"distance": 20}),
                id: "fc-7".to_string(),
            }]
        );
    }

    #[test]
    fn test_bad_audio_part_is_skipped() {
        let text = json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "%%%"}}]}, "turnComplete": true}
        })
        .to_string();

        let events = decode_server_message(&text).unwrap();
        assert_eq!(events, vec![InboundEvent::TurnComplete]);
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        assert!(matches!(
            decode_server_message("not json"),
            Err(GreenlightError::Protocol { .. })
        ));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let events = decode_server_message(r#"{"usageMetadata": {"totalTokenCount": 5}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_rate_from_mime() {
        assert_eq!(rate_from_mime(Some("audio/pcm;rate=16000")), 16000);
        assert_eq!(rate_from_mime(Some("audio/pcm; rate=22050")), 22050);
        assert_eq!(rate_from_mime(Some("audio/pcm")), 24000);
        assert_eq!(rate_from_mime(None), 24000);
    }
}
