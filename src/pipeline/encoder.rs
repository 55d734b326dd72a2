//! Outbound encoder: capture frames to wire chunks.

use crate::defaults;
use crate::pipeline::types::AudioFrame;
use crate::session::Session;
use crate::session::protocol::{self, AudioChunk};

/// Encodes frames and hands them to the session, best effort.
///
/// Frames offered while the session is not open are dropped. Nothing is
/// buffered or retried.
#[derive(Debug, Default)]
pub struct OutboundEncoder {
    sent: u64,
    dropped: u64,
}

impl OutboundEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(frame: &AudioFrame) -> AudioChunk {
        AudioChunk {
            mime_type: defaults::CAPTURE_MIME_TYPE.to_string(),
            data: protocol::encode_pcm(&frame.to_le_bytes()),
        }
    }

    pub fn send(&mut self, frame: &AudioFrame, session: &mut Session) -> bool {
        if !session.is_open() {
            self.dropped += 1;
            return false;
        }
        let delivered = session.send_audio(Self::encode(frame));
        if delivered {
            self.sent += 1;
        } else {
            self.dropped += 1;
        }
        delivered
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::putting::{PuttingStats, Settings};
    use crate::session::setup::SessionSetup;
    use crate::session::transport::{MockTransport, Transport};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio::sync::mpsc;

    #[test]
    fn test_encode_is_base64_little_endian() {
        let frame = AudioFrame::new(vec![1, -1, 256], 16000, 0);
        let chunk = OutboundEncoder::encode(&frame);

        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(STANDARD.decode(&chunk.data).unwrap(), vec![1, 0, 0xff, 0xff, 0, 1]);
    }

    #[test]
    fn test_drops_when_session_not_open() {
        let mut encoder = OutboundEncoder::new();
        let mut session = Session::new();
        let frame = AudioFrame::new(vec![0; 4], 16000, 0);

        assert!(!encoder.send(&frame, &mut session));
        assert_eq!(encoder.dropped(), 1);
        assert_eq!(encoder.sent(), 0);
    }

    #[tokio::test]
    async fn test_forwards_every_frame_while_open() {
        let transport = MockTransport::new();
        let remote = transport.remote();
        let setup = SessionSetup::new(
            &SessionConfig::default(),
            &PuttingStats::default(),
            &Settings::default(),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        session.begin_open().unwrap();
        session.attach(transport.connect(&setup, tx).await.unwrap()).unwrap();
        session.on_opened();

        let mut encoder = OutboundEncoder::new();
        for sequence in 0..3 {
            let frame = AudioFrame::new(vec![sequence as i16; 4], 16000, sequence);
            assert!(encoder.send(&frame, &mut session));
        }

        assert_eq!(encoder.sent(), 3);
        assert_eq!(remote.sent_audio().len(), 3);
    }
}
