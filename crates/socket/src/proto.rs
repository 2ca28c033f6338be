use intercom_wire::{ClientEvent, ServerEvent};

/// Encodes an outbound event as a text frame payload.
pub fn encode(event: &ClientEvent) -> String {
    // Client events contain only strings and numbers; serializing them
    // cannot fail.
    serde_json::to_string(event).expect("client events always serialize")
}

/// Decodes an inbound text frame.
///
/// The backend broadcasts frames this client has no use for, and a
/// malformed frame must not take the session down; both decode to
/// `None` and are dropped.
pub fn decode(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            trace!("dropping inbound frame: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use intercom_wire::{ChatEvent, Status};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_chat_frame() {
        let frame = json!({
            "event": "update_chat",
            "data": { "message": "Jarvis: hello." }
        })
        .to_string();
        assert_eq!(
            decode(&frame),
            Some(ServerEvent::UpdateChat(ChatEvent::new("Jarvis: hello.")))
        );
    }

    #[test]
    fn test_decode_lifecycle_frames() {
        let frame = json!({
            "event": "chatbot_ready",
            "data": { "status": "ready" }
        })
        .to_string();
        assert_eq!(
            decode(&frame),
            Some(ServerEvent::ChatbotReady(Status::ready()))
        );

        // The legacy spelling decodes as its own event.
        let frame = json!({
            "event": "jarvis_ready",
            "data": { "status": "ready" }
        })
        .to_string();
        assert_eq!(
            decode(&frame),
            Some(ServerEvent::JarvisReady(Status::ready()))
        );
    }

    #[test]
    fn test_unknown_and_malformed_frames_are_dropped() {
        let frame = json!({ "event": "led_state", "data": {} }).to_string();
        assert_eq!(decode(&frame), None);
        assert_eq!(decode("{"), None);
        assert_eq!(decode(""), None);
    }

    #[test]
    fn test_encode_round_trips_through_decode_side() {
        let event = ClientEvent::ChangeVadThreshold {
            vad_threshold: 325.0,
        };
        let frame = encode(&event);
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "change_vad_threshold");
        assert_eq!(value["data"]["vad_threshold"], 325.0);
    }
}
