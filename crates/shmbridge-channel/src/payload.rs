//! Typed payloads for the structured command layout.
//!
//! Each [`CommandType`] has a fixed payload shape that the browser reads
//! directly:
//! - `SetMode`: the [`AgentMode`] as a little-endian `u32`
//! - `SetOmniboxText`: 512 UTF-16LE code units, NUL-padded (1024 bytes)
//! - `ExecuteAction`: an [`ActionRequest`] as JSON

use serde::{Deserialize, Serialize};

use crate::codec::CommandType;
use crate::error::{ChannelError, Result};

/// Code units in the omnibox text buffer, including the terminating NUL.
pub const OMNIBOX_TEXT_UNITS: usize = 512;

/// Encoded size of a `SetOmniboxText` payload.
pub const OMNIBOX_PAYLOAD_SIZE: usize = OMNIBOX_TEXT_UNITS * 2;

/// Browser UI mode requested by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    Normal,
    Agent,
    Other(u32),
}

impl AgentMode {
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            0 => AgentMode::Normal,
            1 => AgentMode::Agent,
            other => AgentMode::Other(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            AgentMode::Normal => 0,
            AgentMode::Agent => 1,
            AgentMode::Other(raw) => raw,
        }
    }
}

/// A browser action for the UI thread to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action name, e.g. `navigate` or `click`.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            value: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// A decoded structured command payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum CommandPayload {
    SetMode(AgentMode),
    SetOmniboxText(String),
    ExecuteAction(ActionRequest),
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandPayload::SetMode(_) => CommandType::SetMode,
            CommandPayload::SetOmniboxText(_) => CommandType::SetOmniboxText,
            CommandPayload::ExecuteAction(_) => CommandType::ExecuteAction,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            CommandPayload::SetMode(mode) => Ok(mode.to_wire().to_le_bytes().to_vec()),
            CommandPayload::SetOmniboxText(text) => Ok(encode_omnibox_text(text)),
            CommandPayload::ExecuteAction(request) => Ok(serde_json::to_vec(request)?),
        }
    }

    pub fn decode(command_type: CommandType, data: &[u8]) -> Result<Self> {
        match command_type {
            CommandType::SetMode => {
                let raw: [u8; 4] = data
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| {
                        ChannelError::InvalidPayload(format!(
                            "set-mode payload is {} bytes, need 4",
                            data.len()
                        ))
                    })?;
                Ok(CommandPayload::SetMode(AgentMode::from_wire(
                    u32::from_le_bytes(raw),
                )))
            }
            CommandType::SetOmniboxText => {
                Ok(CommandPayload::SetOmniboxText(decode_omnibox_text(data)?))
            }
            CommandType::ExecuteAction => {
                Ok(CommandPayload::ExecuteAction(serde_json::from_slice(data)?))
            }
            CommandType::Unknown(raw) => Err(ChannelError::UnsupportedKind {
                layout: "structured",
                kind: format!("type {raw}"),
            }),
        }
    }
}

/// Encode `text` into the fixed omnibox buffer.
///
/// Text that does not fit is cut at a character boundary so the last unit
/// is always NUL.
pub fn encode_omnibox_text(text: &str) -> Vec<u8> {
    let mut units: Vec<u16> = Vec::with_capacity(OMNIBOX_TEXT_UNITS);
    let mut scratch = [0u16; 2];
    for ch in text.chars() {
        let encoded = ch.encode_utf16(&mut scratch);
        if units.len() + encoded.len() > OMNIBOX_TEXT_UNITS - 1 {
            break;
        }
        units.extend_from_slice(encoded);
    }
    units.resize(OMNIBOX_TEXT_UNITS, 0);
    units.iter().flat_map(|u| u.to_le_bytes()).collect()
}

/// Decode an omnibox buffer up to the first NUL.
pub fn decode_omnibox_text(data: &[u8]) -> Result<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16(&units)
        .map_err(|err| ChannelError::InvalidPayload(format!("omnibox text: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_mode_is_a_le_u32() {
        let payload = CommandPayload::SetMode(AgentMode::Agent);
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes, vec![1, 0, 0, 0]);
        assert_eq!(
            CommandPayload::decode(CommandType::SetMode, &bytes).unwrap(),
            payload
        );
        assert!(matches!(
            CommandPayload::decode(CommandType::SetMode, &[1, 0]),
            Err(ChannelError::InvalidPayload(_))
        ));
    }

    #[test]
    fn omnibox_text_is_fixed_width_utf16() {
        let bytes = encode_omnibox_text("Hi é");
        assert_eq!(bytes.len(), OMNIBOX_PAYLOAD_SIZE);
        assert_eq!(&bytes[..4], &[b'H', 0, b'i', 0]);
        assert_eq!(&bytes[6..8], &0x00E9u16.to_le_bytes());
        assert!(bytes[8..].iter().all(|&b| b == 0));
        assert_eq!(decode_omnibox_text(&bytes).unwrap(), "Hi é");
    }

    #[test]
    fn long_omnibox_text_keeps_terminator() {
        let text = "x".repeat(600);
        let bytes = encode_omnibox_text(&text);
        assert_eq!(bytes.len(), OMNIBOX_PAYLOAD_SIZE);
        assert_eq!(&bytes[OMNIBOX_PAYLOAD_SIZE - 2..], &[0, 0]);
        assert_eq!(decode_omnibox_text(&bytes).unwrap().len(), OMNIBOX_TEXT_UNITS - 1);
    }

    #[test]
    fn surrogate_pairs_are_not_split() {
        let text = format!("{}😀", "a".repeat(510));
        let decoded = decode_omnibox_text(&encode_omnibox_text(&text)).unwrap();
        assert_eq!(decoded, "a".repeat(510));
    }

    #[test]
    fn action_request_is_json() {
        let request = ActionRequest::new("navigate").with_target("https://github.com");
        let payload = CommandPayload::ExecuteAction(request.clone());
        let bytes = payload.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"action":"navigate","target":"https://github.com"}"#
        );
        assert_eq!(
            CommandPayload::decode(CommandType::ExecuteAction, &bytes).unwrap(),
            payload
        );
        assert!(matches!(
            CommandPayload::decode(CommandType::ExecuteAction, b"{not json"),
            Err(ChannelError::Json(_))
        ));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = CommandPayload::decode(CommandType::Unknown(42), &[]).unwrap_err();
        assert!(matches!(err, ChannelError::UnsupportedKind { layout: "structured", .. }));
    }
}
