//! Well-known region names and sizes.
//!
//! The browser side creates these under the Windows `Local\` session
//! namespace. On POSIX the prefix is dropped and a leading `/` added (see
//! [`shmbridge_region::platform_name`]).

/// Video frames from the compositor.
pub const VIDEO: &str = "Local\\NeuralChromium_VisualCortex_V3";
pub const VIDEO_SIZE: usize = 16 * 1024 * 1024;

/// Microphone PCM from the browser.
pub const AUDIO: &str = "Local\\NeuralChromium_Audio_V1";
pub const AUDIO_SIZE: usize = 4 * 1024 * 1024;

/// Recognized text from the agent, text layout.
pub const INPUT_TEXT: &str = "Local\\NeuralChromium_Input_Text";
pub const INPUT_TEXT_SIZE: usize = 4 * 1024;

/// Structured commands from the agent.
pub const COMMAND: &str = "Local\\NeuralChromium_Command_V1";
pub const COMMAND_SIZE: usize = 4 * 1024;

/// Wake event paired with [`COMMAND`].
pub const COMMAND_EVENT: &str = "Local\\NeuralChromium_Command_V1_Event";

/// Browser UI control state.
pub const STATE: &str = "Local\\NeuralChromium_State";
pub const STATE_SIZE: usize = 4;

/// Returns a short label for a well-known region name.
pub fn label(name: &str) -> &'static str {
    match name {
        VIDEO => "video",
        AUDIO => "audio",
        INPUT_TEXT => "input-text",
        COMMAND => "command",
        COMMAND_EVENT => "command-event",
        STATE => "state",
        _ => "custom",
    }
}

/// Returns true if `name` is one of the built-in regions.
pub fn is_builtin(name: &str) -> bool {
    label(name) != "custom"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_builtin_names() {
        assert_eq!(label(VIDEO), "video");
        assert_eq!(label(COMMAND_EVENT), "command-event");
        assert!(is_builtin(STATE));
        assert!(!is_builtin("Local\\Something_Else"));
    }

    #[test]
    fn builtin_names_are_valid_posix_names() {
        for name in [VIDEO, AUDIO, INPUT_TEXT, COMMAND, COMMAND_EVENT, STATE] {
            let mapped = shmbridge_region::platform_name(name).unwrap();
            if cfg!(unix) {
                assert!(mapped.starts_with("/NeuralChromium_"), "{mapped}");
            }
        }
    }
}
