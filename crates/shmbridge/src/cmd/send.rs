use std::sync::Arc;

use shmbridge_channel::{ActionRequest, AgentMode, CommandLayout, CommandPayload, CommandWriter};
use shmbridge_poll::open_event;
use shmbridge_region::Notifier;

use crate::cmd::{ChannelName, ModeArg, SendArgs, SendCommand};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, Event, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let regions = &args.regions;
    let attach = regions.attach();

    let (region, kind, revision, signalled) = match args.what {
        SendCommand::Text { text } => {
            let region = regions.open(ChannelName::Text, attach)?;
            let mut writer = CommandWriter::new(region.clone(), CommandLayout::Text);
            let revision = writer
                .write_text(&text)
                .map_err(|err| channel_error("send failed", err))?;
            (region, "text", revision, false)
        }
        structured => {
            let payload = resolve_payload(structured)?;
            let region = regions.open(ChannelName::Command, attach)?;
            let event: Option<Arc<dyn Notifier>> =
                open_event(&regions.command_event, &regions.region_config());
            let signalled = event.is_some();

            let mut writer = CommandWriter::new(region.clone(), CommandLayout::Structured);
            if let Some(event) = event {
                writer = writer.with_notifier(event);
            }
            let revision = writer
                .write_payload(&payload)
                .map_err(|err| channel_error("send failed", err))?;
            (region, payload.command_type().as_str(), revision, signalled)
        }
    };

    print_event(
        &Event::Sent {
            region: region.name(),
            kind,
            revision,
            signalled,
        },
        None,
        format,
    );
    Ok(SUCCESS)
}

fn resolve_payload(command: SendCommand) -> CliResult<CommandPayload> {
    match command {
        SendCommand::Text { .. } => Err(CliError::new(
            USAGE,
            "text is sent on the text region, not as a typed command",
        )),
        SendCommand::Omnibox { text } => Ok(CommandPayload::SetOmniboxText(text)),
        SendCommand::Mode { mode } => Ok(CommandPayload::SetMode(match mode {
            ModeArg::Normal => AgentMode::Normal,
            ModeArg::Agent => AgentMode::Agent,
        })),
        SendCommand::Action {
            action,
            target,
            value,
            json,
        } => {
            if let Some(json) = json {
                let request: ActionRequest = serde_json::from_str(&json).map_err(|err| {
                    CliError::new(USAGE, format!("--json is not a valid action: {err}"))
                })?;
                return Ok(CommandPayload::ExecuteAction(request));
            }
            let action = action.ok_or_else(|| CliError::new(USAGE, "action name is required"))?;
            let mut request = ActionRequest::new(action);
            request.target = target;
            request.value = value;
            Ok(CommandPayload::ExecuteAction(request))
        }
    }
}

#[cfg(test)]
mod tests {
    use shmbridge_channel::CommandType;

    use super::*;

    #[test]
    fn action_from_flags() {
        let payload = resolve_payload(SendCommand::Action {
            action: Some("navigate".into()),
            target: Some("https://github.com".into()),
            value: None,
            json: None,
        })
        .unwrap();
        assert_eq!(payload.command_type(), CommandType::ExecuteAction);
        assert_eq!(
            payload,
            CommandPayload::ExecuteAction(
                ActionRequest::new("navigate").with_target("https://github.com")
            )
        );
    }

    #[test]
    fn action_from_json() {
        let payload = resolve_payload(SendCommand::Action {
            action: None,
            target: None,
            value: None,
            json: Some(r##"{"action":"click","target":"#submit"}"##.into()),
        })
        .unwrap();
        let CommandPayload::ExecuteAction(request) = payload else {
            panic!("expected an action");
        };
        assert_eq!(request.action, "click");
        assert_eq!(request.target.as_deref(), Some("#submit"));
    }

    #[test]
    fn invalid_action_json_is_usage_error() {
        let err = resolve_payload(SendCommand::Action {
            action: None,
            target: None,
            value: None,
            json: Some("{}".into()),
        })
        .unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn mode_maps_to_wire_values() {
        let payload = resolve_payload(SendCommand::Mode {
            mode: ModeArg::Agent,
        })
        .unwrap();
        assert_eq!(payload.encode().unwrap(), vec![1, 0, 0, 0]);
    }
}
