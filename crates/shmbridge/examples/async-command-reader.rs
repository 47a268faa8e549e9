//! Browser-side command reader on a tokio runtime, stopped through a
//! cancellation token. Pair it with `shmbridge send ...` in another terminal.
//!
//! Run with:
//!   cargo run --example async-command-reader --features async

use std::time::Duration;

use shmbridge::channel::Command;
use shmbridge::poll::{ChannelHandler, CommandSource, PollConfig, PollLoop};
use tokio_util::sync::CancellationToken;

struct Commands;

impl ChannelHandler for Commands {
    fn on_command(&mut self, source: CommandSource, command: &Command) {
        match source {
            CommandSource::Text => println!(
                "text #{}: {}",
                command.revision,
                command.text().unwrap_or("<binary>")
            ),
            CommandSource::Structured => match command.decode_payload() {
                Ok(payload) => println!("command #{}: {payload:?}", command.revision),
                Err(err) => eprintln!("command #{} undecodable: {err}", command.revision),
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });
    }

    let mut reader = PollLoop::connect(PollConfig::browser(), Commands);
    let status = reader.run_async(cancel).await;
    eprintln!("{status}");
}
