use std::collections::BTreeMap;

use serde::Serialize;
use shmbridge_channel::names;
use shmbridge_region::platform_name;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

const ENV_VARS: &[&str] = &[
    "SHMBRIDGE_VIDEO",
    "SHMBRIDGE_VIDEO_SIZE",
    "SHMBRIDGE_AUDIO",
    "SHMBRIDGE_AUDIO_SIZE",
    "SHMBRIDGE_INPUT_TEXT",
    "SHMBRIDGE_INPUT_TEXT_SIZE",
    "SHMBRIDGE_COMMAND",
    "SHMBRIDGE_COMMAND_SIZE",
    "SHMBRIDGE_COMMAND_EVENT",
    "SHMBRIDGE_STATE",
    "SHMBRIDGE_OPEN_EXISTING",
    "SHMBRIDGE_INHERIT_ACL",
    "SHMBRIDGE_POLL_INTERVAL",
    "SHMBRIDGE_RECONNECT_INTERVAL",
    "RUST_LOG",
];

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

#[derive(Serialize)]
struct EnvInfoOutput {
    version: String,
    target: String,
    rust_version: String,
    git_hash: String,
    platform: PlatformInfo,
    features: Vec<String>,
    /// Built-in region names as seen by this platform.
    regions: BTreeMap<String, String>,
    environment: BTreeMap<String, Option<String>>,
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let environment = ENV_VARS
        .iter()
        .map(|var| (var.to_string(), std::env::var(var).ok()))
        .collect();

    let regions = [
        names::VIDEO,
        names::AUDIO,
        names::INPUT_TEXT,
        names::COMMAND,
        names::COMMAND_EVENT,
        names::STATE,
    ]
    .into_iter()
    .map(|name| {
        let resolved = platform_name(name).unwrap_or_else(|err| err.to_string());
        (names::label(name).to_string(), resolved)
    })
    .collect();

    let output = EnvInfoOutput {
        version: env!("CARGO_PKG_VERSION").to_string(),
        target: target_triple(),
        rust_version: option_env!("RUSTC_VERSION")
            .unwrap_or("unknown")
            .to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        platform: PlatformInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        },
        features: active_features(),
        regions,
        environment,
    };

    print_envinfo(&output, format);
    Ok(SUCCESS)
}

fn target_triple() -> String {
    if let Some(target) = option_env!("SHMBRIDGE_BUILD_TARGET") {
        return target.to_string();
    }

    match (std::env::consts::ARCH, std::env::consts::OS) {
        ("aarch64", "macos") => "aarch64-apple-darwin".to_string(),
        ("x86_64", "macos") => "x86_64-apple-darwin".to_string(),
        ("aarch64", "linux") => "aarch64-unknown-linux-gnu".to_string(),
        ("x86_64", "linux") => "x86_64-unknown-linux-gnu".to_string(),
        ("x86_64", "windows") => "x86_64-pc-windows-msvc".to_string(),
        (arch, os) => format!("{arch}-unknown-{os}"),
    }
}

fn print_envinfo(output: &EnvInfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("shmbridge environment\n");
            println!("  Version:    {}", output.version);
            println!("  Target:     {}", output.target);
            println!("  Rust:       {}", output.rust_version);
            println!("  Git hash:   {}", output.git_hash);
            println!(
                "  Platform:   {} ({})",
                output.platform.os, output.platform.arch
            );
            println!("  Features:   {}", output.features.join(", "));
            println!("\n  Regions:");
            for (label, name) in &output.regions {
                println!("    {:<14} {}", label, name);
            }
            println!("\n  Environment:");
            for (k, v) in &output.environment {
                println!("    {:<30} {}", k, v.as_deref().unwrap_or("(not set)"));
            }
        }
        OutputFormat::Raw => println!("{}", output.version),
    }
}

fn active_features() -> Vec<String> {
    let mut features = Vec::new();
    if cfg!(feature = "poll") {
        features.push("poll".to_string());
    }
    if cfg!(feature = "async") {
        features.push("async".to_string());
    }
    if cfg!(feature = "cli") {
        features.push("cli".to_string());
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_looks_like_triple() {
        let target = target_triple();
        assert!(target.split('-').count() >= 3);
    }

    #[test]
    fn every_region_env_var_is_listed() {
        assert!(ENV_VARS.iter().all(|v| v.starts_with("SHMBRIDGE_") || *v == "RUST_LOG"));
        assert!(ENV_VARS.contains(&"SHMBRIDGE_COMMAND_EVENT"));
    }

    #[cfg(unix)]
    #[test]
    fn builtin_names_resolve_on_posix() {
        assert_eq!(
            platform_name(names::STATE).unwrap(),
            "/NeuralChromium_State"
        );
    }
}
