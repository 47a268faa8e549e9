use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("shmbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: shmbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "target: {}",
        option_env!("SHMBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("rustc: {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: poll={}, async={}, cli=true",
        cfg!(feature = "poll"),
        cfg!(feature = "async")
    );
    println!(
        "header_sizes: video={} audio={} text={} command={}",
        shmbridge_channel::VIDEO_HEADER_SIZE,
        shmbridge_channel::AUDIO_HEADER_SIZE,
        shmbridge_channel::TEXT_HEADER_SIZE,
        shmbridge_channel::COMMAND_HEADER_SIZE
    );

    Ok(SUCCESS)
}
