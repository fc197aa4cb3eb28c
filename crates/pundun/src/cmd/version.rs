use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("pundun {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: pundun");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("PUNDUN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("auth: SCRAM-SHA-256");
    println!(
        "defaults: request_timeout={}s max_pending={}",
        pundun_client::DEFAULT_REQUEST_TIMEOUT.as_secs(),
        pundun_client::DEFAULT_MAX_PENDING_REQUESTS
    );

    Ok(SUCCESS)
}
