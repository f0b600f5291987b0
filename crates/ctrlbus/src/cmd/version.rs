use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ctrlbus {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ctrlbus");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CTRLBUS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CTRLBUS_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!(
        "features: register={}, supervisor={}, cli=true",
        cfg!(feature = "register"),
        cfg!(feature = "supervisor")
    );

    Ok(SUCCESS)
}
