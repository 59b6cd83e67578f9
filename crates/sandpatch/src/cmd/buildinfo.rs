use sandpatch::client::SandboxClient;

use crate::cmd::{cleanup_identity, default_identity, BuildInfoArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_text_block, OutputFormat};

pub fn run(args: BuildInfoArgs, format: OutputFormat) -> CliResult<i32> {
    let identity = args.identity.clone().unwrap_or_else(default_identity);
    let result = SandboxClient::connect(&args.socket, &identity)
        .and_then(|mut client| client.build_info());
    cleanup_identity(&identity);

    let block = result.map_err(|err| client_error("build-info failed", err))?;
    print_text_block(&block, format);
    Ok(SUCCESS)
}
