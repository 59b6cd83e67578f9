use sandpatch::client::SandboxClient;

use crate::cmd::{cleanup_identity, default_identity, ListArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_applied_list, OutputFormat};

pub fn run(args: ListArgs, format: OutputFormat) -> CliResult<i32> {
    let identity = args.identity.clone().unwrap_or_else(default_identity);
    let result = SandboxClient::connect(&args.socket, &identity)
        .and_then(|mut client| client.list());
    cleanup_identity(&identity);

    let entries = result.map_err(|err| client_error("list failed", err))?;
    print_applied_list(&entries, format);
    Ok(SUCCESS)
}
