// SPDX-License-Identifier: MIT
use anyhow::Result;

/// Run an application with the given command line
///
/// Invalid command lines are reported as error instead of
/// terminating the test process.
pub fn exec_cmd_line<P>(f: fn(P) -> Result<()>, cmd_line: Vec<&str>) -> Result<()>
where
    P: clap::Parser,
{
    let args = P::try_parse_from(cmd_line)?;

    match f(args) {
        Err(err) => {
            eprintln!("{err:#}");
            Err(err)
        }
        ok => ok,
    }
}
