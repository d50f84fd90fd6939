//! Binary entrypoint for the reference test plugin.

use std::io::{self, Write};
use std::process::ExitCode;

use plugwire_test_plugin::{TestPluginState, serve};

fn main() -> ExitCode {
    match serve(TestPluginState::default()) {
        Ok(outcome) => u8::try_from(outcome.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from),
        Err(error) => {
            writeln!(io::stderr().lock(), "{error}").ok();
            ExitCode::FAILURE
        }
    }
}
