use std::process::ExitCode;

fn main() -> ExitCode {
    spendflow_cli::run()
}
