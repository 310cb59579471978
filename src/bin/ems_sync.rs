use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(ems_sync::app::run_ems_sync(std::env::args().skip(1)))
}
