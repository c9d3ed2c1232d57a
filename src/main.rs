use std::process::ExitCode;

fn main() -> ExitCode {
    let code = pgwatch_sentinel::cli::run();
    ExitCode::from(code as u8)
}
