use std::process::ExitCode;

fn main() -> ExitCode {
    photo_predict_lib::run()
}
