use stageview::app::{self, LaunchArgs};

fn main() -> std::process::ExitCode {
    let args = match LaunchArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{}", err);
            return std::process::ExitCode::from(2);
        }
    };
    match app::run(args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("stageview: {}", err);
            std::process::ExitCode::FAILURE
        }
    }
}
