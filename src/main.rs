use clap::Parser;
use kobo_mail::cli::{run, Cli};
use kobo_mail::logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Some(cli.log_file.as_path()));

    match run(&cli).await {
        Ok(tally) => {
            tracing::info!(
                messages = tally.messages_found,
                ebooks = tally.ebooks_persisted(),
                "KoboMail finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, category = %e.category(), "KoboMail exited with error");
            ExitCode::FAILURE
        }
    }
}
