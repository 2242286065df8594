use std::process::ExitCode;

mod app;

#[tokio::main]
async fn main() -> ExitCode {
    app::run().await
}
