// Binary entry point for prootbox
// This is a thin wrapper that delegates to the library implementation

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    prootbox::shell::run().await
}
