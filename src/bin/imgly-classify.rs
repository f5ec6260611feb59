//! IMG.LY image classification CLI
//!
//! Acquires a labeled image dataset, fine-tunes a classifier on it and reports a
//! prediction for one image.

#[cfg(feature = "cli")]
use imgly_classify::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
