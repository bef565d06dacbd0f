#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = tapclaw::run().await {
        tracing::error!(error = %e, "tapclaw failed to start");
        eprintln!("tapclaw: {e}");
        std::process::exit(1);
    }
}
