#[tokio::main]
async fn main() {
    match screenloop::run().await {
        Ok(summary) => {
            tracing::info!(
                iterations = summary.iterations,
                matched = summary.matched,
                unknown = summary.unknown,
                "screenloop finished"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "screenloop exited with error");
            eprintln!("screenloop: {e}");
            std::process::exit(1);
        }
    }
}
