#[tokio::main]
async fn main() {
    if let Err(err) = paper_search::run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
