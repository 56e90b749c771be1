#[tokio::main]
async fn main() {
    if let Err(err) = support_chat::app::run().await {
        eprintln!("support-chat failed: {err}");
        std::process::exit(1);
    }
}
