#[tokio::main]
async fn main() -> anyhow::Result<()> {
    media_relay::init_tracing();

    let config = media_relay::config::get_config()?;
    media_relay::run(config).await
}
