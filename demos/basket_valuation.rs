use price_network::{sources, Basket, ConfigStore, PriceNetwork, SettingsFlusher};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Settings file (PRICE_NETWORK_SETTINGS) and quote source (PRICE_NETWORK_SOURCE)
    let settings = Arc::new(ConfigStore::from_env());
    let flusher = SettingsFlusher::spawn(settings.clone());
    let network = PriceNetwork::new(sources::from_env()?, settings).await?;

    println!(
        "Price network demo (source: {}, settings: {})",
        network.source_name(),
        network.settings().path().display()
    );
    println!("-------------------------------------------");

    // 2. Build the graph and report what made it in
    let start = Instant::now();
    let graph = network.init_graph().await?;
    println!(
        "1. Graph built in {:?}: {} symbols, {} markets",
        start.elapsed(),
        graph.node_count(),
        graph.edge_count()
    );
    if let Some(report) = network.last_build_report().await {
        for dropped in &report.dropped {
            println!("   Dropped {}: {}", dropped.pair, dropped.reason);
        }
    }
    println!();

    // 3. Multi-hop conversion
    println!("2. Conversions");
    for pair in ["BTC/USD", "ETH/BTC", "SOL/EUR"] {
        match network.price(pair, 1.0, false).await {
            Ok(price) => println!("   1 {} = {:.6}", pair.replace('/', " in "), price),
            Err(e) => eprintln!("   {}: {}", pair, e),
        }
    }
    println!();

    // 4. A basket, priced fresh and then from the cache only
    let mut basket = Basket::new();
    basket.insert("BTC".into(), 0.25);
    basket.insert("ETH".into(), 3.0);
    basket.insert("SOL".into(), 40.0);
    network.set_basket("DEMO", basket).await?;

    println!("3. Basket DEMO");
    for quote in ["USD", "EUR"] {
        let value = network.get_basket_value("DEMO", quote, false).await?;
        println!("   1 DEMO = {:.2} {}", value, quote);
    }
    let start = Instant::now();
    let cached = network.get_basket_value("DEMO", "USD", true).await?;
    println!("   Cached: {:.2} USD in {:?}", cached, start.elapsed());
    println!();

    let health = network.health_check().await;
    println!("Health: {:?} ({})", health.status, health.message.unwrap_or_default());

    // 5. Leave the settings file clean and flushed
    network.remove_basket("DEMO").await?;
    flusher.shutdown().await?;

    Ok(())
}
