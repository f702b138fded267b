use anyhow::Context;
use clap::Parser;

use modbus_regmap_mock::server::MockServer;
use modbus_regmap_mock::SimDevice;

/// Simulated self-describing Modbus/TCP device.
#[derive(Parser, Debug)]
#[command(name = "regmap-mock", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5020")]
    bind: String,

    /// Register map served through the map window
    #[arg(long)]
    map: std::path::PathBuf,

    /// Initial register contents, `ADDRESS=WORD[,WORD...]` (repeatable)
    #[arg(long = "set", value_name = "ADDRESS=WORDS")]
    preset: Vec<String>,
}

fn parse_preset(spec: &str) -> anyhow::Result<(u16, Vec<u16>)> {
    let (address, words) = spec
        .split_once('=')
        .with_context(|| format!("expected ADDRESS=WORDS, got {spec:?}"))?;
    let address = address.trim().parse().context("bad address")?;
    let words = words
        .split(',')
        .map(|w| {
            let w = w.trim();
            match w.strip_prefix("0x") {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => w.parse(),
            }
        })
        .collect::<Result<Vec<u16>, _>>()
        .context("bad register word")?;
    Ok((address, words))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let text = std::fs::read_to_string(&args.map)
        .with_context(|| format!("read map {}", args.map.display()))?;
    let lines: Vec<&str> = text.lines().collect();
    let device = SimDevice::new().with_map(&lines);
    for spec in &args.preset {
        let (address, words) = parse_preset(spec)?;
        device.set_words(address, &words);
    }
    tracing::info!(
        "serving {} map lines in {} windows",
        lines.len(),
        device.map_window_count() - 1
    );

    MockServer::new(device).run(&args.bind).await
}
