//! udp-impair CLI - UDP relay with sorted delay and controlled reordering.

use clap::Parser;
use colored::Colorize;

use udp_impair::cli::Cli;
use udp_impair::config::init_logging;
use udp_impair::error::Result;
use udp_impair::proxy::{shutdown_signal, ImpairProxy, RunReport};
use udp_impair::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = cli.to_config()?;
    init_logging(&config.logging)?;

    let proxy = ImpairProxy::bind(&config).await?;
    print_banner(&proxy, &config);

    let report = proxy
        .run(async {
            shutdown_signal().await;
        })
        .await?;

    print_report(&report);
    Ok(())
}

fn print_banner(proxy: &ImpairProxy, config: &Config) {
    eprintln!(
        "{} {}",
        "UDP proxy listening on".bright_white().bold(),
        proxy.local_addr()
    );
    eprintln!("  Upstream: {}", proxy.upstream());
    eprintln!(
        "  Delay: {}ms ± {}ms {} (sorted assignment)",
        config.delay.base_ms, config.delay.jitter_ms, config.delay.distribution
    );
    eprintln!(
        "  Target reorder rate: {:.4}%",
        config.reorder.rate * 100.0
    );
    if config.proxy.max_packets > 0 {
        eprintln!("  Max packets: {}", config.proxy.max_packets);
    }
    eprintln!("  Capture log: {}", config.capture.target);
}

fn print_report(report: &RunReport) {
    eprintln!();
    eprintln!("{}", report.to_string().bright_white());
}
