//! carfx - currency conversion for the car marketplace API
//!
//! A command-line front end over the conversion service: rate lookups,
//! single and batch conversions, the supported-currency list and the
//! persisted display currency.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use carfx::cli::{parse_batch_item, Cli, Command};
use carfx::client::{RequestExecutor, StaticCredentials};
use carfx::clock::system_clock;
use carfx::config::Config;
use carfx::currency::{
    format_amount, format_money, ConversionService, CurrencyListSource, CurrencySelector,
    SelectionSource,
};
use carfx::logging::init_tracing;
use carfx::preferences::FilePreferenceStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match try_main(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config)?;

    let service = Arc::new(build_service(&config)?);

    // Ctrl-C aborts in-flight requests and backoff sleeps
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                service.shutdown();
            }
        });
    }

    run(cli, &service).await
}

fn build_service(config: &Config) -> Result<ConversionService, Box<dyn Error>> {
    let credentials = StaticCredentials::new(config.api_token.clone());
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("carfx/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let executor = RequestExecutor::new(config.api_url.clone())
        .with_client(http_client)
        .with_timeout(config.timeout)
        .with_credentials(Arc::new(credentials));

    Ok(ConversionService::with_settings(
        executor,
        config.retry_policy()?,
        config.cache_ttls(),
        system_clock(),
    ))
}

async fn run(cli: &Cli, service: &ConversionService) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Rate { from, to } => {
            let rate = service.get_rate(from, to).await?;
            println!(
                "1 {} = {} {} (as of {}, source: {})",
                rate.from,
                rate.rate,
                rate.to,
                rate.as_of.format("%Y-%m-%d %H:%M UTC"),
                rate.source
            );
        }
        Command::Convert { amount, from, to } => {
            let display = service.convert_for_display(*amount, from, to).await?;
            println!("{}", display.text);
            if let Some(error) = &display.error {
                eprintln!("warning: conversion unavailable, showing unconverted amount ({})", error);
            }
        }
        Command::Batch { items } => {
            let queries = items
                .iter()
                .map(|item| parse_batch_item(item))
                .collect::<Result<Vec<_>, _>>()?;
            for result in service.convert_batch(&queries).await? {
                println!(
                    "{} -> {}",
                    format_money(&result.original),
                    format_money(&result.converted)
                );
            }
        }
        Command::Currencies => {
            let list = service.supported_currencies_with_status().await;
            for currency in &list.currencies {
                println!("{}  {:<4} {}", currency.code, currency.symbol, currency.name);
            }
            if let Some(error) = &list.error {
                let kind = match list.source {
                    CurrencyListSource::Stale => "last known",
                    _ => "built-in",
                };
                eprintln!("warning: showing {} currency list ({})", kind, error);
            }
        }
        Command::Format { amount, currency } => {
            println!("{}", format_amount(*amount, currency));
        }
        Command::Currency { set } => {
            let mut selector = CurrencySelector::new(FilePreferenceStore::new()?);
            match set {
                Some(code) => {
                    let selection = selector.select(service, code).await?;
                    println!("Display currency set to {}", selection.currency);
                }
                None => {
                    let locale = cli.locale.clone().or_else(system_locale);
                    let selection = selector.initialize(service, locale.as_deref()).await;
                    println!("{} ({})", selection.currency, source_label(selection.source));
                    if let Some(error) = &selection.soft_error {
                        eprintln!("warning: {}", error);
                    }
                }
            }
        }
    }
    Ok(())
}

/// First non-empty POSIX locale variable
fn system_locale() -> Option<String> {
    ["LC_ALL", "LC_MONETARY", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
}

fn source_label(source: SelectionSource) -> &'static str {
    match source {
        SelectionSource::Preference => "saved preference",
        SelectionSource::Locale => "from locale",
        SelectionSource::Default => "default",
        SelectionSource::User => "selected",
    }
}
