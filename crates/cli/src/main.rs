//! SigShield CLI - Database migrations and merchant management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! sigshield-cli migrate
//!
//! # Inspect a merchant
//! sigshield-cli merchant show --shop acme.myshopify.com
//! sigshield-cli merchant show --email ops@acme.example
//!
//! # Mark onboarding complete for a merchant
//! sigshield-cli merchant complete-onboarding --id 42
//!
//! # Re-check a merchant's subscription with its billing provider
//! sigshield-cli merchant refresh-billing --id 42
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Args, Parser, Subcommand};

mod commands;

use commands::merchant::MerchantLookup;

#[derive(Parser)]
#[command(name = "sigshield-cli")]
#[command(author, version, about = "SigShield CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Inspect and repair merchants
    Merchant {
        #[command(subcommand)]
        action: MerchantAction,
    },
}

#[derive(Subcommand)]
enum MerchantAction {
    /// Print a merchant as JSON
    Show(LookupArgs),
    /// Mark onboarding complete
    CompleteOnboarding {
        /// Merchant id
        #[arg(long)]
        id: i32,
    },
    /// Refresh subscription state from the billing provider
    RefreshBilling {
        /// Merchant id
        #[arg(long)]
        id: i32,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct LookupArgs {
    /// Merchant id
    #[arg(long)]
    id: Option<i32>,

    /// Shop domain (app-store merchants)
    #[arg(long)]
    shop: Option<String>,

    /// Contact email (direct merchants)
    #[arg(long)]
    email: Option<String>,
}

impl LookupArgs {
    fn into_lookup(self) -> Option<MerchantLookup> {
        match (self.id, self.shop, self.email) {
            (Some(id), _, _) => Some(MerchantLookup::Id(id)),
            (_, Some(shop), _) => Some(MerchantLookup::Shop(shop)),
            (_, _, Some(email)) => Some(MerchantLookup::Email(email)),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Merchant { action } => match action {
            MerchantAction::Show(args) => {
                let lookup = args
                    .into_lookup()
                    .ok_or("one of --id, --shop or --email is required")?;
                commands::merchant::show(lookup).await?;
            }
            MerchantAction::CompleteOnboarding { id } => {
                commands::merchant::complete_onboarding(id).await?;
            }
            MerchantAction::RefreshBilling { id } => {
                commands::merchant::refresh_billing(id).await?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_show_requires_exactly_one_lookup() {
        assert!(Cli::try_parse_from(["sigshield-cli", "merchant", "show"]).is_err());
        assert!(
            Cli::try_parse_from([
                "sigshield-cli",
                "merchant",
                "show",
                "--shop",
                "acme.myshopify.com",
                "--email",
                "ops@acme.example",
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "sigshield-cli",
                "merchant",
                "show",
                "--shop",
                "acme.myshopify.com"
            ])
            .is_ok()
        );
    }
}
