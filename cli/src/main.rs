mod commands;

use api::{http::HttpClient, mock::MockClient, MarketplaceApi};
use clap::{Parser, Subcommand};
use config::{AppConfig, ProviderKind};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vv_core::models::{CouponStatus, Role};

#[derive(Parser, Debug)]
#[command(author, version, about = "Buy and sell discount coupons on VoucherValue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the URL to open to sign in
    LoginUrl,
    /// Finish signing in with the URL the identity provider sent you back to
    Callback { url: String },
    /// Show the signed-in account
    Me,
    /// End the session and forget the saved token
    Logout,
    /// List coupons for sale
    Browse {
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
    },
    /// Show one coupon with its discount and reviews
    Coupon { coupon_id: String },
    /// Start a purchase and print the checkout URL
    Buy {
        coupon_id: String,
        /// Keep polling for the payment result after printing the URL
        #[arg(long)]
        wait: bool,
    },
    /// Settle a purchase from the URL the payment provider returned to
    PaymentReturn {
        url: String,
        /// Release the funds to the seller once the code is shown
        #[arg(long)]
        confirm: bool,
    },
    /// Confirm a purchase held in escrow
    Confirm { transaction_id: String },
    /// Show the balance and every purchase and sale
    Wallet,
    /// Request a payout to a UPI id or bank account
    Withdraw {
        amount: f64,
        #[arg(long)]
        upi_id: Option<String>,
        #[arg(long)]
        bank_account: Option<String>,
    },
    /// Show the code of a coupon you bought
    Code { transaction_id: String },
    /// List the coupons you have put up for sale
    MyCoupons,
    /// List a coupon for sale
    Sell {
        #[arg(long)]
        brand: String,
        #[arg(long)]
        code: String,
        /// YYYY-MM-DD
        #[arg(long)]
        expiry: String,
        #[arg(long)]
        value: f64,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        proof_url: Option<String>,
    },
    /// Report a problem with a purchase
    Dispute {
        transaction_id: String,
        reason: String,
    },
    /// Rate a coupon you bought
    Review {
        coupon_id: String,
        #[arg(long)]
        rating: u8,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List the reviews of a coupon
    Reviews { coupon_id: String },
    /// Moderation and user management
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Local settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Analytics with every user, coupon and dispute
    Dashboard,
    /// Approve, reject or otherwise set a coupon's status
    Coupon {
        coupon_id: String,
        #[arg(value_parser = parse_coupon_status)]
        status: CouponStatus,
    },
    /// Close a dispute with a resolution note
    ResolveDispute {
        dispute_id: String,
        resolution: String,
    },
    /// Change a user's role
    SetRole {
        user_id: String,
        #[arg(value_parser = parse_role)]
        role: Role,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Set one value, e.g. `polling.max_attempts 8`
    Set { key: String, value: String },
    /// Print where the settings file lives
    Path,
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_code(s).ok_or_else(|| format!("unknown role `{s}` (buyer, seller, admin)"))
}

fn parse_coupon_status(s: &str) -> Result<CouponStatus, String> {
    CouponStatus::from_code(s)
        .ok_or_else(|| format!("unknown status `{s}` (pending, approved, rejected, sold)"))
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn create_api_client(cfg: &AppConfig) -> anyhow::Result<Arc<dyn MarketplaceApi>> {
    match cfg.provider.kind {
        ProviderKind::Http => {
            let base_url = cfg
                .provider
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Backend base_url not configured"))?;
            let client = HttpClient::new(base_url)?;

            if let Some(token) = config::session_token() {
                tracing::info!(%base_url, "Using saved session");
                return Ok(client.with_session_token(&token));
            }
            tracing::info!(%base_url, "Using marketplace backend without a session");
            Ok(client)
        }
        ProviderKind::Mock => {
            tracing::info!("Using mock marketplace");
            Ok(MockClient::demo())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Falling back to default settings");
        AppConfig::default()
    });

    if let Command::Settings(cmd) = cli.command {
        return commands::settings(cfg, cmd);
    }

    let api = create_api_client(&cfg)?;
    let ctx = commands::Ctx { api, cfg };
    commands::run(&ctx, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_admin_role_change() {
        let cli = Cli::try_parse_from(["voucher-value", "admin", "set-role", "user_1", "seller"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Admin(AdminCommand::SetRole { role: Role::Seller, .. })
        ));
        assert!(
            Cli::try_parse_from(["voucher-value", "admin", "set-role", "user_1", "owner"]).is_err()
        );
    }

    #[test]
    fn http_provider_needs_base_url() {
        let mut cfg = AppConfig::default();
        cfg.provider.kind = ProviderKind::Http;
        assert!(create_api_client(&cfg).is_err());
    }
}
