use crate::{AdminCommand, Command, SettingsCommand};
use anyhow::{anyhow, bail, Context, Result};
use api::MarketplaceApi;
use config::{AppConfig, PollingConfig, ProviderKind, SESSION_SECRET_KEY};
use serde::Serialize;
use session::callback::{checkout_id_from_return, is_auth_callback, login_url};
use session::confirm::Confirmer;
use session::exchange::{logout, AuthExchange, ExchangeOutcome};
use session::guard::{GuardView, ProtectedView, SessionGuard};
use session::marketplace::{BrowseFilter, Marketplace};
use session::nav::{nav_links, Navigation, Notice};
use session::poller::{checkout_from_return, PaymentOutcome, PaymentPoller, PollPolicy};
use std::sync::Arc;
use tokio::time::Duration;
use vv_core::models::{Identity, NewCoupon, NewReview, WithdrawRequest};

pub struct Ctx {
    pub api: Arc<dyn MarketplaceApi>,
    pub cfg: AppConfig,
}

impl Ctx {
    /// Resolves the session for `view`, or fails with where the user
    /// would have been sent instead.
    async fn identity_for(&self, view: ProtectedView) -> Result<Identity> {
        let mut guard = SessionGuard::new(Arc::clone(&self.api), None);
        match guard.enter(view).await {
            GuardView::Render(identity) => Ok(identity.clone()),
            GuardView::Redirect(nav) => Err(redirect_error(&nav)),
            GuardView::Loading => bail!("Session is still loading"),
        }
    }

    async fn marketplace(&self, view: ProtectedView) -> Result<Marketplace> {
        let identity = self.identity_for(view).await?;
        Ok(Marketplace::new(
            Arc::clone(&self.api),
            identity,
            self.cfg.auth.origin_url.clone(),
        ))
    }
}

fn redirect_error(nav: &Navigation) -> anyhow::Error {
    match &nav.notice {
        Some(notice) => anyhow!("{} (redirected to {})", notice.message, nav.route),
        None => anyhow!("Not signed in; run `voucher-value login-url` (redirected to {})", nav.route),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_notice(notice: &Notice) {
    println!("{notice}");
}

pub fn poll_policy(polling: &PollingConfig) -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(polling.interval_ms),
        max_attempts: polling.max_attempts,
    }
}

pub async fn run(ctx: &Ctx, command: Command) -> Result<()> {
    match command {
        Command::LoginUrl => {
            let url = login_url(&ctx.cfg.auth.identity_provider_url, &ctx.cfg.auth.origin_url)?;
            println!("{url}");
            Ok(())
        }
        Command::Callback { url } => callback(ctx, &url).await,
        Command::Me => {
            let identity = ctx.identity_for(ProtectedView::Profile).await?;
            let links: Vec<String> = nav_links(identity.role).iter().map(|r| r.path()).collect();
            print_json(&serde_json::json!({
                "identity": identity,
                "links": links,
            }))
        }
        Command::Logout => match logout(ctx.api.as_ref()).await {
            Ok(nav) => {
                if let Err(err) = config::delete_secret(SESSION_SECRET_KEY) {
                    tracing::debug!(error = %err, "No saved session to remove");
                }
                if let Some(notice) = &nav.notice {
                    print_notice(notice);
                }
                Ok(())
            }
            Err(notice) => bail!(notice.message),
        },
        Command::Browse {
            brand,
            min_price,
            max_price,
        } => {
            let market = ctx.marketplace(ProtectedView::Dashboard).await?;
            let coupons = market
                .browse(&BrowseFilter {
                    brand,
                    min_price,
                    max_price,
                })
                .await?;
            print_json(&coupons)
        }
        Command::Coupon { coupon_id } => {
            let market = ctx.marketplace(ProtectedView::CouponDetails).await?;
            let (coupon, reviews) =
                tokio::try_join!(market.coupon(&coupon_id), market.coupon_reviews(&coupon_id))?;
            print_json(&serde_json::json!({
                "coupon": coupon,
                "discount_percent": coupon.discount_percent(),
                "reviews": reviews,
            }))
        }
        Command::Buy { coupon_id, wait } => {
            let market = ctx.marketplace(ProtectedView::CouponDetails).await?;
            let checkout = market.start_purchase(&coupon_id).await?;
            println!("Complete payment at: {}", checkout.url);
            if wait {
                let outcome = poll(ctx, market.identity().clone(), checkout.session_id).await?;
                print_json(&outcome)?;
            }
            Ok(())
        }
        Command::PaymentReturn { url, confirm } => payment_return(ctx, &url, confirm).await,
        Command::Confirm { transaction_id } => {
            let market = ctx.marketplace(ProtectedView::Wallet).await?;
            let overview = market.wallet_overview().await?;
            let entry = overview
                .transaction(&transaction_id)
                .ok_or_else(|| anyhow!("Transaction {transaction_id} not found"))?;
            confirm_purchase(ctx, &entry.transaction).await
        }
        Command::Wallet => {
            let market = ctx.marketplace(ProtectedView::Wallet).await?;
            let overview = market.wallet_overview().await?;
            print_json(&overview)
        }
        Command::Withdraw {
            amount,
            upi_id,
            bank_account,
        } => {
            let market = ctx.marketplace(ProtectedView::Wallet).await?;
            let result = market
                .withdraw(&WithdrawRequest {
                    amount,
                    upi_id,
                    bank_account,
                })
                .await;
            match result {
                Ok(receipt) => {
                    print_notice(&Notice::success("Withdrawal request submitted!"));
                    print_json(&receipt)
                }
                Err(err) => {
                    print_notice(&Marketplace::withdraw_failure_notice(&err));
                    Err(err.into())
                }
            }
        }
        Command::Code { transaction_id } => {
            let market = ctx.marketplace(ProtectedView::Wallet).await?;
            let secret = market.reveal_code(&transaction_id).await?;
            print_json(&secret)
        }
        Command::MyCoupons => {
            let market = ctx.marketplace(ProtectedView::Seller).await?;
            print_json(&market.my_coupons().await?)
        }
        Command::Sell {
            brand,
            code,
            expiry,
            value,
            price,
            proof_url,
        } => {
            let market = ctx.marketplace(ProtectedView::Seller).await?;
            let created = market
                .submit_listing(&NewCoupon {
                    brand_name: brand,
                    coupon_code: code,
                    expiry_date: expiry,
                    coupon_value: value,
                    asking_price: price,
                    proof_image_url: proof_url,
                })
                .await?;
            print_notice(&Notice::success("Coupon submitted for review"));
            print_json(&created)
        }
        Command::Dispute {
            transaction_id,
            reason,
        } => {
            let market = ctx.marketplace(ProtectedView::Wallet).await?;
            print_json(&market.open_dispute(&transaction_id, &reason).await?)
        }
        Command::Review {
            coupon_id,
            rating,
            comment,
        } => {
            let market = ctx.marketplace(ProtectedView::CouponDetails).await?;
            let review = market
                .review(&NewReview {
                    coupon_id,
                    rating,
                    comment,
                })
                .await?;
            print_json(&review)
        }
        Command::Reviews { coupon_id } => {
            let market = ctx.marketplace(ProtectedView::CouponDetails).await?;
            print_json(&market.coupon_reviews(&coupon_id).await?)
        }
        Command::Admin(cmd) => admin(ctx, cmd).await,
        Command::Settings(_) => bail!("settings are handled before the backend is contacted"),
    }
}

async fn callback(ctx: &Ctx, url: &str) -> Result<()> {
    if !is_auth_callback(url) && checkout_id_from_return(url).is_some() {
        bail!("This is a payment return URL; run `voucher-value payment-return` with it instead");
    }

    let flow = AuthExchange::new(Arc::clone(&ctx.api));
    let nav = match flow.run(url).await {
        ExchangeOutcome::Navigate(nav) => nav,
        ExchangeOutcome::AlreadyHandled => return Ok(()),
    };

    let Some(identity) = &nav.identity else {
        return Err(redirect_error(&nav));
    };

    if let Some(token) = ctx.api.session_token() {
        config::store_secret(SESSION_SECRET_KEY, &token).context("Failed to save session")?;
    }
    if let Some(notice) = &nav.notice {
        print_notice(notice);
    }
    println!("Go to {}", nav.route);
    print_json(identity)
}

async fn poll(ctx: &Ctx, buyer: Identity, checkout_id: String) -> Result<PaymentOutcome> {
    let poller = PaymentPoller::with_policy(Arc::clone(&ctx.api), buyer, poll_policy(&ctx.cfg.polling));
    let outcome = Arc::new(poller).spawn(checkout_id).outcome().await?;
    if let Some(notice) = &outcome.notice {
        print_notice(notice);
    }
    Ok(outcome)
}

async fn payment_return(ctx: &Ctx, url: &str, confirm: bool) -> Result<()> {
    let checkout_id = match checkout_from_return(url) {
        Ok(id) => id,
        Err(nav) => {
            println!("No checkout in return URL; go to {}", nav.route);
            return Ok(());
        }
    };

    let buyer = ctx.identity_for(ProtectedView::PaymentSuccess).await?;
    let outcome = poll(ctx, buyer, checkout_id).await?;
    print_json(&outcome)?;

    match (&outcome.purchase, confirm) {
        (Some(purchase), true) if outcome.can_confirm() => {
            confirm_purchase(ctx, &purchase.transaction).await
        }
        (_, true) => bail!("Nothing to confirm for this checkout"),
        _ => Ok(()),
    }
}

async fn confirm_purchase(ctx: &Ctx, transaction: &vv_core::models::Transaction) -> Result<()> {
    let confirmer = Confirmer::new(Arc::clone(&ctx.api));
    match confirmer.confirm(transaction).await {
        Ok(nav) => {
            if let Some(notice) = &nav.notice {
                print_notice(notice);
            }
            println!("Go to {}", nav.route);
            Ok(())
        }
        Err(err) => {
            let notice = Confirmer::failure_notice(&err);
            print_notice(&notice);
            Err(err.into())
        }
    }
}

async fn admin(ctx: &Ctx, cmd: AdminCommand) -> Result<()> {
    let market = ctx.marketplace(ProtectedView::Admin).await?;
    match cmd {
        AdminCommand::Dashboard => print_json(&market.admin_dashboard().await?),
        AdminCommand::Coupon { coupon_id, status } => {
            print_json(&market.moderate_coupon(&coupon_id, status).await?)
        }
        AdminCommand::ResolveDispute {
            dispute_id,
            resolution,
        } => print_json(&market.resolve_dispute(&dispute_id, &resolution).await?),
        AdminCommand::SetRole { user_id, role } => {
            print_json(&market.set_role(&user_id, role).await?)
        }
    }
}

pub fn settings(mut cfg: AppConfig, cmd: SettingsCommand) -> Result<()> {
    match cmd {
        SettingsCommand::Show => print_json(&cfg),
        SettingsCommand::Path => {
            println!("{}", config::config_path()?.display());
            Ok(())
        }
        SettingsCommand::Set { key, value } => {
            apply_setting(&mut cfg, &key, &value)?;
            config::store(&cfg)?;
            tracing::info!(%key, "Setting updated");
            print_json(&cfg)
        }
    }
}

fn apply_setting(cfg: &mut AppConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "provider.kind" => {
            cfg.provider.kind = match value {
                "mock" => ProviderKind::Mock,
                "http" => ProviderKind::Http,
                other => bail!("unknown provider `{other}` (mock, http)"),
            }
        }
        "provider.base_url" => {
            cfg.provider.base_url = Some(value.to_string()).filter(|v| !v.is_empty())
        }
        "auth.identity_provider_url" => cfg.auth.identity_provider_url = value.to_string(),
        "auth.origin_url" => cfg.auth.origin_url = value.to_string(),
        "polling.interval_ms" => {
            cfg.polling.interval_ms = value.parse().context("interval_ms must be a number")?
        }
        "polling.max_attempts" => {
            cfg.polling.max_attempts = value.parse().context("max_attempts must be a number")?
        }
        other => bail!("unknown setting `{other}`"),
    }
    Ok(())
}
