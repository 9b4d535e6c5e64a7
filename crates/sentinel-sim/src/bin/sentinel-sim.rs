//! Sentinel mint simulator
//!
//! Replays the reference mint scenarios against in-memory backends.
//!
//! Usage: `sentinel-sim [confirm|timeout|reject|diff|all] [interval_ms]`

use sentinel_catalog::{AchievementKey, CatalogConfig};
use sentinel_mint::memory::{InMemoryMembership, InMemoryProgress, InMemorySigner};
use sentinel_mint::{EngineConfig, MintOutcome, Services, Session, UserId};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCENARIOS: [&str; 4] = ["confirm", "timeout", "reject", "diff"];

struct Backends {
    user: UserId,
    progress: Arc<InMemoryProgress>,
    membership: Arc<InMemoryMembership>,
    signer: Arc<InMemorySigner>,
}

impl Backends {
    fn new(lag_reads: u32) -> Self {
        let user = UserId::new("0x5e471e1");
        let membership = Arc::new(InMemoryMembership::new());
        let signer = Arc::new(
            InMemorySigner::new()
                .with_delay(Duration::from_millis(50))
                .with_indexer(membership.clone(), user.clone(), lag_reads),
        );
        Self {
            user,
            progress: Arc::new(InMemoryProgress::new()),
            membership,
            signer,
        }
    }

    async fn open(&self, config: &EngineConfig) -> sentinel_mint::Result<Session> {
        Session::open(
            self.user.clone(),
            config.clone(),
            CatalogConfig::reference(),
            Services::new(
                self.progress.clone(),
                self.membership.clone(),
                self.signer.clone(),
            ),
        )
        .await
    }
}

/// Mint lands in the membership index on the third poll.
async fn confirm(config: &EngineConfig) -> sentinel_mint::Result<()> {
    let backends = Backends::new(3);
    let session = backends.open(config).await?;

    let quiz = session.complete_quiz(AchievementKey::Tier1, 13).await?;
    println!("  quiz: {:?}", quiz);

    let outcome = session.mint(AchievementKey::Tier1).await?;
    report(&outcome);
    for event in session.notifications().drain() {
        println!("  notify #{}: {:?} {:?}", event.seq, event.reason, event.asset_ids);
        session.notifications().acknowledge(event.seq);
    }
    println!("  stats: {:?}", session.stats().await);
    Ok(())
}

/// Neither source confirms; the late mint is picked up by a refresh.
async fn timeout(config: &EngineConfig) -> sentinel_mint::Result<()> {
    let backends = Backends::new(u32::MAX);
    let session = backends.open(config).await?;

    session.complete_quiz(AchievementKey::Tier2, 14).await?;
    let outcome = session.mint(AchievementKey::Tier2).await?;
    report(&outcome);
    println!("  state after timeout: {}", session.mint_state(AchievementKey::Tier2));

    backends.membership.grant(&backends.user, 2002, true);
    let refreshed = session.refresh().await?;
    println!("  refresh: {:?}", refreshed);
    println!("  minted: {}", session.record(AchievementKey::Tier2).await.minted);
    Ok(())
}

/// The user declines to sign, then retries.
async fn reject(config: &EngineConfig) -> sentinel_mint::Result<()> {
    let backends = Backends::new(1);
    let session = backends.open(config).await?;

    let (profile, _) = session.complete_assessment(30).await?;
    println!("  profile: {}", profile);

    backends.signer.set_reject(true);
    match session.mint(AchievementKey::Assessment).await {
        Err(e) => println!("  rejected: {} (retryable: {})", e, e.is_retryable()),
        Ok(outcome) => report(&outcome),
    }

    backends.signer.set_reject(false);
    let outcome = session.mint(AchievementKey::Assessment).await?;
    report(&outcome);
    Ok(())
}

/// Badges granted by other flows while the session is open.
async fn diff(config: &EngineConfig) -> sentinel_mint::Result<()> {
    let backends = Backends::new(1);
    backends.membership.grant(&backends.user, 1001, false);
    backends.membership.grant(&backends.user, 3001, false);
    let session = backends.open(config).await?;

    backends.membership.grant(&backends.user, 2001, false);
    backends.membership.grant(&backends.user, 3002, false);
    let refreshed = session.refresh().await?;
    println!("  newly owned: {:?}", refreshed.newly_owned);
    for event in session.notifications().drain() {
        println!("  notify #{}: {:?} {:?}", event.seq, event.reason, event.asset_ids);
    }
    Ok(())
}

fn report(outcome: &MintOutcome) {
    match outcome {
        MintOutcome::Confirmed {
            asset_id,
            transaction,
            attempt,
            source,
        } => println!(
            "  asset {} confirmed by {} on attempt {} (tx {})",
            asset_id, source, attempt, transaction
        ),
        MintOutcome::TimedOut {
            asset_id,
            transaction,
            attempts,
        } => println!(
            "  asset {} unconfirmed after {} attempts (tx {})",
            asset_id, attempts, transaction
        ),
        MintOutcome::Cancelled { asset_id, .. } => println!("  asset {} cancelled", asset_id),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel_sim=info,sentinel_mint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    let scenario = args.get(1).map(String::as_str).unwrap_or("all");
    let interval_ms: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);

    let config = EngineConfig::from_env()?.with_poll_interval(Duration::from_millis(interval_ms));
    config.validate()?;

    let selected: Vec<&str> = if scenario == "all" {
        SCENARIOS.to_vec()
    } else if SCENARIOS.contains(&scenario) {
        vec![scenario]
    } else {
        return Err(format!(
            "unknown scenario: {} (expected one of {:?} or all)",
            scenario, SCENARIOS
        )
        .into());
    };

    println!("Sentinel mint simulator");
    println!("=======================");
    println!(
        "poll every {:?}, {} attempts ({:?} budget)",
        config.poll_interval,
        config.max_attempts,
        config.deadline()
    );

    for name in selected {
        println!();
        println!("[{}]", name);
        tracing::info!(scenario = name, "Running scenario");
        match name {
            "confirm" => confirm(&config).await?,
            "timeout" => timeout(&config).await?,
            "reject" => reject(&config).await?,
            _ => diff(&config).await?,
        }
    }

    Ok(())
}
