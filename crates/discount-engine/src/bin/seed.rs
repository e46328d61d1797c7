//! # Demo Coupon Seeder
//!
//! Issues a demo general coupon and a customer-bound coupon for development.
//!
//! ## Usage
//! ```bash
//! # Use discount.toml / environment for the database location
//! cargo run -p discount-engine --bin seed
//!
//! # Explicit database and customer
//! cargo run -p discount-engine --bin seed -- --db ./discount_dev.db --customer alice
//! ```
//!
//! ## Issued Coupons
//! - GENERAL: 10% off, 100 redemptions, valid 30 days (skipped while another
//!   general coupon is live)
//! - CUSTOMER_BOUND: 25% off for the chosen customer, 1 redemption, valid 7 days

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use discount_core::{DurationUnit, NewCoupon};
use discount_db::Database;
use discount_engine::{init_tracing, CouponLifecycle, EngineConfig, EngineError, RandomCodeGenerator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut customer = String::from("demo-customer");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--customer" | "-u" => {
                if i + 1 < args.len() {
                    customer = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Discount Engine Demo Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>         Database file path (default: from config)");
                println!("      --config <PATH>     Config file (default: platform config dir)");
                println!("  -u, --customer <ID>     Owner of the bound coupon (default: demo-customer)");
                println!("  -h, --help              Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Discount Engine Demo Seeder");
    println!("===========================");
    println!("Database: {}", config.database.path.display());
    println!("Customer: {}", customer);
    println!();

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::new(config.db_config()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let lifecycle = CouponLifecycle::new(
        db,
        Arc::new(RandomCodeGenerator::new(config.coupons.code_length)),
        config.coupons.code_max_attempts,
    );
    let now = Utc::now();

    match lifecycle
        .create(NewCoupon::general(0.1, 100, 30, DurationUnit::Days), now)
        .await
    {
        Ok(coupon) => println!(
            "✓ General coupon {} ({} off, {} uses, expires {})",
            coupon.code,
            coupon.rate(),
            coupon.usage_limit,
            coupon.expires_at()
        ),
        Err(EngineError::DuplicateGeneralCoupon) => {
            println!("⚠ A general coupon is already live, skipping");
        }
        Err(e) => return Err(e.into()),
    }

    let bound = lifecycle
        .create(
            NewCoupon::customer_bound(customer.as_str(), 0.25, 1, 7, DurationUnit::Days),
            now,
        )
        .await?;
    println!(
        "✓ Coupon {} for {} ({} off, expires {})",
        bound.code,
        customer,
        bound.rate(),
        bound.expires_at()
    );

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
