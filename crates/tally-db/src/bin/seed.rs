//! # Seed Data Generator
//!
//! Populates a development database with a small catalog, customers,
//! operators and discount configuration.
//!
//! ## Usage
//! ```bash
//! # Seed ./tally_dev.db
//! cargo run -p tally-db --bin seed
//!
//! # Specify database path
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db
//! ```
//!
//! ## Seeded Data
//! - Membership tiers: Silver (5%, 1.0× points), Gold (10%, 1.5× points)
//! - Government discounts: Senior Citizen and PWD, 20%, VAT-exempt
//! - Discount reasons: Damaged Packaging, Manager Override (needs approval)
//! - Products across grocery categories, 12% VAT
//! - Operators: admin, supervisor, cashier (PINs printed on completion)
//! - Promotions: auto 5% on beverages, coupon `WELCOME50`, buy 2 get 1 on snacks

use chrono::{Duration, Utc};
use std::env;
use tally_core::promotion::{
    CustomerGroup, DiscountReason, DiscountSetting, GovernmentKind, MembershipTier, Promotion,
    PromotionReward, PromotionTarget,
};
use tally_core::{Customer, Money, Operator, Product, Rate, Role};
use tally_db::{hash_pin, Database, DbConfig};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// (category, sku prefix, items: name, price in cents)
const CATALOG: &[(&str, &str, &[(&str, i64)])] = &[
    (
        "beverages",
        "BEV",
        &[
            ("Bottled Water 500ml", 2500),
            ("Iced Tea 1L", 6500),
            ("Instant Coffee 10s", 12000),
            ("Orange Juice 1L", 9500),
        ],
    ),
    (
        "snacks",
        "SNK",
        &[
            ("Potato Chips 60g", 3500),
            ("Chocolate Bar", 4500),
            ("Crackers 10s", 5800),
        ],
    ),
    (
        "grocery",
        "GRC",
        &[
            ("Rice 5kg", 32000),
            ("Cooking Oil 1L", 11000),
            ("Canned Sardines", 2800),
            ("Brown Sugar 1kg", 8500),
        ],
    ),
    (
        "household",
        "HSH",
        &[
            ("Laundry Soap", 2200),
            ("Dishwashing Liquid", 6900),
        ],
    ),
];

const OPERATORS: &[(&str, Role, &str)] = &[
    ("Admin", Role::Admin, "9999"),
    ("Sam Supervisor", Role::Supervisor, "2468"),
    ("Cara Cashier", Role::Cashier, "1357"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./tally_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tally Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();
    let discounts = db.discounts();

    // Discount configuration
    let silver = MembershipTier {
        id: Uuid::new_v4().to_string(),
        name: "Silver".to_string(),
        discount_bps: 500,
        points_multiplier_bps: 10_000,
        is_active: true,
    };
    let gold = MembershipTier {
        id: Uuid::new_v4().to_string(),
        name: "Gold".to_string(),
        discount_bps: 1000,
        points_multiplier_bps: 15_000,
        is_active: true,
    };
    discounts.insert_tier(&silver).await?;
    discounts.insert_tier(&gold).await?;

    let employees = CustomerGroup {
        id: Uuid::new_v4().to_string(),
        name: "Employees".to_string(),
        is_active: true,
    };
    discounts.insert_group(&employees).await?;

    for (kind, name) in [
        (GovernmentKind::SeniorCitizen, "Senior Citizen"),
        (GovernmentKind::Pwd, "Person with Disability"),
    ] {
        discounts
            .insert_setting(&DiscountSetting {
                id: Uuid::new_v4().to_string(),
                kind,
                name: name.to_string(),
                percentage_bps: 2000,
                is_vat_exempt: true,
                is_active: true,
            })
            .await?;
    }

    for (name, requires_approval) in [("Damaged Packaging", false), ("Manager Override", true)] {
        discounts
            .insert_reason(&DiscountReason {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                requires_approval,
                is_active: true,
            })
            .await?;
    }
    println!("✓ Discount configuration");

    // Catalog
    let mut generated = 0;
    for (category, prefix, items) in CATALOG {
        for (idx, (name, price_cents)) in items.iter().enumerate() {
            let product = Product {
                id: Uuid::new_v4().to_string(),
                sku: format!("{}-{:03}", prefix, idx + 1),
                name: name.to_string(),
                category_id: Some(category.to_string()),
                price_cents: *price_cents,
                cost_cents: Some(price_cents * 70 / 100),
                tax_rate_bps: 1200,
                is_taxable: true,
                is_vat_exempt_eligible: *category != "household",
                track_inventory: true,
                allow_backorder: false,
                current_stock: 50 + (generated as i64 * 7) % 50,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            if let Err(e) = db.products().insert(&product).await {
                eprintln!("Failed to insert {}: {}", product.sku, e);
                continue;
            }
            generated += 1;
        }
    }
    println!("✓ {} products", generated);

    // Customers
    for (name, tier, points) in [
        ("Walk-in Regular", None, 0),
        ("Lola Remedios", Some(&silver), 120),
        ("Gilbert Gold", Some(&gold), 800),
    ] {
        db.customers()
            .insert(&Customer {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                membership_tier_id: tier.map(|t| t.id.clone()),
                customer_group_id: None,
                loyalty_points: points,
                lifetime_spend_cents: 0,
                total_transactions: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
    }
    println!("✓ 3 customers");

    // Operators
    for (name, role, pin) in OPERATORS {
        let elevated = role.is_elevated() || *role == Role::Supervisor;
        db.operators()
            .insert(&Operator {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                role: *role,
                pin_hash: Some(hash_pin(pin)?),
                can_authorize_void: elevated,
                can_authorize_refund: elevated,
                can_authorize_discount: elevated,
                is_active: true,
                created_at: now,
            })
            .await?;
    }
    println!("✓ {} operators", OPERATORS.len());

    // Promotions
    let promotions = [
        Promotion {
            id: Uuid::new_v4().to_string(),
            name: "Beverage Week".to_string(),
            code: None,
            reward: PromotionReward::Percentage {
                rate: Rate::from_bps(500),
            },
            target: PromotionTarget::SpecificCategories(vec!["beverages".to_string()]),
            min_purchase_cents: 0,
            max_discount_cents: None,
            priority: 10,
            is_stackable: true,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(30),
            usage_limit: None,
            usage_count: 0,
        },
        Promotion {
            id: Uuid::new_v4().to_string(),
            name: "Welcome Coupon".to_string(),
            code: Some("WELCOME50".to_string()),
            reward: PromotionReward::FixedAmount {
                amount: Money::from_cents(5000),
            },
            target: PromotionTarget::AllCustomers,
            min_purchase_cents: 50000,
            max_discount_cents: None,
            priority: 0,
            is_stackable: true,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(90),
            usage_limit: Some(100),
            usage_count: 0,
        },
        Promotion {
            id: Uuid::new_v4().to_string(),
            name: "Snack Attack B2G1".to_string(),
            code: None,
            reward: PromotionReward::BuyXGetY { buy: 2, get: 1 },
            target: PromotionTarget::SpecificCategories(vec!["snacks".to_string()]),
            min_purchase_cents: 0,
            max_discount_cents: None,
            priority: 5,
            is_stackable: false,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(30),
            usage_limit: None,
            usage_count: 0,
        },
    ];
    for promotion in &promotions {
        discounts.insert_promotion(promotion).await?;
    }
    println!("✓ {} promotions", promotions.len());

    println!();
    println!("Operator PINs (development only):");
    for (name, role, pin) in OPERATORS {
        println!("  {:<16} {:<10} {}", name, format!("{:?}", role), pin);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
