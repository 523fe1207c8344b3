//! # Seed Data Generator
//!
//! Populates a development database with a chart of accounts, stocked
//! products and customers, ready for the order coordinator to sell
//! against.
//!
//! ## Usage
//! ```bash
//! # Default: 600 products, 12 customers
//! cargo run -p saldo-db --bin seed
//!
//! # Custom amounts
//! cargo run -p saldo-db --bin seed -- --products 2000 --customers 50
//!
//! # Specify database path
//! cargo run -p saldo-db --bin seed -- --db ./data/saldo.db
//! ```
//!
//! ## What Gets Seeded
//! - The default chart of accounts (all structural roles mapped)
//! - Products across categories with deterministic prices and costs
//! - Opening stock per product, received as priced purchases so the
//!   weighted-average cost is real
//! - Customers with varied credit limits

use std::env;

use chrono::Utc;

use saldo_core::inventory::MovementReason;
use saldo_core::{Customer, Money, Product, DEFAULT_TENANT_ID};
use saldo_db::repository::customer::CustomerRepository;
use saldo_db::repository::inventory::InventoryRepository;
use saldo_db::repository::journal::JournalRepository;
use saldo_db::repository::product::ProductRepository;
use saldo_db::{Database, DbConfig};
use tracing_subscriber::EnvFilter;

/// Product categories: code and base names.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "ELC",
        &[
            "USB-C Cable",
            "Lightning Cable",
            "Wall Charger",
            "Car Charger",
            "Power Bank",
            "Earbuds",
            "Phone Case",
            "Screen Protector",
            "Memory Card",
            "Flash Drive",
            "Bluetooth Speaker",
            "LED Desk Lamp",
        ],
    ),
    (
        "HOM",
        &[
            "Storage Box",
            "Laundry Basket",
            "Water Bottle",
            "Lunch Box",
            "Kitchen Towel",
            "Cutting Board",
            "Mixing Bowl",
            "Food Container",
            "Wall Clock",
            "Door Mat",
            "Clothes Hanger",
            "Dish Rack",
        ],
    ),
    (
        "STA",
        &[
            "Ballpoint Pen",
            "Gel Pen",
            "Notebook A5",
            "Notebook A4",
            "Sticky Notes",
            "Stapler",
            "Paper Clips",
            "File Folder",
            "Highlighter",
            "Whiteboard Marker",
            "Envelope Pack",
            "Printer Paper",
        ],
    ),
    (
        "GRC",
        &[
            "Basmati Rice",
            "Wheat Flour",
            "Cooking Oil",
            "Black Tea",
            "Green Tea",
            "Sugar",
            "Table Salt",
            "Red Lentils",
            "Chickpeas",
            "Tomato Paste",
            "Instant Noodles",
            "Biscuit Pack",
        ],
    ),
];

/// Pack variants layered over each base product.
const PACKS: &[(&str, i64)] = &[
    ("Single", 0),
    ("3-Pack", 150),
    ("6-Pack", 320),
    ("12-Pack", 650),
    ("Carton", 1400),
];

/// Tax rates in basis points.
const TAX_RATES: &[u32] = &[0, 500, 1700];

/// Customer roster: name, phone, credit limit in cents.
const CUSTOMERS: &[(&str, &str, i64)] = &[
    ("Ayesha Khan", "+92-300-5550101", 150_000),
    ("Bilal Traders", "+92-321-5550102", 500_000),
    ("Chenab Hardware", "+92-333-5550103", 250_000),
    ("Daud & Sons", "+92-345-5550104", 0),
    ("Eastside Mart", "+92-301-5550105", 400_000),
    ("Farhan Ahmed", "+92-312-5550106", 75_000),
    ("Gulberg Store", "+92-322-5550107", 300_000),
    ("Hina Boutique", "+92-334-5550108", 120_000),
    ("Iqbal Brothers", "+92-346-5550109", 600_000),
    ("Jhelum Supplies", "+92-302-5550110", 200_000),
    ("Kiran Textiles", "+92-313-5550111", 350_000),
    ("Lahore Wholesale", "+92-323-5550112", 1_000_000),
];

/// Respects `RUST_LOG`; defaults to info with sqlx noise turned down.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut product_count: usize = 600;
    let mut customer_count: usize = 12;
    let mut db_path = String::from("./saldo_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--products" | "-p" => {
                if i + 1 < args.len() {
                    product_count = args[i + 1].parse().unwrap_or(600);
                    i += 1;
                }
            }
            "--customers" | "-c" => {
                if i + 1 < args.len() {
                    customer_count = args[i + 1].parse().unwrap_or(12);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Saldo Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --products <N>   Number of products to generate (default: 600)");
                println!("  -c, --customers <N>  Number of customers to generate (default: 12)");
                println!("  -d, --db <PATH>      Database file path (default: ./saldo_dev.db)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Saldo Seed Data Generator");
    println!("=========================");
    println!("Database:  {}", db_path);
    println!("Products:  {}", product_count);
    println!("Customers: {}", customer_count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected, migrations applied");

    let existing = db.products().count(DEFAULT_TENANT_ID).await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Chart first: nothing posts without role mappings
    let mut uow = db.begin().await?;
    JournalRepository::install_default_chart(uow.conn(), DEFAULT_TENANT_ID).await?;
    uow.commit().await?;
    println!("✓ Chart of accounts installed");

    println!();
    println!("Generating products...");

    let start = std::time::Instant::now();
    let mut generated = 0;

    'outer: for (category_idx, (category_code, names)) in CATEGORIES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (pack_idx, (pack_name, price_addon)) in PACKS.iter().enumerate() {
                if generated >= product_count {
                    break 'outer;
                }

                let seed = category_idx * 1000 + name_idx * 20 + pack_idx;
                let product = generate_product(category_code, name, pack_name, *price_addon, seed);
                let opening_stock = 10 + (seed % 80) as i64;
                let unit_cost = product.list_cost_cents.unwrap_or(product.price_cents / 2);

                let mut uow = db.begin().await?;
                ProductRepository::insert(uow.conn(), &product).await?;
                InventoryRepository::restock(
                    uow.conn(),
                    DEFAULT_TENANT_ID,
                    &product.id,
                    opening_stock,
                    Money::from_cents(unit_cost),
                    MovementReason::Purchase,
                    None,
                    "seed",
                )
                .await?;
                uow.commit().await?;

                generated += 1;
                if generated % 200 == 0 {
                    println!("  {} products...", generated);
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!("✓ Generated {} stocked products in {:.1?}", generated, elapsed);

    println!();
    println!("Generating customers...");
    let now = Utc::now();
    let mut uow = db.begin().await?;
    for (idx, (name, phone, credit_limit)) in
        CUSTOMERS.iter().cycle().take(customer_count).enumerate()
    {
        let customer = Customer {
            id: saldo_db::repository::new_id(),
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            name: if idx < CUSTOMERS.len() {
                name.to_string()
            } else {
                format!("{} #{}", name, idx / CUSTOMERS.len() + 1)
            },
            phone: Some(phone.to_string()),
            pending_balance_cents: 0,
            advance_balance_cents: 0,
            credit_limit_cents: *credit_limit,
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        CustomerRepository::insert(uow.conn(), &customer).await?;
    }
    uow.commit().await?;
    println!("✓ Generated {} customers", customer_count);

    println!();
    println!("✓ Seed complete!");
    Ok(())
}

/// Generates one product with deterministic price, cost and tax rate.
fn generate_product(
    category: &str,
    name: &str,
    pack: &str,
    price_addon: i64,
    seed: usize,
) -> Product {
    let now = Utc::now();

    let compact: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
    let sku = format!(
        "{}-{}-{:03}",
        category,
        compact[..compact.len().min(4)].to_uppercase(),
        seed
    );

    // Base $1.49 - $11.49, plus the pack addon
    let base_price = 149 + ((seed * 17) % 1000) as i64;
    let price_cents = base_price + price_addon;

    // List cost at 55-75% of price
    let cost_pct = 55 + (seed % 20) as i64;
    let list_cost_cents = Some(price_cents * cost_pct / 100);

    Product {
        id: saldo_db::repository::new_id(),
        tenant_id: DEFAULT_TENANT_ID.to_string(),
        sku,
        name: format!("{} {}", name, pack),
        price_cents,
        list_cost_cents,
        tax_rate_bps: TAX_RATES[seed % TAX_RATES.len()],
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}
