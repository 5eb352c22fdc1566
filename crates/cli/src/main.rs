//! DulceNube CLI - Command-line storefront.
//!
//! # Usage
//!
//! ```bash
//! # Browse the catalog
//! dulcenube catalog --category pasteles --sort price-asc
//!
//! # Fill the cart and hand it off to WhatsApp
//! dulcenube cart add <product-id> --quantity 2 --dedication "Feliz cumple"
//! dulcenube cart whatsapp
//!
//! # Sign in with a magic link, then finish with the link from the email
//! dulcenube login magic-link ana@example.com
//! dulcenube callback "http://localhost:5173/?code=..."
//!
//! # Place the order
//! dulcenube checkout
//! ```
//!
//! # Commands
//!
//! - `catalog` / `product` - Browse products
//! - `cart` - Manage the local cart
//! - `checkout` - Submit the cart as an order
//! - `login` / `callback` / `logout` - Sign in and out
//! - `account` - Order history and addresses
//! - `support` / `whatsapp` - Contact links

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use dulcenube_storefront::catalog::SortMode;
use dulcenube_storefront::{AppError, Storefront, StorefrontConfig};

mod commands;

#[derive(Parser)]
#[command(name = "dulcenube")]
#[command(author, version, about = "DulceNube bakery storefront")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List categories and products
    Catalog {
        /// Text to search in name, description, SKU and tags
        #[arg(short, long)]
        query: Option<String>,

        /// Category slug or ID
        #[arg(short, long)]
        category: Option<String>,

        /// Subcategory slug or ID
        #[arg(long)]
        subcategory: Option<String>,

        /// Dietary label (e.g. "vegano")
        #[arg(short, long)]
        dietary: Option<String>,

        /// Hide products above this price
        #[arg(long)]
        max_price: Option<Decimal>,

        /// Ordering: featured, price-asc, price-desc, faster
        #[arg(short, long, default_value = "featured")]
        sort: SortMode,
    },
    /// Show a product with related products
    Product {
        /// Product ID
        id: String,

        /// Quantity for the WhatsApp inquiry
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Dedication for the WhatsApp inquiry
        #[arg(short, long)]
        dedication: Option<String>,
    },
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Submit the cart as an order
    Checkout {
        /// Order as a guest with this name instead of the signed-in account
        #[arg(long, requires = "guest_email")]
        guest_name: Option<String>,

        /// Guest contact email
        #[arg(long, requires = "guest_name")]
        guest_email: Option<String>,

        /// Guest contact phone
        #[arg(long, requires = "guest_name")]
        guest_phone: Option<String>,
    },
    /// Sign in
    Login {
        #[command(subcommand)]
        method: LoginMethod,
    },
    /// Complete a sign-in from the redirect URL
    Callback {
        /// The full URL the browser was sent back to
        url: Url,
    },
    /// Sign out
    Logout,
    /// Account overview
    Account {
        #[command(subcommand)]
        section: Option<AccountSection>,
    },
    /// Build a support email link
    Support {
        /// Your name
        #[arg(short, long)]
        name: String,

        /// Your email
        #[arg(short, long)]
        email: String,

        /// Message for the bakery
        #[arg(short, long)]
        message: String,
    },
    /// Open a WhatsApp chat with the bakery
    Whatsapp,
}

#[derive(Subcommand)]
enum CartAction {
    /// Show cart contents and totals
    Show,
    /// Add a product
    Add {
        /// Product ID
        product_id: String,

        /// Quantity to add
        #[arg(short, long, allow_negative_numbers = true)]
        quantity: Option<i64>,

        /// Dedication written on the product
        #[arg(short, long)]
        dedication: Option<String>,
    },
    /// Remove a line
    Remove {
        /// Line key as shown by `cart show`
        key: String,
    },
    /// Set the quantity of a line
    Set {
        /// Line key as shown by `cart show`
        key: String,

        /// New quantity (clamped to 1..=50)
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Empty the cart
    Clear,
    /// Print a WhatsApp link with the order summary
    Whatsapp,
}

#[derive(Subcommand)]
enum LoginMethod {
    /// Email a sign-in link
    MagicLink {
        /// Email address
        email: String,
    },
    /// Print the Google sign-in URL
    Google,
}

#[derive(Subcommand)]
enum AccountSection {
    /// Order history
    Orders,
    /// Saved addresses
    Addresses,
    /// Save a delivery address
    AddAddress(commands::account::AddressArgs),
    /// Delete a saved address
    DeleteAddress {
        /// Address ID
        id: String,
    },
    /// Make an address the default
    DefaultAddress {
        /// Address ID
        id: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dulcenube_storefront=info,dulcenube_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let storefront = match Storefront::new(config) {
        Ok(storefront) => storefront,
        Err(e) => {
            eprintln!("Could not open local storage: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli, storefront).await {
        e.report();
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, storefront: Storefront) -> Result<(), AppError> {
    // A callback bootstraps on the redirect URL; everything else on the
    // plain storefront URL.
    let location = match &cli.command {
        Commands::Callback { url } => url.clone(),
        _ => storefront.config().base_url.clone(),
    };
    let ctx = commands::Context::start(storefront, &location).await;

    match cli.command {
        Commands::Catalog {
            query,
            category,
            subcategory,
            dietary,
            max_price,
            sort,
        } => {
            let filter = commands::catalog::FilterArgs {
                query,
                category,
                subcategory,
                dietary,
                max_price,
                sort,
            };
            commands::catalog::list(&ctx, filter).await?;
        }
        Commands::Product {
            id,
            quantity,
            dedication,
        } => commands::catalog::show(&ctx, &id, quantity, dedication.as_deref()).await?,
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&ctx),
            CartAction::Add {
                product_id,
                quantity,
                dedication,
            } => commands::cart::add(&ctx, &product_id, quantity, dedication).await?,
            CartAction::Remove { key } => commands::cart::remove(&ctx, &key)?,
            CartAction::Set { key, quantity } => commands::cart::set(&ctx, &key, quantity)?,
            CartAction::Clear => commands::cart::clear(&ctx),
            CartAction::Whatsapp => commands::cart::whatsapp(&ctx)?,
        },
        Commands::Checkout {
            guest_name,
            guest_email,
            guest_phone,
        } => {
            let guest = guest_name.zip(guest_email);
            commands::checkout::run(&ctx, guest, guest_phone.as_deref()).await?;
        }
        Commands::Login { method } => match method {
            LoginMethod::MagicLink { email } => commands::auth::magic_link(&ctx, &email).await?,
            LoginMethod::Google => commands::auth::google(&ctx)?,
        },
        Commands::Callback { .. } => commands::auth::callback(&ctx),
        Commands::Logout => commands::auth::logout(&ctx).await?,
        Commands::Account { section } => match section {
            None => commands::account::overview(&ctx)?,
            Some(AccountSection::Orders) => commands::account::orders(&ctx).await?,
            Some(AccountSection::Addresses) => commands::account::addresses(&ctx).await?,
            Some(AccountSection::AddAddress(args)) => {
                commands::account::add_address(&ctx, args).await?;
            }
            Some(AccountSection::DeleteAddress { id }) => {
                commands::account::delete_address(&ctx, &id).await?;
            }
            Some(AccountSection::DefaultAddress { id }) => {
                commands::account::default_address(&ctx, &id).await?;
            }
        },
        Commands::Support {
            name,
            email,
            message,
        } => commands::support::mail(&ctx, &name, &email, &message)?,
        Commands::Whatsapp => commands::support::whatsapp(&ctx),
    }

    ctx.finish();
    Ok(())
}
