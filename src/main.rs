// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use member_registry::{
    init_tracing, ApplicantInput, Config, MemberId, Ministry, PaymentMethod, PeriodKind,
    Registry, SacramentStatus,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "member-registry")]
#[command(about = "Membership registration: member IDs, records and registration statistics")]
#[command(version)]
struct Cli {
    /// Keep everything in memory for this run only
    #[arg(long, global = true)]
    memory: bool,

    /// SQLite database file (overrides REGISTRY_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register one member: validate, confirm payment, issue the ID
    Register {
        #[arg(long)]
        name: String,
        /// Date of birth, YYYY-MM-DD
        #[arg(long)]
        dob: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        ministry: Ministry,
        /// Required when --ministry is Other
        #[arg(long, default_value = "")]
        custom_ministry: String,
        /// Communicant, "Baptized Only" or None
        #[arg(long)]
        status: SacramentStatus,
        #[arg(long)]
        years: u32,
        /// Path or URL of the passport photo
        #[arg(long)]
        photo: Option<String>,
        /// card, mobile or bank
        #[arg(long)]
        payment: PaymentMethod,
    },

    /// List registered members
    List {
        /// Write CSV to stdout instead of a table
        #[arg(long)]
        csv: bool,
        /// Only the N most recent members, newest first
        #[arg(long)]
        recent: Option<usize>,
    },

    /// Show registration statistics
    Stats,

    /// Write the dated statistics snapshot
    Export {
        /// Output directory (overrides REGISTRY_EXPORT_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Clear statistics and the member counter (member records are kept)
    Reset {
        #[arg(long)]
        yes: bool,
    },

    /// Registrations waiting for admin review
    Pending,

    /// Audit trail for one member
    History { id: String },

    /// Interactive statistics dashboard
    Dashboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let registry = if cli.memory {
        Registry::in_memory(&config)
    } else {
        Registry::open(&config)?
    };

    match cli.command {
        Commands::Register {
            name,
            dob,
            phone,
            email,
            ministry,
            custom_ministry,
            status,
            years,
            photo,
            payment,
        } => {
            let applicant = ApplicantInput {
                full_name: name,
                date_of_birth: dob,
                phone_number: phone,
                email_address: email,
                ministry: Some(ministry),
                custom_ministry,
                sacrament_status: Some(status),
                years_in_faith: Some(years),
                photo,
                payment_proof: None,
            };
            run_register(&registry, applicant, payment).await?
        }
        Commands::List { csv, recent } => run_list(&registry, csv, recent)?,
        Commands::Stats => run_stats(&registry)?,
        Commands::Export { dir } => {
            let dir = dir.unwrap_or_else(|| config.export_dir.clone());
            let path = registry.write_snapshot(&dir)?;
            println!("✓ Statistics exported to {}", path.display());
        }
        Commands::Reset { yes } => {
            if !yes {
                eprintln!("❌ This clears all statistics and restarts member IDs at 0001.");
                eprintln!("   Member records are kept. Re-run with --yes to confirm.");
                std::process::exit(1);
            }
            registry.reset_statistics()?;
            println!("✓ Statistics and member counter reset");
        }
        Commands::Pending => run_pending(&registry)?,
        Commands::History { id } => run_history(&registry, &id)?,
        Commands::Dashboard => run_dashboard(&registry, &config)?,
    }

    Ok(())
}

async fn run_register(
    registry: &Registry,
    applicant: ApplicantInput,
    payment: PaymentMethod,
) -> Result<()> {
    let mut workflow = registry.start_registration();

    if let Err(e) = workflow.submit(applicant) {
        eprintln!("❌ {}", e.user_message());
        return Err(e.into());
    }

    let record = match workflow.confirm_payment(payment) {
        Ok(record) => record,
        Err(e) => {
            eprintln!("❌ {}", e.user_message());
            return Err(e.into());
        }
    };

    println!("🎉 Registration complete");
    println!("   Member ID:  {}", record.id);
    println!("   Name:       {}", record.name);
    println!("   Ministry:   {}", record.ministry);
    println!("   Payment:    {}", record.payment_method.label());

    // The process is about to exit, so wait for the admin notification here
    let status = workflow.settle_notification().await;
    println!("   Admin notification: {:?}", status);

    Ok(())
}

fn run_list(registry: &Registry, csv: bool, recent: Option<usize>) -> Result<()> {
    let store = registry.store();

    if csv {
        let written = store.write_csv(std::io::stdout().lock())?;
        tracing::debug!(written, "CSV export written");
        return Ok(());
    }

    let members = match recent {
        Some(limit) => store.recent_first(limit)?,
        None => store.list()?,
    };

    println!("{:<11} {:<28} {:<20} {:<14} Registered", "ID", "Name", "Ministry", "Status");
    println!("{}", "─".repeat(92));
    for m in &members {
        println!(
            "{:<11} {:<28} {:<20} {:<14} {}",
            m.id,
            truncate(&m.name, 28),
            truncate(&m.ministry, 20),
            m.status.as_str(),
            m.registered_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n✓ {} member(s)", members.len());

    Ok(())
}

fn run_stats(registry: &Registry) -> Result<()> {
    let stats = registry.stats();
    let current = stats.current_counts()?;

    println!("📊 Registration statistics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Total members:   {}", registry.store().count()?);
    println!("   Last issued ID:  {}", registry.allocator().current()?);
    println!("   Today:           {}", current.today);
    println!("   This month:      {}", current.this_month);
    println!("   This year:       {}", current.this_year);

    println!("\nLast 7 days");
    for period in stats.recent_window(PeriodKind::Day, 7)? {
        println!("   {:<12} {:>4}  {}", period.label, period.count, bar(period.count));
    }

    println!("\nLast 6 months");
    for period in stats.recent_window(PeriodKind::Month, 6)? {
        println!("   {:<12} {:>4}  {}", period.label, period.count, bar(period.count));
    }

    if let Err(problem) = stats.state()?.check_consistency() {
        tracing::warn!(%problem, "Registration statistics are inconsistent");
    }

    Ok(())
}

fn run_pending(registry: &Registry) -> Result<()> {
    let pending = registry.pending()?;

    for entry in &pending {
        println!(
            "{:<11} {:<28} {:<14} {}",
            entry.record.id,
            truncate(&entry.record.name, 28),
            entry.record.payment_method.label(),
            entry.registration_date
        );
    }
    println!("\n✓ {} registration(s) awaiting admin review", pending.len());

    Ok(())
}

fn run_history(registry: &Registry, id: &str) -> Result<()> {
    let id = MemberId::from(id);
    let member = registry
        .store()
        .find(&id)?
        .with_context(|| format!("No member with ID {}", id))?;

    println!("{} - {}", member.id, member.name);
    for event in registry.store().history(&id)? {
        println!(
            "   {}  {:<20} by {}  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.actor,
            event.data
        );
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_dashboard(registry: &Registry, config: &Config) -> Result<()> {
    let mut app = ui::App::load(registry, config.export_dir.clone())?;
    ui::run_ui(&mut app, registry)?;
    println!("\n✅ Dashboard closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_dashboard(_registry: &Registry, _config: &Config) -> Result<()> {
    eprintln!("❌ Dashboard not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin registry-server --features server");
    std::process::exit(1);
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let cut: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn bar(count: u64) -> String {
    "█".repeat(count.min(40) as usize)
}
