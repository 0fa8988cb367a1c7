// SCD ETL - command-line entry point
//
//   scd-etl init [--reset]
//   scd-etl load customers.csv [--load-date 2025-01-02T00:00:00Z] [--json]
//   scd-etl history C001
//   scd-etl current
//   scd-etl audit

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use scd_dimension::config::{parse_field_kinds, parse_field_list};
use scd_dimension::{
    audit_dimension, init_logging, DimensionRow, DimensionStore, LogFormat, ReconciliationDriver,
    RecordExtractor, RunSummary, ScdConfig, Severity, SqliteStore, TrackedFields,
};

#[derive(Debug, Parser)]
#[command(name = "scd-etl", version, about = "Slowly changing dimension loader")]
struct Cli {
    /// SQLite database holding the dimension
    #[arg(long, env = "SCD_DATABASE", default_value = "dimension.db", global = true)]
    db: PathBuf,

    /// Natural key column
    #[arg(long, env = "SCD_NATURAL_KEY", default_value = "customer_id", global = true)]
    natural_key: String,

    /// Comma-separated Type-1 (overwrite) fields
    #[arg(long, env = "SCD_TYPE1_FIELDS", default_value = "first_name,last_name,email,phone", global = true)]
    type1_fields: String,

    /// Comma-separated Type-2 (versioned) fields
    #[arg(long, env = "SCD_TYPE2_FIELDS", default_value = "company_name", global = true)]
    type2_fields: String,

    /// field:kind pairs, kinds text|ci_text|number|boolean
    #[arg(long, env = "SCD_FIELD_KINDS", default_value = "", global = true)]
    field_kinds: String,

    /// Dimension table name
    #[arg(long, env = "SCD_TABLE", default_value = "dim_customer", global = true)]
    table: String,

    /// pretty or json
    #[arg(long, env = "SCD_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the dimension and event tables
    Init {
        /// Drop existing tables first
        #[arg(long)]
        reset: bool,
    },
    /// Reconcile a CSV extract into the dimension
    Load {
        csv: PathBuf,

        /// Effective date for this run (RFC 3339); defaults to now
        #[arg(long)]
        load_date: Option<String>,

        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show every version of one natural key
    History { natural_key: String },
    /// Show current rows only
    Current,
    /// Check the dimension's temporal invariants
    Audit {
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn config(&self) -> Result<ScdConfig> {
        let mut fields = TrackedFields::new(
            parse_field_list(&self.type1_fields),
            parse_field_list(&self.type2_fields),
        );
        fields.kinds = parse_field_kinds(&self.field_kinds)?;

        let config = ScdConfig::new(self.natural_key.trim(), self.table.trim(), fields);
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format: LogFormat = cli.log_format.parse()?;
    init_logging(format);

    let config = cli.config().context("invalid configuration")?;

    match &cli.command {
        Command::Init { reset } => run_init(&cli, &config, *reset),
        Command::Load {
            csv,
            load_date,
            delimiter,
            json,
        } => run_load(&cli, &config, csv, load_date.as_deref(), *delimiter, *json),
        Command::History { natural_key } => run_history(&cli, &config, natural_key),
        Command::Current => run_current(&cli, &config),
        Command::Audit { json } => run_audit(&cli, &config, *json),
    }
}

fn open_store(cli: &Cli, config: &ScdConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open(&cli.db, &config.table)
        .with_context(|| format!("cannot open database {}", cli.db.display()))?;
    store.setup()?;
    Ok(store)
}

fn run_init(cli: &Cli, config: &ScdConfig, reset: bool) -> Result<()> {
    println!("🔧 Setting up dimension '{}' in {}", config.table, cli.db.display());

    let store = open_store(cli, config)?;
    if reset {
        store.reset()?;
        println!("✓ Existing rows and events dropped");
    }

    println!("✓ Database initialized with WAL mode ({} rows)", store.count()?);
    Ok(())
}

fn run_load(
    cli: &Cli,
    config: &ScdConfig,
    csv: &Path,
    load_date: Option<&str>,
    delimiter: char,
    json: bool,
) -> Result<()> {
    if !delimiter.is_ascii() {
        bail!("delimiter must be a single ASCII character");
    }

    let mut store = open_store(cli, config)?;
    let file = std::fs::File::open(csv).with_context(|| format!("cannot open {}", csv.display()))?;

    let mut driver = ReconciliationDriver::new(&mut store, config);
    if let Some(raw) = load_date {
        driver = driver.with_run_timestamp(parse_load_date(raw)?);
    }

    let outcome = match RecordExtractor::from_csv_reader(file, delimiter as u8, config) {
        Ok(records) => driver.run(records),
        Err(err) => Err(driver.abort(err)),
    };

    match outcome {
        Ok(summary) => {
            print_summary(&summary, json)?;
            Ok(())
        }
        Err(aborted) => {
            print_summary(&aborted.summary, json)?;
            Err(anyhow::Error::new(aborted.error).context("run aborted, committed records are kept"))
        }
    }
}

fn parse_load_date(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("--load-date '{}' is not RFC 3339", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("\n📊 Run {}", summary.run_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Processed:        {}", summary.processed);
    println!("  Inserted:         {}", summary.inserted);
    println!("  Type-1 updated:   {}", summary.type1_updated);
    println!("  Type-2 versioned: {}", summary.type2_versioned);
    println!("  Unchanged:        {}", summary.unchanged);
    println!("  Failed:           {}", summary.failed);
    println!("  Duration:         {} ms", summary.duration_ms);

    if summary.cancelled {
        println!("\n⚠️  Run was cancelled before the batch finished");
    }

    if !summary.errors.is_empty() {
        println!("\n❌ Failed records:");
        for error in &summary.errors {
            println!(
                "   row {:>5}  {:<12} {}",
                error.row.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                error.natural_key.as_deref().unwrap_or("-"),
                error.reason
            );
        }
    } else {
        println!("\n✅ All records reconciled");
    }

    Ok(())
}

fn run_history(cli: &Cli, config: &ScdConfig, natural_key: &str) -> Result<()> {
    let store = open_store(cli, config)?;
    let history = store.history(natural_key)?;

    if history.is_empty() {
        println!("No versions for '{}'", natural_key);
        return Ok(());
    }

    println!("⏳ History of {} ({} versions)\n", natural_key, history.len());
    print_rows(&history, config);
    Ok(())
}

fn run_current(cli: &Cli, config: &ScdConfig) -> Result<()> {
    let store = open_store(cli, config)?;
    let rows: Vec<DimensionRow> = store.all_rows()?.into_iter().filter(|r| r.is_current).collect();

    println!("📋 Current state of {} ({} entities)\n", config.table, rows.len());
    print_rows(&rows, config);
    Ok(())
}

fn print_rows(rows: &[DimensionRow], config: &ScdConfig) {
    let columns: Vec<&String> = config.fields.all().collect();

    print!("{:>4} {:<12}", "sk", config.natural_key);
    for column in &columns {
        print!(" {:<18}", column);
    }
    println!(" {:<20} {:<20} {}", "effective_start", "effective_end", "current");

    for row in rows {
        print!("{:>4} {:<12}", row.surrogate_key, row.natural_key);
        for column in &columns {
            print!(" {:<18}", truncate(row.get(column).unwrap_or("NULL"), 18));
        }
        println!(
            " {:<20} {:<20} {}",
            row.effective_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            row.effective_end
                .map(|end| end.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            if row.is_current { "✓" } else { "" }
        );
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let cut: String = value.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn run_audit(cli: &Cli, config: &ScdConfig, json: bool) -> Result<()> {
    let store = open_store(cli, config)?;
    let report = audit_dimension(&store.all_rows()?, config);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("🔍 {}", report.summary());
        for issue in &report.issues {
            let marker = match issue.severity {
                Severity::Critical => "❌",
                Severity::Warning => "⚠️ ",
            };
            println!(
                "   {} [{}] {} {}",
                marker,
                issue.check,
                issue.natural_key.as_deref().unwrap_or("-"),
                issue.issue
            );
        }
    }

    if report.has_critical_issues() {
        bail!("dimension failed integrity audit");
    }
    if !json {
        println!("✅ Dimension is consistent");
    }
    Ok(())
}
