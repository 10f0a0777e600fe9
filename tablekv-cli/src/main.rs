use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::Path;
use std::process;
use tablekv::settings::{DEFAULT_DATABASE, DEFAULT_TABLE, ENV_DATABASE, ENV_DATA_DIR, ENV_TABLE};
use tablekv::{
    schema, ConnectionRegistry, DbHandle, Join, PredicateList, SelectOrder, SettingValue,
    SettingsConfig, SettingsStore, TableEngine, Value,
};

/// tablekv CLI: read and write settings and tables in a SQLite file
#[derive(Parser)]
#[command(name = "tablekv", version, about)]
struct Cli {
    /// Directory holding the database file
    #[arg(long, env = ENV_DATA_DIR, default_value = ".")]
    data_dir: String,

    /// Database file name inside the data directory
    #[arg(long, env = ENV_DATABASE, default_value = DEFAULT_DATABASE)]
    database: String,

    /// Settings table name
    #[arg(long, env = ENV_TABLE, default_value = DEFAULT_TABLE)]
    table: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ValueKind {
    Text,
    Int,
    Real,
    Bool,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Read a setting
    Get { key: String },

    /// Write a setting
    Set {
        key: String,
        value: String,
        /// How to interpret the value
        #[arg(long, default_value = "text")]
        kind: ValueKind,
    },

    /// Remove a setting
    Remove { key: String },

    /// Check whether a setting exists
    Exists { key: String },

    /// List all settings
    List,

    /// Create a table from a YAML schema file
    CreateTable {
        name: String,
        #[arg(long)]
        schema: String,
    },

    /// Drop a table
    DropTable { name: String },

    /// List tables in the database
    Tables,

    /// Select rows from a table
    Select {
        table: String,
        /// Equality filters (e.g. --where status=active)
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Join filters with OR instead of AND
        #[arg(long)]
        any: bool,
        /// Column to order by
        #[arg(long)]
        order: Option<String>,
        /// Order descending
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Run a read-only SELECT statement
    Query { sql: String },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = SettingsConfig::new(&cli.data_dir)
        .database(cli.database.as_str())
        .table(cli.table.as_str());
    log::debug!(
        "Using {} table '{}'",
        config.database_path().display(),
        config.table_name
    );

    match cli.command {
        Command::Get { key } => {
            let store = SettingsStore::new(config)?;
            let value = store.read(&key);
            fail_on_error(store.last_error())?;
            print_output(&serde_json::json!({ "key": key, "value": value }), &cli.format)?;
        }

        Command::Set { key, value, kind } => {
            let store = SettingsStore::new(config)?;
            let value = parse_setting(&value, kind)?;
            if !store.write(&key, value) {
                return Err(engine_failure(store.last_error(), "write failed"));
            }
            print_output(&serde_json::json!({ "ok": true, "key": key }), &cli.format)?;
        }

        Command::Remove { key } => {
            let store = SettingsStore::new(config)?;
            if !store.remove(&key) {
                return Err(engine_failure(store.last_error(), "remove failed"));
            }
            print_output(&serde_json::json!({ "ok": true, "removed": key }), &cli.format)?;
        }

        Command::Exists { key } => {
            let store = SettingsStore::new(config)?;
            let exists = store.exists(&key);
            fail_on_error(store.last_error())?;
            print_output(&serde_json::json!({ "key": key, "exists": exists }), &cli.format)?;
        }

        Command::List => {
            let store = SettingsStore::new(config)?;
            let entries: BTreeMap<String, SettingValue> = store.entries().into_iter().collect();
            fail_on_error(store.last_error())?;
            print_output(&serde_json::to_value(entries)?, &cli.format)?;
        }

        Command::CreateTable { name, schema: schema_file } => {
            let schema = schema::parse_schema(Path::new(&schema_file))?;
            let (engine, db) = open_database(&config)?;
            if !engine.create_table(&db, &schema, &name) {
                return Err(engine_failure(engine.last_error(), "create table failed"));
            }
            print_output(&serde_json::json!({ "ok": true, "table": name }), &cli.format)?;
        }

        Command::DropTable { name } => {
            let (engine, db) = open_database(&config)?;
            if !engine.drop_table(&db, &name) {
                return Err(engine_failure(engine.last_error(), "drop table failed"));
            }
            print_output(&serde_json::json!({ "ok": true, "dropped": name }), &cli.format)?;
        }

        Command::Tables => {
            let (engine, db) = open_database(&config)?;
            let tables = engine.tables(&db);
            fail_on_error(engine.last_error())?;
            print_output(&serde_json::to_value(tables)?, &cli.format)?;
        }

        Command::Select {
            table,
            filters,
            any,
            order,
            desc,
            limit,
        } => {
            let join = if any { Join::Or } else { Join::And };
            let list: PredicateList = filters
                .into_iter()
                .fold(PredicateList::new(), |list, (col, val)| {
                    list.push(col, parse_literal(&val), join)
                });
            let predicate = list.to_predicate();
            let order = order.map(|col| {
                if desc {
                    SelectOrder::descending(col)
                } else {
                    SelectOrder::ascending(col)
                }
            });

            let (engine, db) = open_database(&config)?;
            let rows = engine.select(&db, &table, predicate.as_ref(), order.as_ref(), limit);
            fail_on_error(engine.last_error())?;
            print_output(&serde_json::to_value(rows)?, &cli.format)?;
        }

        Command::Query { sql } => {
            let (engine, db) = open_database(&config)?;
            let rows = engine.execute_select(&db, &sql);
            fail_on_error(engine.last_error())?;
            print_output(&serde_json::to_value(rows)?, &cli.format)?;
        }
    }

    Ok(())
}

fn open_database(config: &SettingsConfig) -> Result<(TableEngine, DbHandle), Box<dyn std::error::Error>> {
    config.validate()?;
    std::fs::create_dir_all(&config.data_dir)?;
    let db = ConnectionRegistry::global().open(&config.database_path())?;
    log::debug!("Opened {} for table commands", db.path().display());
    Ok((TableEngine::new(), db))
}

fn fail_on_error(error: Option<tablekv::SqlError>) -> Result<(), Box<dyn std::error::Error>> {
    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn engine_failure(error: Option<tablekv::SqlError>, fallback: &str) -> Box<dyn std::error::Error> {
    match error {
        Some(e) => e.into(),
        None => fallback.into(),
    }
}

fn parse_setting(raw: &str, kind: ValueKind) -> Result<SettingValue, Box<dyn std::error::Error>> {
    Ok(match kind {
        ValueKind::Text => SettingValue::from(raw),
        ValueKind::Int => SettingValue::Integer(
            raw.parse()
                .map_err(|_| format!("'{raw}' is not an integer"))?,
        ),
        ValueKind::Real => SettingValue::Real(
            raw.parse()
                .map_err(|_| format!("'{raw}' is not a number"))?,
        ),
        ValueKind::Bool => SettingValue::Bool(
            raw.parse()
                .map_err(|_| format!("'{raw}' is not true or false"))?,
        ),
        ValueKind::Json => SettingValue::Json(serde_json::from_str(raw)?),
    })
}

/// Integers and reals are matched as numbers, everything else as text.
fn parse_literal(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        Value::Integer(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else {
        Value::from(raw)
    }
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
