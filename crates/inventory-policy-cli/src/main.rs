use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inventory_policy_core::{
    apply_permitted, check_apply, check_prune, evaluate, inventory_id_match, prune_permitted,
    InventoryPolicy, MatchStatus, Object, Operation,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "invpol.v1";

#[derive(Debug, Parser)]
#[command(name = "invpol")]
#[command(about = "Inventory ownership policy checks for apply and prune")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decide whether an object may be applied or pruned by an inventory.
    Check(CheckArgs),
    /// Classify an object's owning-inventory annotation against an inventory.
    Status(StatusArgs),
    /// Print the apply and prune permission tables.
    Table(TableArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    inventory_id: String,
    /// strict, adopt-if-no-inventory or adopt-all
    #[arg(long, default_value = "strict")]
    policy: InventoryPolicy,
    #[arg(long, value_enum, default_value_t = OperationArg::Both)]
    operation: OperationArg,
    /// Live object manifest (JSON or YAML). Omit when the object does not exist live.
    #[arg(long)]
    object: Option<PathBuf>,
    /// Exit with an error when any requested operation is denied.
    #[arg(long, default_value_t = false)]
    enforce: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long)]
    inventory_id: String,
    #[arg(long)]
    object: PathBuf,
}

#[derive(Debug, Args)]
struct TableArgs {
    #[arg(long)]
    policy: Option<InventoryPolicy>,
    #[arg(long)]
    status: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OperationArg {
    Apply,
    Prune,
    Both,
}

impl OperationArg {
    fn operations(self) -> &'static [Operation] {
        match self {
            Self::Apply => &[Operation::Apply],
            Self::Prune => &[Operation::Prune],
            Self::Both => &[Operation::Apply, Operation::Prune],
        }
    }
}

#[derive(Debug, Serialize)]
struct TableRow {
    policy: InventoryPolicy,
    status: String,
    recognized: bool,
    apply: bool,
    prune: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => run_check(&args),
        Command::Status(args) => run_status(&args),
        Command::Table(args) => run_table(&args),
    }
}

fn load_object(path: &Path) -> Result<Object> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read object manifest {}", path.display()))?;
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    let object = if is_json {
        serde_json::from_str(&body)
            .with_context(|| format!("failed to parse JSON manifest {}", path.display()))?
    } else {
        serde_yaml::from_str(&body)
            .with_context(|| format!("failed to parse YAML manifest {}", path.display()))?
    };
    tracing::debug!(path = %path.display(), "loaded object manifest");
    Ok(object)
}

fn object_summary(object: Option<&Object>) -> Value {
    match object {
        None => Value::Null,
        Some(object) => serde_json::json!({
            "kind": object.kind,
            "name": object.metadata.name,
            "namespace": object.metadata.namespace,
            "owning_inventory": object.owning_inventory(),
        }),
    }
}

fn run_check(args: &CheckArgs) -> Result<()> {
    let object = args.object.as_deref().map(load_object).transpose()?;
    let inventory = args.inventory_id.as_str();

    let decisions = args
        .operation
        .operations()
        .iter()
        .map(|operation| evaluate(*operation, inventory, object.as_ref(), args.policy))
        .collect::<Vec<_>>();

    emit_json(serde_json::json!({
        "inventory_id": inventory,
        "object": object_summary(object.as_ref()),
        "decisions": decisions,
    }))?;

    if args.enforce {
        for operation in args.operation.operations() {
            match operation {
                Operation::Apply => {
                    check_apply(inventory, object.as_ref(), args.policy)?;
                }
                Operation::Prune => {
                    check_prune(inventory, object.as_ref(), args.policy)?;
                }
            }
        }
    }
    Ok(())
}

fn run_status(args: &StatusArgs) -> Result<()> {
    let object = load_object(&args.object)?;
    let status = inventory_id_match(args.inventory_id.as_str(), &object);
    emit_json(serde_json::json!({
        "inventory_id": args.inventory_id,
        "object": object_summary(Some(&object)),
        "status": status,
    }))
}

fn table_row(policy: InventoryPolicy, raw_status: &str) -> TableRow {
    // Unrecognized classifications deny both operations.
    match MatchStatus::parse(raw_status) {
        Some(status) => TableRow {
            policy,
            status: status.as_str().to_string(),
            recognized: true,
            apply: apply_permitted(status, policy),
            prune: prune_permitted(status, policy),
        },
        None => {
            tracing::warn!(status = raw_status, "unrecognized match status, denying");
            TableRow {
                policy,
                status: raw_status.to_string(),
                recognized: false,
                apply: false,
                prune: false,
            }
        }
    }
}

fn run_table(args: &TableArgs) -> Result<()> {
    let policies = match args.policy {
        Some(policy) => vec![policy],
        None => InventoryPolicy::ALL.to_vec(),
    };
    let statuses = match args.status.as_deref() {
        Some(raw) if raw.trim().is_empty() => return Err(anyhow!("--status must not be empty")),
        Some(raw) => vec![raw.to_string()],
        None => MatchStatus::ALL.iter().map(|status| status.as_str().to_string()).collect(),
    };

    let rows = policies
        .iter()
        .flat_map(|policy| statuses.iter().map(|status| table_row(*policy, status)))
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({ "rows": rows }))
}
