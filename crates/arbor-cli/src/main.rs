// crates/arbor-cli/src/main.rs
// ============================================================================
// Module: Arbor CLI Entry Point
// Description: Command dispatcher for config validation and tree inspection.
// Purpose: Provide a small, fail-closed CLI over the configured record store.
// Dependencies: clap, arbor-config, arbor-core, arbor-store-sqlite, serde, tracing.
// ============================================================================

//! ## Overview
//! The Arbor CLI loads `arbor.toml`, opens the configured store, and runs tree
//! and tenant commands through the core engine. Results are written to stdout
//! as JSON; diagnostics go to stderr and are filtered by `ARBOR_LOG`.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod backend;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use arbor_config::ArborConfig;
use arbor_core::Condition;
use arbor_core::ContentTypeStore;
use arbor_core::DEFAULT_PORT;
use arbor_core::FieldMap;
use arbor_core::Filter;
use arbor_core::JoinPath;
use arbor_core::NewNode;
use arbor_core::NodeItem;
use arbor_core::NodeQuery;
use arbor_core::PathSpec;
use arbor_core::SubclassRow;
use arbor_core::Tenant;
use arbor_core::TenantContext;
use arbor_core::TenantDraft;
use arbor_core::TenantFilter;
use arbor_core::TreeEngine;
use arbor_core::TreeNode;
use arbor_core::TreePath;
use arbor_core::TreeStore;
use arbor_core::TypeName;
use arbor_core::UpcastErrorList;
use backend::SharedStore;
use backend::open_store;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a `--fields` JSON argument.
const MAX_FIELDS_ARG_BYTES: usize = 64 * 1024;
/// Environment variable holding the log filter.
const LOG_ENV: &str = "ARBOR_LOG";
/// Log filter used when `ARBOR_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "warn";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "arbor", version, disable_help_subcommand = true)]
struct Cli {
    /// Optional config file path (defaults to arbor.toml or `ARBOR_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Page tree queries and writes.
    Tree {
        /// Selected tree subcommand.
        #[command(subcommand)]
        command: TreeCommand,
    },
    /// Tenant listing, resolution, and creation.
    Tenant {
        /// Selected tenant subcommand.
        #[command(subcommand)]
        command: TenantCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate an Arbor configuration file.
    Validate,
}

/// Tree subcommands.
#[derive(Subcommand, Debug)]
enum TreeCommand {
    /// Show every node, or the node at `--path`.
    Show(ShowCommand),
    /// Direct children of a node.
    Children(NodeCommand),
    /// Descendants of a node.
    Descendants(RelativeCommand),
    /// Ancestors of a node.
    Ancestors(RelativeCommand),
    /// Deepest node shared by every listed path.
    CommonAncestor(CommonAncestorCommand),
    /// Add a root or child node.
    Add(AddCommand),
}

/// Tenant subcommands.
#[derive(Subcommand, Debug)]
enum TenantCommand {
    /// List tenants.
    List(TenantListCommand),
    /// Resolve the tenant serving a host.
    Resolve(TenantResolveCommand),
    /// Create a tenant.
    Create(TenantCreateCommand),
}

/// Options shared by commands that yield node items.
#[derive(Args, Debug)]
struct ItemArgs {
    /// How rows are yielded.
    #[arg(long, value_enum, default_value_t = ModeArg::Specific)]
    mode: ModeArg,
    /// Restrict results to these types and their subtypes.
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,
    /// Skip large fields declared deferrable.
    #[arg(long)]
    defer_streamfields: bool,
}

/// Row yield modes.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    /// Generic rows only.
    Generic,
    /// Rows upcast to their most specific type.
    Specific,
    /// Stand-ins that name their specific type.
    Deferred,
}

/// Arguments for `tree show`.
#[derive(Args, Debug)]
struct ShowCommand {
    /// Node path; omit to show the whole tree.
    #[arg(long)]
    path: Option<String>,
    /// Item options.
    #[command(flatten)]
    items: ItemArgs,
}

/// Arguments for commands relative to one node.
#[derive(Args, Debug)]
struct NodeCommand {
    /// Node path.
    #[arg(long)]
    path: String,
    /// Item options.
    #[command(flatten)]
    items: ItemArgs,
}

/// Arguments for inclusive relations.
#[derive(Args, Debug)]
struct RelativeCommand {
    /// Node path.
    #[arg(long)]
    path: String,
    /// Include the node itself.
    #[arg(long)]
    inclusive: bool,
    /// Item options.
    #[command(flatten)]
    items: ItemArgs,
}

/// Arguments for `tree common-ancestor`.
#[derive(Args, Debug)]
struct CommonAncestorCommand {
    /// Node paths (repeat for each node).
    #[arg(long = "path", required = true)]
    paths: Vec<String>,
    /// Let a listed node be its own ancestor.
    #[arg(long)]
    include_self: bool,
    /// Fail instead of falling back to the first root.
    #[arg(long)]
    strict: bool,
}

/// Arguments for `tree add`.
#[derive(Args, Debug)]
struct AddCommand {
    /// Concrete type of the new node.
    #[arg(long = "type", value_name = "TYPE")]
    type_name: String,
    /// Parent path; omit to add a root.
    #[arg(long)]
    parent: Option<String>,
    /// Generic field values as a JSON object.
    #[arg(long, default_value = "{}")]
    fields: String,
    /// Fields of the type's own row as a JSON object.
    #[arg(long, default_value = "{}")]
    specific_fields: String,
}

/// Arguments for `tenant list`.
#[derive(Args, Debug)]
struct TenantListCommand {
    /// Only open tenants.
    #[arg(long, conflicts_with = "restricted")]
    open: bool,
    /// Only restricted tenants.
    #[arg(long)]
    restricted: bool,
}

/// Arguments for `tenant resolve`.
#[derive(Args, Debug)]
struct TenantResolveCommand {
    /// Request host, optionally with `:port`.
    #[arg(long)]
    host: String,
    /// Port used when `--host` carries none.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

/// Arguments for `tenant create`.
#[derive(Args, Debug)]
struct TenantCreateCommand {
    /// Unique label.
    #[arg(long)]
    label: String,
    /// Hostname served by the tenant.
    #[arg(long)]
    hostname: Option<String>,
    /// Port served by the tenant.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Make the tenant reachable by every user.
    #[arg(long)]
    open: bool,
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// Evaluated rows plus any upcast failures.
#[derive(Serialize)]
struct ItemsOutput<'a> {
    /// Rows in path order.
    items: &'a [NodeItem],
    /// Rows that stayed generic because their specific data was missing.
    upcast_errors: &'a UpcastErrorList,
}

/// Tenant with derived display fields.
#[derive(Serialize)]
struct TenantOutput<'a> {
    /// Stored tenant.
    #[serde(flatten)]
    tenant: &'a Tenant,
    /// Root URL, if the tenant has a hostname.
    url: Option<String>,
    /// True for the configured default tenant.
    is_default: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self { message }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = ArborConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    match cli.command {
        Commands::Config { command } => command_config(&command),
        Commands::Tree { command } => {
            let session = Session::open(config)?;
            command_tree(&session, command)
        }
        Commands::Tenant { command } => {
            let session = Session::open(config)?;
            command_tenant(&session, command)
        }
    }
}

/// Installs the stderr log subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Store, engine, and tenancy handles for one invocation.
struct Session {
    /// Path layout.
    spec: PathSpec,
    /// Tree query engine.
    engine: TreeEngine<SharedStore>,
    /// Tenancy handle.
    tenants: TenantContext<SharedStore>,
}

impl Session {
    /// Opens the configured store and builds the engine.
    fn open(config: ArborConfig) -> CliResult<Self> {
        let spec = config.path_spec().map_err(|err| CliError::new(err.to_string()))?;
        let registry = config.type_registry().map_err(|err| CliError::new(err.to_string()))?;
        let store = open_store(&config, &spec)
            .map_err(|err| CliError::new(format!("failed to open store: {err}")))?;
        let engine = TreeEngine::new(
            Arc::clone(&store),
            Arc::new(registry),
            config.base_type_name(),
            spec.clone(),
        );
        let tenants = TenantContext::new(store, config.default_tenant_id());
        Ok(Self { spec, engine, tenants })
    }

    /// Returns the backing store.
    fn store(&self) -> &SharedStore {
        self.engine.store()
    }

    /// Loads the node stored at a user-supplied path.
    fn node_at(&self, raw: &str) -> CliResult<TreeNode> {
        let path = self.parse_path(raw)?;
        self.engine
            .node_at_path(&path)
            .map_err(|err| CliError::new(format!("tree query failed: {err}")))?
            .ok_or_else(|| CliError::new(format!("no node at path {raw}")))
    }

    /// Validates a user-supplied path against the layout.
    fn parse_path(&self, raw: &str) -> CliResult<TreePath> {
        self.spec.parse(raw).map_err(|err| CliError::new(err.to_string()))
    }

    /// Applies yield mode, type, and deferral options to a query.
    fn with_items(&self, query: &NodeQuery, items: &ItemArgs) -> CliResult<NodeQuery> {
        let mut query = match items.mode {
            ModeArg::Generic => query.generic(),
            ModeArg::Specific => query.specific(),
            ModeArg::Deferred => query.specific_deferred(),
        };
        if !items.types.is_empty() {
            let names: Vec<TypeName> = items.types.iter().map(TypeName::new).collect();
            query = query
                .of_type(self.engine.registry(), &names)
                .map_err(|err| CliError::new(err.to_string()))?;
        }
        if items.defer_streamfields {
            query = query.defer_streamfields();
        }
        Ok(query)
    }

    /// Evaluates a query and writes its items.
    fn write_items(&self, query: &NodeQuery, items: &ItemArgs) -> CliResult<ExitCode> {
        let query = self.with_items(query, items)?;
        let evaluation = self
            .engine
            .evaluate(&query)
            .map_err(|err| CliError::new(format!("tree query failed: {err}")))?;
        write_json(&ItemsOutput {
            items: &evaluation.items,
            upcast_errors: &evaluation.upcast_errors,
        })?;
        Ok(ExitCode::SUCCESS)
    }

    /// Wraps a tenant with its display fields.
    fn tenant_output<'a>(&self, tenant: &'a Tenant) -> TenantOutput<'a> {
        TenantOutput {
            tenant,
            url: tenant.url(),
            is_default: tenant.id == self.tenants.default_tenant_id(),
        }
    }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate => {
            write_stdout_line("config ok").map_err(|err| CliError::new(output_error(&err)))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Tree Commands
// ============================================================================

/// Dispatches tree subcommands.
fn command_tree(session: &Session, command: TreeCommand) -> CliResult<ExitCode> {
    match command {
        TreeCommand::Show(command) => {
            let mut query = session.engine.query();
            if let Some(path) = &command.path {
                let node = session.node_at(path)?;
                query = query.node(&node, None);
            }
            session.write_items(&query, &command.items)
        }
        TreeCommand::Children(command) => {
            let node = session.node_at(&command.path)?;
            session.write_items(&session.engine.query().child_of(&node), &command.items)
        }
        TreeCommand::Descendants(command) => {
            let node = session.node_at(&command.path)?;
            let query = session.engine.query().descendant_of(&node, command.inclusive);
            session.write_items(&query, &command.items)
        }
        TreeCommand::Ancestors(command) => {
            let node = session.node_at(&command.path)?;
            let query = session.engine.query().ancestor_of(&node, command.inclusive);
            session.write_items(&query, &command.items)
        }
        TreeCommand::CommonAncestor(command) => command_common_ancestor(session, &command),
        TreeCommand::Add(command) => command_add(session, &command),
    }
}

/// Executes `tree common-ancestor`.
fn command_common_ancestor(
    session: &Session,
    command: &CommonAncestorCommand,
) -> CliResult<ExitCode> {
    let mut paths = BTreeSet::new();
    for raw in &command.paths {
        paths.insert(session.parse_path(raw)?);
    }
    let query = session.engine.query().filter(Filter::Condition(Condition::PathIn { paths }));
    let ancestor = session
        .engine
        .first_common_ancestor(&query, command.include_self, command.strict)
        .map_err(|err| CliError::new(format!("tree query failed: {err}")))?;
    write_json(&ancestor)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `tree add`, writing one subclass row per join step.
fn command_add(session: &Session, command: &AddCommand) -> CliResult<ExitCode> {
    let type_name = TypeName::new(command.type_name.clone());
    let base = session.engine.base_type();
    let lookups = session
        .engine
        .registry()
        .specific_lookups(base)
        .map_err(|err| CliError::new(err.to_string()))?;
    let join = lookups.get(&type_name);
    if join.is_none() && &type_name != base {
        return Err(CliError::new(format!(
            "type {type_name} is not a concrete subtype of {base}"
        )));
    }
    let fields = parse_fields("--fields", &command.fields)?;
    let specific_fields = parse_fields("--specific-fields", &command.specific_fields)?;
    let store = session.store();
    let content_type_id = store
        .ensure_content_type(&type_name)
        .map_err(|err| CliError::new(format!("tree write failed: {err}")))?;
    let parent = match &command.parent {
        Some(parent) => Some(session.node_at(parent)?.id),
        None => None,
    };
    let rows = subclass_rows(join.map(JoinPath::steps).unwrap_or_default(), specific_fields);
    let node = store
        .add_node_with_rows(parent, NewNode { content_type_id, fields }, &rows)
        .map_err(|err| CliError::new(format!("tree write failed: {err}")))?;
    tracing::debug!(node = %node.id, path = %node.path, type_name = %type_name, "node added");
    write_json(&node)?;
    Ok(ExitCode::SUCCESS)
}

/// Builds one row per join step; the last step carries the type's own fields.
fn subclass_rows(steps: &[TypeName], specific_fields: FieldMap) -> Vec<SubclassRow> {
    let mut rows: Vec<SubclassRow> =
        steps.iter().map(|step| SubclassRow::new(step.clone(), FieldMap::new())).collect();
    if let Some(last) = rows.last_mut() {
        last.fields = specific_fields;
    }
    rows
}

// ============================================================================
// SECTION: Tenant Commands
// ============================================================================

/// Dispatches tenant subcommands.
fn command_tenant(session: &Session, command: TenantCommand) -> CliResult<ExitCode> {
    match command {
        TenantCommand::List(command) => {
            let filter = if command.open {
                Some(TenantFilter::Open)
            } else if command.restricted {
                Some(TenantFilter::Restricted)
            } else {
                None
            };
            let tenants = session
                .tenants
                .tenants(filter.as_ref())
                .map_err(|err| CliError::new(format!("tenant query failed: {err}")))?;
            let output: Vec<TenantOutput<'_>> =
                tenants.iter().map(|tenant| session.tenant_output(tenant)).collect();
            write_json(&output)?;
        }
        TenantCommand::Resolve(command) => {
            let tenant = session
                .tenants
                .tenant_for_request(&command.host, command.port)
                .map_err(|err| CliError::new(format!("tenant resolution failed: {err}")))?;
            write_json(&session.tenant_output(&tenant))?;
        }
        TenantCommand::Create(command) => {
            let mut draft = TenantDraft::new(command.label);
            if let Some(hostname) = command.hostname {
                draft = draft.with_host(hostname, command.port);
            }
            draft.is_open = command.open;
            let tenant = session
                .tenants
                .create_tenant(draft)
                .map_err(|err| CliError::new(format!("tenant create failed: {err}")))?;
            write_json(&session.tenant_output(&tenant))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a JSON object argument into a field map.
fn parse_fields(flag: &str, raw: &str) -> CliResult<FieldMap> {
    if raw.len() > MAX_FIELDS_ARG_BYTES {
        return Err(CliError::new(format!(
            "{flag} exceeds size limit of {MAX_FIELDS_ARG_BYTES} bytes"
        )));
    }
    serde_json::from_str(raw)
        .map_err(|err| CliError::new(format!("{flag} must be a JSON object: {err}")))
}

/// Writes a value to stdout as pretty JSON.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    bytes.push(b'\n');
    write_stdout_bytes(&bytes).map_err(|err| CliError::new(output_error(&err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(error: &std::io::Error) -> String {
    format!("failed to write to stdout: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
