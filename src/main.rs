use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use lancedesk::{
   FileFormat,
   commands::{
      self,
      data::TransferArgs,
      profiles::AddArgs,
      query::{ScanArgs, SearchArgs},
   },
   config,
   seed,
};

#[derive(Parser)]
#[command(name = "lancedesk")]
#[command(about = "Browse LanceDB databases through saved connection profiles")]
#[command(version)]
struct Cli {
   #[arg(long, global = true, help = "Print results as JSON envelopes")]
   json: bool,

   #[command(subcommand)]
   command: Commands,
}

#[derive(Subcommand)]
enum Commands {
   /// Manage connection profiles
   Profiles {
      #[command(subcommand)]
      command: ProfileCommands,
   },

   /// Inspect the credential vault
   Credentials {
      #[command(subcommand)]
      command: CredentialCommands,
   },

   /// List tables of a profile
   Tables {
      #[command(flatten)]
      target: Target,
   },

   /// Show the schema of a table
   Schema {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      target: Target,
   },

   /// Read a page of rows from a table
   Scan {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      target: Target,

      #[arg(short = 'n', long, help = "Rows per page")]
      limit: Option<usize>,

      #[arg(long, help = "Rows to skip")]
      offset: Option<usize>,

      #[arg(short = 'w', long = "where", help = "SQL filter expression")]
      filter: Option<String>,

      #[arg(short = 'c', long, value_delimiter = ',', help = "Columns to return")]
      columns: Vec<String>,

      #[arg(long, help = "Request Arrow IPC instead of JSON rows")]
      arrow: bool,
   },

   /// Nearest-neighbour or full-text search on a table
   Search {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      target: Target,

      #[arg(long, help = "Query vector as comma-separated floats")]
      vector: Option<String>,

      #[arg(long, help = "Full-text query")]
      text: Option<String>,

      #[arg(long, help = "Vector column to search")]
      column: Option<String>,

      #[arg(short = 'k', long, help = "Number of results")]
      top_k: Option<usize>,

      #[arg(short = 'w', long = "where", help = "SQL filter expression")]
      filter: Option<String>,
   },

   /// List the versions of a table
   Versions {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      target: Target,
   },

   /// List the indexes of a table
   Indexes {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      target: Target,
   },

   /// Open a table at an older version
   Checkout {
      #[arg(help = "Table name")]
      table: String,

      #[arg(help = "Version number")]
      version: u64,

      #[command(flatten)]
      target: Target,
   },

   /// Write the rows of a table to a CSV, Parquet or JSON lines file
   Export {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      file: FileArgs,

      #[command(flatten)]
      target: Target,

      #[arg(short = 'w', long = "where", help = "SQL filter expression")]
      filter: Option<String>,
   },

   /// Append rows from a CSV, Parquet or JSON lines file
   Import {
      #[arg(help = "Table name")]
      table: String,

      #[command(flatten)]
      file: FileArgs,

      #[command(flatten)]
      target: Target,

      #[arg(long, help = "Replace the table contents instead of appending")]
      overwrite: bool,
   },

   /// Delete the rows matching a filter
   Delete {
      #[arg(help = "Table name")]
      table: String,

      #[arg(short = 'w', long = "where", help = "SQL filter expression; 'true' deletes all")]
      filter: String,

      #[command(flatten)]
      target: Target,
   },

   /// Create a sample vector table
   Seed {
      #[arg(help = "Database URI")]
      uri: String,

      #[arg(long, default_value_t = seed::DEFAULT_ROWS, help = "Rows to generate")]
      rows: usize,
   },

   /// Show where configuration and data live
   Config,
}

#[derive(Args)]
struct Target {
   #[arg(short = 'p', long, env = "LANCEDESK_PROFILE", help = "Profile id or name")]
   profile: Option<String>,
}

#[derive(Args)]
struct FileArgs {
   #[arg(help = "File path")]
   path: String,

   #[arg(long, value_parser = parse_format, help = "csv, parquet or jsonl")]
   format: Option<FileFormat>,

   #[arg(long, help = "CSV field delimiter")]
   delimiter: Option<String>,

   #[arg(long, help = "CSV has no header row")]
   no_header: bool,
}

impl From<FileArgs> for TransferArgs {
   fn from(args: FileArgs) -> Self {
      Self {
         path:      args.path,
         format:    args.format,
         delimiter: args.delimiter,
         no_header: args.no_header,
      }
   }
}

#[derive(Subcommand)]
enum ProfileCommands {
   List,

   Add {
      #[arg(help = "Display name")]
      name: String,

      #[arg(help = "Database URI (local path, file://, s3://, gs://, az://, db://)")]
      uri: String,

      #[arg(short = 'o', long = "option", value_parser = parse_pair, help = "Storage option key=value")]
      storage_options: Vec<(String, String)>,

      #[arg(long, help = "Credential provider name")]
      provider: Option<String>,

      #[arg(long = "param", value_parser = parse_pair, help = "Credential parameter key=value")]
      params: Vec<(String, String)>,

      #[arg(long, requires = "provider", help = "Keep credential parameters in the vault")]
      store_secret: bool,

      #[arg(long, help = "Read consistency interval in seconds")]
      consistency_secs: Option<u64>,
   },

   Remove {
      #[arg(help = "Profile id or name")]
      profile: String,
   },

   Select {
      #[arg(help = "Profile id or name")]
      profile: String,
   },
}

#[derive(Subcommand)]
enum CredentialCommands {
   List,

   /// Remove vault entries no profile references
   Sweep,
}

fn parse_format(raw: &str) -> Result<FileFormat> {
   match raw.trim().to_ascii_lowercase().as_str() {
      "csv" => Ok(FileFormat::Csv),
      "parquet" => Ok(FileFormat::Parquet),
      "jsonl" | "ndjson" => Ok(FileFormat::Jsonl),
      other => bail!("unknown file format '{other}'"),
   }
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
   let (key, value) = raw
      .split_once('=')
      .with_context(|| format!("expected key=value, got '{raw}'"))?;
   Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
   tracing_subscriber::fmt()
      .with_writer(std::io::stderr)
      .with_env_filter(
         tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::WARN.into()),
      )
      .init();

   let cli = Cli::parse();
   let json = cli.json;

   match cli.command {
      Commands::Profiles { command } => match command {
         ProfileCommands::List => commands::profiles::list(json),
         ProfileCommands::Add {
            name,
            uri,
            storage_options,
            provider,
            params,
            store_secret,
            consistency_secs,
         } => commands::profiles::add(
            AddArgs { name, uri, storage_options, provider, params, store_secret, consistency_secs },
            json,
         ),
         ProfileCommands::Remove { profile } => commands::profiles::remove(&profile, json).await,
         ProfileCommands::Select { profile } => commands::profiles::select(&profile, json),
      },
      Commands::Credentials { command } => match command {
         CredentialCommands::List => commands::credentials::list(json),
         CredentialCommands::Sweep => commands::credentials::sweep(json),
      },
      Commands::Tables { target } => commands::tables::list(target.profile.as_deref(), json).await,
      Commands::Schema { table, target } => {
         commands::tables::schema(target.profile.as_deref(), &table, json).await
      },
      Commands::Scan { table, target, limit, offset, filter, columns, arrow } => {
         let args = ScanArgs { limit, offset, filter, columns, arrow };
         commands::query::scan(target.profile.as_deref(), &table, args, json).await
      },
      Commands::Search { table, target, vector, text, column, top_k, filter } => {
         let args = SearchArgs { vector, text, column, top_k, filter };
         commands::query::search(target.profile.as_deref(), &table, args, json).await
      },
      Commands::Versions { table, target } => {
         commands::query::versions(target.profile.as_deref(), &table, json).await
      },
      Commands::Indexes { table, target } => {
         commands::data::indexes(target.profile.as_deref(), &table, json).await
      },
      Commands::Checkout { table, version, target } => {
         commands::data::checkout(target.profile.as_deref(), &table, version, json).await
      },
      Commands::Export { table, file, target, filter } => {
         commands::data::export(target.profile.as_deref(), &table, file.into(), filter, json).await
      },
      Commands::Import { table, file, target, overwrite } => {
         commands::data::import(target.profile.as_deref(), &table, file.into(), overwrite, json)
            .await
      },
      Commands::Delete { table, filter, target } => {
         commands::data::delete(target.profile.as_deref(), &table, &filter, json).await
      },
      Commands::Seed { uri, rows } => commands::seed::execute(&uri, rows).await,
      Commands::Config => {
         let cfg = config::get();
         println!("config:   {}", config::config_file_path().display());
         println!("profiles: {}", cfg.profiles_path().display());
         println!("vault:    {}", cfg.vault_path().display());
         println!("\n{}", toml::to_string_pretty(cfg)?);
         Ok(())
      },
   }
}
