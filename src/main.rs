mod auth;
mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod grouping;
mod importer;
mod merchant;
mod models;
mod normalizer;
mod reports;
mod server;
mod settings;
mod transactions;
mod users;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, UserCommands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spendwise=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn serve(bind: Option<String>) -> anyhow::Result<()> {
    let mut settings = settings::load_settings();
    if let Some(addr) = bind {
        settings.bind_addr = addr;
    }
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(server::serve(settings))
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir).map_err(Into::into),
        Commands::Serve { bind } => serve(bind),
        Commands::User { command } => match command {
            UserCommands::Add {
                email,
                password,
                first_name,
                last_name,
            } => cli::user::add(&email, &password, &first_name, &last_name).map_err(Into::into),
            UserCommands::List => cli::user::list().map_err(Into::into),
        },
        Commands::Import { file, user, mode } => cli::import::run(&file, &user, mode.as_deref()).map_err(Into::into),
        Commands::Categorize { user } => cli::categorize::run(&user).map_err(Into::into),
        Commands::Groups { user } => cli::groups::list(&user).map_err(Into::into),
        Commands::QuickCategorize {
            user,
            merchant,
            category,
        } => cli::groups::apply(&user, &merchant, &category).map_err(Into::into),
        Commands::Report {
            user,
            from_date,
            to_date,
        } => cli::report::run(&user, from_date.as_deref(), to_date.as_deref()).map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
