mod commands;

use ltfs_manager::cli::{Cli, Commands};
use ltfs_manager::{display, logger, Config, Result, TapeService};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose, args.log_json)?;

    debug!("ltfsctl starting");

    match run(args).await {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            display::display_error(&e.to_string());
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let service = TapeService::new(config);

    match args.command {
        Commands::List { detailed, csv } => commands::list::execute(&service, detailed, csv).await,

        Commands::Classify { device } => commands::classify::execute(&service, device).await,

        Commands::Mount {
            device,
            mount_point,
        } => commands::mount::execute_mount(&service, device, mount_point).await,

        Commands::Unmount {
            mount_point,
            device,
        } => commands::mount::execute_unmount(&service, mount_point, device).await,

        Commands::Mounted => commands::mount::execute_mounted(&service).await,

        Commands::Format {
            device,
            label,
            force,
            yes,
        } => commands::format::execute(&service, device, label, force, yes).await,

        Commands::Drive { device, action } => {
            commands::drive::execute(&service, device, action).await
        }

        Commands::Diagnose {
            device,
            probes,
            output,
        } => commands::diagnose::execute(&service, device, probes, output).await,

        Commands::Permissions { device } => commands::permissions::execute(&service, device).await,

        Commands::Tools => commands::tools::execute(&service).await,
    }
}
