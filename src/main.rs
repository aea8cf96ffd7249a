use clap::Parser;
use honeyshell::configuration::config::{Args, Config};
use honeyshell::controller::controller_handler::Controller;
use log::{error, info};

#[tokio::main]
async fn main() {
    // Get command-line arguments
    let args = Args::parse();

    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .init();

    println!(
        "
██╗  ██╗ ██████╗ ███╗   ██╗███████╗██╗   ██╗███████╗██╗  ██╗███████╗██╗     ██╗
██║  ██║██╔═══██╗████╗  ██║██╔════╝╚██╗ ██╔╝██╔════╝██║  ██║██╔════╝██║     ██║
███████║██║   ██║██╔██╗ ██║█████╗   ╚████╔╝ ███████╗███████║█████╗  ██║     ██║
██╔══██║██║   ██║██║╚██╗██║██╔══╝    ╚██╔╝  ╚════██║██╔══██║██╔══╝  ██║     ██║
██║  ██║╚██████╔╝██║ ╚████║███████╗   ██║   ███████║██║  ██║███████╗███████╗███████╗
╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═══╝╚══════╝   ╚═╝   ╚══════╝╚═╝  ╚═╝╚══════╝╚══════╝╚══════╝
==================================================================================
          SSH honeypot with transparent forwarding v{}
==================================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    info!("Importing configuration");

    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Unable to import configuration from {}: {}",
                args.config_file.display(),
                e
            );
            std::process::exit(1);
        }
    };
    if let Err(e) = config.apply_args(&args) {
        error!("Invalid command-line override: {}", e);
        std::process::exit(1);
    }

    info!("Configuration imported successfully");

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
