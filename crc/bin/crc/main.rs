mod handlers;

use clap::{CommandFactory, Parser};
use crc::{
    cli::{ConfigSubcommand, CrcArgs, CrcSubcommand},
    config::CrcPaths,
    CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> CrcResult<()> {
    let args = CrcArgs::parse();
    let paths = CrcPaths::from_env();

    let guard = match args.subcommand {
        Some(CrcSubcommand::Daemon) => crc::init_daemon_logging(&paths, args.verbose)?,
        _ => crc::init_cli_logging(&paths, args.verbose)?,
    };

    let result = match args.subcommand {
        Some(CrcSubcommand::Start { pull_secret_file }) => {
            tracing::trace!("start: pull_secret_file={pull_secret_file:?}");
            handlers::start_subcommand(&paths, pull_secret_file).await
        }
        Some(CrcSubcommand::Stop) => handlers::stop_subcommand(&paths).await,
        Some(CrcSubcommand::Delete) => handlers::delete_subcommand(&paths).await,
        Some(CrcSubcommand::Status) => handlers::status_subcommand(&paths).await,
        Some(CrcSubcommand::Ip) => handlers::ip_subcommand(&paths).await,
        Some(CrcSubcommand::Console { credentials }) => {
            handlers::console_subcommand(&paths, credentials).await
        }
        Some(CrcSubcommand::Version) => {
            handlers::version_subcommand();
            Ok(())
        }
        Some(CrcSubcommand::Config { action }) => match action {
            ConfigSubcommand::Get { key } => handlers::config_get_subcommand(&paths, key).await,
            ConfigSubcommand::Set { key, value } => {
                handlers::config_set_subcommand(&paths, key, value).await
            }
            ConfigSubcommand::Unset { key } => handlers::config_unset_subcommand(&paths, key).await,
            ConfigSubcommand::View => handlers::config_view_subcommand(&paths).await,
        },
        Some(CrcSubcommand::Daemon) => handlers::daemon_subcommand(paths).await,
        None => {
            CrcArgs::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        handlers::report_error(e);
        drop(guard);
        std::process::exit(1);
    }

    Ok(())
}
