use rotorbot::{
    arguments::{is_help_requested, is_reset_enabled, print_help},
    logger::{self, LogTag},
};

/// Entry point.
///
/// Handles the special modes (--help, --reset) and otherwise runs the
/// trading loop until shutdown or a fatal error.
#[tokio::main]
async fn main() {
    // Directories must exist before the logger opens its file
    if let Err(e) = rotorbot::paths::ensure_all_directories() {
        eprintln!("failed to create required directories: {}", e);
        std::process::exit(1);
    }

    logger::init();

    if is_help_requested() {
        print_help();
        std::process::exit(0);
    }

    logger::info(LogTag::System, "rotorbot starting up");

    if is_reset_enabled() {
        println!("\nWARNING: this will DELETE all persisted data:");
        println!(
            "   - Trading state ({})",
            rotorbot::paths::state_file_path().display()
        );
        println!(
            "   - Trade journal ({})",
            rotorbot::paths::trade_journal_db_path().display()
        );
        print!("\nType 'yes' to confirm: ");

        use std::io::{self, Write};
        let _ = io::stdout().flush();
        let mut input = String::new();
        let _ = io::stdin().read_line(&mut input);

        if input.trim().eq_ignore_ascii_case("yes") {
            let mut failed = false;
            if let Err(e) = rotorbot::state::delete_state_file().await {
                logger::error(LogTag::State, &format!("state reset failed: {}", e));
                failed = true;
            }
            if let Err(e) = rotorbot::db::delete_trade_journal() {
                logger::error(LogTag::Journal, &format!("journal reset failed: {}", e));
                failed = true;
            }
            if !failed {
                logger::info(LogTag::System, "reset complete");
            }
            logger::flush();
            std::process::exit(if failed { 1 } else { 0 });
        } else {
            println!("Reset cancelled.");
            std::process::exit(0);
        }
    }

    if let Err(e) = rotorbot::config::load_config() {
        logger::error(LogTag::Config, &format!("configuration error: {}", e));
        logger::flush();
        std::process::exit(1);
    }

    rotorbot::shutdown::install_ctrlc_handler();

    let exit_code = match rotorbot::trader::run().await {
        Ok(()) => {
            logger::info(LogTag::System, "rotorbot stopped");
            0
        }
        Err(e) => {
            logger::error(LogTag::System, &format!("fatal: {:#}", e));
            1
        }
    };

    logger::flush();
    std::process::exit(exit_code);
}
