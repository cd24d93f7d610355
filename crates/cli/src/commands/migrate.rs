use freightdesk_db::migrations;

use crate::commands::{load_config, migrated_pool, runtime, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let applied = migrations::applied_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8));
        pool.close().await;
        applied
    });

    match result {
        Ok(applied) => CommandResult::success(
            "migrate",
            format!("applied pending migrations ({applied} recorded)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
