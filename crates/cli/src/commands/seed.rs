use std::env;

use freightdesk_core::auth::password::{hash_password, MIN_PASSWORD_LEN};
use freightdesk_db::{DemoSeedDataset, SeedResult};

use crate::commands::{load_config, migrated_pool, runtime, CommandResult};

pub const MODERATOR_PASSWORD_ENV: &str = "FREIGHTDESK_SEED_MODERATOR_PASSWORD";

pub fn run(moderator_password: Option<String>) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let password = match resolve_password(moderator_password) {
        Ok(password) => password,
        Err(message) => return CommandResult::failure("seed", "config_validation", message, 2),
    };
    // Hashed once up front; an existing moderator keeps its stored hash.
    let password_hash = match hash_password(&password) {
        Ok(hash) => hash,
        Err(error) => {
            return CommandResult::failure("seed", "password_hash", error.to_string(), 3);
        }
    };

    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;

        let run_result = async {
            let seed_result = DemoSeedDataset::load(&pool, &password_hash)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = DemoSeedDataset::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

            if verification.all_present {
                Ok(seed_result)
            } else {
                Err(("seed_verification", failed_checks_message(&verification.checks), 6u8))
            }
        }
        .await;

        pool.close().await;
        run_result
    });

    match result {
        Ok(seed_result) => CommandResult::success("seed", render_summary(&seed_result)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn resolve_password(flag: Option<String>) -> Result<String, String> {
    let password = flag
        .or_else(|| env::var(MODERATOR_PASSWORD_ENV).ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            format!("moderator password is required (pass --moderator-password or set {MODERATOR_PASSWORD_ENV})")
        })?;

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("moderator password must be at least {MIN_PASSWORD_LEN} characters"));
    }
    Ok(password)
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn render_summary(seed_result: &SeedResult) -> String {
    let services = seed_result
        .services
        .iter()
        .map(|name| format!("  - {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    let moderator = if seed_result.moderator_created { "created" } else { "already present" };
    format!(
        "demo catalog loaded with {} transport services:\n{services}\nmoderator `{}`: {moderator}",
        seed_result.services.len(),
        seed_result.moderator_login,
    )
}
