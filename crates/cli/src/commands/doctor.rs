use freightdesk_core::config::{AppConfig, LoadOptions, MIN_JWT_SECRET_LEN};
use freightdesk_db::{connect_with_settings, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_signing_secret(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["signing_secret_readiness", "database_connectivity", "schema_version"] {
                checks.push(skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn check_signing_secret(config: &AppConfig) -> DoctorCheck {
    let length = config.auth.jwt_secret.expose_secret().len();
    let status = if length >= MIN_JWT_SECRET_LEN { CheckStatus::Pass } else { CheckStatus::Fail };
    DoctorCheck {
        name: "signing_secret_readiness",
        status,
        details: format!(
            "jwt secret has {length} bytes (minimum {MIN_JWT_SECRET_LEN}); access ttl {}s, refresh ttl {}s",
            config.auth.access_ttl_secs, config.auth.refresh_ttl_secs
        ),
    }
}

/// Connectivity first; the schema check only runs against a reachable database.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("schema_version", "skipped because the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("schema_version", "skipped because the database is unreachable"),
                ];
            }
        };

        let expected = migrations::expected_count();
        let schema = match migrations::applied_count(&pool).await {
            Ok(applied) if applied as usize >= expected => DoctorCheck {
                name: "schema_version",
                status: CheckStatus::Pass,
                details: format!("{applied} of {expected} migrations applied"),
            },
            Ok(applied) => DoctorCheck {
                name: "schema_version",
                status: CheckStatus::Fail,
                details: format!("{applied} of {expected} migrations applied; run `freightdesk migrate`"),
            },
            Err(_) => DoctorCheck {
                name: "schema_version",
                status: CheckStatus::Fail,
                details: "no migrations applied; run `freightdesk migrate`".to_string(),
            },
        };
        pool.close().await;

        vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            schema,
        ]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
