use core::time::Duration;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use refcode::{RetryPolicy, Schema, SeedBridge};

/// Runtime configuration for the `refcode-backfill` binary.
///
/// Every flag falls back to an environment variable, which may come from a
/// `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "refcode-backfill",
    version,
    about = "Assigns a unique referral code to every user across two MySQL stores"
)]
pub struct CliArgs {
    /// Connection URL of the primary store (users and bridge references).
    ///
    /// Environment variable: `PRIMARY_DATABASE_URL`
    #[arg(long, env = "PRIMARY_DATABASE_URL", hide_env_values = true)]
    pub primary_url: String,

    /// Connection URL of the secondary store (user info with referral codes).
    ///
    /// Environment variable: `SECONDARY_DATABASE_URL`
    #[arg(long, env = "SECONDARY_DATABASE_URL", hide_env_values = true)]
    pub secondary_url: String,

    /// Connections kept open to the primary store.
    ///
    /// Environment variable: `PRIMARY_POOL_SIZE`
    #[arg(long, env = "PRIMARY_POOL_SIZE", default_value_t = 10)]
    pub primary_pool_size: usize,

    /// Connections kept open to the secondary store.
    ///
    /// Environment variable: `SECONDARY_POOL_SIZE`
    #[arg(long, env = "SECONDARY_POOL_SIZE", default_value_t = 10)]
    pub secondary_pool_size: usize,

    /// Concurrent assignment workers. Store load is bounded by the smaller of
    /// this and the pool sizes.
    ///
    /// Environment variable: `WORKERS`
    #[arg(long, env = "WORKERS", default_value_t = 20)]
    pub workers: usize,

    /// Attempts per entity on transient connection failures, including the
    /// first.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// Wait between attempts, in milliseconds.
    ///
    /// Environment variable: `RETRY_DELAY_MS`
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 3000)]
    pub retry_delay_ms: u64,

    /// Straggler rounds after the initial round.
    ///
    /// Environment variable: `MAX_ROUNDS`
    #[arg(long, env = "MAX_ROUNDS", default_value_t = 3)]
    pub max_rounds: u32,

    /// Consecutive collisions tolerated per entity before giving up. Unset
    /// means unbounded.
    ///
    /// Environment variable: `COLLISION_LIMIT`
    #[arg(long, env = "COLLISION_LIMIT")]
    pub collision_limit: Option<u32>,

    /// Secondary key used in the initial round.
    ///
    /// Environment variable: `SEED_BRIDGE`
    #[arg(long, env = "SEED_BRIDGE", value_enum, default_value_t = SeedBridgeArg::PrimaryId)]
    pub seed_bridge: SeedBridgeArg,

    #[arg(long, env = "PRIMARY_TABLE", default_value_t = String::from("user"))]
    pub primary_table: String,

    #[arg(long, env = "PRIMARY_ID_COLUMN", default_value_t = String::from("id"))]
    pub primary_id_column: String,

    #[arg(long, env = "PRIMARY_CODE_COLUMN", default_value_t = String::from("user_code"))]
    pub primary_code_column: String,

    #[arg(long, env = "BRIDGE_TABLE", default_value_t = String::from("user_bridge"))]
    pub bridge_table: String,

    /// Bridge id column; its value is the secondary key.
    #[arg(long, env = "BRIDGE_ID_COLUMN", default_value_t = String::from("id"))]
    pub bridge_id_column: String,

    /// Bridge column referencing the primary id.
    #[arg(long, env = "BRIDGE_PRIMARY_COLUMN", default_value_t = String::from("user_id"))]
    pub bridge_primary_column: String,

    #[arg(long, env = "SECONDARY_TABLE", default_value_t = String::from("user_info"))]
    pub secondary_table: String,

    #[arg(long, env = "SECONDARY_KEY_COLUMN", default_value_t = String::from("user_id"))]
    pub secondary_key_column: String,

    #[arg(long, env = "SECONDARY_CODE_COLUMN", default_value_t = String::from("referral_code"))]
    pub secondary_code_column: String,

    /// Print the final summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedBridgeArg {
    /// Assume the secondary key equals the primary id.
    PrimaryId,
    /// Use the bridge id from the bridge table.
    Resolved,
}

impl From<SeedBridgeArg> for SeedBridge {
    fn from(arg: SeedBridgeArg) -> Self {
        match arg {
            SeedBridgeArg::PrimaryId => Self::PrimaryId,
            SeedBridgeArg::Resolved => Self::Resolved,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub primary_url: String,
    pub secondary_url: String,
    pub primary_pool_size: usize,
    pub secondary_pool_size: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub max_rounds: u32,
    pub collision_limit: Option<u32>,
    pub seed_bridge: SeedBridge,
    pub schema: Schema,
    pub json: bool,
}

impl TryFrom<CliArgs> for BackfillConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.primary_url.trim().is_empty() {
            bail!("PRIMARY_DATABASE_URL must not be empty");
        }
        if args.secondary_url.trim().is_empty() {
            bail!("SECONDARY_DATABASE_URL must not be empty");
        }
        if args.primary_pool_size == 0 {
            bail!("PRIMARY_POOL_SIZE must be greater than 0");
        }
        if args.secondary_pool_size == 0 {
            bail!("SECONDARY_POOL_SIZE must be greater than 0");
        }
        if args.workers == 0 {
            bail!("WORKERS must be greater than 0");
        }
        if args.max_attempts == 0 {
            bail!("MAX_ATTEMPTS must be greater than 0");
        }
        if args.collision_limit == Some(0) {
            bail!("COLLISION_LIMIT must be greater than 0 when set");
        }

        let retry = RetryPolicy::new(
            args.max_attempts,
            Duration::from_millis(args.retry_delay_ms),
        )?;
        let schema = Schema::from_names(
            &args.primary_table,
            &args.primary_id_column,
            &args.primary_code_column,
            &args.bridge_table,
            &args.bridge_id_column,
            &args.bridge_primary_column,
            &args.secondary_table,
            &args.secondary_key_column,
            &args.secondary_code_column,
        )?;

        Ok(Self {
            primary_url: args.primary_url,
            secondary_url: args.secondary_url,
            primary_pool_size: args.primary_pool_size,
            secondary_pool_size: args.secondary_pool_size,
            workers: args.workers,
            retry,
            max_rounds: args.max_rounds,
            collision_limit: args.collision_limit,
            seed_bridge: args.seed_bridge.into(),
            schema,
            json: args.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLS: [&str; 5] = [
        "refcode-backfill",
        "--primary-url",
        "mysql://root@localhost/users",
        "--secondary-url",
        "mysql://root@localhost/info",
    ];

    fn parse(extra: &[&str]) -> anyhow::Result<BackfillConfig> {
        let args = CliArgs::try_parse_from(URLS.iter().chain(extra))?;
        BackfillConfig::try_from(args)
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.primary_pool_size, 10);
        assert_eq!(config.secondary_pool_size, 10);
        assert_eq!(config.workers, 20);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.collision_limit, None);
        assert_eq!(config.seed_bridge, SeedBridge::PrimaryId);
        assert_eq!(config.schema, Schema::users());
        assert!(!config.json);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--workers",
            "4",
            "--retry-delay-ms",
            "250",
            "--seed-bridge",
            "resolved",
            "--collision-limit",
            "50",
            "--secondary-table",
            "crm.user_info",
            "--json",
        ])
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert_eq!(config.seed_bridge, SeedBridge::Resolved);
        assert_eq!(config.collision_limit, Some(50));
        assert_eq!(config.schema.secondary.table.as_str(), "crm.user_info");
        assert!(config.json);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for flag in [
            "--workers",
            "--primary-pool-size",
            "--secondary-pool-size",
            "--max-attempts",
        ] {
            let err = parse(&[flag, "0"]).unwrap_err();
            assert!(err.to_string().contains("must be greater than 0"), "{flag}: {err}");
        }
    }

    #[test]
    fn zero_collision_limit_is_rejected() {
        assert!(parse(&["--collision-limit", "0"]).is_err());
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        let err = parse(&["--primary-table", "user; DROP TABLE user"]).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"), "{err}");
    }
}
