//! Loads the INI-style configuration file into typed component configs.
//!
//! Mirrors the original's `conf()` helper: every value is read as a string
//! first and optimistically coerced, falling back to a documented default
//! when the key is absent. Unlike the original, coercion targets are the
//! concrete field types the scheduler and cloud driver expect, not a
//! generic float-or-string value.

use std::{fmt, path::Path, str::FromStr};

use anyhow::{Context, Result};
use base64::Engine;
use batch::BatchPluginKind;
use cloud::CloudConfig;
use ini::Ini;
use scheduler::SchedulerConfig;
use tracing::debug;

/// A config value as read from the file: optimistically coerced to a
/// number, falling back to the raw string. Only used for the debug-level
/// trace of what was loaded; typed fields below use the concrete type each
/// component actually wants.
enum ConfigValue<'a> {
    Number(f64),
    Text(&'a str),
}

impl fmt::Display for ConfigValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Number(n) => write!(f, "{n}"),
            ConfigValue::Text(s) => write!(f, "{s}"),
        }
    }
}

pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cloud: CloudConfig,
    pub batch_plugin: BatchPluginKind,
    pub log_level: u8,
}

pub fn load(path: &Path) -> Result<Config> {
    let ini = Ini::load_from_file(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;

    let batch_plugin_name = get_str(&ini, "elastiq", "batch_plugin").unwrap_or("htcondor");
    let batch_plugin = BatchPluginKind::from_str(batch_plugin_name)
        .with_context(|| format!("unknown batch plugin {batch_plugin_name:?}"))?;

    let scheduler = SchedulerConfig {
        sleep_s: get_u64(&ini, "elastiq", "sleep_s", 5),
        check_queue_every_s: get_u64(&ini, "elastiq", "check_queue_every_s", 60),
        check_vms_every_s: get_u64(&ini, "elastiq", "check_vms_every_s", 60),
        estimated_vm_deploy_time_s: get_u64(&ini, "elastiq", "estimated_vm_deploy_time_s", 600),
        waiting_jobs_threshold: get_u64(&ini, "elastiq", "waiting_jobs_threshold", 0),
        waiting_jobs_time_s: get_u64(&ini, "elastiq", "waiting_jobs_time_s", 60),
        n_jobs_per_vm: get_u64(&ini, "elastiq", "n_jobs_per_vm", 1).max(1),
        idle_for_time_s: get_u64(&ini, "elastiq", "idle_for_time_s", 3600),
        min_vms: get_i64(&ini, "quota", "min_vms", 0),
        max_vms: get_i64(&ini, "quota", "max_vms", 0),
        dry_run_boot_vms: get_bool(&ini, "debug", "dry_run_boot_vms", false),
        dry_run_shutdown_vms: get_bool(&ini, "debug", "dry_run_shutdown_vms", false),
    };

    let user_data = match get_str(&ini, "ec2", "user_data_b64") {
        Some(raw) if !raw.is_empty() => base64::engine::general_purpose::STANDARD
            .decode(raw)
            .context("ec2.user_data_b64 is not valid base64")?,
        _ => Vec::new(),
    };

    let cloud = CloudConfig {
        api_url: get_str(&ini, "ec2", "api_url")
            .context("missing required key ec2.api_url")?
            .to_string(),
        api_version: get_str(&ini, "ec2", "api_version").map(str::to_string),
        aws_access_key_id: get_string(&ini, "ec2", "aws_access_key_id", ""),
        aws_secret_access_key: get_string(&ini, "ec2", "aws_secret_access_key", ""),
        image_id: get_str(&ini, "ec2", "image_id")
            .context("missing required key ec2.image_id")?
            .to_string(),
        key_name: get_string(&ini, "ec2", "key_name", ""),
        flavour: get_string(&ini, "ec2", "flavour", ""),
        user_data,
    };

    let log_level = get_u64(&ini, "elastiq", "log_level", 0).min(2) as u8;

    Ok(Config {
        scheduler,
        cloud,
        batch_plugin,
        log_level,
    })
}

fn get_str<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    let value = ini.section(Some(section)).and_then(|props| props.get(key));
    match value {
        Some(raw) => {
            let coerced = raw
                .parse::<f64>()
                .map(ConfigValue::Number)
                .unwrap_or(ConfigValue::Text(raw));
            debug!(section, key, value = %coerced, "read from file");
        }
        None => debug!(section, key, "not set, using default"),
    }
    value
}

fn get_string(ini: &Ini, section: &str, key: &str, default: &str) -> String {
    get_str(ini, section, key).unwrap_or(default).to_string()
}

fn get_f64(ini: &Ini, section: &str, key: &str, default: f64) -> f64 {
    get_str(ini, section, key)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn get_u64(ini: &Ini, section: &str, key: &str, default: u64) -> u64 {
    get_f64(ini, section, key, default as f64).max(0.0) as u64
}

fn get_i64(ini: &Ini, section: &str, key: &str, default: i64) -> i64 {
    get_f64(ini, section, key, default as f64) as i64
}

fn get_bool(ini: &Ini, section: &str, key: &str, default: bool) -> bool {
    match get_str(ini, section, key) {
        Some(raw) => raw
            .parse::<f64>()
            .map(|n| n != 0.0)
            .unwrap_or_else(|_| raw.eq_ignore_ascii_case("true")),
        None => default,
    }
}
