//! Config subcommand handlers.

use std::net::IpAddr;

use dialoguer::{Input, Select};
use owo_colors::OwoColorize;

use fanlink_config::{Config, Profile};
use fanlink_core::config::{BROADCAST_SENTINEL, is_valid_broadcast_ip};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::{CliError, prompt_err};
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

fn tick(color: bool) -> String {
    if color {
        "✓".green().to_string()
    } else {
        "✓".into()
    }
}

/// Copy of `cfg` with every plaintext passcode masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.passcode.is_some() {
            profile.passcode = Some(REDACTED.into());
        }
    }
    cfg
}

fn validate_passcode(passcode: &str) -> Result<(), CliError> {
    if passcode.is_empty() || passcode.contains('|') {
        return Err(CliError::Validation {
            field: "passcode".into(),
            reason: "must be non-empty and must not contain '|'".into(),
        });
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&fanlink_config::load_config()?);
            let out = output::render_single(
                global.output_format(),
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("<unrenderable: {e}>")),
                |c| c.profiles.keys().cloned().collect::<Vec<_>>().join("\n"),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", fanlink_config::config_path().display());
            Ok(())
        }

        // ── SetPasscode ─────────────────────────────────────────────
        ConfigCommand::SetPasscode => {
            let cfg = fanlink_config::load_config_or_default();
            let profile_name = global
                .profile
                .clone()
                .or(cfg.default_profile)
                .unwrap_or_else(|| "default".into());

            let secret = rpassword::prompt_password("Passcode: ").map_err(prompt_err)?;
            validate_passcode(&secret)?;
            fanlink_config::store_passcode(&profile_name, &secret)?;

            eprintln!(
                "{} Passcode stored in system keyring for profile '{profile_name}'",
                tick(output::should_color(global.color_mode()))
            );
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color_mode());
    let config_path = fanlink_config::config_path();
    eprintln!("fanlink configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    // 1. Profile name
    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    // 2. Network
    let bind_ip: String = Input::new()
        .with_prompt("Local bind address")
        .default("0.0.0.0".into())
        .validate_with(|v: &String| {
            v.parse::<IpAddr>()
                .map(|_| ())
                .map_err(|_| "not an IP address")
        })
        .interact_text()
        .map_err(prompt_err)?;

    let broadcast_ip: String = Input::new()
        .with_prompt("Beacon destination")
        .default(BROADCAST_SENTINEL.into())
        .validate_with(|v: &String| {
            if is_valid_broadcast_ip(v) {
                Ok(())
            } else {
                Err("expected <broadcast> or a dotted quad")
            }
        })
        .interact_text()
        .map_err(prompt_err)?;

    // 3. Fan array
    let max_fans: usize = Input::new()
        .with_prompt("Fans per device (maximum)")
        .default(Profile::default().max_fans)
        .interact_text()
        .map_err(prompt_err)?;

    let mut profile = Profile {
        bind_ip,
        broadcast_ip,
        max_fans,
        ..Profile::default()
    };

    // 4. Passcode
    let passcode = rpassword::prompt_password("Passcode (empty keeps the factory default): ")
        .map_err(prompt_err)?;
    if !passcode.is_empty() {
        validate_passcode(&passcode)?;
        let store_choices = &[
            "Store in system keyring (recommended)",
            "Save to config file (plaintext)",
        ];
        let store_selection = Select::new()
            .with_prompt("Where to store the passcode?")
            .items(store_choices)
            .default(0)
            .interact()
            .map_err(prompt_err)?;

        if store_selection == 0 {
            fanlink_config::store_passcode(&profile_name, &passcode)?;
            eprintln!("   {} Passcode stored in system keyring", tick(color));
        } else {
            profile.passcode = Some(passcode);
        }
    }

    // 5. Merge into the existing file
    let mut cfg = fanlink_config::load_config().unwrap_or_default();
    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    let path = fanlink_config::save_config(&cfg)?;

    eprintln!(
        "\n{} Configuration written to {}",
        tick(color),
        path.display()
    );
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Start it: fanlink run");
    Ok(())
}
