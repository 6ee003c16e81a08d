//! Auger CLI library
//!
//! Configuration, first-run prompt, and the runners behind the `auger`
//! subcommands.

pub mod agent;
pub mod config;
pub mod onboarding;
pub mod relay;

/// Rewrite `auger 3000 ...` into `auger http 3000 ...`
pub fn normalize_args(mut args: Vec<String>) -> Vec<String> {
    let is_port_alias = args
        .get(1)
        .and_then(|first| first.chars().next())
        .is_some_and(|c| c.is_ascii_digit());

    if is_port_alias {
        args.insert(1, "http".to_string());
    }
    args
}
