use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "guildwar-roster", version, about = "Guild war sign-up bot for Discord")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    pub check_config: bool,
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn parses_config_flags() {
        let cli = Cli::parse_from(["guildwar-roster", "--config", "/etc/roster.yaml", "--check-config"]);
        assert_eq!(cli.config.to_str(), Some("/etc/roster.yaml"));
        assert!(cli.check_config);
    }
}
