// config.rs - Print the effective operator configuration.

use kpo_exceptions::OperatorConfig;

pub fn execute(config: &OperatorConfig) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if let Err(e) = config.validate() {
        eprintln!("warning: {}", e);
    }
    Ok(())
}
