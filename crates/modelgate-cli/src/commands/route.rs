use anyhow::{bail, Result};
use console::style;
use modelgate::config::Settings;
use modelgate::router::ProviderRegistry;

pub fn execute(settings: &Settings, model: &str) -> Result<()> {
    let registry = ProviderRegistry::from_settings(settings)?;

    match registry.resolve(model) {
        Ok(route) => {
            println!(
                "{} {} {} {}",
                style(model).bold(),
                style("->").dim(),
                style(route.provider.descriptor().id).green(),
                style(&route.model).cyan()
            );
            Ok(())
        }
        Err(err) => {
            if let Some(hint) = err.hint() {
                eprintln!("{}", style(hint).dim());
            }
            bail!(err)
        }
    }
}
