use anyhow::Result;
use console::style;
use modelgate::config::Settings;
use modelgate::router::ProviderRegistry;

pub fn execute(settings: &Settings) -> Result<()> {
    let registry = ProviderRegistry::from_settings(settings)?;

    if registry.is_empty() {
        println!(
            "{}",
            style(
                "No providers are configured. \
                 Add credentials to modelgate.toml or MODELGATE_* variables."
            )
            .yellow()
        );
        return Ok(());
    }

    println!("{}", style("Providers (in routing order)").bold());
    for descriptor in registry.providers() {
        let streaming = match (descriptor.streaming, descriptor.streams_with_tools) {
            (true, true) => "streams",
            (true, false) => "streams without tools",
            (false, _) => "buffered",
        };
        println!("  {} {}", style(descriptor.id).green(), style(streaming).dim());
    }

    println!("\n{}", style("Models").bold());
    for model in registry.available_models() {
        println!("  {}", model);
    }

    if !registry.aliases().is_empty() {
        let mut aliases: Vec<(&str, &str)> = registry.aliases().iter().collect();
        aliases.sort();
        println!("\n{}", style("Aliases").bold());
        for (alias, target) in aliases {
            println!("  {} {} {}", style(alias).cyan(), style("->").dim(), target);
        }
    }

    Ok(())
}
