use anyhow::Result;
use console::style;

pub fn execute() -> Result<()> {
    println!(
        "{} - version {}",
        style("modelgate").bold().green(),
        style(env!("CARGO_PKG_VERSION")).bold()
    );
    Ok(())
}
