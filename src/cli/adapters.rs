use anyhow::Result;
use autobot_cli::app_context::AppContext;

use super::output::OutputFormat;

pub fn cmd_adapters(context: &AppContext, output: OutputFormat) -> Result<()> {
    let catalog = context.catalog();
    output.emit(&catalog, || {
        for (adapter, actions) in &catalog {
            println!("{adapter}");
            for spec in actions {
                let required = if spec.required.is_empty() {
                    String::new()
                } else {
                    format!(" (requires: {})", spec.required.join(", "))
                };
                println!(
                    "  {:<32} {:<14} {}{}",
                    spec.name, spec.sensitivity, spec.description, required
                );
            }
        }
    })
}
