use rc_harness::tools::ToolId;

/// Run the `tools` subcommand: print every evidence tool with its schema.
pub fn run() {
    print!("{}", render());
}

fn render() -> String {
    let mut out = String::new();
    for id in ToolId::ALL {
        let definition = id.definition();
        let schema = serde_json::to_string_pretty(&definition.input_schema)
            .unwrap_or_else(|_| definition.input_schema.to_string());
        out.push_str(&format!("{} ({})\n", definition.name, definition.title));
        out.push_str(&format!("  {}\n", definition.description));
        for line in schema.lines() {
            out.push_str(&format!("    {line}\n"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_tool_with_schema() {
        let text = render();
        assert!(text.contains("cloudwatch_logs"));
        assert!(text.contains("cloudwatch_metrics"));
        assert!(text.contains("cloudtrail_lookup"));
        assert!(text.contains("\"log_group_name\""));
        assert!(text.contains("\"minutes_ago\""));
    }
}
