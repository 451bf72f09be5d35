use modelgate::models::tool::ToolDescriptor;
use modelgate::sandbox::{FnTool, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Tools offered to the model by `modelgate chat`
pub fn builtin_tools() -> ToolRegistry {
    let current_time = FnTool::new(
        ToolDescriptor::new(
            "current_time",
            "Get the current local date and time in RFC 3339 format",
        ),
        |_| Ok(json!({ "now": chrono::Local::now().to_rfc3339() })),
    );

    let count_words = FnTool::new(
        ToolDescriptor::new("count_words", "Count the number of words in text").with_parameter(
            "text",
            "string",
            "The text to count words in",
            true,
        ),
        |args| {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(json!({ "count": text.split_whitespace().count() }))
        },
    );

    ToolRegistry::new()
        .with_tool(Arc::new(current_time))
        .with_tool(Arc::new(count_words))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate::sandbox::{ToolArguments, ToolCallable};

    #[tokio::test]
    async fn test_count_words() {
        let tools = builtin_tools();
        let tool = tools.get("count_words").unwrap();

        let mut args = ToolArguments::new();
        args.insert("text".to_string(), json!("the quick  brown fox"));
        assert_eq!(tool.call(args).await.unwrap(), json!({"count": 4}));
    }

    #[tokio::test]
    async fn test_current_time_is_rfc3339() {
        let tools = builtin_tools();
        let value = tools
            .get("current_time")
            .unwrap()
            .call(ToolArguments::new())
            .await
            .unwrap();

        let now = value["now"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(now).is_ok());
    }
}
