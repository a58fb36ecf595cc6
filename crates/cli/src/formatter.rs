use colored::*;
use serde_json::Value;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Json,
    Compact,
    Pretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "never" => Self::Never,
            _ => Self::Auto,
        }
    }

    pub fn should_colorize(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => supports_color::on(supports_color::Stream::Stdout).is_some(),
        }
    }
}

/// Format a single field value for display
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(arr) => {
            if arr.is_empty() {
                "[]".to_string()
            } else if arr.len() <= 3 {
                format!(
                    "[{}]",
                    arr.iter().map(format_value).collect::<Vec<_>>().join(", ")
                )
            } else {
                format!("[{} items]", arr.len())
            }
        }
        Value::Object(_) => "{...}".to_string(),
    }
}

/// Lines for one record. OData annotations (`@odata.etag`, ...) are hidden.
pub fn format_record(index: Option<usize>, record: &Value, colorize: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(index) = index {
        let header = format!("#{}", index + 1);
        lines.push(if colorize {
            header.bold().to_string()
        } else {
            header
        });
    }

    match record {
        Value::Object(fields) => {
            for (field, value) in fields.iter().filter(|(k, _)| !k.contains('@')) {
                let value_str = format_value(value);
                if colorize {
                    lines.push(format!("  {}: {}", field.bright_yellow(), value_str));
                } else {
                    lines.push(format!("  {}: {}", field, value_str));
                }
            }
        }
        other => lines.push(format!("  {}", format_value(other))),
    }
    lines
}

/// Render a query result.
pub fn render(value: &Value, format: OutputFormat, colorize: bool) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
        OutputFormat::Compact => value.to_string(),
        OutputFormat::Pretty => match value {
            Value::Array(items) if items.is_empty() => {
                if colorize {
                    "(no results)".bright_black().to_string()
                } else {
                    "(no results)".to_string()
                }
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .flat_map(|(i, item)| format_record(Some(i), item, colorize))
                .collect::<Vec<_>>()
                .join("\n"),
            // raw `$value` bodies print as-is
            Value::String(text) => text.clone(),
            other => format_record(None, other, colorize).join("\n"),
        },
    }
}
