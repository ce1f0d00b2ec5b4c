use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use suite_llm::{ParamType, Tool, ToolError, ToolSpec, optional_i64};

/// Reports the current time, optionally shifted to a fixed UTC offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockTool;

impl ClockTool {
    pub fn new() -> Self {
        Self
    }

    fn render(now: DateTime<Utc>, offset_minutes: Option<i64>) -> Result<serde_json::Value, ToolError> {
        let minutes = offset_minutes.unwrap_or(0);
        let offset = i32::try_from(minutes)
            .ok()
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "utc_offset_minutes must be within -1439..=1439, got {minutes}"
                ))
            })?;
        let local = now.with_timezone(&offset);
        Ok(serde_json::json!({
            "iso8601": local.to_rfc3339_opts(SecondsFormat::Secs, true),
            "unix_seconds": now.timestamp(),
            "utc_offset_minutes": minutes,
        }))
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "current_time".to_string(),
            description: "Returns the current date and time.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "utc_offset_minutes": {
                        "type": ParamType::Integer.as_str(),
                        "description": "Offset from UTC in minutes, e.g. 120 for UTC+2. Defaults to 0."
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let offset = optional_i64(&arguments, "utc_offset_minutes")?;
        Self::render(Utc::now(), offset)
    }
}
