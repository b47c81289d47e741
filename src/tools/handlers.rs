use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::{DataStore, NewEvent, NewTask, Priority, TaskStatus};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid {field} '{value}': use ISO format (YYYY-MM-DDTHH:MM:SS)")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("end_time {end} precedes start_time {start}")]
    EndBeforeStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("store write failed: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    title: String,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateEventArgs {
    title: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    description: Option<String>,
}

fn parse_args<T: DeserializeOwned>(args: &Map<String, Value>) -> Result<T, ToolError> {
    Ok(serde_json::from_value(Value::Object(args.clone()))?)
}

fn non_empty(field: &'static str, value: String) -> Result<String, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

pub async fn create_task(
    store: &dyn DataStore,
    args: &Map<String, Value>,
) -> Result<String, ToolError> {
    let args: CreateTaskArgs = parse_args(args)?;
    let title = non_empty("title", args.title)?;

    let task = store
        .create_task(NewTask {
            title,
            description: args.description,
            status: TaskStatus::Todo,
            priority: args.priority.unwrap_or_default(),
            tag: args
                .tag
                .filter(|tag| !tag.trim().is_empty())
                .unwrap_or_else(|| "GEN".to_string()),
            deadline: None,
        })
        .await
        .map_err(ToolError::Store)?;

    Ok(format!(
        "Task created successfully: ID {} - {}",
        task.id, task.title
    ))
}

pub async fn create_calendar_event(
    store: &dyn DataStore,
    args: &Map<String, Value>,
) -> Result<String, ToolError> {
    let args: CreateEventArgs = parse_args(args)?;
    let title = non_empty("title", args.title)?;
    let start = parse_iso_timestamp("start_time", &args.start_time)?;
    let end = parse_iso_timestamp("end_time", &args.end_time)?;
    if end < start {
        return Err(ToolError::EndBeforeStart { start, end });
    }

    let event = store
        .create_event(NewEvent {
            title,
            description: args.description,
            start_time: start,
            end_time: end,
            all_day: false,
        })
        .await
        .map_err(ToolError::Store)?;

    Ok(format!(
        "Event scheduled: {} from {} to {}",
        event.title, event.start_time, event.end_time
    ))
}

/// Accepts the ISO-8601 shapes models usually emit; offsets are dropped to local wall time.
pub fn parse_iso_timestamp(field: &'static str, raw: &str) -> Result<NaiveDateTime, ToolError> {
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_local());
    }

    if let Some(parsed) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    {
        return Ok(parsed);
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ToolError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}
