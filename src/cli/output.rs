//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, SegmergeArgs};
use crate::error::Result;
use crate::merge::{MergeStats, MergeTaskMeta, OutputSegmentMergeInfo};
use crate::segment::SegmentId;
use crate::truncate::TruncateFailure;

/// Summary of one plan's merge meta.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetaReport {
    pub plan_index: usize,
    pub completed_at: String,
    pub source_segments: Vec<SegmentId>,
    pub source_doc_count: u64,
    pub targets: Vec<OutputSegmentMergeInfo>,
    pub merged_doc_count: u64,
    pub reclaim_ratio: f64,
    pub stats: MergeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<MergeTaskMeta>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_failures: Option<Vec<TruncateFailure>>,
}

/// Where an old document ended up.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub segment_index: usize,
    pub old_doc_id: u32,
    pub reclaimed: bool,
    pub new_doc_id: Option<u32>,
    pub target_segment_index: Option<usize>,
    pub target_segment_id: Option<SegmentId>,
}

/// Completion state of a plan.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub plan_index: usize,
    pub completed: bool,
    /// A meta exists but was written for a different plan.
    pub plan_mismatch: bool,
    pub completed_tasks: Vec<String>,
}

/// Output a result in the selected format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SegmergeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

fn output_human<T: Serialize>(message: &str, result: &T, args: &SegmergeArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                println!("{key}: {}", format_value(&val));
            }
        }
        other => println!("{}", format_value(&other)),
    }
    Ok(())
}

fn output_json<T: Serialize>(result: &T, args: &SegmergeArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Render a JSON value on one line for human output.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.4}"),
            _ => n.to_string(),
        },
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!(null)), "-");
        assert_eq!(format_value(&json!("x")), "x");
        assert_eq!(format_value(&json!(3)), "3");
        assert_eq!(format_value(&json!(0.25)), "0.2500");
        assert_eq!(format_value(&json!([1, "a"])), "[1, a]");
    }
}
