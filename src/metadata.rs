use crate::MscopeError;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metaData.json";
pub const TIMESTAMPS_FILE: &str = "timeStamps.csv";

/// Value for `key` in a nested mapping. A key at the current level wins;
/// otherwise nested mappings are searched in order and the first non-null match returned.
pub fn recursive_search<'a>(key: &str, tree: &'a Value) -> Option<&'a Value> {
    let map = tree.as_object()?;
    if let Some(v) = map.get(key) {
        return Some(v);
    }
    map.values()
        .filter(|v| v.is_object())
        .find_map(|v| recursive_search(key, v).filter(|found| !found.is_null()))
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

pub fn read_metadata(dir: &Path) -> Result<Value, MscopeError> {
    let path = metadata_path(dir);
    if !path.is_file() {
        return Err(MscopeError::NotFound(format!("{}", path.display())));
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn device_type(metadata: &Value, path: &Path) -> Result<String, MscopeError> {
    match recursive_search("deviceType", metadata) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(other) if !other.is_null() => Ok(other.to_string()),
        _ => Err(MscopeError::NotFound(format!(
            "`deviceType` in Miniscope-DAQ json: {}",
            path.display()
        ))),
    }
}

/// `recordingStartTime` block written by Miniscope-DAQ-V4, if complete.
pub fn recording_start_time(metadata: &Value) -> Option<NaiveDateTime> {
    let start = recursive_search("recordingStartTime", metadata)?;
    let field = |name: &str| start.get(name).and_then(as_i64);
    let date = NaiveDate::from_ymd_opt(
        field("year")? as i32,
        field("month")? as u32,
        field("day")? as u32,
    )?;
    date.and_hms_milli_opt(
        field("hour")? as u32,
        field("minute")? as u32,
        field("second")? as u32,
        field("msec").unwrap_or(0) as u32,
    )
}

/// Frame rate as `30`, `30.0` or `"30FPS"`.
pub fn frame_rate(metadata: &Value) -> Option<f64> {
    let v = recursive_search("frameRate", metadata)?;
    match v {
        Value::String(s) => s.trim().trim_end_matches("FPS").trim().parse().ok(),
        other => other.as_f64(),
    }
}

/// Gain as a number, `"2x"`, or the V4 names Low/Medium/High.
pub fn gain(metadata: &Value) -> Option<f64> {
    let v = recursive_search("gain", metadata)?;
    match v {
        Value::String(s) => match s.trim() {
            "Low" => Some(1.0),
            "Medium" => Some(2.0),
            "High" => Some(3.5),
            other => other.trim_end_matches('x').parse().ok(),
        },
        other => other.as_f64(),
    }
}

pub fn led_power(metadata: &Value) -> Option<f64> {
    recursive_search("led0", metadata).and_then(as_f64)
}

/// ROI (height, width) in pixels.
pub fn roi(metadata: &Value) -> Option<(i64, i64)> {
    let roi = recursive_search("ROI", metadata)?;
    Some((roi.get("height").and_then(as_i64)?, roi.get("width").and_then(as_i64)?))
}

/// (nframes, duration in seconds) from `timeStamps.csv`, if present.
/// Duration is the last `Time Stamp (ms)` value over 1000.
pub fn read_timestamps(dir: &Path) -> Result<Option<(i64, f64)>, MscopeError> {
    let path = dir.join(TIMESTAMPS_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&path)?;
    let idx = reader
        .headers()?
        .iter()
        .position(|h| h.starts_with("Time Stamp"))
        .ok_or_else(|| MscopeError::Parse(format!("{}: no `Time Stamp (ms)` column", path.display())))?;

    let mut nframes = 0i64;
    let mut last_ms = 0.0f64;
    for record in reader.records() {
        let record = record?;
        let raw = record.get(idx).unwrap_or("");
        last_ms = raw
            .parse()
            .map_err(|_| MscopeError::Parse(format!("{}: invalid time stamp: {raw}", path.display())))?;
        nframes += 1;
    }
    if nframes == 0 {
        return Ok(None);
    }
    Ok(Some((nframes, last_ms / 1000.0)))
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64().or_else(|| other.as_f64().map(|f| f as i64)),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_key_wins_over_nested() {
        let tree = json!({"a": {"deviceType": "nested"}, "deviceType": "top"});
        assert_eq!(recursive_search("deviceType", &tree), Some(&json!("top")));
    }

    #[test]
    fn first_nested_match_is_returned() {
        let tree = json!({
            "first": {"inner": {"deviceType": "deep"}},
            "second": {"deviceType": "shallow"}
        });
        // Mappings are searched in order: the first subtree wins even when deeper.
        assert_eq!(recursive_search("deviceType", &tree), Some(&json!("deep")));
    }

    #[test]
    fn nested_null_does_not_stop_the_search() {
        let tree = json!({
            "camera": {"deviceType": null},
            "scope": {"deviceType": "Miniscope_V4_BNO"}
        });
        assert_eq!(recursive_search("deviceType", &tree), Some(&json!("Miniscope_V4_BNO")));
        assert_eq!(device_type(&tree, Path::new("m")).unwrap(), "Miniscope_V4_BNO");

        let only_null = json!({"camera": {"deviceType": null}});
        assert_eq!(recursive_search("deviceType", &only_null), None);
        // A null at the current level is still that level's value.
        assert_eq!(recursive_search("deviceType", &json!({"deviceType": null})), Some(&Value::Null));
    }

    #[test]
    fn missing_key_and_non_mapping() {
        let tree = json!({"a": [{"deviceType": "in list"}], "b": 1});
        assert_eq!(recursive_search("deviceType", &tree), None);
        assert_eq!(recursive_search("x", &json!(5)), None);
    }

    #[test]
    fn device_type_missing_is_not_found() {
        let err = device_type(&json!({"other": 1}), Path::new("metaData.json"));
        assert!(matches!(err, Err(MscopeError::NotFound(_))));
        assert_eq!(
            device_type(&json!({"deviceType": "Miniscope_V4_BNO"}), Path::new("m")).unwrap(),
            "Miniscope_V4_BNO"
        );
    }

    #[test]
    fn v4_fields() {
        let meta = json!({
            "deviceType": "Miniscope_V4_BNO",
            "frameRate": "30FPS",
            "gain": "Medium",
            "led0": 12,
            "ROI": {"height": 608, "width": 608, "leftEdge": 0, "topEdge": 0},
            "recordingStartTime": {
                "year": 2021, "month": 8, "day": 25,
                "hour": 23, "minute": 45, "second": 44, "msec": 120
            }
        });
        assert_eq!(frame_rate(&meta), Some(30.0));
        assert_eq!(gain(&meta), Some(2.0));
        assert_eq!(led_power(&meta), Some(12.0));
        assert_eq!(roi(&meta), Some((608, 608)));
        let start = recording_start_time(&meta).unwrap();
        assert_eq!(start.format("%Y-%m-%d %H:%M:%S").to_string(), "2021-08-25 23:45:44");
    }

    #[test]
    fn timestamps_give_frames_and_duration() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(read_timestamps(dir.path()).unwrap(), None);
        std::fs::write(
            dir.path().join(TIMESTAMPS_FILE),
            "Frame Number,Time Stamp (ms),Buffer Index\n0,0,0\n1,33,0\n2,67,1\n",
        )
        .unwrap();
        let (frames, duration) = read_timestamps(dir.path()).unwrap().unwrap();
        assert_eq!(frames, 3);
        assert!((duration - 0.067).abs() < 1e-9);
    }

    #[test]
    fn gain_with_suffix_and_numeric_rate() {
        let meta = json!({"gain": "2x", "frameRate": 20});
        assert_eq!(gain(&meta), Some(2.0));
        assert_eq!(frame_rate(&meta), Some(20.0));
    }
}
