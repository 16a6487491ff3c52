//! Pipeline configuration loading.
//!
//! The harness only reads `deliverables` and may override `max_duration`
//! and the `render` block. Every other field is carried through untouched
//! so the derived fast configuration stays usable by the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{HarnessError, Result};

/// Deliverable used when a configuration does not name any.
pub const DEFAULT_DELIVERABLE: &str = "9:16";

/// Typed view over a pipeline configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Ordered aspect-ratio deliverables (`"W:H"`). Never empty after loading.
    #[serde(default)]
    pub deliverables: Vec<String>,

    /// Upper bound on reel duration in seconds. Carried as-is; the
    /// pipeline accepts numbers and numeric strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<Value>,

    /// Encoder settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderSettings>,

    /// Fields the harness preserves without interpreting.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `render` block of a pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderSettings {
    /// Encoder speed/quality tier (e.g. `ultrafast`, `medium`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Value>,

    /// Constant rate factor. Fractional values are valid for x264.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineConfig {
    /// Load and normalize a configuration document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarnessError::ConfigNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw, path)
    }

    /// Parse and normalize a configuration document.
    ///
    /// `origin` is only used for error reporting.
    pub fn from_json(raw: &str, origin: &Path) -> Result<Self> {
        let parse_error = |message: String| HarnessError::ConfigParse {
            path: origin.to_path_buf(),
            message,
        };

        // Editors on Windows like to save JSON with a BOM.
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let mut config: PipelineConfig =
            serde_json::from_str(raw).map_err(|e| parse_error(e.to_string()))?;

        if config.deliverables.is_empty() {
            config.deliverables = vec![DEFAULT_DELIVERABLE.to_string()];
        }
        for ratio in &config.deliverables {
            if !is_aspect_ratio(ratio) {
                return Err(parse_error(format!(
                    "deliverable {ratio:?} is not of the form W:H"
                )));
            }
        }

        Ok(config)
    }

    /// The deliverable whose rendering the harness compares.
    pub fn primary_deliverable(&self) -> &str {
        self.deliverables
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_DELIVERABLE)
    }

    /// Serialize as pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

/// File-name suffix for a deliverable ratio: `"9:16"` becomes `"9x16"`.
pub fn ratio_suffix(ratio: &str) -> String {
    ratio.replace(':', "x")
}

fn is_aspect_ratio(value: &str) -> bool {
    let Some((w, h)) = value.split_once(':') else {
        return false;
    };
    let positive = |s: &str| s.parse::<u32>().map(|n| n > 0).unwrap_or(false);
    positive(w) && positive(h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn parse(raw: &str) -> Result<PipelineConfig> {
        PipelineConfig::from_json(raw, Path::new("test.json"))
    }

    #[test]
    fn test_missing_deliverables_defaults() {
        let config = parse(r#"{"seed": 7}"#).unwrap();
        assert_eq!(config.deliverables, vec!["9:16".to_string()]);
    }

    #[test]
    fn test_empty_deliverables_defaults() {
        let config = parse(r#"{"deliverables": []}"#).unwrap();
        assert_eq!(config.deliverables, vec!["9:16".to_string()]);
    }

    #[test]
    fn test_deliverables_order_preserved() {
        let config = parse(r#"{"deliverables": ["16:9", "1:1", "9:16"]}"#).unwrap();
        assert_eq!(config.deliverables, vec!["16:9", "1:1", "9:16"]);
        assert_eq!(config.primary_deliverable(), "16:9");
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let config = parse(
            r#"{"project": "Event_Recap", "weights": {"motion": 0.3},
                "render": {"preset": "medium", "crf": 18, "tune": "film"}}"#,
        )
        .unwrap();
        assert_eq!(config.extra["project"], json!("Event_Recap"));
        assert_eq!(config.extra["weights"], json!({"motion": 0.3}));

        let render = config.render.unwrap();
        assert_eq!(render.preset, Some(json!("medium")));
        assert_eq!(render.crf, Some(json!(18)));
        assert_eq!(render.extra["tune"], json!("film"));
    }

    #[test]
    fn test_bom_is_tolerated() {
        let config = parse("\u{feff}{\"deliverables\": [\"1:1\"]}").unwrap();
        assert_eq!(config.deliverables, vec!["1:1"]);
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = parse("{ not json").unwrap_err();
        assert!(matches!(err, HarnessError::ConfigParse { .. }));
    }

    #[test]
    fn test_non_object_document_is_parse_error() {
        let err = parse(r#"["9:16"]"#).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigParse { .. }));
    }

    #[test]
    fn test_bad_ratio_is_parse_error() {
        for bad in ["vertical", "9:", "0:16", "9x16"] {
            let raw = format!(r#"{{"deliverables": ["{bad}"]}}"#);
            let err = parse(&raw).unwrap_err();
            assert!(
                matches!(err, HarnessError::ConfigParse { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_missing_path() {
        let dir = tempdir().unwrap();
        let err = PipelineConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"deliverables": ["1:1"], "max_duration": 45.0}"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.deliverables, vec!["1:1"]);
        assert_eq!(config.max_duration, Some(json!(45.0)));
    }

    #[test]
    fn test_fractional_crf_is_carried_through() {
        let config = parse(r#"{"render": {"crf": 23.5}}"#).unwrap();
        assert_eq!(config.render.unwrap().crf, Some(json!(23.5)));
    }

    #[test]
    fn test_string_max_duration_is_carried_through() {
        let config = parse(r#"{"max_duration": "60"}"#).unwrap();
        assert_eq!(config.max_duration, Some(json!("60")));

        let round_trip: serde_json::Value =
            serde_json::from_str(&config.to_json_pretty().unwrap()).unwrap();
        assert_eq!(round_trip["max_duration"], json!("60"));
    }

    #[test]
    fn test_ratio_suffix() {
        assert_eq!(ratio_suffix("9:16"), "9x16");
        assert_eq!(ratio_suffix("16:9"), "16x9");
        assert_eq!(ratio_suffix("1:1"), "1x1");
    }
}
