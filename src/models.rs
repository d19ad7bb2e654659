use std::fmt;

use actix_web::web::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the binary classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Cancer")]
    Cancer,
    #[serde(rename = "Non-cancer")]
    NonCancer,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Cancer => "Cancer",
            Label::NonCancer => "Non-cancer",
        }
    }

    /// Advice shown to the user for this label.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Label::Cancer => "Segera periksa ke dokter!",
            Label::NonCancer => "Penyakit kanker tidak terdeteksi.",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored prediction. `suggestion` is always derived from `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    pub id: Uuid,
    pub result: Label,
    pub suggestion: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Creates a record with a fresh id and the current time, truncated to
    /// the millisecond precision it is serialized with.
    pub fn new(result: Label) -> Self {
        PredictionRecord {
            id: Uuid::new_v4(),
            result,
            suggestion: result.suggestion().to_owned(),
            created_at: Utc::now().trunc_subsecs(3),
        }
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A file taken from the multipart body. Lives for one request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub data: Bytes,
    pub filename: Option<String>,
}

impl UploadedImage {
    pub fn new(data: impl Into<Bytes>, filename: Option<String>) -> Self {
        UploadedImage {
            data: data.into(),
            filename,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Lowercased extension of the declared filename.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.as_deref()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub status: String,
    pub message: String,
    pub data: PredictionRecord,
}

impl PredictionResponse {
    pub fn success(data: PredictionRecord) -> Self {
        PredictionResponse {
            status: "success".to_owned(),
            message: "Model is predicted successfully".to_owned(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailResponse {
    pub status: String,
    pub message: String,
}

impl FailResponse {
    pub fn new(message: impl Into<String>) -> Self {
        FailResponse {
            status: "fail".to_owned(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn suggestion_follows_label() {
        let cancer = PredictionRecord::new(Label::Cancer);
        assert_eq!(cancer.suggestion, "Segera periksa ke dokter!");

        let clear = PredictionRecord::new(Label::NonCancer);
        assert_eq!(clear.suggestion, "Penyakit kanker tidak terdeteksi.");
        assert_ne!(cancer.id, clear.id);
    }

    #[test]
    fn record_serializes_with_camel_case_and_labels() {
        let record = PredictionRecord {
            id: Uuid::nil(),
            result: Label::NonCancer,
            suggestion: Label::NonCancer.suggestion().to_owned(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["result"], "Non-cancer");
        assert_eq!(json["createdAt"], "2024-05-01T08:30:00.000Z");

        let back: PredictionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn extension_is_lowercased() {
        let upload = UploadedImage::new(vec![1u8], Some("Scan.PNG".into()));
        assert_eq!(upload.extension().as_deref(), Some("png"));
    }

    #[test]
    fn extension_requires_a_stem_and_a_suffix() {
        assert_eq!(UploadedImage::new(vec![1u8], Some(".png".into())).extension(), None);
        assert_eq!(UploadedImage::new(vec![1u8], Some("scan.".into())).extension(), None);
        assert_eq!(UploadedImage::new(vec![1u8], Some("scan".into())).extension(), None);
        assert_eq!(UploadedImage::new(vec![1u8], None).extension(), None);
    }
}
