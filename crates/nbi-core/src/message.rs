//! Inbound and outbound cross-context messages
//!
//! Raw JSON is parsed exactly once at the boundary. Messages of any other
//! type are expected traffic and parse to [`InboundMessage::Ignored`].

use crate::config::{LOAD_NOTEBOOK_TYPE, READY_MESSAGE_TYPE};
use crate::error::ValidationError;
use crate::types::{RequestId, StoreAddress};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Request to materialise and run a notebook
    LoadNotebook(IngestRequest),
    /// Any other traffic
    Ignored {
        /// The message's `type`, if it had one
        message_type: Option<String>,
    },
}

impl InboundMessage {
    /// Classify and validate a raw message
    ///
    /// # Errors
    /// `ValidationError` only when the message claims to be a load request
    /// but lacks required fields.
    pub fn parse(value: &Value) -> Result<Self, ValidationError> {
        let message_type = value
            .as_object()
            .and_then(|object| object.get("type"))
            .and_then(Value::as_str);

        match message_type {
            Some(LOAD_NOTEBOOK_TYPE) => IngestRequest::parse(value).map(Self::LoadNotebook),
            other => Ok(Self::Ignored {
                message_type: other.map(str::to_string),
            }),
        }
    }
}

/// Kind of auxiliary payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxKind {
    /// `timeSeriesData`
    TimeSeries,
    /// `blob`
    Blob,
}

impl AuxKind {
    /// Message field carrying the payload
    #[must_use]
    pub fn field(self) -> &'static str {
        match self {
            Self::TimeSeries => "timeSeriesData",
            Self::Blob => "blob",
        }
    }

    fn key_field(self) -> &'static str {
        match self {
            Self::TimeSeries => "timeSeriesData.key",
            Self::Blob => "blob.key",
        }
    }

    fn database_field(self) -> &'static str {
        match self {
            Self::TimeSeries => "timeSeriesData.databaseName",
            Self::Blob => "blob.databaseName",
        }
    }

    fn store_field(self) -> &'static str {
        match self {
            Self::TimeSeries => "timeSeriesData.storeName",
            Self::Blob => "blob.storeName",
        }
    }
}

impl fmt::Display for AuxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Auxiliary payload to pre-seed local storage
///
/// Destination resolution is deferred to write time so that a bad payload
/// fails on its own without rejecting the whole message.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxPayload {
    /// Which field it came from
    pub kind: AuxKind,
    /// The payload object, stored as-is
    pub body: Value,
    /// Resolved database name (payload field, else message field)
    pub database_name: Option<String>,
    /// Resolved store name (payload field, else message field)
    pub store_name: Option<String>,
}

impl AuxPayload {
    /// Record key carried by the payload
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.body
            .get("key")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
    }

    /// Where and under which key this payload is written
    ///
    /// # Errors
    /// `ValidationError::MissingField` naming the absent piece.
    pub fn target(&self) -> Result<(StoreAddress, &str), ValidationError> {
        let key = self
            .key()
            .ok_or(ValidationError::MissingField(self.kind.key_field()))?;
        let database = self
            .database_name
            .as_deref()
            .ok_or(ValidationError::MissingField(self.kind.database_field()))?;
        let store = self
            .store_name
            .as_deref()
            .ok_or(ValidationError::MissingField(self.kind.store_field()))?;
        Ok((StoreAddress::new(database, store), key))
    }
}

/// Validated load-notebook request
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    /// Request identifier, assigned at parse time
    pub id: RequestId,
    /// Target file name and path
    pub filename: String,
    /// Notebook cells, unvalidated
    pub cells: Vec<Value>,
    /// Optional time-series payload
    pub time_series: Option<AuxPayload>,
    /// Optional blob payload
    pub blob: Option<AuxPayload>,
    /// Optional bearer token for the host
    pub bearer_token: Option<String>,
}

impl IngestRequest {
    /// Create a request with only the required fields
    #[must_use]
    pub fn new(filename: impl Into<String>, cells: Vec<Value>) -> Self {
        Self {
            id: RequestId::new(),
            filename: filename.into(),
            cells,
            time_series: None,
            blob: None,
            bearer_token: None,
        }
    }

    /// Parse a raw load-notebook message
    ///
    /// # Errors
    /// Fails when the message is not an object, is not a load request, or
    /// lacks `filename` / `notebook`.
    pub fn parse(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        match object.get("type").and_then(Value::as_str) {
            Some(LOAD_NOTEBOOK_TYPE) => {}
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "type",
                    expected: "\"load-notebook\"",
                })
            }
            None => return Err(ValidationError::MissingField("type")),
        }

        let filename = match present(object, "filename") {
            None => return Err(ValidationError::MissingField("filename")),
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "filename",
                    expected: "a non-empty string",
                })
            }
        };

        let cells = match present(object, "notebook") {
            None => return Err(ValidationError::MissingField("notebook")),
            Some(Value::Array(cells)) => cells.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "notebook",
                    expected: "a sequence of cells",
                })
            }
        };

        let bearer_token = match present(object, "bearerToken") {
            None => None,
            Some(Value::String(token)) if token.is_empty() => None,
            Some(Value::String(token)) => Some(token.clone()),
            Some(other) => {
                tracing::warn!(found = %json_kind(other), "ignoring bearerToken that is not a string");
                None
            }
        };

        Ok(Self {
            id: RequestId::new(),
            filename,
            cells,
            time_series: aux_payload(object, AuxKind::TimeSeries),
            blob: aux_payload(object, AuxKind::Blob),
            bearer_token,
        })
    }

    /// Auxiliary payloads in write order
    pub fn aux_payloads(&self) -> impl Iterator<Item = &AuxPayload> {
        self.time_series.iter().chain(self.blob.iter())
    }

    /// With blob payload
    #[must_use]
    pub fn with_blob(mut self, payload: AuxPayload) -> Self {
        self.blob = Some(payload);
        self
    }

    /// With time-series payload
    #[must_use]
    pub fn with_time_series(mut self, payload: AuxPayload) -> Self {
        self.time_series = Some(payload);
        self
    }

    /// With bearer token
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field value, treating JSON null as absent
fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn string_field(object: Option<&Map<String, Value>>, field: &str) -> Option<String> {
    object
        .and_then(|object| object.get(field))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn aux_payload(message: &Map<String, Value>, kind: AuxKind) -> Option<AuxPayload> {
    let body = present(message, kind.field())?.clone();
    let inner = body.as_object();

    Some(AuxPayload {
        kind,
        database_name: string_field(inner, "databaseName")
            .or_else(|| string_field(Some(message), "databaseName")),
        store_name: string_field(inner, "storeName")
            .or_else(|| string_field(Some(message), "storeName")),
        body,
    })
}

/// Notification sent to the opener once the extension is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyNotification {
    /// Always `jupyterlite-ready`
    #[serde(rename = "type")]
    pub message_type: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl ReadyNotification {
    /// Notification stamped with the current time
    #[must_use]
    pub fn now() -> Self {
        Self {
            message_type: READY_MESSAGE_TYPE.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn other_types_are_ignored() {
        let parsed = InboundMessage::parse(&json!({"type": "resize", "w": 3})).unwrap();
        assert_eq!(
            parsed,
            InboundMessage::Ignored {
                message_type: Some("resize".into())
            }
        );

        let untyped = InboundMessage::parse(&json!({"filename": "x.ipynb"})).unwrap();
        assert_eq!(untyped, InboundMessage::Ignored { message_type: None });

        let scalar = InboundMessage::parse(&json!("load-notebook")).unwrap();
        assert!(matches!(scalar, InboundMessage::Ignored { .. }));
    }

    #[test]
    fn load_notebook_requires_filename_and_notebook() {
        let no_name = json!({"type": "load-notebook", "notebook": []});
        assert_eq!(
            InboundMessage::parse(&no_name),
            Err(ValidationError::MissingField("filename"))
        );

        let no_cells = json!({"type": "load-notebook", "filename": "a.ipynb"});
        assert_eq!(
            InboundMessage::parse(&no_cells),
            Err(ValidationError::MissingField("notebook"))
        );

        let null_cells = json!({"type": "load-notebook", "filename": "a.ipynb", "notebook": null});
        assert_eq!(
            InboundMessage::parse(&null_cells),
            Err(ValidationError::MissingField("notebook"))
        );
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let cells_object = json!({"type": "load-notebook", "filename": "a.ipynb", "notebook": {}});
        assert!(matches!(
            IngestRequest::parse(&cells_object),
            Err(ValidationError::InvalidField { field: "notebook", .. })
        ));

        let empty_name = json!({"type": "load-notebook", "filename": "", "notebook": []});
        assert!(matches!(
            IngestRequest::parse(&empty_name),
            Err(ValidationError::InvalidField { field: "filename", .. })
        ));

        assert_eq!(
            IngestRequest::parse(&json!([])),
            Err(ValidationError::NotAnObject)
        );
    }

    #[test]
    fn parses_full_message() {
        let raw = json!({
            "type": "load-notebook",
            "filename": "demo.ipynb",
            "notebook": [{"cell_type": "code", "source": "print(1)"}],
            "timeSeriesData": {"key": "series-1", "points": [1, 2, 3]},
            "blob": {"key": "blob-1", "databaseName": "blobs-db", "storeName": "blobs"},
            "databaseName": "series-db",
            "storeName": "series",
            "bearerToken": "tok"
        });

        let InboundMessage::LoadNotebook(request) = InboundMessage::parse(&raw).unwrap() else {
            panic!("expected load request");
        };

        assert_eq!(request.filename, "demo.ipynb");
        assert_eq!(request.cells.len(), 1);
        assert_eq!(request.bearer_token.as_deref(), Some("tok"));

        let (series_at, series_key) = request.time_series.as_ref().unwrap().target().unwrap();
        assert_eq!(series_at, StoreAddress::new("series-db", "series"));
        assert_eq!(series_key, "series-1");

        let (blob_at, blob_key) = request.blob.as_ref().unwrap().target().unwrap();
        assert_eq!(blob_at, StoreAddress::new("blobs-db", "blobs"));
        assert_eq!(blob_key, "blob-1");

        assert_eq!(request.aux_payloads().count(), 2);
    }

    #[test]
    fn aux_without_destination_fails_alone() {
        let raw = json!({
            "type": "load-notebook",
            "filename": "a.ipynb",
            "notebook": [],
            "blob": {"key": "b"}
        });
        let request = IngestRequest::parse(&raw).unwrap();
        assert_eq!(
            request.blob.unwrap().target().unwrap_err(),
            ValidationError::MissingField("blob.databaseName")
        );
    }

    #[test]
    fn empty_token_is_absent() {
        let raw = json!({"type": "load-notebook", "filename": "a.ipynb", "notebook": [], "bearerToken": ""});
        assert_eq!(IngestRequest::parse(&raw).unwrap().bearer_token, None);
    }

    #[test]
    fn non_string_token_is_dropped() {
        for token in [json!(12345), json!({"value": "t"}), json!(["t"])] {
            let raw = json!({"type": "load-notebook", "filename": "a.ipynb", "notebook": [], "bearerToken": token});
            let request = IngestRequest::parse(&raw).unwrap();
            assert_eq!(request.bearer_token, None);
            assert_eq!(request.filename, "a.ipynb");
        }
    }

    #[test]
    fn ready_notification_shape() {
        let ready = ReadyNotification::now();
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["type"], "jupyterlite-ready");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }
}
