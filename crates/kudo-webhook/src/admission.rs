//! AdmissionReview v1 wire model.
//!
//! The subset of the Kubernetes `admission.k8s.io/v1` types the webhook
//! exchanges with the API server. Field names and encodings (including the
//! base64 patch bytes) match the upstream JSON exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kudo_api::meta::GroupVersionKind;
use kudo_api::{GROUP, KIND_ESCALATION, KIND_ESCALATION_POLICY, VERSION};

/// Review kind the gate expects for escalation requests.
pub fn expected_escalation_kind() -> GroupVersionKind {
    GroupVersionKind::new(GROUP, VERSION, KIND_ESCALATION)
}

/// Review kind the gate expects for escalation policies.
pub fn expected_policy_kind() -> GroupVersionKind {
    GroupVersionKind::new(GROUP, VERSION, KIND_ESCALATION_POLICY)
}

/// Operation the API server is admitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Object creation.
    #[serde(rename = "CREATE")]
    Create,
    /// Object update.
    #[serde(rename = "UPDATE")]
    Update,
    /// Object deletion.
    #[serde(rename = "DELETE")]
    Delete,
    /// Proxied connection.
    #[serde(rename = "CONNECT")]
    Connect,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
        };
        f.write_str(s)
    }
}

/// Authenticated identity attached to the request by the API server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    /// Authenticated username.
    pub username: String,
    /// Groups the user belongs to.
    pub groups: Vec<String>,
}

/// One half of an admission review: what the API server wants admitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionRequest {
    /// Correlates the response with this request.
    pub uid: String,
    /// Kind of the object under review.
    pub kind: GroupVersionKind,
    /// Name of the object, when known.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Operation being admitted.
    pub operation: Option<Operation>,
    /// Authenticated requesting user.
    pub user_info: UserInfo,
    /// The object under review, raw.
    pub object: Value,
}

/// Status carried in a response; `Failure` statuses surface the message to
/// the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    /// `"Success"` or `"Failure"`.
    pub status: String,
    /// Human-readable explanation, shown to the requesting user.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Status {
    /// The success status.
    pub fn success() -> Self {
        Status {
            status: "Success".to_string(),
            message: String::new(),
        }
    }

    /// A failure status carrying a user-visible message.
    pub fn failure(message: impl Into<String>) -> Self {
        Status {
            status: "Failure".to_string(),
            message: message.into(),
        }
    }
}

/// Patch encoding of an admission response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    /// RFC 6902 JSON patch.
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// The other half of a review: the gate's verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionResponse {
    /// Echo of the request uid, set by the HTTP handler.
    pub uid: String,
    /// Whether the object may be persisted.
    pub allowed: bool,
    /// Verdict details; denial messages live here.
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
    /// Mutation to apply before persisting, base64 on the wire.
    #[serde(
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub patch: Option<Vec<u8>>,
    /// Encoding of `patch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    /// Admit the object.
    pub fn allowed() -> Self {
        AdmissionResponse {
            allowed: true,
            result: Some(Status::success()),
            ..AdmissionResponse::default()
        }
    }

    /// Refuse the object with a user-visible message.
    pub fn denied(message: impl Into<String>) -> Self {
        AdmissionResponse {
            allowed: false,
            result: Some(Status::failure(message)),
            ..AdmissionResponse::default()
        }
    }

    /// The masked response for server-side failures.
    pub fn unexpected_error() -> Self {
        AdmissionResponse::denied("Unexpected error, see controller logs for details")
    }

    /// Attach a JSON patch to apply on admission.
    pub fn with_json_patch(mut self, patch: Vec<u8>) -> Self {
        self.patch = Some(patch);
        self.patch_type = Some(PatchType::JsonPatch);
        self
    }
}

/// Envelope exchanged over the webhook endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionReview {
    /// `admission.k8s.io/v1`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// `AdmissionReview`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Present on inbound payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    /// Present on outbound payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| STANDARD.decode(s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn response_patch_is_base64_on_the_wire() {
        let response = AdmissionResponse::allowed()
            .with_json_patch(br#"[{"op":"replace","path":"/spec/requestor","value":"alice"}]"#.to_vec());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["status"]["status"], "Success");
        assert_eq!(json["patchType"], "JSONPatch");

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(json["patch"].as_str().unwrap())
            .unwrap();
        assert!(decoded.starts_with(b"[{\"op\":\"replace\""));
    }

    #[test]
    fn request_round_trips_from_api_server_shape() {
        let raw = serde_json::json!({
            "uid": "review-1",
            "kind": {"group": "k8s.kudo.dev", "version": "v1alpha1", "kind": "Escalation"},
            "operation": "CREATE",
            "userInfo": {"username": "alice", "groups": ["ops", "dev"]},
            "object": {"spec": {"policyName": "p"}},
        });

        let request: AdmissionRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.uid, "review-1");
        assert_eq!(request.kind, expected_escalation_kind());
        assert_eq!(request.operation, Some(Operation::Create));
        assert_eq!(request.user_info.username, "alice");
        assert_eq!(request.object["spec"]["policyName"], "p");
    }

    #[test]
    fn review_envelope_round_trips() {
        let review = AdmissionReview {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            request: Some(AdmissionRequest {
                uid: "review-1".to_string(),
                kind: expected_policy_kind(),
                operation: Some(Operation::Update),
                ..AdmissionRequest::default()
            }),
            response: None,
        };

        let json = serde_json::to_string(&review).unwrap();
        let back: AdmissionReview = serde_json::from_str(&json).unwrap();
        assert_eq!(back, review);
    }
}
