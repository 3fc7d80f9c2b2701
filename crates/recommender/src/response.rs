//! Request parsing and response framing for a serving layer (HTTP, FaaS).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::{ErrorClass, QueryError, RecommenderError, RecommenderResult};

const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
}

impl RecommendRequest {
    /// Accepts `{"user_id": <non-negative integer>, "top_n"?: <non-negative integer>}`.
    pub fn from_json(body: &Value) -> Result<Self, QueryError> {
        let object = body.as_object().ok_or_else(|| {
            QueryError::InvalidRequest("Invalid request format. Must provide user_id in JSON format.".to_string())
        })?;

        let raw = object.get("user_id").ok_or_else(|| {
            QueryError::InvalidRequest("Invalid request format. Must provide user_id in JSON format.".to_string())
        })?;
        let user_id = match raw.as_i64() {
            Some(id) if id >= 0 => id,
            _ => {
                return Err(QueryError::InvalidRequest(
                    "Invalid user_id. It must be a non-negative integer.".to_string(),
                ))
            }
        };

        let top_n = match object.get("top_n") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().and_then(|n| usize::try_from(n).ok()).ok_or_else(|| {
                QueryError::InvalidRequest("Invalid top_n. It must be a non-negative integer.".to_string())
            })?),
        };

        Ok(Self { user_id, top_n })
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, QueryError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| QueryError::InvalidRequest(format!("body is not valid JSON: {}", e)))?;
        Self::from_json(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: i64,
    pub recommendations: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Status code plus JSON body, ready for any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

/// Frame a query outcome: 200 with recommendations, or 400/404/500 with an
/// error body. Internal failures never leak their message.
pub fn respond(user_id: i64, result: RecommenderResult<Vec<usize>>) -> Reply {
    match result {
        Ok(recommendations) => Reply {
            status: 200,
            body: serde_json::json!(RecommendationResponse {
                user_id,
                recommendations,
            }),
        },
        Err(e) => error_reply(&e),
    }
}

pub fn error_reply(e: &RecommenderError) -> Reply {
    let class = e.class();
    let message = match class {
        ErrorClass::BadRequest | ErrorClass::NotFound => {
            warn!(code = e.error_code(), error = %e, "Recommendation request rejected");
            e.to_string()
        }
        ErrorClass::Internal => {
            error!(code = e.error_code(), error = %e, "An error occurred while generating recommendations");
            INTERNAL_ERROR_MESSAGE.to_string()
        }
    };
    Reply {
        status: class.http_status(),
        body: serde_json::json!(ErrorResponse {
            error: message,
            code: e.error_code().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parsing() {
        assert_eq!(
            RecommendRequest::from_json(&json!({"user_id": 3})).unwrap(),
            RecommendRequest { user_id: 3, top_n: None }
        );
        assert_eq!(
            RecommendRequest::from_json(&json!({"user_id": 0, "top_n": 5})).unwrap().top_n,
            Some(5)
        );

        for bad in [
            json!({}),
            json!([1]),
            json!("3"),
            json!({"user_id": "3"}),
            json!({"user_id": 1.5}),
            json!({"user_id": -1}),
            json!({"user_id": 1, "top_n": -2}),
        ] {
            assert!(
                matches!(RecommendRequest::from_json(&bad), Err(QueryError::InvalidRequest(_))),
                "accepted {bad}"
            );
        }
        assert!(RecommendRequest::from_slice(b"{oops").is_err());
    }

    #[test]
    fn test_success_reply() {
        let reply = respond(1, Ok(vec![2, 0, 1]));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, json!({"user_id": 1, "recommendations": [2, 0, 1]}));
    }

    #[test]
    fn test_error_replies() {
        let not_found = respond(
            9,
            Err(QueryError::UserOutOfRange { index: 9, num_users: 2 }.into()),
        );
        assert_eq!(not_found.status, 404);
        assert_eq!(not_found.body["code"], "USER_OUT_OF_RANGE");

        let bad = error_reply(&QueryError::InvalidRequest("nope".into()).into());
        assert_eq!(bad.status, 400);

        let internal = respond(0, Err(RecommenderError::Internal("secret detail".into())));
        assert_eq!(internal.status, 500);
        assert_eq!(internal.body["error"], INTERNAL_ERROR_MESSAGE);
        assert!(!internal.body.to_string().contains("secret"));
    }
}
