use serde::{Deserialize, Serialize};

// ============================================================================
// Push Notification Types
// ============================================================================

/// Body posted to the push webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotificationRequest {
    pub title: String,
    pub body: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushNotificationResponse {
    #[serde(default)]
    pub success_count: Option<u32>,
    #[serde(default)]
    pub failure_count: Option<u32>,
}
