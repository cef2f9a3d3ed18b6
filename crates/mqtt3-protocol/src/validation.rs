use crate::error::{MqttError, Result};

/// Longest client identifier the broker accepts.
pub const MAX_CLIENT_ID_LENGTH: usize = 256;

pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(MqttError::InvalidTopicName(
            "Topic name cannot be empty".to_string(),
        ));
    }
    if topic.contains(['+', '#']) {
        return Err(MqttError::InvalidTopicName(format!(
            "Topic name {topic:?} contains a wildcard"
        )));
    }
    if topic.contains('\0') {
        return Err(MqttError::InvalidTopicName(
            "Topic name contains a null character".to_string(),
        ));
    }
    Ok(())
}

/// Checks the structure of a subscription filter.
///
/// Rejected: the empty filter, empty levels, `#` anywhere but alone in the
/// last level, `+` sharing a level with other characters.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(MqttError::InvalidTopicFilter(
            "Topic filter cannot be empty".to_string(),
        ));
    }
    if filter.contains('\0') {
        return Err(MqttError::InvalidTopicFilter(
            "Topic filter contains a null character".to_string(),
        ));
    }

    let level_count = filter.split('/').count();
    for (index, level) in filter.split('/').enumerate() {
        if level.is_empty() {
            return Err(MqttError::InvalidTopicFilter(format!(
                "Topic filter {filter:?} has an empty level"
            )));
        }
        if level.contains('#') && (level != "#" || index + 1 != level_count) {
            return Err(MqttError::InvalidTopicFilter(format!(
                "'#' must be the whole last level in {filter:?}"
            )));
        }
        if level.contains('+') && level != "+" {
            return Err(MqttError::InvalidTopicFilter(format!(
                "'+' must occupy a whole level in {filter:?}"
            )));
        }
    }
    Ok(())
}

pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.len() > MAX_CLIENT_ID_LENGTH {
        return Err(MqttError::InvalidClientId(format!(
            "Client ID exceeds {MAX_CLIENT_ID_LENGTH} bytes"
        )));
    }
    if client_id.chars().any(char::is_control) {
        return Err(MqttError::InvalidClientId(
            "Client ID contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    validate_topic_name(topic).is_ok()
}

#[must_use]
pub fn is_valid_topic_filter(filter: &str) -> bool {
    validate_topic_filter(filter).is_ok()
}
