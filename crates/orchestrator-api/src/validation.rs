//! Request validation for the submit endpoints.

use chrono::Utc;
use orchestrator_core::event::{
    DeliveryType, NewEvent, MAX_DESTINATION_LEN, MAX_EXTERNAL_JOB_ID_LEN, MAX_RETRIES_CEILING,
    MAX_SOURCE_LEN,
};

use crate::dto::SubmitEventRequest;

/// Turns a wire request into a store-ready `NewEvent`, or a human-readable
/// rejection reason. `default_max_retries` fills in an omitted
/// `max_retries`.
pub fn validate_submit(req: SubmitEventRequest, default_max_retries: i32) -> Result<NewEvent, String> {
    if req.external_job_id.is_empty() || req.external_job_id.len() > MAX_EXTERNAL_JOB_ID_LEN {
        return Err(format!(
            "external_job_id must be 1..{MAX_EXTERNAL_JOB_ID_LEN} characters"
        ));
    }
    if req.source.is_empty() || req.source.len() > MAX_SOURCE_LEN {
        return Err(format!("source must be 1..{MAX_SOURCE_LEN} characters"));
    }
    if req.destination.is_empty() || req.destination.len() > MAX_DESTINATION_LEN {
        return Err(format!(
            "destination must be 1..{MAX_DESTINATION_LEN} characters"
        ));
    }
    if req.scheduled_at <= Utc::now() {
        return Err("scheduled_at must be in the future".to_owned());
    }

    let delivery_type: DeliveryType = req.delivery_type.into();
    match delivery_type {
        DeliveryType::Http => {
            if !(req.destination.starts_with("http://") || req.destination.starts_with("https://")) {
                return Err("destination must begin with http:// or https:// for HTTP delivery".to_owned());
            }
        }
        DeliveryType::Broker => {
            if req.destination.contains(' ') {
                return Err("destination must not contain spaces for broker delivery".to_owned());
            }
        }
    }

    let max_retries = req.max_retries.unwrap_or(default_max_retries);
    if !(0..=MAX_RETRIES_CEILING).contains(&max_retries) {
        return Err(format!("max_retries must be 0..{MAX_RETRIES_CEILING}"));
    }

    Ok(NewEvent {
        external_job_id: req.external_job_id,
        source: req.source,
        scheduled_at: req.scheduled_at,
        delivery_type,
        destination: req.destination,
        payload: req.payload,
        max_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::WireDeliveryType;
    use chrono::Duration;

    fn valid_request() -> SubmitEventRequest {
        SubmitEventRequest {
            external_job_id: "job-1".into(),
            source: "orders".into(),
            scheduled_at: Utc::now() + Duration::minutes(5),
            delivery_type: WireDeliveryType::Http,
            destination: "https://example.invalid/hook".into(),
            payload: serde_json::json!({"a": 1}),
            max_retries: None,
        }
    }

    #[test]
    fn accepts_a_well_formed_http_request() {
        let event = validate_submit(valid_request(), 3).unwrap();
        assert_eq!(event.max_retries, 3);
        assert_eq!(event.delivery_type, DeliveryType::Http);
    }

    #[test]
    fn rejects_a_past_scheduled_at() {
        let mut req = valid_request();
        req.scheduled_at = Utc::now() - Duration::minutes(1);
        assert!(validate_submit(req, 3).is_err());
    }

    #[test]
    fn rejects_an_http_destination_without_scheme() {
        let mut req = valid_request();
        req.destination = "example.invalid/hook".into();
        assert!(validate_submit(req, 3).is_err());
    }

    #[test]
    fn rejects_a_broker_destination_with_spaces() {
        let mut req = valid_request();
        req.delivery_type = WireDeliveryType::Kafka;
        req.destination = "orders topic".into();
        assert!(validate_submit(req, 3).is_err());
    }

    #[test]
    fn rejects_max_retries_above_the_ceiling() {
        let mut req = valid_request();
        req.max_retries = Some(MAX_RETRIES_CEILING + 1);
        assert!(validate_submit(req, 3).is_err());
    }

    #[test]
    fn accepts_a_broker_destination_without_spaces() {
        let mut req = valid_request();
        req.delivery_type = WireDeliveryType::Kafka;
        req.destination = "orders-topic".into();
        let event = validate_submit(req, 3).unwrap();
        assert_eq!(event.delivery_type, DeliveryType::Broker);
    }
}
