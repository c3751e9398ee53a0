use serde::Deserialize;

/// Booking request body. Everything arrives optional so the scheduler can
/// report missing fields itself instead of a deserializer rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointment {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    /// RFC 3339 timestamp.
    pub starts_at: Option<String>,
    pub service_id: Option<i64>,
    pub master_id: Option<i64>,
    pub branch_id: Option<i64>,
}

/// Calendar query: optional start-time bounds (inclusive) and master filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub master_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_appointment_accepts_camel_case() {
        let body: CreateAppointment = serde_json::from_str(
            r#"{
                "customerName": "Anna",
                "customerPhone": "+4915112345678",
                "startsAt": "2024-01-01T10:00:00Z",
                "serviceId": 3,
                "masterId": 1,
                "branchId": 2
            }"#,
        )
        .unwrap();
        assert_eq!(body.customer_name.as_deref(), Some("Anna"));
        assert_eq!(body.service_id, Some(3));
        assert_eq!(body.master_id, Some(1));
        assert_eq!(body.branch_id, Some(2));
    }

    #[test]
    fn list_query_fields_are_optional() {
        let q: ListQuery = serde_json::from_str(r#"{ "masterId": 5 }"#).unwrap();
        assert_eq!(q.master_id, Some(5));
        assert!(q.from.is_none());
        assert!(q.to.is_none());
    }
}
