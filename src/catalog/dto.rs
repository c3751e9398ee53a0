use serde::{Deserialize, Serialize};
use sqlx::types::Decimal;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranch {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBranch {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategory {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateService {
    pub name: Option<String>,
    pub duration_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMaster {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMaster {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub role: Option<String>,
}

/// Master as the API returns it: the stored object key replaced by a
/// presigned URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterOut {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub role: String,
    pub avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_service_accepts_numeric_price() {
        let body: CreateService = serde_json::from_str(
            r#"{ "name": "Haircut", "durationMinutes": 30, "price": 1000, "categoryId": null }"#,
        )
        .unwrap();
        assert_eq!(body.name.as_deref(), Some("Haircut"));
        assert_eq!(body.duration_minutes, Some(30));
        assert_eq!(body.price, Some(Decimal::new(1000, 0)));
        assert!(body.category_id.is_none());
    }

    #[test]
    fn master_out_serializes_camel_case() {
        let out = MasterOut {
            id: 1,
            name: "Alla".into(),
            active: true,
            role: "MASTER".into(),
            avatar_url: None,
        };
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("avatarUrl"));
        assert!(json.contains("\"active\":true"));
    }
}
