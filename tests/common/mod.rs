#![allow(dead_code)]

use morsel_shared::capabilities::{HttpHeaders, HttpOperation, HttpOutput, HttpResult, TimeOperation};
use morsel_shared::credentials::Credential;
use morsel_shared::{AppState, Effect, Model};

/// A model that looks like a restored, ready session.
pub fn logged_in_model() -> Model {
    let mut model = Model::default();
    model.vault.set(Credential::new("access-0", "refresh-0").unwrap());
    model.state = AppState::Ready;
    model
}

pub fn http_response(status: u16, body: serde_json::Value) -> HttpResult {
    Ok(HttpOutput {
        status,
        headers: HttpHeaders::new(),
        body: serde_json::to_vec(&body).unwrap(),
        request_id: "req-test".into(),
    })
}

/// Paths of every HTTP effect in an update, in order.
pub fn http_paths(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Http(request) => {
                let HttpOperation::Execute(r) = &request.operation;
                Some(r.path.as_str().to_string())
            }
            _ => None,
        })
        .collect()
}

/// Bearer tokens attached to each HTTP effect, in order.
pub fn bearer_tokens(effects: &[Effect]) -> Vec<Option<String>> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Http(request) => {
                let HttpOperation::Execute(r) = &request.operation;
                Some(
                    r.headers
                        .get("Authorization")
                        .map(|v| v.trim_start_matches("Bearer ").to_string()),
                )
            }
            _ => None,
        })
        .collect()
}

/// Storage operations issued by an update, as `"<op>:<backend>:<key>"`.
pub fn store_ops(effects: &[Effect]) -> Vec<String> {
    use morsel_shared::capabilities::StoreOperation;

    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Store(request) => Some(match &request.operation {
                StoreOperation::Get { key } => format!("get:{}", key.raw()),
                StoreOperation::Set { key, .. } => format!("set:{}", key.raw()),
                StoreOperation::Delete { key } => format!("delete:{}", key.raw()),
            }),
            _ => None,
        })
        .collect()
}

/// Timer ids armed by an update.
pub fn armed_timers(effects: &[Effect]) -> Vec<u64> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Time(request) => {
                let TimeOperation::NotifyAfter { id, .. } = &request.operation;
                Some(id.0)
            }
            _ => None,
        })
        .collect()
}

pub fn auth_success_body(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "data": {
            "user": {"id": "user-1", "email": "ana@example.com", "name": "Ana"},
            "accessToken": access,
            "refreshToken": refresh,
            "expiresIn": 3600,
        }
    })
}

pub fn bag_json(id: &str, lat: f64, lng: f64, is_favorite: bool) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "storeName": "Corner Bakery",
        "title": "Surprise Bag",
        "priceCents": 499,
        "currency": "EUR",
        "pickupStart": "2026-03-14T09:00:00.000Z",
        "pickupEnd": "2026-03-14T11:00:00Z",
        "latitude": lat,
        "longitude": lng,
        "itemsLeft": 3,
        "isFavorite": is_favorite,
    })
}

pub fn paginated_bags_body(bags: Vec<serde_json::Value>, has_more: bool) -> serde_json::Value {
    let total = bags.len();
    serde_json::json!({
        "success": true,
        "data": {
            "data": bags,
            "pagination": {
                "page": 1,
                "limit": 20,
                "total": total,
                "totalPages": 1,
                "hasMore": has_more,
            }
        }
    })
}
