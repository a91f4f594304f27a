use crate::{error::AppError, pinning::ContentId, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// The most recently stored upload record, with its gateway URL.
pub async fn latest_upload(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let record = state
        .store
        .latest_upload()
        .await?
        .ok_or_else(|| AppError::NotFound("No uploads recorded yet".to_string()))?;

    let url = state.pinning.retrieval_url(&ContentId::new(record.cid.clone()));

    Ok(HttpResponse::Ok().json(json!({
        "id": record.id,
        "cid": record.cid,
        "url": url,
        "filename": record.filename,
        "user_id": record.user_id,
        "conversation_id": record.conversation_id,
        "interrupted": record.interrupted,
        "uploaded_at": record.uploaded_at
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::identity::HeaderIdentity;
    use crate::store::{MetadataStore, NewUploadRecord};
    use crate::testing::{FakePinning, FakeStore};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_latest_upload() {
        let store = Arc::new(FakeStore::default());
        let state = web::Data::new(AppState::new(
            AppConfig::default(),
            Arc::new(FakePinning::succeeding()),
            store.clone(),
            Arc::new(HeaderIdentity::new("x-user-id")),
        ));
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/api/v1/uploads/latest", web::get().to(latest_upload)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/uploads/latest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        store
            .insert_upload_record(&NewUploadRecord {
                cid: "QmLatest".to_string(),
                filename: "abc.webm".to_string(),
                user_id: Some(1),
                conversation_id: Some(5),
                interrupted: true,
                uploaded_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let req = test::TestRequest::get().uri("/api/v1/uploads/latest").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["cid"], "QmLatest");
        assert_eq!(body["interrupted"], true);
        assert_eq!(body["conversation_id"], 5);
        assert_eq!(body["url"], "https://gateway.test/ipfs/QmLatest");
    }
}
