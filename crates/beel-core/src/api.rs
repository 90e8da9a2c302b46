//! Remote survey API seam.
//!
//! The sync core only needs three calls; their wire shapes belong to the
//! API client layer. Everything here returns either a parsed success
//! payload or a declared error with a human-readable message.

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;

/// Upload request assembled from an offline image record. The endpoint
/// requires every field; latitude/longitude default to "0" upstream when
/// the capture carried no fix.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUpload {
    pub beel_id: i64,
    pub title: String,
    pub uri: String,
    pub latitude: String,
    pub longitude: String,
}

#[async_trait]
pub trait SurveyApi: Send + Sync {
    async fn create_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError>;
    async fn update_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError>;
    async fn upload_photo(&self, photo: &PhotoUpload, token: &str) -> Result<Value, ApiError>;
}

#[async_trait]
impl<T: SurveyApi + ?Sized> SurveyApi for std::sync::Arc<T> {
    async fn create_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError> {
        (**self).create_survey(survey, token).await
    }

    async fn update_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError> {
        (**self).update_survey(survey, token).await
    }

    async fn upload_photo(&self, photo: &PhotoUpload, token: &str) -> Result<Value, ApiError> {
        (**self).upload_photo(photo, token).await
    }
}

/// reqwest-backed implementation talking to the beel survey server.
pub struct HttpSurveyApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSurveyApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ApiError::InvalidResponse(e.to_string()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Strip a `file://` scheme so the capture layer's URIs map onto plain
/// filesystem paths.
fn local_photo_path(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

#[async_trait]
impl SurveyApi for HttpSurveyApi {
    async fn create_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(self.url("/api/surveys"))
            .bearer_auth(token)
            .json(survey)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn update_survey(&self, survey: &Value, token: &str) -> Result<Value, ApiError> {
        let response = self
            .client
            .put(self.url("/api/surveys"))
            .bearer_auth(token)
            .json(survey)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn upload_photo(&self, photo: &PhotoUpload, token: &str) -> Result<Value, ApiError> {
        let path = local_photo_path(&photo.uri);
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Photo {
            path: path.to_string(),
            source,
        })?;
        let filename = format!(
            "offline_photo_{}.jpg",
            chrono::Utc::now().timestamp_millis()
        );
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new()
            .text("s_beel_id", photo.beel_id.to_string())
            .text("title", photo.title.clone())
            .part("photo[]", part)
            .text("latitude", photo.latitude.clone())
            .text("longitude", photo.longitude.clone());

        let response = self
            .client
            .post(self.url("/api/beels/photos"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Self::parse(response).await
    }
}
