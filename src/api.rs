use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<BearerToken>;
}

#[derive(Debug, Clone)]
pub struct BearerToken {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub http_client: Option<HttpClient>,
}

/// Authenticated client for the survey API. Login/registration happen before
/// a token exists and live on the free functions below; everything here
/// sends the bearer token from the provider.
pub struct Client {
    token_provider: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(token_provider: Arc<dyn TokenProvider>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn surveys_available(&self) -> Result<Vec<Survey>> {
        self.fetch_json(Method::GET, "surveys/disponibles")
    }

    pub fn surveys_voted(&self) -> Result<Vec<Survey>> {
        self.fetch_json(Method::GET, "surveys/votadas")
    }

    pub fn surveys_finished(&self) -> Result<Vec<Survey>> {
        self.fetch_json(Method::GET, "surveys/finalizadas")
    }

    pub fn survey_results(&self, survey_id: i64) -> Result<SurveyResults> {
        self.fetch_json(Method::GET, &format!("surveys/{survey_id}/results"))
    }

    pub fn vote(&self, survey_id: i64, answers: &[VoteAnswer]) -> Result<VoteReceipt> {
        if answers.is_empty() {
            bail!("api: at least one answer is required");
        }
        let body = serde_json::json!({ "answers": answers });
        let resp = self.request(
            Method::POST,
            &format!("surveys/{survey_id}/vote"),
            Some(body),
        )?;
        resp.json().map_err(Into::into)
    }

    pub fn comments_for_survey(&self, survey_id: i64) -> Result<Vec<Comment>> {
        self.fetch_json(Method::GET, &format!("comments/survey/{survey_id}"))
    }

    pub fn comment_count(&self, survey_id: i64) -> Result<i64> {
        let summary: CommentCount =
            self.fetch_json(Method::GET, &format!("comments/survey/{survey_id}/count"))?;
        Ok(summary.comments_count)
    }

    pub fn post_comment(&self, survey_id: i64, content: &str) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            bail!("api: comment text is required");
        }
        let body = serde_json::json!({ "survey_id": survey_id, "content": content });
        let resp = self.request(Method::POST, "comments/", Some(body))?;
        resp.json().map_err(Into::into)
    }

    pub fn me(&self) -> Result<Me> {
        self.fetch_json(Method::GET, "users/me")
    }

    pub fn gamification_status(&self) -> Result<GamificationStatus> {
        self.fetch_json(Method::GET, "gamificacion/estado")
    }

    fn fetch_json<T>(&self, method: Method, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(method, path, None)?;
        resp.json().map_err(Into::into)
    }

    fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        let token = self.token_provider.token()?;
        let url = self.base_url.join(path)?;

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        req = req.header(
            AUTHORIZATION,
            format!("Bearer {}", token.access_token),
        );
        if let Some(json) = body {
            req = req.json(&json);
        }

        let resp = req.send()?;
        check_status(resp)
    }
}

fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let detail = error_detail(resp);
    match status.as_u16() {
        401 => Err(anyhow!("api: unauthorized: {detail}")),
        403 => Err(anyhow!("api: forbidden: {detail}")),
        404 => Err(anyhow!("api: not found: {detail}")),
        _ => Err(anyhow!("api: error {status}: {detail}")),
    }
}

// FastAPI reports failures as {"detail": ...}; fall back to the raw body.
fn error_detail(resp: Response) -> String {
    let body = resp.text().unwrap_or_default();
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .map(|detail| match detail {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or(body)
}

/// Exchange credentials for a bearer token. The backend speaks the OAuth2
/// password form: `username` carries the e-mail address.
pub fn login(
    http: &HttpClient,
    base_url: &Url,
    user_agent: &str,
    email: &str,
    password: &str,
) -> Result<BearerToken> {
    let url = base_url.join("users/login")?;
    let form = vec![
        ("username".to_string(), email.to_string()),
        ("password".to_string(), password.to_string()),
    ];
    let resp = http
        .post(url)
        .header(USER_AGENT, user_agent)
        .form(&form)
        .send()?;
    let resp = check_status(resp)?;
    let token: LoginResponse = resp.json()?;
    Ok(BearerToken {
        access_token: token.access_token,
        token_type: token.token_type,
    })
}

pub fn register(
    http: &HttpClient,
    base_url: &Url,
    user_agent: &str,
    request: &RegisterRequest,
) -> Result<UserAccount> {
    let url = base_url.join("users/register")?;
    let resp = http
        .post(url)
        .header(USER_AGENT, user_agent)
        .json(request)
        .send()?;
    let resp = check_status(resp)?;
    resp.json().map_err(Into::into)
}

#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RegisterRequest {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "apellido", skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(rename = "correo")]
    pub email: String,
    #[serde(rename = "contraseña")]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResultsVisibility {
    #[default]
    #[serde(rename = "publica")]
    Public,
    #[serde(rename = "privada")]
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "segundos_restantes")]
    pub remaining_seconds: Option<i64>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default, rename = "visibilidad_resultados")]
    pub results_visibility: ResultsVisibility,
    #[serde(default, rename = "es_patrocinada")]
    pub sponsored: bool,
    #[serde(default, rename = "patrocinador")]
    pub sponsor: Option<String>,
    #[serde(default, rename = "recompensa_puntos")]
    pub reward_points: Option<i64>,
    #[serde(default, rename = "recompensa_dinero")]
    pub reward_money: Option<i64>,
    #[serde(default, rename = "presupuesto_total")]
    pub budget_total: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub total_votes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResults {
    pub survey_id: i64,
    pub title: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default, rename = "visibilidad_resultados")]
    pub results_visibility: ResultsVisibility,
    #[serde(default, rename = "es_patrocinada")]
    pub sponsored: bool,
    pub results: Vec<QuestionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: i64,
    pub question_text: String,
    pub options: Vec<OptionResult>,
    #[serde(default)]
    pub total_votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionResult {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteAnswer {
    pub question_id: i64,
    pub option_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VoteReceipt {
    #[serde(default)]
    pub message: String,
    pub survey_id: i64,
    #[serde(default, rename = "presupuesto_restante")]
    pub remaining_budget: Option<i64>,
    #[serde(default, rename = "usuario_puntos")]
    pub points: Option<i64>,
    #[serde(default, rename = "usuario_balance")]
    pub balance: Option<i64>,
    #[serde(default, rename = "usuario_nivel")]
    pub level: Option<i64>,
    #[serde(default, rename = "usuario_racha")]
    pub streak: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub survey_id: i64,
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    pub content: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentCount {
    #[allow(dead_code)]
    survey_id: i64,
    comments_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default, rename = "apellido")]
    pub surname: Option<String>,
    #[serde(rename = "correo")]
    pub email: String,
    #[serde(default, rename = "puntos")]
    pub points: i64,
    #[serde(default, rename = "rol")]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublicProfile {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default, rename = "nivel")]
    pub level: i64,
    #[serde(default, rename = "puntos")]
    pub points: i64,
    #[serde(default, rename = "racha_dias")]
    pub streak_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    #[serde(default)]
    pub balance: i64,
    #[serde(default, rename = "movimientos")]
    pub movements: Vec<WalletMovement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletMovement {
    pub id: i64,
    #[serde(rename = "tipo")]
    pub kind: String,
    #[serde(rename = "monto")]
    pub amount: i64,
    #[serde(default, rename = "fecha")]
    pub occurred_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "icono")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAchievement {
    #[serde(rename = "logro")]
    pub achievement: Achievement,
    #[serde(default, rename = "fecha_obtenido")]
    pub earned_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Me {
    pub user: UserAccount,
    #[serde(default)]
    pub public_profile: Option<PublicProfile>,
    #[serde(default)]
    pub wallet: Option<Wallet>,
    #[serde(default, rename = "logros")]
    pub achievements: Vec<UserAchievement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GamificationStatus {
    #[serde(default, rename = "puntos")]
    pub points: i64,
    #[serde(default, rename = "racha_dias")]
    pub streak_days: i64,
    #[serde(default, rename = "nivel")]
    pub level: i64,
    #[serde(default, rename = "logros")]
    pub achievements: Vec<Achievement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_feed_entry() {
        let payload = serde_json::json!({
            "id": 12,
            "title": "Best lunch spot",
            "description": "Pick one",
            "segundos_restantes": 3600,
            "questions": [{
                "id": 1,
                "text": "Where?",
                "options": [{"id": 10, "text": "Tacos"}, {"id": 11, "text": "Sushi"}],
                "total_votes": null
            }],
            "media_url": "https://cdn.test/clip.mp4",
            "media_urls": [],
            "visibilidad_resultados": "publica",
            "es_patrocinada": true,
            "patrocinador": "Acme",
            "recompensa_puntos": 10,
            "recompensa_dinero": 5,
            "presupuesto_total": 100
        });
        let survey: Survey = serde_json::from_value(payload).unwrap();
        assert_eq!(survey.remaining_seconds, Some(3600));
        assert!(survey.sponsored);
        assert_eq!(survey.results_visibility, ResultsVisibility::Public);
        assert_eq!(survey.questions[0].options.len(), 2);
    }

    #[test]
    fn decodes_results_with_optional_percentages() {
        let payload = serde_json::json!({
            "survey_id": 3,
            "title": "Closed",
            "media_url": null,
            "media_urls": [],
            "visibilidad_resultados": "privada",
            "es_patrocinada": false,
            "results": [{
                "question_id": 1,
                "question_text": "Q",
                "options": [{"id": 1, "text": "A", "votes": 4, "percentage": 80.0},
                            {"id": 2, "text": "B", "votes": 1}],
                "total_votes": 5
            }]
        });
        let results: SurveyResults = serde_json::from_value(payload).unwrap();
        assert_eq!(results.results_visibility, ResultsVisibility::Private);
        assert_eq!(results.results[0].options[1].percentage, None);
    }

    #[test]
    fn decodes_a_vote_receipt() {
        let payload = serde_json::json!({
            "message": "ok",
            "survey_id": 7,
            "presupuesto_restante": 95,
            "usuario_puntos": 120,
            "usuario_balance": 55,
            "usuario_nivel": 2,
            "usuario_racha": 4
        });
        let receipt: VoteReceipt = serde_json::from_value(payload).unwrap();
        assert_eq!(receipt.points, Some(120));
        assert_eq!(receipt.streak, Some(4));
    }

    #[test]
    fn register_request_uses_backend_field_names() {
        let request = RegisterRequest {
            name: "Ada".into(),
            surname: None,
            email: "ada@test.dev".into(),
            password: "secret".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["nombre"], "Ada");
        assert_eq!(value["correo"], "ada@test.dev");
        assert_eq!(value["contraseña"], "secret");
        assert!(value.get("apellido").is_none());
    }
}
